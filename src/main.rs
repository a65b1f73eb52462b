use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use esp_spell_toggle::io::{DefaultEspWriter, EspWriter, RawEspData};
use esp_spell_toggle::load_order::listing::{read_plugins_txt, with_implicit_masters};
use esp_spell_toggle::patcher::load_declarations;
use esp_spell_toggle::utils::create_backup;
use esp_spell_toggle::{
    encode_patch, run_patch, LoadOrder, ModKey, ModListing, PatchHeader, PatcherConfig, PluginSpells,
    SUPPORTED_EXTENSIONS,
};

#[derive(Parser)]
#[command(name = "esp_spell_toggle")]
#[command(about = "为指定法术生成可切换的维持法术补丁")]
#[command(version)]
struct Cli {
    /// 游戏 Data 目录
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    /// plugins.txt 路径（未指定时只使用基础插件与声明中的插件）
    #[arg(short, long)]
    plugins: Option<PathBuf>,

    /// 目标法术声明列表
    #[arg(short, long, default_value = "spells.json")]
    spells: PathBuf,

    /// 输出插件路径（默认写入 Data 目录）
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 配置文件（JSON）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 以轻量插件（ESL）输出
    #[arg(long)]
    light: bool,

    /// 覆盖前备份已有的输出文件
    #[arg(long)]
    backup: bool,

    /// 显示调试日志
    #[arg(short, long)]
    verbose: bool,

    /// 静默模式(仅输出警告和错误)
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose, cli.quiet);

    let config = load_config(&cli)?;
    let declarations = load_declarations(&cli.spells)
        .with_context(|| format!("无法读取声明列表 {}", cli.spells.display()))?;

    let listings = build_listings(&cli, &config, &declarations)?;
    let wanted = wanted_plugins(&config, &declarations);
    let load_order = LoadOrder::load(&cli.data_dir, listings, &wanted, &config.language)
        .context("加载插件失败")?;

    let patch = run_patch(&config, &declarations, &load_order)?;
    let summary = patch.summary(declarations.iter().map(|d| d.spells.len()).sum());

    let header = PatchHeader {
        author: config.author.clone(),
        description: None,
    };
    let bytes = encode_patch(&patch, &load_order.mod_keys(), &header)?;

    let output_path = output_path(&cli, &config);
    if cli.backup && output_path.exists() {
        let backup = create_backup(&output_path)?;
        tracing::info!("已备份到 {}", backup.display());
    }
    DefaultEspWriter.write(&RawEspData { bytes }, &output_path)?;

    if !cli.quiet {
        println!("{}", summary);
        println!("输出文件: {}", output_path.display());
    }
    Ok(())
}

fn setup_tracing(verbose: bool, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else if quiet {
            EnvFilter::new("warn")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// 配置文件 + 命令行覆盖
fn load_config(cli: &Cli) -> Result<PatcherConfig> {
    let mut config = match &cli.config {
        Some(path) => PatcherConfig::load(path)
            .with_context(|| format!("无法读取配置文件 {}", path.display()))?,
        None => PatcherConfig::default(),
    };

    if cli.light {
        config.light = true;
    }

    if let Some(output) = &cli.output {
        validate_output(output)?;
        if let Some(name) = output.file_name().and_then(|name| name.to_str()) {
            config.output_name = name.to_string();
        }
    }

    Ok(config)
}

/// 验证输出文件扩展名
fn validate_output(output: &Path) -> Result<()> {
    let extension = output
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    if !SUPPORTED_EXTENSIONS.iter().any(|&ext| Some(ext) == extension.as_deref()) {
        bail!("输出文件必须是ESP、ESM或ESL文件: {}", output.display());
    }
    Ok(())
}

fn build_listings(cli: &Cli, config: &PatcherConfig, declarations: &[PluginSpells]) -> Result<Vec<ModListing>> {
    let listings = match &cli.plugins {
        Some(path) => read_plugins_txt(path)
            .with_context(|| format!("无法读取 {}", path.display()))?,
        None => wanted_plugins(config, declarations)
            .into_iter()
            .map(|mod_key| ModListing::new(mod_key, true))
            .collect(),
    };
    Ok(with_implicit_masters(listings, &cli.data_dir))
}

/// 运行中需要解析的插件：基础插件与声明中的来源插件
fn wanted_plugins(config: &PatcherConfig, declarations: &[PluginSpells]) -> Vec<ModKey> {
    let mut wanted = vec![config.base_mod_key()];
    for declaration in declarations {
        let mod_key = ModKey::new(&declaration.plugin);
        if !wanted.contains(&mod_key) {
            wanted.push(mod_key);
        }
    }
    wanted
}

fn output_path(cli: &Cli, config: &PatcherConfig) -> PathBuf {
    cli.output
        .clone()
        .unwrap_or_else(|| cli.data_dir.join(&config.output_name))
}
