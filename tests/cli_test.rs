//! 命令行入口测试

#![cfg(feature = "cli")]

mod common;

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn run(data_dir: &Path, extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_esp_spell_toggle"))
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--plugins")
        .arg(data_dir.join("plugins.txt"))
        .arg("--spells")
        .arg(data_dir.join("spells.json"))
        .args(extra)
        .output()
        .unwrap()
}

#[test]
fn test_writes_patch_into_data_dir() {
    let temp_dir = TempDir::new().unwrap();
    common::write_data_dir(temp_dir.path(), "*STToggle.esp\n*Foo.esp\n");

    let output = run(temp_dir.path(), &[]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let patch = temp_dir.path().join("STToggle_Patch2.esp");
    assert!(patch.exists());
    let plugin = esp_spell_toggle::PluginFile::load(&patch).unwrap();
    assert_eq!(plugin.record_count(), 5);
}

#[test]
fn test_failure_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    common::write_data_dir(temp_dir.path(), "STToggle.esp\n*Foo.esp\n");

    let output = run(temp_dir.path(), &["--quiet"]);
    assert!(!output.status.success());
    assert!(!temp_dir.path().join("STToggle_Patch2.esp").exists());
}

#[test]
fn test_rejects_unknown_output_extension() {
    let temp_dir = TempDir::new().unwrap();
    common::write_data_dir(temp_dir.path(), "*STToggle.esp\n*Foo.esp\n");

    let target = temp_dir.path().join("patch.txt");
    let output = run(temp_dir.path(), &["--output", target.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(!target.exists());
}
