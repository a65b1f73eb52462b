//! plugins.txt 列表

use std::path::Path;

use crate::form_key::ModKey;
use crate::utils::EspError;

/// 游戏总是按此顺序最先加载的主文件
pub const IMPLICIT_MASTERS: [&str; 5] = [
    "Skyrim.esm",
    "Update.esm",
    "Dawnguard.esm",
    "HearthFires.esm",
    "Dragonborn.esm",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModListing {
    pub mod_key: ModKey,
    pub enabled: bool,
}

impl ModListing {
    pub fn new(mod_key: ModKey, enabled: bool) -> Self {
        Self { mod_key, enabled }
    }
}

/// 解析 plugins.txt 内容
///
/// `*Name.esp` 为启用，`Name.esp` 为禁用，`#` 开头为注释；重复项只保留第一次出现。
pub fn parse_plugins_txt(text: &str) -> Vec<ModListing> {
    let mut listings: Vec<ModListing> = Vec::new();

    for line in text.trim_start_matches('\u{feff}').lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (name, enabled) = match line.strip_prefix('*') {
            Some(name) => (name.trim(), true),
            None => (line, false),
        };

        let mod_key = ModKey::new(name);
        if listings.iter().any(|listing| listing.mod_key == mod_key) {
            tracing::warn!("plugins.txt 中重复的条目 {}，已忽略", name);
            continue;
        }
        listings.push(ModListing::new(mod_key, enabled));
    }

    listings
}

pub fn read_plugins_txt(path: &Path) -> Result<Vec<ModListing>, EspError> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_plugins_txt(&text))
}

/// 在列表前补上数据目录中存在、但未列出的隐式主文件
pub fn with_implicit_masters(listings: Vec<ModListing>, data_dir: &Path) -> Vec<ModListing> {
    let mut result: Vec<ModListing> = IMPLICIT_MASTERS
        .iter()
        .map(|name| ModKey::new(name))
        .filter(|mod_key| !listings.iter().any(|listing| &listing.mod_key == mod_key))
        .filter(|mod_key| data_dir.join(mod_key.name()).exists())
        .map(|mod_key| ModListing::new(mod_key, true))
        .collect();

    result.extend(listings);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_plugins_txt() {
        let text = "\u{feff}# This file is used by the game\n*STToggle.esp\nFoo.esp\n\n  *Bar.esp  \n*sttoggle.esp\n";
        let listings = parse_plugins_txt(text);

        assert_eq!(
            listings,
            vec![
                ModListing::new(ModKey::new("STToggle.esp"), true),
                ModListing::new(ModKey::new("Foo.esp"), false),
                ModListing::new(ModKey::new("Bar.esp"), true),
            ]
        );
    }

    #[test]
    fn test_implicit_masters_are_prepended_when_present() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("Skyrim.esm"), b"").unwrap();
        std::fs::write(temp_dir.path().join("Update.esm"), b"").unwrap();

        let listings = vec![
            ModListing::new(ModKey::new("Update.esm"), false),
            ModListing::new(ModKey::new("Foo.esp"), true),
        ];
        let result = with_implicit_masters(listings, temp_dir.path());

        let names: Vec<(&str, bool)> = result.iter().map(|l| (l.mod_key.name(), l.enabled)).collect();
        assert_eq!(names, vec![("Skyrim.esm", true), ("Update.esm", false), ("Foo.esp", true)]);
    }

    #[test]
    fn test_read_plugins_txt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("plugins.txt");
        std::fs::write(&path, "*Foo.esp\r\n*Bar.esp\r\n").unwrap();

        let listings = read_plugins_txt(&path).unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[1].mod_key.name(), "Bar.esp");
    }
}
