//! 目标法术声明列表（spells.json）

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::form_key::{FormKey, ModKey};
use crate::utils::{parse_hex_form_id, EspError};

use super::PatchError;

/// 一个来源插件及其中要处理的法术
///
/// ```json
/// [{ "Plugin": "Foo.esp", "Spells": ["0x012345", "0x012346"] }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpells {
    #[serde(rename = "Plugin", alias = "plugin")]
    pub plugin: String,
    #[serde(rename = "Spells", alias = "spells")]
    pub spells: Vec<String>,
}

impl PluginSpells {
    pub fn new(plugin: impl Into<String>, spells: &[&str]) -> Self {
        Self {
            plugin: plugin.into(),
            spells: spells.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// 已校验的目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub source: ModKey,
    pub target: FormKey,
}

pub fn parse_declarations(text: &str) -> Result<Vec<PluginSpells>, EspError> {
    Ok(serde_json::from_str(text)?)
}

pub fn load_declarations(path: &Path) -> Result<Vec<PluginSpells>, EspError> {
    let text = std::fs::read_to_string(path)?;
    parse_declarations(&text)
}

/// 展开并校验声明，保持声明顺序
///
/// 十六进制 ID 截取为 24 位本地键；同一目标出现两次时报错。
pub fn validate_declarations(declarations: &[PluginSpells]) -> Result<Vec<Declaration>, PatchError> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();

    for entry in declarations {
        let source = ModKey::new(&entry.plugin);
        for value in &entry.spells {
            let raw = parse_hex_form_id(value).ok_or_else(|| PatchError::InvalidDeclaration {
                plugin: entry.plugin.clone(),
                value: value.clone(),
            })?;

            let target = source.make_form_key(raw);
            if !seen.insert(target.clone()) {
                return Err(PatchError::DuplicateTarget { form_key: target });
            }

            result.push(Declaration {
                source: source.clone(),
                target,
            });
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_both_casings() {
        let declarations = parse_declarations(
            r#"[
                { "Plugin": "Foo.esp", "Spells": ["0x012345", "12346"] },
                { "plugin": "Bar.esp", "spells": [] }
            ]"#,
        )
        .unwrap();

        assert_eq!(declarations.len(), 2);
        assert_eq!(declarations[0], PluginSpells::new("Foo.esp", &["0x012345", "12346"]));
        assert_eq!(declarations[1].plugin, "Bar.esp");
    }

    #[test]
    fn test_validate_masks_to_local_key() {
        let declarations = vec![PluginSpells::new("Foo.esp", &["0x02012345", "0X800"])];
        let validated = validate_declarations(&declarations).unwrap();

        assert_eq!(validated[0].target, ModKey::new("Foo.esp").make_form_key(0x012345));
        assert_eq!(validated[1].target.local_key(), 0x800);
        assert_eq!(validated[1].source, ModKey::new("foo.esp"));
    }

    #[test]
    fn test_duplicate_target() {
        let declarations = vec![
            PluginSpells::new("Foo.esp", &["0x012345"]),
            PluginSpells::new("FOO.ESP", &["012345"]),
        ];
        assert!(matches!(
            validate_declarations(&declarations),
            Err(PatchError::DuplicateTarget { .. })
        ));
    }

    #[test]
    fn test_invalid_hex() {
        let declarations = vec![PluginSpells::new("Foo.esp", &["0x01234G"])];
        match validate_declarations(&declarations) {
            Err(PatchError::InvalidDeclaration { plugin, value }) => {
                assert_eq!(plugin, "Foo.esp");
                assert_eq!(value, "0x01234G");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
