//! 补丁配置

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::form_key::{FormKey, ModKey};
use crate::utils::{parse_hex_form_id, EspError};

/// 模板记录在基础插件中的本地键
///
/// JSON 中既可写数字，也可写十六进制字符串（如 `"0x001D8C"`）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateKeys {
    #[serde(deserialize_with = "hex_or_number")]
    pub single_cast_effect: u32,
    #[serde(deserialize_with = "hex_or_number")]
    pub dual_cast_effect: u32,
    #[serde(deserialize_with = "hex_or_number")]
    pub cost_perk: u32,
    #[serde(deserialize_with = "hex_or_number")]
    pub cost_spell: u32,
    #[serde(deserialize_with = "hex_or_number")]
    pub effects_spell: u32,
}

impl Default for TemplateKeys {
    fn default() -> Self {
        Self {
            single_cast_effect: 0x001D8C,
            dual_cast_effect: 0x00285E,
            cost_perk: 0x001D8E,
            cost_spell: 0x00285C,
            effects_spell: 0x00434D,
        }
    }
}

/// 补丁运行配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatcherConfig {
    /// 提供模板记录的插件
    pub base_plugin: String,
    /// 输出插件的文件名
    pub output_name: String,
    pub templates: TemplateKeys,
    /// 以轻量插件（ESL）输出
    pub light: bool,
    /// 写入头部 CNAM 的作者
    pub author: String,
    /// 本地化插件的 STRING 文件语言
    pub language: String,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self {
            base_plugin: "STToggle.esp".to_string(),
            output_name: "STToggle_Patch2.esp".to_string(),
            templates: TemplateKeys::default(),
            light: false,
            author: "DEFAULT".to_string(),
            language: "english".to_string(),
        }
    }
}

impl PatcherConfig {
    /// 从 JSON 文件加载，缺省字段取默认值
    pub fn load(path: &Path) -> Result<Self, EspError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn base_mod_key(&self) -> ModKey {
        ModKey::new(&self.base_plugin)
    }

    pub fn output_mod_key(&self) -> ModKey {
        ModKey::new(&self.output_name)
    }

    /// 基础插件中某个模板的 FormKey
    pub fn template(&self, local_key: u32) -> FormKey {
        self.base_mod_key().make_form_key(local_key)
    }
}

fn hex_or_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => parse_hex_form_id(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("无效的 FormID: {}", text))),
    }
}
