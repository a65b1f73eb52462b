use std::collections::HashMap;
use std::path::Path;

use crate::utils::EspError;

use super::file::StringFile;
use super::{StringEntry, StringFileType};

/// 一个插件在某种语言下的全部字符串文件
#[derive(Debug, Clone, Default)]
pub struct StringFileSet {
    files: HashMap<StringFileType, StringFile>,
}

impl StringFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 扫描目录，读取 `<插件名>_<语言>.<类型>` 形式的文件
    ///
    /// 文件名比较不区分大小写；目录不存在或缺少某种类型时跳过。
    pub fn load_from_directory(directory: &Path, plugin_name: &str, language: &str) -> Result<Self, EspError> {
        let mut set = Self::new();
        if !directory.is_dir() {
            return Ok(set);
        }

        let prefix = format!("{}_{}.", plugin_name, language).to_lowercase();
        let mut entries: Vec<_> = std::fs::read_dir(directory)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .collect();
        entries.sort();

        for path in entries {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let lower = name.to_lowercase();
            let Some(file_type) = lower.strip_prefix(&prefix).and_then(StringFileType::from_extension) else {
                continue;
            };
            if set.files.contains_key(&file_type) {
                continue;
            }

            tracing::debug!("读取字符串文件 {}", path.display());
            set.add_file(file_type, StringFile::open(&path, file_type)?);
        }

        Ok(set)
    }

    pub fn add_file(&mut self, file_type: StringFileType, string_file: StringFile) {
        self.files.insert(file_type, string_file);
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get_string_by_type(&self, file_type: StringFileType, id: u32) -> Option<&StringEntry> {
        self.files.get(&file_type)?.get_string(id)
    }
}
