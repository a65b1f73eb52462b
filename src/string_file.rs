//! Bethesda STRING 文件读取
//!
//! 本地化插件的 FULL/DESC 等字段只存储字符串 ID，文本位于
//! `<插件名>_<语言>.STRINGS/.DLSTRINGS/.ILSTRINGS` 中。

mod file;
mod set;


pub use file::StringFile;
pub use set::StringFileSet;

/// Bethesda字符串文件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringFileType {
    /// 对话字符串文件
    DLSTRINGS,
    /// 界面字符串文件
    ILSTRINGS,
    /// 一般字符串文件
    STRINGS,
}

impl StringFileType {
    pub const ALL: [StringFileType; 3] = [
        StringFileType::STRINGS,
        StringFileType::ILSTRINGS,
        StringFileType::DLSTRINGS,
    ];

    /// 从文件扩展名获取字符串文件类型
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_uppercase().as_str() {
            "DLSTRINGS" => Some(StringFileType::DLSTRINGS),
            "ILSTRINGS" => Some(StringFileType::ILSTRINGS),
            "STRINGS" => Some(StringFileType::STRINGS),
            _ => None,
        }
    }

    /// 获取文件扩展名
    pub fn to_extension(&self) -> &'static str {
        match self {
            StringFileType::DLSTRINGS => "DLSTRINGS",
            StringFileType::ILSTRINGS => "ILSTRINGS",
            StringFileType::STRINGS => "STRINGS",
        }
    }

    /// 检查是否需要长度前缀（DLSTRINGS和ILSTRINGS需要）
    pub fn has_length_prefix(&self) -> bool {
        matches!(self, StringFileType::DLSTRINGS | StringFileType::ILSTRINGS)
    }
}

/// 字符串条目
#[derive(Debug, Clone, PartialEq)]
pub struct StringEntry {
    /// 字符串ID
    pub id: u32,
    /// 字符串内容
    pub content: String,
}

impl StringEntry {
    pub fn new(id: u32, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
        }
    }
}
