use thiserror::Error;
use std::path::Path;

/// 二进制层错误类型
#[derive(Error, Debug)]
pub enum EspError {
    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Truncated data: {0}")]
    Truncated(String),

    #[error("Compression error: {0}")]
    CompressionError(String),

    #[error("Too many masters: {0} (at most 255)")]
    TooManyMasters(usize),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// 解析十六进制 FormID 字符串（允许 `0x`/`0X` 前缀）
///
/// 返回完整的 32 位值，调用者自行截取 24 位本地键。
pub fn parse_hex_form_id(text: &str) -> Option<u32> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() {
        return None;
    }

    u32::from_str_radix(digits, 16).ok()
}

/// 创建文件备份
pub fn create_backup(file_path: &Path) -> Result<std::path::PathBuf, EspError> {
    if !file_path.exists() {
        return Err(EspError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "原文件不存在"
        )));
    }

    let timestamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S");
    let extension = file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("esp");
    let backup_path = file_path.with_extension(format!("{}.{}.bak", extension, timestamp));

    std::fs::copy(file_path, &backup_path)
        .map_err(EspError::IoError)?;

    Ok(backup_path)
}
