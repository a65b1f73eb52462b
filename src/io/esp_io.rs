//! 基于文件系统的默认读写实现

use std::path::{Path, PathBuf};

use super::traits::{EspReader, EspWriter, RawEspData};
use crate::utils::EspError;

#[derive(Debug, Clone, Default)]
pub struct DefaultEspReader;

impl EspReader for DefaultEspReader {
    fn read(&self, path: &Path) -> Result<RawEspData, EspError> {
        Ok(RawEspData {
            bytes: std::fs::read(path)?,
        })
    }
}

/// 先写入同目录下的临时文件，再重命名为目标文件
///
/// 写入中途失败时目标文件保持原样。
#[derive(Debug, Clone, Default)]
pub struct DefaultEspWriter;

impl EspWriter for DefaultEspWriter {
    fn write(&self, data: &RawEspData, path: &Path) -> Result<(), EspError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let staging = staging_path(path);
        if let Err(err) = std::fs::write(&staging, &data.bytes).and_then(|_| std::fs::rename(&staging, path)) {
            let _ = std::fs::remove_file(&staging);
            return Err(err.into());
        }

        tracing::info!("已写入 {}（{} bytes）", path.display(), data.bytes.len());
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
