//! 读写接口

use std::path::Path;

use crate::utils::EspError;

/// 一个插件文件的完整字节
#[derive(Debug, Clone)]
pub struct RawEspData {
    pub bytes: Vec<u8>,
}

/// 读取插件字节，不做解析
pub trait EspReader {
    fn read(&self, path: &Path) -> Result<RawEspData, EspError>;
}

/// 写出已编码的补丁
pub trait EspWriter {
    fn write(&self, data: &RawEspData, path: &Path) -> Result<(), EspError>;
}
