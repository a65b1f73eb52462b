use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Seek, SeekFrom};
use std::path::Path;

use crate::datatypes::{read_u32, write_u32, RawString};
use crate::utils::EspError;

use super::{StringEntry, StringFileType};

/// 单个 STRING 文件
#[derive(Debug, Clone, Default)]
pub struct StringFile {
    /// 字符串条目映射（ID -> StringEntry）
    pub entries: HashMap<u32, StringEntry>,
}

impl StringFile {
    /// 读取磁盘上的 STRING 文件
    pub fn open(path: &Path, file_type: StringFileType) -> Result<Self, EspError> {
        let data = fs::read(path)?;
        Self::from_bytes(&data, file_type)
    }

    /// 解析字符串文件字节数据
    pub fn from_bytes(data: &[u8], file_type: StringFileType) -> Result<Self, EspError> {
        if data.len() < 8 {
            return Err(EspError::Truncated("STRING 文件头不足 8 字节".into()));
        }

        let mut cursor = Cursor::new(data);

        // 文件头：字符串数量 + 数据区大小
        let string_count = read_u32(&mut cursor)?;
        let _data_size = read_u32(&mut cursor)?;

        let string_data_start = 8 + string_count as u64 * 8;
        let mut entries = HashMap::with_capacity(string_count as usize);
        let mut skipped = 0usize;

        for i in 0..string_count as u64 {
            cursor.seek(SeekFrom::Start(8 + i * 8))?;

            let string_id = read_u32(&mut cursor)?;
            let relative_offset = read_u32(&mut cursor)?;
            let absolute_offset = string_data_start + relative_offset as u64;

            if absolute_offset >= data.len() as u64 {
                skipped += 1;
                continue; // 跳过无效的偏移量
            }

            let content = Self::read_string_data(data, absolute_offset as usize, file_type)?;
            entries.insert(string_id, StringEntry::new(string_id, content));
        }

        if skipped > 0 {
            tracing::warn!(
                "跳过了 {} 个无效偏移量的字符串（文件头声明 {} 个，实际解析 {} 个）",
                skipped,
                string_count,
                entries.len()
            );
        }

        Ok(StringFile { entries })
    }

    /// 读取字符串数据
    fn read_string_data(data: &[u8], start: usize, file_type: StringFileType) -> Result<String, EspError> {
        let bytes = if file_type.has_length_prefix() {
            // DLSTRINGS/ILSTRINGS: 先读取长度字段
            let mut cursor = Cursor::new(data);
            cursor.set_position(start as u64);
            let length = read_u32(&mut cursor)? as usize;
            let content_start = start + 4;

            if content_start + length > data.len() {
                return Err(EspError::Truncated("字符串长度超出文件边界".into()));
            }

            &data[content_start..content_start + length]
        } else {
            &data[start..]
        };

        // 截取到空终止符
        let end = bytes.iter().position(|&b| b == 0);
        match end {
            Some(end) => Ok(RawString::decode(&bytes[..end]).content),
            None if file_type.has_length_prefix() => Ok(RawString::decode(bytes).content),
            None => Err(EspError::InvalidFormat("未找到字符串终止符".into())),
        }
    }

    pub fn get_string(&self, id: u32) -> Option<&StringEntry> {
        self.entries.get(&id)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// 添加字符串，ID 已存在时覆盖
    pub fn insert(&mut self, id: u32, content: impl Into<String>) {
        self.entries.insert(id, StringEntry::new(id, content));
    }

    /// 重建STRING文件的二进制数据（UTF-8）
    pub fn rebuild(&self, file_type: StringFileType) -> Result<Vec<u8>, EspError> {
        let mut ids: Vec<u32> = self.entries.keys().copied().collect();
        ids.sort_unstable();

        let mut directory = Vec::with_capacity(ids.len() * 8);
        let mut blob = Vec::new();

        for id in &ids {
            write_u32(&mut directory, *id)?;
            write_u32(&mut directory, blob.len() as u32)?;

            let content = self.entries[id].content.as_bytes();
            if file_type.has_length_prefix() {
                write_u32(&mut blob, content.len() as u32 + 1)?;
            }
            blob.extend_from_slice(content);
            blob.push(0);
        }

        let mut buffer = Vec::with_capacity(8 + directory.len() + blob.len());
        write_u32(&mut buffer, ids.len() as u32)?;
        write_u32(&mut buffer, blob.len() as u32)?;
        buffer.extend_from_slice(&directory);
        buffer.extend_from_slice(&blob);
        Ok(buffer)
    }
}
