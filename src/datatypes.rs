use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

// 基础整数类型读取函数
pub fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8, std::io::Error> {
    cursor.read_u8()
}

pub fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16, std::io::Error> {
    cursor.read_u16::<LittleEndian>()
}

pub fn read_i16(cursor: &mut Cursor<&[u8]>) -> Result<i16, std::io::Error> {
    cursor.read_i16::<LittleEndian>()
}

pub fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, std::io::Error> {
    cursor.read_u32::<LittleEndian>()
}

pub fn read_i32(cursor: &mut Cursor<&[u8]>) -> Result<i32, std::io::Error> {
    cursor.read_i32::<LittleEndian>()
}

pub fn read_f32(cursor: &mut Cursor<&[u8]>) -> Result<f32, std::io::Error> {
    cursor.read_f32::<LittleEndian>()
}

// 基础整数类型写入函数
pub fn write_u8(writer: &mut dyn Write, value: u8) -> Result<(), std::io::Error> {
    writer.write_u8(value)
}

pub fn write_u16(writer: &mut dyn Write, value: u16) -> Result<(), std::io::Error> {
    writer.write_u16::<LittleEndian>(value)
}

pub fn write_i16(writer: &mut dyn Write, value: i16) -> Result<(), std::io::Error> {
    writer.write_i16::<LittleEndian>(value)
}

pub fn write_u32(writer: &mut dyn Write, value: u32) -> Result<(), std::io::Error> {
    writer.write_u32::<LittleEndian>(value)
}

pub fn write_i32(writer: &mut dyn Write, value: i32) -> Result<(), std::io::Error> {
    writer.write_i32::<LittleEndian>(value)
}

pub fn write_f32(writer: &mut dyn Write, value: f32) -> Result<(), std::io::Error> {
    writer.write_f32::<LittleEndian>(value)
}

/// 插件内文本统一使用的编码（非本地化插件）
const PLUGIN_ENCODING: &encoding_rs::Encoding = encoding_rs::WINDOWS_1252;

// 支持的编码
const SUPPORTED_ENCODINGS: &[&str] = &["utf-8", "windows-1252", "windows-1250", "windows-1251"];

#[derive(Debug, Clone)]
pub struct RawString {
    pub content: String,
    pub encoding: String,
}

impl RawString {
    /// 尝试多种编码解码
    pub fn decode(data: &[u8]) -> Self {
        for encoding_name in SUPPORTED_ENCODINGS {
            if let Some(encoding) = encoding_rs::Encoding::for_label(encoding_name.as_bytes()) {
                let (decoded, _, had_errors) = encoding.decode(data);
                if !had_errors {
                    return RawString {
                        content: decoded.into_owned(),
                        encoding: encoding_name.to_string(),
                    };
                }
            }
        }

        // 回退到UTF-8，忽略错误
        RawString {
            content: String::from_utf8_lossy(data).into_owned(),
            encoding: "utf-8".to_string(),
        }
    }

    /// Z字符串解析(以null结尾)
    pub fn parse_zstring(data: &[u8]) -> Self {
        let null_pos = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Self::decode(&data[..null_pos])
    }

    /// W字符串解析(u16 长度前缀，VMAD 使用)
    pub fn parse_wstring(cursor: &mut Cursor<&[u8]>) -> Result<Self, std::io::Error> {
        let length = read_u16(cursor)? as usize;
        let mut buffer = vec![0u8; length];
        cursor.read_exact(&mut buffer)?;
        Ok(Self::decode(&buffer))
    }
}

/// 按插件编码（Windows-1252）编码文本，无法表示的字符以 `?` 代替
pub fn encode_plugin_text(text: &str) -> Vec<u8> {
    let (encoded, _, _) = PLUGIN_ENCODING.encode(text);
    encoded.into_owned()
}

/// 编码为以 null 结尾的 Z字符串
pub fn encode_zstring(text: &str) -> Vec<u8> {
    let mut bytes = encode_plugin_text(text);
    bytes.push(0);
    bytes
}

/// 写入 W字符串（u16 长度前缀）
pub fn write_wstring(writer: &mut dyn Write, text: &str) -> Result<(), std::io::Error> {
    let bytes = encode_plugin_text(text);
    let length = u16::try_from(bytes.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "W字符串长度超过 65535 字节")
    })?;
    write_u16(writer, length)?;
    writer.write_all(&bytes)
}

// 记录标志位定义
bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u32 {
        const MASTER_FILE = 0x00000001;        // ESM标志
        const DELETED = 0x00000020;            // 已删除
        const LOCALIZED = 0x00000080;          // 本地化
        const LIGHT_MASTER = 0x00000200;       // 轻量级主文件
        const PERSISTENT = 0x00000400;         // 持久化
        const DISABLED = 0x00000800;           // 禁用
        const IGNORED = 0x00001000;            // 忽略
        const VISIBLE_DISTANT = 0x00008000;    // 远距离可见
        const COMPRESSED = 0x00040000;         // 压缩

        // 保留未知位，保证往返写入不丢失
        const _ = !0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstring_stops_at_null() {
        let parsed = RawString::parse_zstring(b"Flames\0junk");
        assert_eq!(parsed.content, "Flames");
    }

    #[test]
    fn test_wstring_roundtrip_through_cursor() {
        let mut buffer = Vec::new();
        write_wstring(&mut buffer, "STMaintainSpellEffect").unwrap();
        assert_eq!(&buffer[..2], &[21, 0]);

        let mut cursor = Cursor::new(&buffer[..]);
        let parsed = RawString::parse_wstring(&mut cursor).unwrap();
        assert_eq!(parsed.content, "STMaintainSpellEffect");
    }

    #[test]
    fn test_encode_plugin_text_uses_windows_1252() {
        assert_eq!(encode_plugin_text("é"), vec![0xE9]);
        assert_eq!(encode_zstring("a"), vec![b'a', 0]);
    }

    #[test]
    fn test_record_flags_keep_unknown_bits() {
        let flags = RecordFlags::from_bits_retain(0x0004_0081);
        assert!(flags.contains(RecordFlags::COMPRESSED));
        assert!(flags.contains(RecordFlags::LOCALIZED));
        assert_eq!(flags.bits(), 0x0004_0081);
    }
}
