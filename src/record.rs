use crate::datatypes::{read_u16, read_u32, RecordFlags};
use crate::subrecord::{Signature, Subrecord};
use crate::utils::EspError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Cursor, Read, Write};

/// 记录头部中除类型/大小/FormID 之外的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// 标志位
    pub flags: RecordFlags,
    /// 时间戳
    pub timestamp: u16,
    /// 版本控制信息
    pub version_control_info: u16,
    /// 内部版本（Form Version）
    pub internal_version: u16,
    /// 未知字段
    pub unknown: u16,
}

impl Default for RecordHeader {
    fn default() -> Self {
        Self {
            flags: RecordFlags::empty(),
            timestamp: 0,
            version_control_info: 0,
            // SSE 的 Form Version
            internal_version: 44,
            unknown: 0,
        }
    }
}

/// 原始记录结构（子记录尚未解码为类型化字段）
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// 记录类型（原始4字节）
    pub signature: Signature,
    /// FormID（相对于所属文件的主文件列表）
    pub form_id: u32,
    /// 头部字段
    pub header: RecordHeader,
    /// 子记录列表（已解压）
    pub subrecords: Vec<Subrecord>,
}

impl RawRecord {
    /// 解析记录
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self, EspError> {
        Self::validate_header_size(cursor)?;

        let mut signature = [0u8; 4];
        cursor.read_exact(&mut signature)?;

        let data_size = read_u32(cursor)?;
        Self::validate_data_size(data_size, &signature)?;

        let flags = RecordFlags::from_bits_retain(read_u32(cursor)?);
        let form_id = read_u32(cursor)?;
        let timestamp = read_u16(cursor)?;
        let version_control_info = read_u16(cursor)?;
        let internal_version = read_u16(cursor)?;
        let unknown = read_u16(cursor)?;

        Self::validate_data_availability(cursor, data_size)?;

        let mut data = vec![0u8; data_size as usize];
        cursor.read_exact(&mut data)?;

        let body = if flags.contains(RecordFlags::COMPRESSED) {
            Self::decompress_data(&data)?
        } else {
            data
        };

        let subrecords = Self::parse_subrecords(&body)?;

        Ok(RawRecord {
            signature,
            form_id,
            header: RecordHeader {
                flags,
                timestamp,
                version_control_info,
                internal_version,
                unknown,
            },
            subrecords,
        })
    }

    /// 验证头部大小
    fn validate_header_size(cursor: &Cursor<&[u8]>) -> Result<(), EspError> {
        if cursor.position() + 24 > cursor.get_ref().len() as u64 {
            return Err(EspError::Truncated("记录头部数据不足".into()));
        }
        Ok(())
    }

    /// 验证数据大小
    fn validate_data_size(data_size: u32, signature: &Signature) -> Result<(), EspError> {
        if data_size > 100_000_000 {  // 100MB限制
            return Err(EspError::InvalidFormat(format!(
                "记录 {} 数据大小异常: {} bytes (可能数据损坏)",
                String::from_utf8_lossy(signature), data_size
            )));
        }
        Ok(())
    }

    /// 验证数据可用性
    fn validate_data_availability(cursor: &Cursor<&[u8]>, data_size: u32) -> Result<(), EspError> {
        if cursor.position() + data_size as u64 > cursor.get_ref().len() as u64 {
            return Err(EspError::Truncated(format!("记录数据不足: 期望 {} bytes", data_size)));
        }
        Ok(())
    }

    /// 解压缩数据
    fn decompress_data(data: &[u8]) -> Result<Vec<u8>, EspError> {
        if data.len() < 4 {
            return Err(EspError::CompressionError("压缩数据太短，无法包含解压大小".into()));
        }

        let mut data_cursor = Cursor::new(data);
        let decompressed_size = read_u32(&mut data_cursor)?;

        if decompressed_size > 50_000_000 {  // 50MB限制
            return Err(EspError::CompressionError(format!(
                "解压大小过大: {} bytes (可能数据损坏)", decompressed_size
            )));
        }

        let mut decoder = ZlibDecoder::new(&data[4..]);
        let mut decompressed = Vec::with_capacity(decompressed_size as usize);
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| EspError::CompressionError(e.to_string()))?;

        if decompressed.len() != decompressed_size as usize {
            return Err(EspError::CompressionError(format!(
                "解压大小不匹配: 期望 {} bytes，实际 {} bytes",
                decompressed_size, decompressed.len()
            )));
        }

        Ok(decompressed)
    }

    /// 解析子记录
    fn parse_subrecords(data: &[u8]) -> Result<Vec<Subrecord>, EspError> {
        let mut subrecords = Vec::new();
        let mut cursor = Cursor::new(data);

        while cursor.position() < data.len() as u64 {
            // 检查剩余字节数
            let remaining = data.len() as u64 - cursor.position();

            // 子记录最小头部大小为 6 字节；不足时只接受 NULL 填充
            if remaining < 6 {
                let remaining_bytes = &data[cursor.position() as usize..];

                if remaining_bytes.iter().all(|&b| b == 0) {
                    break;
                }

                return Err(EspError::InvalidFormat(format!(
                    "记录末尾有 {} 字节非 NULL 数据，无法解析为子记录: {:02X?}",
                    remaining, remaining_bytes
                )));
            }

            subrecords.push(Subrecord::parse(&mut cursor)?);
        }

        Ok(subrecords)
    }

    /// 序列化子记录数据（未压缩）
    fn body_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for subrecord in &self.subrecords {
            subrecord.write(&mut body);
        }
        body
    }

    /// 重新压缩数据
    fn compress_data(body: &[u8]) -> Result<Vec<u8>, EspError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(body)?;
        let compressed_data = encoder.finish()?;

        let mut result = Vec::with_capacity(compressed_data.len() + 4);
        result.extend_from_slice(&(body.len() as u32).to_le_bytes());
        result.extend_from_slice(&compressed_data);
        Ok(result)
    }

    /// 写入记录（带 COMPRESSED 标志时重新压缩）
    pub fn write(&self, output: &mut Vec<u8>) -> Result<(), EspError> {
        let body = self.body_bytes();
        let data = if self.header.flags.contains(RecordFlags::COMPRESSED) {
            Self::compress_data(&body)?
        } else {
            body
        };

        output.extend_from_slice(&self.signature);
        output.extend_from_slice(&(data.len() as u32).to_le_bytes());
        output.extend_from_slice(&self.header.flags.bits().to_le_bytes());
        output.extend_from_slice(&self.form_id.to_le_bytes());
        output.extend_from_slice(&self.header.timestamp.to_le_bytes());
        output.extend_from_slice(&self.header.version_control_info.to_le_bytes());
        output.extend_from_slice(&self.header.internal_version.to_le_bytes());
        output.extend_from_slice(&self.header.unknown.to_le_bytes());
        output.extend_from_slice(&data);
        Ok(())
    }

    /// 查找子记录
    pub fn find_subrecord(&self, signature: &Signature) -> Option<&Subrecord> {
        self.subrecords.iter().find(|sr| sr.is(signature))
    }

    /// 获取编辑器ID
    pub fn editor_id(&self) -> Option<String> {
        self.find_subrecord(b"EDID")
            .map(|sr| crate::datatypes::RawString::parse_zstring(&sr.data).content)
    }

    /// 获取记录类型字符串
    pub fn signature_str(&self) -> String {
        String::from_utf8_lossy(&self.signature).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(flags: RecordFlags) -> RawRecord {
        RawRecord {
            signature: *b"SPEL",
            form_id: 0x0100_0D62,
            header: RecordHeader { flags, ..RecordHeader::default() },
            subrecords: vec![
                Subrecord::new(*b"EDID", b"Flames\0".to_vec()),
                Subrecord::new(*b"FULL", b"Flames\0".to_vec()),
            ],
        }
    }

    #[test]
    fn test_null_padding_1byte() {
        let data = vec![
            b'E', b'D', b'I', b'D', 0x04, 0x00,
            b't', b'e', b's', b't',
            0x00,
        ];

        let subrecords = RawRecord::parse_subrecords(&data).unwrap();
        assert_eq!(subrecords.len(), 1);
        assert_eq!(&subrecords[0].signature, b"EDID");
    }

    #[test]
    fn test_invalid_trailing_data() {
        let data = vec![
            b'E', b'D', b'I', b'D', 0x04, 0x00,
            b't', b'e', b's', b't',
            0xFF, 0xAA,
        ];

        let result = RawRecord::parse_subrecords(&data);
        assert!(result.is_err(), "非 NULL 的尾部数据应该报错");
        assert!(result.unwrap_err().to_string().contains("非 NULL 数据"));
    }

    #[test]
    fn test_write_then_parse_uncompressed() {
        let record = sample_record(RecordFlags::empty());
        let mut output = Vec::new();
        record.write(&mut output).unwrap();

        let mut cursor = Cursor::new(&output[..]);
        let parsed = RawRecord::parse(&mut cursor).unwrap();
        assert_eq!(parsed.form_id, 0x0100_0D62);
        assert_eq!(parsed.subrecords, record.subrecords);
        assert_eq!(parsed.editor_id().as_deref(), Some("Flames"));
    }

    #[test]
    fn test_compressed_record_is_decompressed() {
        let record = sample_record(RecordFlags::COMPRESSED);
        let mut output = Vec::new();
        record.write(&mut output).unwrap();

        let mut cursor = Cursor::new(&output[..]);
        let parsed = RawRecord::parse(&mut cursor).unwrap();
        assert!(parsed.header.flags.contains(RecordFlags::COMPRESSED));
        assert_eq!(parsed.subrecords, record.subrecords);
    }

    #[test]
    fn test_truncated_header() {
        let data = vec![b'S', b'P', b'E', b'L', 0, 0];
        let mut cursor = Cursor::new(&data[..]);
        assert!(matches!(RawRecord::parse(&mut cursor), Err(EspError::Truncated(_))));
    }
}
