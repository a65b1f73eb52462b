use crate::datatypes::{read_u16, read_u32};
use crate::utils::EspError;
use std::io::{Cursor, Read};

/// 4字符签名（记录/子记录类型）
pub type Signature = [u8; 4];

/// 超长子记录前缀
const XXXX: Signature = *b"XXXX";

/// 子记录结构
#[derive(Debug, Clone, PartialEq)]
pub struct Subrecord {
    /// 4字符记录类型（原始字节）
    pub signature: Signature,
    /// 原始数据
    pub data: Vec<u8>,
}

impl Subrecord {
    pub fn new(signature: Signature, data: Vec<u8>) -> Self {
        Self { signature, data }
    }

    /// 解析子记录
    ///
    /// `XXXX` 前缀携带下一个子记录的真实大小（其头部大小字段为 0）。
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self, EspError> {
        let (mut signature, mut size) = Self::read_header(cursor)?;

        if signature == XXXX {
            if size != 4 {
                return Err(EspError::InvalidFormat(format!("XXXX 子记录大小异常: {}", size)));
            }
            let real_size = read_u32(cursor)?;
            let (next_signature, _) = Self::read_header(cursor)?;
            signature = next_signature;
            size = real_size as usize;
        }

        // 检查是否有足够的数据
        if cursor.position() + size as u64 > cursor.get_ref().len() as u64 {
            return Err(EspError::Truncated(format!(
                "子记录 {} 数据不足: 期望 {} bytes",
                String::from_utf8_lossy(&signature), size
            )));
        }

        let mut data = vec![0u8; size];
        cursor.read_exact(&mut data)?;

        Ok(Subrecord { signature, data })
    }

    fn read_header(cursor: &mut Cursor<&[u8]>) -> Result<(Signature, usize), EspError> {
        // 检查是否有足够的数据读取头部
        if cursor.position() + 6 > cursor.get_ref().len() as u64 {
            return Err(EspError::Truncated("子记录头部数据不足".into()));
        }

        let mut signature = [0u8; 4];
        cursor.read_exact(&mut signature)?;
        let size = read_u16(cursor)? as usize;
        Ok((signature, size))
    }

    /// 写入子记录（必要时带 `XXXX` 前缀）
    pub fn write(&self, output: &mut Vec<u8>) {
        if self.data.len() > u16::MAX as usize {
            output.extend_from_slice(&XXXX);
            output.extend_from_slice(&4u16.to_le_bytes());
            output.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
            output.extend_from_slice(&self.signature);
            output.extend_from_slice(&0u16.to_le_bytes());
        } else {
            output.extend_from_slice(&self.signature);
            output.extend_from_slice(&(self.data.len() as u16).to_le_bytes());
        }
        output.extend_from_slice(&self.data);
    }

    /// 获取子记录类型字符串
    pub fn signature_str(&self) -> String {
        String::from_utf8_lossy(&self.signature).into_owned()
    }

    pub fn is(&self, signature: &Signature) -> bool {
        &self.signature == signature
    }
}
