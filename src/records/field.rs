//! 未建模子记录
//!
//! 子记录数据原样保存；布局表列出其中哪些偏移处是 FormID，
//! 这些槽位在解码时转换为 [`FormKey`]，编码时按目标文件的主文件列表写回。

use crate::form_key::FormKey;
use crate::subrecord::{Signature, Subrecord};
use crate::utils::EspError;

use super::{DecodeContext, EncodeContext, Linked};

/// MGEF DATA 中的 FormID 偏移
///
/// 关联对象、光照、命中/附魔着色器、投射物、爆炸、施法艺术、命中艺术、
/// 冲击数据集、双施法数据、附魔艺术、两个视觉效果、装备能力、影像空间修饰、
/// 应用的 Perk。
pub const MAGIC_EFFECT_DATA_OFFSETS: [usize; 16] =
    [8, 24, 32, 36, 72, 76, 92, 96, 100, 108, 116, 120, 124, 128, 132, 136];

/// 子记录中的一个 FormID 槽位
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLink {
    pub offset: usize,
    pub target: Option<FormKey>,
}

/// 原样保存的子记录
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub signature: Signature,
    pub data: Vec<u8>,
    pub slots: Vec<FieldLink>,
}

impl Field {
    /// 不含引用的字段
    pub fn plain(signature: Signature, data: Vec<u8>) -> Self {
        Self {
            signature,
            data,
            slots: Vec::new(),
        }
    }

    /// 按布局表解码
    pub fn decode(record: Signature, subrecord: &Subrecord, ctx: &DecodeContext<'_>) -> Self {
        let offsets = form_id_offsets(&record, &subrecord.signature, subrecord.data.len());
        Self::with_offsets(subrecord, &offsets, ctx)
    }

    /// 按给定偏移解码（偏移超出数据范围的槽位被忽略）
    ///
    /// 槽位处的字节在 `data` 中清零，引用只保存在 `slots` 里，
    /// 因此来自不同主文件列表的同一引用比较时相等。
    pub fn with_offsets(subrecord: &Subrecord, offsets: &[usize], ctx: &DecodeContext<'_>) -> Self {
        let mut data = subrecord.data.clone();
        let mut slots = Vec::with_capacity(offsets.len());
        let len = data.len();

        for &offset in offsets.iter().filter(|&&offset| offset + 4 <= len) {
            let bytes = &mut data[offset..offset + 4];
            let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            bytes.fill(0);
            slots.push(FieldLink {
                offset,
                target: ctx.form_key(raw),
            });
        }

        Self {
            signature: subrecord.signature,
            data,
            slots,
        }
    }

    pub fn encode(&self, ctx: &EncodeContext<'_>) -> Result<Subrecord, EspError> {
        let mut data = self.data.clone();
        for slot in &self.slots {
            let raw = ctx.raw_optional(slot.target.as_ref())?;
            data[slot.offset..slot.offset + 4].copy_from_slice(&raw.to_le_bytes());
        }
        Ok(Subrecord::new(self.signature, data))
    }

    pub fn is(&self, signature: &Signature) -> bool {
        &self.signature == signature
    }

    /// 第一个 FormID 槽位的目标
    pub fn first_target(&self) -> Option<&FormKey> {
        self.slots.first().and_then(|slot| slot.target.as_ref())
    }
}

impl Linked for Field {
    fn links(&self) -> Vec<&FormKey> {
        self.slots.iter().filter_map(|slot| slot.target.as_ref()).collect()
    }

    fn links_mut(&mut self) -> Vec<&mut FormKey> {
        self.slots.iter_mut().filter_map(|slot| slot.target.as_mut()).collect()
    }
}

/// 子记录内的 FormID 偏移表
fn form_id_offsets(record: &Signature, field: &Signature, len: usize) -> Vec<usize> {
    match (record, field) {
        (b"SPEL", b"ETYP") | (b"SPEL", b"MDOB") | (b"MGEF", b"MDOB") | (b"PERK", b"NNAM") => vec![0],
        (b"SPEL", b"SPIT") => vec![32],
        (b"MGEF", b"KWDA") | (b"MGEF", b"ESCE") => (0..len / 4).map(|i| i * 4).collect(),
        (b"MGEF", b"SNDD") => (0..len / 8).map(|i| i * 8 + 4).collect(),
        (b"MGEF", b"DATA") => MAGIC_EFFECT_DATA_OFFSETS.to_vec(),
        _ => Vec::new(),
    }
}

/// 在列表中查找字段
pub(crate) fn find<'a>(fields: &'a [Field], signature: &Signature) -> Option<&'a Field> {
    fields.iter().find(|field| field.is(signature))
}

/// 替换字段内容；不存在时插入到 `after` 中最后出现的字段之后
pub(crate) fn upsert(fields: &mut Vec<Field>, signature: Signature, data: Vec<u8>, after: &[Signature]) {
    if let Some(field) = fields.iter_mut().find(|field| field.is(&signature)) {
        field.data = data;
        field.slots.clear();
        return;
    }

    let position = fields
        .iter()
        .rposition(|field| after.contains(&field.signature))
        .map_or(0, |index| index + 1);
    fields.insert(position, Field::plain(signature, data));
}
