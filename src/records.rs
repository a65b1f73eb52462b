//! 类型化记录模型
//!
//! 只有补丁流程涉及的三种记录（SPEL、PERK、MGEF）被解码为类型化结构：
//! 需要按结构选择的部分（效果、条件、Perk 条目、脚本属性表）是具名字段，
//! 其余子记录以 [`Field`] 原样保存，其中的 FormID 槽位由布局表解码。
//!
//! 每种类型通过 [`Linked`] 在编译期声明自己的全部引用位置，
//! 链接重写器只遍历这份清单。

pub mod condition;
pub mod field;
pub mod magic_effect;
pub mod perk;
pub mod script;
pub mod spell;

use std::fmt;

use crate::datatypes::RawString;
use crate::form_key::{FormKey, FormLink, ModKey};
use crate::record::{RawRecord, RecordHeader};
use crate::string_file::{StringFileSet, StringFileType};
use crate::subrecord::{Signature, Subrecord};
use crate::utils::EspError;

pub use condition::{ComparisonValue, Condition, ConditionParameter};
pub use field::Field;
pub use magic_effect::MagicEffect;
pub use perk::{Perk, PerkCondition, PerkEffect, PerkEffectKind};
pub use script::{PropertyValue, Script, ScriptAdapter, ScriptObject, ScriptProperty};
pub use spell::{Effect, EffectData, Spell};

/// 记录类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Spell,
    Perk,
    MagicEffect,
}

impl RecordKind {
    /// 所有已解码的类型，按游戏中顶级组的顺序
    pub const ALL: [RecordKind; 3] = [RecordKind::MagicEffect, RecordKind::Spell, RecordKind::Perk];

    pub fn signature(&self) -> Signature {
        match self {
            RecordKind::Spell => *b"SPEL",
            RecordKind::Perk => *b"PERK",
            RecordKind::MagicEffect => *b"MGEF",
        }
    }

    pub fn from_signature(signature: &Signature) -> Option<Self> {
        match signature {
            b"SPEL" => Some(RecordKind::Spell),
            b"PERK" => Some(RecordKind::Perk),
            b"MGEF" => Some(RecordKind::MagicEffect),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.signature()))
    }
}

/// 声明引用位置的类型
///
/// 返回的列表必须覆盖该值内所有指向其他记录的 FormKey（空引用除外），
/// 不包含记录自身的 FormKey。
pub trait Linked {
    fn links(&self) -> Vec<&FormKey>;
    fn links_mut(&mut self) -> Vec<&mut FormKey>;
}

impl<T: Linked> Linked for [T] {
    fn links(&self) -> Vec<&FormKey> {
        self.iter().flat_map(Linked::links).collect()
    }

    fn links_mut(&mut self) -> Vec<&mut FormKey> {
        self.iter_mut().flat_map(Linked::links_mut).collect()
    }
}

impl<T: Linked> Linked for Vec<T> {
    fn links(&self) -> Vec<&FormKey> {
        self.as_slice().links()
    }

    fn links_mut(&mut self) -> Vec<&mut FormKey> {
        self.as_mut_slice().links_mut()
    }
}

/// 主记录的公共接口
pub trait MajorRecord: Clone + Linked + Sized {
    const KIND: RecordKind;

    fn form_key(&self) -> &FormKey;
    fn set_form_key(&mut self, form_key: FormKey);
    fn header(&self) -> &RecordHeader;
    fn editor_id(&self) -> Option<&str>;
    fn set_editor_id(&mut self, editor_id: Option<String>);

    /// 显示名称（FULL）
    fn name(&self) -> Option<String>;
    fn set_name(&mut self, name: &str);

    /// 记录级条件列表（没有时为空切片）
    fn conditions_mut(&mut self) -> &mut [Condition];

    fn from_record(record: &Record) -> Option<&Self>;
    fn into_record(self) -> Record;

    fn as_link(&self) -> FormLink<Self> {
        FormLink::new(self.form_key().clone())
    }
}

/// 已解码的记录
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Spell(Spell),
    Perk(Perk),
    MagicEffect(MagicEffect),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Spell(_) => RecordKind::Spell,
            Record::Perk(_) => RecordKind::Perk,
            Record::MagicEffect(_) => RecordKind::MagicEffect,
        }
    }

    pub fn form_key(&self) -> &FormKey {
        match self {
            Record::Spell(spell) => spell.form_key(),
            Record::Perk(perk) => perk.form_key(),
            Record::MagicEffect(effect) => effect.form_key(),
        }
    }

    pub fn editor_id(&self) -> Option<&str> {
        match self {
            Record::Spell(spell) => spell.editor_id(),
            Record::Perk(perk) => perk.editor_id(),
            Record::MagicEffect(effect) => effect.editor_id(),
        }
    }

    /// 解码原始记录；不支持的类型返回 `None`
    pub fn decode(raw: &RawRecord, ctx: &DecodeContext<'_>) -> Result<Option<Self>, EspError> {
        let record = match RecordKind::from_signature(&raw.signature) {
            Some(RecordKind::Spell) => Record::Spell(Spell::decode(raw, ctx)?),
            Some(RecordKind::Perk) => Record::Perk(Perk::decode(raw, ctx)?),
            Some(RecordKind::MagicEffect) => Record::MagicEffect(MagicEffect::decode(raw, ctx)?),
            None => return Ok(None),
        };
        Ok(Some(record))
    }

    pub fn encode(&self, ctx: &EncodeContext<'_>) -> Result<RawRecord, EspError> {
        match self {
            Record::Spell(spell) => spell.encode(ctx),
            Record::Perk(perk) => perk.encode(ctx),
            Record::MagicEffect(effect) => effect.encode(ctx),
        }
    }
}

impl From<Spell> for Record {
    fn from(spell: Spell) -> Self {
        Record::Spell(spell)
    }
}

impl From<Perk> for Record {
    fn from(perk: Perk) -> Self {
        Record::Perk(perk)
    }
}

impl From<MagicEffect> for Record {
    fn from(effect: MagicEffect) -> Self {
        Record::MagicEffect(effect)
    }
}

impl Linked for Record {
    fn links(&self) -> Vec<&FormKey> {
        match self {
            Record::Spell(spell) => spell.links(),
            Record::Perk(perk) => perk.links(),
            Record::MagicEffect(effect) => effect.links(),
        }
    }

    fn links_mut(&mut self) -> Vec<&mut FormKey> {
        match self {
            Record::Spell(spell) => spell.links_mut(),
            Record::Perk(perk) => perk.links_mut(),
            Record::MagicEffect(effect) => effect.links_mut(),
        }
    }
}

/// 解码上下文：原始 FormID 按所属文件的主文件列表映射
pub struct DecodeContext<'a> {
    /// 正在解码的文件
    pub file: ModKey,
    /// 该文件的主文件列表
    pub masters: &'a [ModKey],
    /// 本地化插件的 STRING 文件（非本地化插件为 None）
    pub strings: Option<&'a StringFileSet>,
    /// 插件是否设置了 LOCALIZED 标志
    pub localized: bool,
}

impl<'a> DecodeContext<'a> {
    /// 非本地化插件的上下文
    pub fn new(file: ModKey, masters: &'a [ModKey]) -> Self {
        Self {
            file,
            masters,
            strings: None,
            localized: false,
        }
    }

    /// 原始 FormID → FormKey（0 表示空引用）
    pub fn form_key(&self, raw: u32) -> Option<FormKey> {
        if raw == 0 {
            return None;
        }
        Some(self.owner(raw).make_form_key(raw))
    }

    /// 记录自身的 FormKey
    pub fn record_key(&self, raw: &RawRecord) -> FormKey {
        self.owner(raw.form_id).make_form_key(raw.form_id)
    }

    /// 高 8 位索引对应的文件
    ///
    /// 索引等于主文件数时为文件自身；超出时与游戏一致按文件自身处理，并记录警告。
    fn owner(&self, raw: u32) -> &ModKey {
        let index = (raw >> 24) as usize;
        match self.masters.get(index) {
            Some(master) => master,
            None => {
                if index > self.masters.len() {
                    tracing::warn!(
                        "{} 中的 FormID {:08X} 的主文件索引 {} 超出主文件数 {}，按文件自身处理",
                        self.file,
                        raw,
                        index,
                        self.masters.len()
                    );
                }
                &self.file
            }
        }
    }

    /// 本地化字符串子记录转换为内联 Z字符串
    ///
    /// 补丁文件从不设置 LOCALIZED 标志，因此必须在读取时解析出文本。
    pub fn inline_string(&self, record: Signature, subrecord: &Subrecord) -> Subrecord {
        match lstring_file_type(&record, &subrecord.signature) {
            Some(file_type) => self.inline_lstring(subrecord, file_type),
            None => subrecord.clone(),
        }
    }

    /// 按指定的 STRING 文件类型解析本地化字符串；非本地化插件原样返回
    pub fn inline_lstring(&self, subrecord: &Subrecord, file_type: StringFileType) -> Subrecord {
        if !self.localized {
            return subrecord.clone();
        }

        let id = subrecord
            .data
            .get(..4)
            .map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .unwrap_or(0);

        let text = if id == 0 {
            String::new()
        } else {
            match self.strings.and_then(|set| set.get_string_by_type(file_type, id)) {
                Some(entry) => entry.content.clone(),
                None => {
                    tracing::warn!(
                        file = %self.file,
                        string_id = id,
                        "本地化字符串 {:?} 未找到，{} 按空字符串处理",
                        file_type,
                        subrecord.signature_str()
                    );
                    String::new()
                }
            }
        };

        Subrecord::new(subrecord.signature, crate::datatypes::encode_zstring(&text))
    }
}

/// 哪些子记录是本地化字符串，以及对应的 STRING 文件类型
fn lstring_file_type(record: &Signature, subrecord: &Signature) -> Option<StringFileType> {
    match (record, subrecord) {
        (_, b"FULL") => Some(StringFileType::STRINGS),
        (b"PERK", b"EPF2") => Some(StringFileType::STRINGS),
        (_, b"DESC") => Some(StringFileType::DLSTRINGS),
        (b"MGEF", b"DNAM") => Some(StringFileType::DLSTRINGS),
        _ => None,
    }
}

/// 编码上下文：FormKey 按补丁的主文件列表映射回原始 FormID
pub struct EncodeContext<'a> {
    /// 正在写入的文件
    pub file: &'a ModKey,
    /// 写入文件的主文件列表
    pub masters: &'a [ModKey],
}

impl<'a> EncodeContext<'a> {
    pub fn new(file: &'a ModKey, masters: &'a [ModKey]) -> Self {
        Self { file, masters }
    }

    pub fn raw_form_id(&self, key: &FormKey) -> Result<u32, EspError> {
        let index = if key.mod_key() == self.file {
            self.masters.len()
        } else {
            self.masters
                .iter()
                .position(|master| master == key.mod_key())
                .ok_or_else(|| {
                    EspError::InvalidFormat(format!("{} 引用的文件不在主文件列表中", key))
                })?
        };

        if index > 0xFF {
            return Err(EspError::TooManyMasters(self.masters.len()));
        }

        Ok(((index as u32) << 24) | key.local_key())
    }

    /// 可空引用的原始 FormID（空引用为 0）
    pub fn raw_optional(&self, key: Option<&FormKey>) -> Result<u32, EspError> {
        key.map_or(Ok(0), |key| self.raw_form_id(key))
    }
}

/// 读取 Z字符串字段的文本
pub(crate) fn text_of(field: &Field) -> String {
    RawString::parse_zstring(&field.data).content
}


#[cfg(test)]
mod tests {
    use super::*;
    use test_support::*;

    #[test]
    fn test_decode_context_maps_master_index() {
        let masters = vec![mod_key("Skyrim.esm"), mod_key("STToggle.esp")];
        let ctx = DecodeContext::new(mod_key("Foo.esp"), &masters);

        assert_eq!(ctx.form_key(0), None);
        assert_eq!(ctx.form_key(0x0001_2345), Some(key("Skyrim.esm", 0x012345)));
        assert_eq!(ctx.form_key(0x0100_1D8C), Some(key("STToggle.esp", 0x001D8C)));
        assert_eq!(ctx.form_key(0x0200_0800), Some(key("Foo.esp", 0x000800)));
    }

    #[test]
    fn test_out_of_range_master_index_maps_to_file_itself() {
        let masters = vec![mod_key("Skyrim.esm")];
        let ctx = DecodeContext::new(mod_key("Foo.esp"), &masters);

        assert_eq!(ctx.form_key(0x0500_0900), Some(key("Foo.esp", 0x000900)));
        let raw = RawRecord {
            signature: *b"SPEL",
            form_id: 0xFE00_0801,
            header: RecordHeader::default(),
            subrecords: Vec::new(),
        };
        assert_eq!(ctx.record_key(&raw), key("Foo.esp", 0x000801));
    }

    #[test]
    fn test_encode_context_maps_back() {
        let masters = vec![mod_key("Skyrim.esm"), mod_key("Foo.esp")];
        let patch = mod_key("Patch.esp");
        let ctx = EncodeContext::new(&patch, &masters);

        assert_eq!(ctx.raw_form_id(&key("Foo.esp", 0x012345)).unwrap(), 0x0101_2345);
        assert_eq!(ctx.raw_form_id(&key("Patch.esp", 0x800)).unwrap(), 0x0200_0800);
        assert_eq!(ctx.raw_optional(None).unwrap(), 0);
        assert!(ctx.raw_form_id(&key("Other.esp", 1)).is_err());
    }

    #[test]
    fn test_lstring_routing() {
        assert_eq!(lstring_file_type(b"SPEL", b"FULL"), Some(StringFileType::STRINGS));
        assert_eq!(lstring_file_type(b"SPEL", b"DESC"), Some(StringFileType::DLSTRINGS));
        assert_eq!(lstring_file_type(b"MGEF", b"DNAM"), Some(StringFileType::DLSTRINGS));
        assert_eq!(lstring_file_type(b"SPEL", b"DNAM"), None);
        assert_eq!(lstring_file_type(b"SPEL", b"EDID"), None);
    }

    #[test]
    fn test_inline_string_passthrough_when_not_localized() {
        let ctx = DecodeContext::new(mod_key("Foo.esp"), &[]);
        let full = Subrecord::new(*b"FULL", b"Flames\0".to_vec());
        assert_eq!(ctx.inline_string(*b"SPEL", &full), full);
    }

    #[test]
    fn test_inline_string_missing_table_gives_empty_text() {
        let ctx = DecodeContext {
            localized: true,
            ..DecodeContext::new(mod_key("Skyrim.esm"), &[])
        };
        let full = Subrecord::new(*b"FULL", 42u32.to_le_bytes().to_vec());
        let inlined = ctx.inline_string(*b"SPEL", &full);
        assert_eq!(inlined.data, vec![0]);
    }
}
