//! 条件（CTDA）
//!
//! 布局（32 字节，旧格式为 28 字节且没有第三参数）：
//!
//! | 偏移 | 内容 |
//! |------|------|
//! | 0 | 比较运算符（高 3 位）与标志（低 5 位） |
//! | 4 | 比较值：浮点数或全局变量 FormID |
//! | 8 | 函数编号 u16 |
//! | 12 / 16 | 参数一 / 参数二 |
//! | 20 | 执行对象类型 |
//! | 24 | 执行对象引用 |
//! | 28 | 参数三 |
//!
//! 参数是否为记录引用取决于函数编号，见 [`parameter_kinds`]。

use std::io::Cursor;

use crate::datatypes::{read_f32, read_i32, read_u16, read_u32, read_u8};
use crate::form_key::FormKey;
use crate::subrecord::Subrecord;
use crate::utils::EspError;

use super::field::Field;
use super::{DecodeContext, EncodeContext, Linked};

/// 标志：比较值为全局变量
pub const FLAG_USE_GLOBAL: u8 = 0x04;

/// 执行对象类型：指定引用
pub const RUN_ON_REFERENCE: u32 = 2;

pub const GET_ITEM_COUNT: u16 = 47;
pub const GET_STAGE: u16 = 58;
pub const GET_IN_CELL: u16 = 67;
pub const GET_IS_CLASS: u16 = 68;
pub const GET_IS_RACE: u16 = 69;
pub const GET_IN_FACTION: u16 = 71;
pub const GET_IS_ID: u16 = 72;
pub const GET_FACTION_RANK: u16 = 73;
pub const GET_GLOBAL_VALUE: u16 = 74;
pub const GET_EQUIPPED: u16 = 182;
pub const HAS_MAGIC_EFFECT: u16 = 214;
pub const IS_SPELL_TARGET: u16 = 223;
pub const HAS_SPELL: u16 = 264;
pub const IS_IN_LIST: u16 = 372;
pub const HAS_PERK: u16 = 448;
pub const HAS_KEYWORD: u16 = 560;
pub const WORN_HAS_KEYWORD: u16 = 682;
pub const HAS_MAGIC_EFFECT_KEYWORD: u16 = 699;

/// 参数一为记录引用的函数，有序以供二分查找
///
/// 包括引用、角色、关键字、表单列表、任务等一切记录类型的参数。
const FIRST_PARAMETER_REFERENCES: &[u16] = &[
    1, 27, 32, 42, 43, 44, 45, GET_ITEM_COUNT, 53, 56, GET_STAGE, 59, 60, 66, GET_IN_CELL, GET_IS_CLASS,
    GET_IS_RACE, GET_IN_FACTION, GET_IS_ID, GET_FACTION_RANK, GET_GLOBAL_VALUE, 79, 84, 99, 117, 122, 129, 130,
    132, 136, 149, 152, 161, 162, 163, 172, 180, GET_EQUIPPED, 193, 195, 197, 199, HAS_MAGIC_EFFECT,
    IS_SPELL_TARGET, 228, 230, 246, 248, 250, 258, 259, 261, 262, HAS_SPELL, 278, 280, 310, 359, 362, 366,
    370, IS_IN_LIST, 373, 375, 376, 378, 381, 387, 398, 403, 408, 409, 410, 414, 426, 444, HAS_PERK, 449,
    450, 462, 463, 465, 477, 479, 493, 497, 501, 513, 515, 516, 517, 518, 522, 523, 524, 525, 533, 534, 535,
    543, 550, 552, HAS_KEYWORD, 561, 562, 563, 565, 577, 579, 584, 591, 592, 595, 603, 606, 611, 617, 624,
    625, 629, 630, 639, 650, 651, 652, 660, 678, WORN_HAS_KEYWORD, 691, 693, 697, HAS_MAGIC_EFFECT_KEYWORD,
    705, 707, 713, 719, 720, 722,
];

/// 参数二为记录引用的函数（有序）
const SECOND_PARAMETER_REFERENCES: &[u16] = &[
    60, 180, 181, 230, 258, 280, 410, 577, 591, 592, 596, 600, 601, 603, 604, 605, 606, 608, 610, 650,
];

/// 函数的 (参数一, 参数二) 是否为记录引用
///
/// 表外函数的参数是整数、坐标轴、别名编号或字符串，按原始值保留。
pub fn parameter_kinds(function: u16) -> (bool, bool) {
    (
        FIRST_PARAMETER_REFERENCES.binary_search(&function).is_ok(),
        SECOND_PARAMETER_REFERENCES.binary_search(&function).is_ok(),
    )
}

/// 比较值
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonValue {
    Float(f32),
    Global(Option<FormKey>),
}

/// 条件参数
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionParameter {
    /// 记录引用（空引用为 None）
    Reference(Option<FormKey>),
    /// 非引用参数的原始值
    Raw(u32),
}

impl ConditionParameter {
    fn decode(raw: u32, is_reference: bool, ctx: &DecodeContext<'_>) -> Self {
        if is_reference {
            ConditionParameter::Reference(ctx.form_key(raw))
        } else {
            ConditionParameter::Raw(raw)
        }
    }

    fn encode(&self, ctx: &EncodeContext<'_>) -> Result<u32, EspError> {
        match self {
            ConditionParameter::Reference(key) => ctx.raw_optional(key.as_ref()),
            ConditionParameter::Raw(raw) => Ok(*raw),
        }
    }

    pub fn reference(&self) -> Option<&FormKey> {
        match self {
            ConditionParameter::Reference(key) => key.as_ref(),
            ConditionParameter::Raw(_) => None,
        }
    }

    fn link_mut(&mut self) -> Option<&mut FormKey> {
        match self {
            ConditionParameter::Reference(key) => key.as_mut(),
            ConditionParameter::Raw(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// 运算符与标志字节
    pub operator: u8,
    pub unused: [u8; 3],
    pub comparison: ComparisonValue,
    pub function: u16,
    pub padding: u16,
    pub parameter_one: ConditionParameter,
    pub parameter_two: ConditionParameter,
    pub run_on: u32,
    pub reference: ConditionParameter,
    pub parameter_three: Option<i32>,
    /// 紧随其后的 CIS1/CIS2 字符串参数
    pub strings: Vec<Field>,
}

impl Condition {
    pub fn uses_global(&self) -> bool {
        self.operator & FLAG_USE_GLOBAL != 0
    }

    pub fn decode(subrecord: &Subrecord, ctx: &DecodeContext<'_>) -> Result<Self, EspError> {
        if subrecord.data.len() < 28 {
            return Err(EspError::InvalidFormat(format!(
                "CTDA 长度异常: {} bytes",
                subrecord.data.len()
            )));
        }

        let mut cursor = Cursor::new(&subrecord.data[..]);
        let operator = read_u8(&mut cursor)?;
        let unused = [read_u8(&mut cursor)?, read_u8(&mut cursor)?, read_u8(&mut cursor)?];

        let comparison = if operator & FLAG_USE_GLOBAL != 0 {
            ComparisonValue::Global(ctx.form_key(read_u32(&mut cursor)?))
        } else {
            ComparisonValue::Float(read_f32(&mut cursor)?)
        };

        let function = read_u16(&mut cursor)?;
        let padding = read_u16(&mut cursor)?;
        let (first_is_reference, second_is_reference) = parameter_kinds(function);
        let parameter_one = ConditionParameter::decode(read_u32(&mut cursor)?, first_is_reference, ctx);
        let parameter_two = ConditionParameter::decode(read_u32(&mut cursor)?, second_is_reference, ctx);
        let run_on = read_u32(&mut cursor)?;
        let reference = ConditionParameter::decode(read_u32(&mut cursor)?, run_on == RUN_ON_REFERENCE, ctx);
        let parameter_three = if subrecord.data.len() >= 32 {
            Some(read_i32(&mut cursor)?)
        } else {
            None
        };

        Ok(Condition {
            operator,
            unused,
            comparison,
            function,
            padding,
            parameter_one,
            parameter_two,
            run_on,
            reference,
            parameter_three,
            strings: Vec::new(),
        })
    }

    /// 编码为 CTDA 及其后的字符串参数
    pub fn encode(&self, ctx: &EncodeContext<'_>, output: &mut Vec<Subrecord>) -> Result<(), EspError> {
        let mut data = Vec::with_capacity(32);
        data.push(self.operator);
        data.extend_from_slice(&self.unused);
        match &self.comparison {
            ComparisonValue::Float(value) => data.extend_from_slice(&value.to_le_bytes()),
            ComparisonValue::Global(key) => data.extend_from_slice(&ctx.raw_optional(key.as_ref())?.to_le_bytes()),
        }
        data.extend_from_slice(&self.function.to_le_bytes());
        data.extend_from_slice(&self.padding.to_le_bytes());
        data.extend_from_slice(&self.parameter_one.encode(ctx)?.to_le_bytes());
        data.extend_from_slice(&self.parameter_two.encode(ctx)?.to_le_bytes());
        data.extend_from_slice(&self.run_on.to_le_bytes());
        data.extend_from_slice(&self.reference.encode(ctx)?.to_le_bytes());
        if let Some(parameter_three) = self.parameter_three {
            data.extend_from_slice(&parameter_three.to_le_bytes());
        }

        output.push(Subrecord::new(*b"CTDA", data));
        for string in &self.strings {
            output.push(string.encode(ctx)?);
        }
        Ok(())
    }

    /// 将第一个参数指向新目标
    ///
    /// 原参数为空引用时也会被设置；非引用参数返回 `false`。
    pub fn retarget_parameter_one(&mut self, target: FormKey) -> bool {
        match &mut self.parameter_one {
            ConditionParameter::Reference(slot) => {
                *slot = Some(target);
                true
            }
            ConditionParameter::Raw(_) => false,
        }
    }
}

impl Linked for Condition {
    fn links(&self) -> Vec<&FormKey> {
        let mut links = Vec::new();
        if let ComparisonValue::Global(Some(key)) = &self.comparison {
            links.push(key);
        }
        links.extend(self.parameter_one.reference());
        links.extend(self.parameter_two.reference());
        links.extend(self.reference.reference());
        links
    }

    fn links_mut(&mut self) -> Vec<&mut FormKey> {
        let mut links = Vec::new();
        if let ComparisonValue::Global(Some(key)) = &mut self.comparison {
            links.push(key);
        }
        links.extend(self.parameter_one.link_mut());
        links.extend(self.parameter_two.link_mut());
        links.extend(self.reference.link_mut());
        links
    }
}

/// 从子记录序列中依次解码条件，附带其后的 CIS1/CIS2
pub(crate) fn push_condition_part(
    conditions: &mut Vec<Condition>,
    subrecord: &Subrecord,
    ctx: &DecodeContext<'_>,
) -> Result<bool, EspError> {
    match &subrecord.signature {
        b"CTDA" => {
            conditions.push(Condition::decode(subrecord, ctx)?);
            Ok(true)
        }
        b"CIS1" | b"CIS2" => match conditions.last_mut() {
            Some(condition) => {
                condition.strings.push(Field::plain(subrecord.signature, subrecord.data.clone()));
                Ok(true)
            }
            None => Err(EspError::InvalidFormat(format!(
                "{} 出现在任何 CTDA 之前",
                subrecord.signature_str()
            ))),
        },
        _ => Ok(false),
    }
}

pub(crate) fn encode_all(
    conditions: &[Condition],
    ctx: &EncodeContext<'_>,
    output: &mut Vec<Subrecord>,
) -> Result<(), EspError> {
    for condition in conditions {
        condition.encode(ctx, output)?;
    }
    Ok(())
}
