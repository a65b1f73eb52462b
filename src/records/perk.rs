//! Perk 记录（PERK）
//!
//! 子记录顺序：
//!
//! ```text
//! EDID VMAD FULL DESC ICON ... CTDA* DATA NNAM
//! (PRKE DATA (PRKC CTDA*)* EPFT EPF2 EPF3 EPFD PRKF)*
//! ```

use std::io::Cursor;

use crate::datatypes::{encode_zstring, read_u8, RawString};
use crate::form_key::FormKey;
use crate::record::{RawRecord, RecordHeader};
use crate::string_file::StringFileType;
use crate::subrecord::Subrecord;
use crate::utils::EspError;

use super::condition::{encode_all, push_condition_part};
use super::field::{self, Field};
use super::script::ScriptAdapter;
use super::{text_of, Condition, DecodeContext, EncodeContext, Linked, MajorRecord, Record, RecordKind};

/// EPFT 取值：EPFD 为记录引用
const FUNCTION_DATA_REFERENCES: [u8; 3] = [3, 4, 5];
/// EPFT 取值：EPFD 为本地化字符串
const FUNCTION_DATA_LSTRING: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerkEffectKind {
    Quest,
    Ability,
    EntryPoint,
    Unknown(u8),
}

impl From<u8> for PerkEffectKind {
    fn from(value: u8) -> Self {
        match value {
            0 => PerkEffectKind::Quest,
            1 => PerkEffectKind::Ability,
            2 => PerkEffectKind::EntryPoint,
            other => PerkEffectKind::Unknown(other),
        }
    }
}

impl PerkEffectKind {
    pub fn to_u8(self) -> u8 {
        match self {
            PerkEffectKind::Quest => 0,
            PerkEffectKind::Ability => 1,
            PerkEffectKind::EntryPoint => 2,
            PerkEffectKind::Unknown(value) => value,
        }
    }

    /// 条目 DATA 中的 FormID 偏移
    fn data_offsets(self) -> &'static [usize] {
        match self {
            PerkEffectKind::Quest | PerkEffectKind::Ability => &[0],
            _ => &[],
        }
    }
}

/// 条目条件的一个标签页（PRKC）
#[derive(Debug, Clone, PartialEq)]
pub struct PerkCondition {
    pub run_on_tab: u8,
    pub conditions: Vec<Condition>,
}

/// Perk 条目（PRKE ... PRKF）
#[derive(Debug, Clone, PartialEq)]
pub struct PerkEffect {
    pub kind: PerkEffectKind,
    pub rank: u8,
    pub priority: u8,
    pub data: Option<Field>,
    pub conditions: Vec<PerkCondition>,
    /// EPFT/EPF2/EPF3/EPFD
    pub function: Vec<Field>,
}

impl PerkEffect {
    fn function_type(&self) -> Option<u8> {
        field::find(&self.function, b"EPFT").and_then(|field| field.data.first().copied())
    }

    fn encode(&self, ctx: &EncodeContext<'_>, output: &mut Vec<Subrecord>) -> Result<(), EspError> {
        output.push(Subrecord::new(*b"PRKE", vec![self.kind.to_u8(), self.rank, self.priority]));
        if let Some(data) = &self.data {
            output.push(data.encode(ctx)?);
        }
        for tab in &self.conditions {
            output.push(Subrecord::new(*b"PRKC", vec![tab.run_on_tab]));
            encode_all(&tab.conditions, ctx, output)?;
        }
        for function in &self.function {
            output.push(function.encode(ctx)?);
        }
        output.push(Subrecord::new(*b"PRKF", Vec::new()));
        Ok(())
    }
}

impl Linked for PerkCondition {
    fn links(&self) -> Vec<&FormKey> {
        self.conditions.links()
    }

    fn links_mut(&mut self) -> Vec<&mut FormKey> {
        self.conditions.links_mut()
    }
}

impl Linked for PerkEffect {
    fn links(&self) -> Vec<&FormKey> {
        let mut links: Vec<&FormKey> = self.data.iter().flat_map(Linked::links).collect();
        links.extend(self.conditions.links());
        links.extend(self.function.links());
        links
    }

    fn links_mut(&mut self) -> Vec<&mut FormKey> {
        let mut links: Vec<&mut FormKey> = self.data.iter_mut().flat_map(Linked::links_mut).collect();
        links.extend(self.conditions.links_mut());
        links.extend(self.function.links_mut());
        links
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Perk {
    pub form_key: FormKey,
    pub header: RecordHeader,
    pub editor_id: Option<String>,
    pub scripts: Option<ScriptAdapter>,
    /// 条目之前的其余子记录
    pub fields: Vec<Field>,
    /// Perk 自身的条件
    pub conditions: Vec<Condition>,
    /// 条件在 `fields` 中的写入位置
    pub conditions_at: usize,
    pub effects: Vec<PerkEffect>,
}

impl Perk {
    pub fn new(form_key: FormKey) -> Self {
        Self {
            form_key,
            header: RecordHeader::default(),
            editor_id: None,
            scripts: None,
            fields: Vec::new(),
            conditions: Vec::new(),
            conditions_at: 0,
            effects: Vec::new(),
        }
    }

    pub fn decode(raw: &RawRecord, ctx: &DecodeContext<'_>) -> Result<Self, EspError> {
        let mut perk = Perk {
            header: raw.header,
            ..Perk::new(ctx.record_key(raw))
        };
        let mut conditions_seen = false;

        for subrecord in &raw.subrecords {
            let signature = &subrecord.signature;

            if signature == b"PRKE" {
                let mut cursor = Cursor::new(&subrecord.data[..]);
                perk.effects.push(PerkEffect {
                    kind: PerkEffectKind::from(read_u8(&mut cursor)?),
                    rank: read_u8(&mut cursor)?,
                    priority: read_u8(&mut cursor)?,
                    data: None,
                    conditions: Vec::new(),
                    function: Vec::new(),
                });
                continue;
            }

            let Some(effect) = perk.effects.last_mut() else {
                match signature {
                    b"EDID" => perk.editor_id = Some(RawString::parse_zstring(&subrecord.data).content),
                    b"VMAD" => perk.scripts = Some(ScriptAdapter::decode(subrecord, ctx)?),
                    _ => {
                        if push_condition_part(&mut perk.conditions, subrecord, ctx)? {
                            if !conditions_seen {
                                perk.conditions_at = perk.fields.len();
                                conditions_seen = true;
                            }
                        } else {
                            let subrecord = ctx.inline_string(raw.signature, subrecord);
                            perk.fields.push(Field::decode(raw.signature, &subrecord, ctx));
                        }
                    }
                }
                continue;
            };

            match signature {
                b"DATA" => {
                    effect.data = Some(Field::with_offsets(subrecord, effect.kind.data_offsets(), ctx));
                }
                b"PRKC" => effect.conditions.push(PerkCondition {
                    run_on_tab: subrecord.data.first().copied().unwrap_or(0),
                    conditions: Vec::new(),
                }),
                b"CTDA" | b"CIS1" | b"CIS2" => {
                    let tab = effect.conditions.last_mut().ok_or_else(|| {
                        EspError::InvalidFormat(format!("{} 的条目条件缺少 PRKC", perk.form_key))
                    })?;
                    push_condition_part(&mut tab.conditions, subrecord, ctx)?;
                }
                b"EPF2" => {
                    let subrecord = ctx.inline_string(raw.signature, subrecord);
                    effect.function.push(Field::plain(subrecord.signature, subrecord.data));
                }
                b"EPFD" => {
                    let function = match effect.function_type() {
                        Some(kind) if FUNCTION_DATA_REFERENCES.contains(&kind) => {
                            Field::with_offsets(subrecord, &[0], ctx)
                        }
                        Some(FUNCTION_DATA_LSTRING) => {
                            let subrecord = ctx.inline_lstring(subrecord, StringFileType::STRINGS);
                            Field::plain(subrecord.signature, subrecord.data)
                        }
                        _ => Field::plain(subrecord.signature, subrecord.data.clone()),
                    };
                    effect.function.push(function);
                }
                b"PRKF" => {}
                _ => effect
                    .function
                    .push(Field::plain(subrecord.signature, subrecord.data.clone())),
            }
        }

        if !conditions_seen {
            perk.conditions_at = perk.fields.len();
        }

        Ok(perk)
    }

    pub fn encode(&self, ctx: &EncodeContext<'_>) -> Result<RawRecord, EspError> {
        let mut subrecords = Vec::new();
        if let Some(editor_id) = &self.editor_id {
            subrecords.push(Subrecord::new(*b"EDID", encode_zstring(editor_id)));
        }
        if let Some(scripts) = &self.scripts {
            subrecords.push(scripts.encode(ctx)?);
        }

        let split = self.conditions_at.min(self.fields.len());
        for field in &self.fields[..split] {
            subrecords.push(field.encode(ctx)?);
        }
        encode_all(&self.conditions, ctx, &mut subrecords)?;
        for field in &self.fields[split..] {
            subrecords.push(field.encode(ctx)?);
        }

        for effect in &self.effects {
            effect.encode(ctx, &mut subrecords)?;
        }

        Ok(RawRecord {
            signature: *b"PERK",
            form_id: ctx.raw_form_id(&self.form_key)?,
            header: self.header,
            subrecords,
        })
    }
}

impl Linked for Perk {
    fn links(&self) -> Vec<&FormKey> {
        let mut links: Vec<&FormKey> = self.scripts.iter().flat_map(Linked::links).collect();
        links.extend(self.fields.links());
        links.extend(self.conditions.links());
        links.extend(self.effects.links());
        links
    }

    fn links_mut(&mut self) -> Vec<&mut FormKey> {
        let mut links: Vec<&mut FormKey> = self.scripts.iter_mut().flat_map(Linked::links_mut).collect();
        links.extend(self.fields.links_mut());
        links.extend(self.conditions.links_mut());
        links.extend(self.effects.links_mut());
        links
    }
}

impl MajorRecord for Perk {
    const KIND: RecordKind = RecordKind::Perk;

    fn form_key(&self) -> &FormKey {
        &self.form_key
    }

    fn set_form_key(&mut self, form_key: FormKey) {
        self.form_key = form_key;
    }

    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn editor_id(&self) -> Option<&str> {
        self.editor_id.as_deref()
    }

    fn set_editor_id(&mut self, editor_id: Option<String>) {
        self.editor_id = editor_id;
    }

    fn name(&self) -> Option<String> {
        field::find(&self.fields, b"FULL").map(text_of)
    }

    fn set_name(&mut self, name: &str) {
        let had_name = field::find(&self.fields, b"FULL").is_some();
        field::upsert(&mut self.fields, *b"FULL", encode_zstring(name), &[]);
        if !had_name {
            self.conditions_at += 1;
        }
    }

    fn conditions_mut(&mut self) -> &mut [Condition] {
        &mut self.conditions
    }

    fn from_record(record: &Record) -> Option<&Self> {
        match record {
            Record::Perk(perk) => Some(perk),
            _ => None,
        }
    }

    fn into_record(self) -> Record {
        Record::Perk(self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::form_key::ModKey;
    use crate::records::test_support::*;

    /// 施法消耗 Perk：优先级 0 的条目检查目标法术，优先级 1 的条目检查消耗法术
    pub fn cost_perk(form_key: FormKey) -> Perk {
        let entry = |priority: u8| PerkEffect {
            kind: PerkEffectKind::EntryPoint,
            rank: 0,
            priority,
            data: Some(Field::plain(*b"DATA", vec![27, 2, 3])),
            conditions: vec![PerkCondition {
                run_on_tab: 1,
                conditions: vec![is_id_condition(None)],
            }],
            function: vec![
                Field::plain(*b"EPFT", vec![1]),
                Field::plain(*b"EPFD", 0.0f32.to_le_bytes().to_vec()),
            ],
        };

        Perk {
            editor_id: Some("STTemplateCostPerk".into()),
            fields: vec![
                Field::plain(*b"FULL", b"Cost\0".to_vec()),
                Field::plain(*b"DATA", vec![0, 0, 1, 1, 0]),
            ],
            conditions_at: 1,
            effects: vec![entry(0), entry(1)],
            ..Perk::new(form_key)
        }
    }

    #[test]
    fn test_encode_order() {
        let mut perk = cost_perk(key("STToggle.esp", 0x001D8E));
        perk.conditions.push(float_condition(1.0));
        let file = ModKey::new("STToggle.esp");
        let raw = perk.encode(&EncodeContext::new(&file, &[])).unwrap();

        let signatures: Vec<String> = raw.subrecords.iter().map(|s| s.signature_str()).collect();
        assert_eq!(
            signatures,
            vec![
                "EDID", "FULL", "CTDA", "DATA", "PRKE", "DATA", "PRKC", "CTDA", "EPFT", "EPFD", "PRKF", "PRKE",
                "DATA", "PRKC", "CTDA", "EPFT", "EPFD", "PRKF"
            ]
        );
    }

    #[test]
    fn test_decode_matches_encoded() {
        let mut perk = cost_perk(key("STToggle.esp", 0x001D8E));
        perk.effects[0].conditions[0].conditions[0].retarget_parameter_one(key("Skyrim.esm", 0x012FCD));
        // 没有 Perk 条件时，解码得到的写入位置在字段末尾
        perk.conditions_at = perk.fields.len();

        let file = ModKey::new("STToggle.esp");
        let masters = vec![mod_key("Skyrim.esm")];
        let raw = perk.encode(&EncodeContext::new(&file, &masters)).unwrap();
        let decoded = Perk::decode(&raw, &DecodeContext::new(file.clone(), &masters)).unwrap();

        assert_eq!(decoded, perk);
        assert_eq!(decoded.links(), vec![&key("Skyrim.esm", 0x012FCD)]);
    }

    #[test]
    fn test_ability_data_and_spell_function_link() {
        let mut raw = RawRecord {
            signature: *b"PERK",
            form_id: 0x800,
            header: RecordHeader::default(),
            subrecords: Vec::new(),
        };
        raw.subrecords.push(Subrecord::new(*b"PRKE", vec![1, 0, 0]));
        raw.subrecords.push(Subrecord::new(*b"DATA", 0x0000_0801u32.to_le_bytes().to_vec()));
        raw.subrecords.push(Subrecord::new(*b"PRKF", vec![]));
        raw.subrecords.push(Subrecord::new(*b"PRKE", vec![2, 0, 0]));
        raw.subrecords.push(Subrecord::new(*b"DATA", vec![1, 5, 1]));
        raw.subrecords.push(Subrecord::new(*b"EPFT", vec![5]));
        raw.subrecords.push(Subrecord::new(*b"EPFD", 0x0000_0802u32.to_le_bytes().to_vec()));
        raw.subrecords.push(Subrecord::new(*b"PRKF", vec![]));

        let perk = Perk::decode(&raw, &DecodeContext::new(mod_key("Foo.esp"), &[])).unwrap();
        assert_eq!(perk.effects.len(), 2);
        assert_eq!(perk.effects[0].kind, PerkEffectKind::Ability);
        assert_eq!(perk.links(), vec![&key("Foo.esp", 0x801), &key("Foo.esp", 0x802)]);
    }

    #[test]
    fn test_set_name_keeps_condition_position() {
        let mut perk = Perk::new(key("Foo.esp", 0x800));
        perk.fields.push(Field::plain(*b"DATA", vec![0; 5]));
        perk.conditions.push(float_condition(0.0));
        perk.set_name("Cost");

        let file = ModKey::new("Foo.esp");
        let raw = perk.encode(&EncodeContext::new(&file, &[])).unwrap();
        let signatures: Vec<String> = raw.subrecords.iter().map(|s| s.signature_str()).collect();
        assert_eq!(signatures, vec!["FULL", "CTDA", "DATA"]);
    }
}
