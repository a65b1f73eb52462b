use std::io::Cursor;

use crate::datatypes::{encode_zstring, read_f32, read_u32, RawString};
use crate::form_key::{FormKey, FormLink};
use crate::record::{RawRecord, RecordHeader};
use crate::subrecord::Subrecord;
use crate::utils::EspError;

use super::condition::{encode_all, push_condition_part};
use super::field::{self, Field};
use super::{text_of, Condition, DecodeContext, EncodeContext, Linked, MagicEffect, MajorRecord, Record, RecordKind};

/// 效果参数（EFIT）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectData {
    pub magnitude: f32,
    pub area: u32,
    pub duration: u32,
}

/// 法术上的一个效果
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub base_effect: FormLink<MagicEffect>,
    pub data: Option<EffectData>,
    pub conditions: Vec<Condition>,
}

impl Effect {
    pub fn new(base_effect: FormLink<MagicEffect>) -> Self {
        Self {
            base_effect,
            data: None,
            conditions: Vec::new(),
        }
    }

    fn encode(&self, ctx: &EncodeContext<'_>, output: &mut Vec<Subrecord>) -> Result<(), EspError> {
        let raw = ctx.raw_form_id(self.base_effect.form_key())?;
        output.push(Subrecord::new(*b"EFID", raw.to_le_bytes().to_vec()));

        if let Some(data) = &self.data {
            let mut bytes = Vec::with_capacity(12);
            bytes.extend_from_slice(&data.magnitude.to_le_bytes());
            bytes.extend_from_slice(&data.area.to_le_bytes());
            bytes.extend_from_slice(&data.duration.to_le_bytes());
            output.push(Subrecord::new(*b"EFIT", bytes));
        }

        encode_all(&self.conditions, ctx, output)
    }
}

impl Linked for Effect {
    fn links(&self) -> Vec<&FormKey> {
        let mut links = vec![self.base_effect.form_key()];
        links.extend(self.conditions.links());
        links
    }

    fn links_mut(&mut self) -> Vec<&mut FormKey> {
        let mut links = vec![self.base_effect.form_key_mut()];
        links.extend(self.conditions.links_mut());
        links
    }
}

/// 法术记录（SPEL）
#[derive(Debug, Clone, PartialEq)]
pub struct Spell {
    pub form_key: FormKey,
    pub header: RecordHeader,
    pub editor_id: Option<String>,
    /// 效果之前的其余子记录（OBND、FULL、ETYP、DESC、SPIT 等）
    pub fields: Vec<Field>,
    pub effects: Vec<Effect>,
}

impl Spell {
    pub fn new(form_key: FormKey) -> Self {
        Self {
            form_key,
            header: RecordHeader::default(),
            editor_id: None,
            fields: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub fn decode(raw: &RawRecord, ctx: &DecodeContext<'_>) -> Result<Self, EspError> {
        let mut spell = Spell {
            header: raw.header,
            ..Spell::new(ctx.record_key(raw))
        };

        for subrecord in &raw.subrecords {
            match &subrecord.signature {
                b"EDID" => spell.editor_id = Some(RawString::parse_zstring(&subrecord.data).content),
                b"EFID" => {
                    let raw_id = read_u32(&mut Cursor::new(&subrecord.data[..]))?;
                    let base_effect = ctx.form_key(raw_id).ok_or_else(|| {
                        EspError::InvalidFormat(format!("{} 的效果引用为空", spell.form_key))
                    })?;
                    spell.effects.push(Effect::new(base_effect.as_link()));
                }
                b"EFIT" => {
                    let effect = spell.effects.last_mut().ok_or_else(|| {
                        EspError::InvalidFormat(format!("{} 的 EFIT 出现在 EFID 之前", spell.form_key))
                    })?;
                    let mut cursor = Cursor::new(&subrecord.data[..]);
                    effect.data = Some(EffectData {
                        magnitude: read_f32(&mut cursor)?,
                        area: read_u32(&mut cursor)?,
                        duration: read_u32(&mut cursor)?,
                    });
                }
                _ => match spell.effects.last_mut() {
                    Some(effect) => {
                        if !push_condition_part(&mut effect.conditions, subrecord, ctx)? {
                            tracing::warn!(
                                "{} 的效果列表之后出现未知子记录 {}，将移到效果之前",
                                spell.form_key,
                                subrecord.signature_str()
                            );
                            spell.fields.push(Field::decode(raw.signature, subrecord, ctx));
                        }
                    }
                    None => {
                        let subrecord = ctx.inline_string(raw.signature, subrecord);
                        spell.fields.push(Field::decode(raw.signature, &subrecord, ctx));
                    }
                },
            }
        }

        Ok(spell)
    }

    pub fn encode(&self, ctx: &EncodeContext<'_>) -> Result<RawRecord, EspError> {
        let mut subrecords = Vec::new();
        if let Some(editor_id) = &self.editor_id {
            subrecords.push(Subrecord::new(*b"EDID", encode_zstring(editor_id)));
        }
        for field in &self.fields {
            subrecords.push(field.encode(ctx)?);
        }
        for effect in &self.effects {
            effect.encode(ctx, &mut subrecords)?;
        }

        Ok(RawRecord {
            signature: *b"SPEL",
            form_id: ctx.raw_form_id(&self.form_key)?,
            header: self.header,
            subrecords,
        })
    }
}

impl Linked for Spell {
    fn links(&self) -> Vec<&FormKey> {
        let mut links = self.fields.links();
        links.extend(self.effects.links());
        links
    }

    fn links_mut(&mut self) -> Vec<&mut FormKey> {
        let mut links = self.fields.links_mut();
        links.extend(self.effects.links_mut());
        links
    }
}

impl MajorRecord for Spell {
    const KIND: RecordKind = RecordKind::Spell;

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
        field::upsert(&mut self.fields, *b"FULL", encode_zstring(name), &[*b"OBND"]);
    }

    fn conditions_mut(&mut self) -> &mut [Condition] {
        &mut []
    }

    fn from_record(record: &Record) -> Option<&Self> {
        match record {
            Record::Spell(spell) => Some(spell),
            _ => None,
        }
    }

    fn into_record(self) -> Record {
        Record::Spell(self)
    }
}
