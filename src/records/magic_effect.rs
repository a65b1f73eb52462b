use crate::datatypes::{encode_zstring, RawString};
use crate::form_key::FormKey;
use crate::record::{RawRecord, RecordHeader};
use crate::subrecord::Subrecord;
use crate::utils::EspError;

use super::condition::{encode_all, push_condition_part};
use super::field::{self, Field};
use super::script::ScriptAdapter;
use super::{text_of, Condition, DecodeContext, EncodeContext, Linked, MajorRecord, Record, RecordKind};

/// 魔法效果记录（MGEF）
///
/// 子记录顺序：EDID、VMAD、其余字段、CTDA（及 CIS1/CIS2）。
#[derive(Debug, Clone, PartialEq)]
pub struct MagicEffect {
    pub form_key: FormKey,
    pub header: RecordHeader,
    pub editor_id: Option<String>,
    pub scripts: Option<ScriptAdapter>,
    pub fields: Vec<Field>,
    pub conditions: Vec<Condition>,
}

impl MagicEffect {
    pub fn new(form_key: FormKey) -> Self {
        Self {
            form_key,
            header: RecordHeader::default(),
            editor_id: None,
            scripts: None,
            fields: Vec::new(),
            conditions: Vec::new(),
        }
    }

    pub fn decode(raw: &RawRecord, ctx: &DecodeContext<'_>) -> Result<Self, EspError> {
        let mut effect = MagicEffect {
            header: raw.header,
            ..MagicEffect::new(ctx.record_key(raw))
        };

        for subrecord in &raw.subrecords {
            match &subrecord.signature {
                b"EDID" => effect.editor_id = Some(RawString::parse_zstring(&subrecord.data).content),
                b"VMAD" => effect.scripts = Some(ScriptAdapter::decode(subrecord, ctx)?),
                _ => {
                    if !push_condition_part(&mut effect.conditions, subrecord, ctx)? {
                        let subrecord = ctx.inline_string(raw.signature, subrecord);
                        effect.fields.push(Field::decode(raw.signature, &subrecord, ctx));
                    }
                }
            }
        }

        Ok(effect)
    }

    pub fn encode(&self, ctx: &EncodeContext<'_>) -> Result<RawRecord, EspError> {
        let mut subrecords = Vec::new();
        if let Some(editor_id) = &self.editor_id {
            subrecords.push(Subrecord::new(*b"EDID", encode_zstring(editor_id)));
        }
        if let Some(scripts) = &self.scripts {
            subrecords.push(scripts.encode(ctx)?);
        }
        for field in &self.fields {
            subrecords.push(field.encode(ctx)?);
        }
        encode_all(&self.conditions, ctx, &mut subrecords)?;

        Ok(RawRecord {
            signature: *b"MGEF",
            form_id: ctx.raw_form_id(&self.form_key)?,
            header: self.header,
            subrecords,
        })
    }
}

impl Linked for MagicEffect {
    fn links(&self) -> Vec<&FormKey> {
        let mut links: Vec<&FormKey> = self.scripts.iter().flat_map(Linked::links).collect();
        links.extend(self.fields.links());
        links.extend(self.conditions.links());
        links
    }

    fn links_mut(&mut self) -> Vec<&mut FormKey> {
        let mut links: Vec<&mut FormKey> = self.scripts.iter_mut().flat_map(Linked::links_mut).collect();
        links.extend(self.fields.links_mut());
        links.extend(self.conditions.links_mut());
        links
    }
}

impl MajorRecord for MagicEffect {
    const KIND: RecordKind = RecordKind::MagicEffect;

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
        field::upsert(&mut self.fields, *b"FULL", encode_zstring(name), &[]);
    }

    fn conditions_mut(&mut self) -> &mut [Condition] {
        &mut self.conditions
    }

    fn from_record(record: &Record) -> Option<&Self> {
        match record {
            Record::MagicEffect(effect) => Some(effect),
            _ => None,
        }
    }

    fn into_record(self) -> Record {
        Record::MagicEffect(self)
    }
}
