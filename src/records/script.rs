//! 虚拟机适配器（VMAD）
//!
//! 只解码脚本列表与属性；脚本之后的片段数据（Perk/任务片段）原样保存。

use std::io::{Cursor, Read};

use crate::datatypes::{
    read_f32, read_i16, read_i32, read_u16, read_u32, read_u8, write_f32, write_i16, write_i32, write_u16,
    write_u32, write_u8, write_wstring, RawString,
};
use crate::form_key::FormKey;
use crate::rewrite::{select_unique, RewriteError};
use crate::subrecord::Subrecord;
use crate::utils::EspError;

use super::{DecodeContext, EncodeContext, Linked};

/// 对象属性（别名 + 记录引用）
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptObject {
    pub target: Option<FormKey>,
    pub alias: i16,
    pub unused: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Object(ScriptObject),
    String(String),
    Int(i32),
    Float(f32),
    Bool(bool),
    ObjectList(Vec<ScriptObject>),
    StringList(Vec<String>),
    IntList(Vec<i32>),
    FloatList(Vec<f32>),
    BoolList(Vec<bool>),
}

impl PropertyValue {
    fn type_code(&self) -> u8 {
        match self {
            PropertyValue::Object(_) => 1,
            PropertyValue::String(_) => 2,
            PropertyValue::Int(_) => 3,
            PropertyValue::Float(_) => 4,
            PropertyValue::Bool(_) => 5,
            PropertyValue::ObjectList(_) => 11,
            PropertyValue::StringList(_) => 12,
            PropertyValue::IntList(_) => 13,
            PropertyValue::FloatList(_) => 14,
            PropertyValue::BoolList(_) => 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptProperty {
    pub name: String,
    /// 仅版本 ≥ 4 时存在
    pub status: u8,
    pub value: PropertyValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub name: String,
    /// 仅版本 ≥ 4 时存在
    pub flags: u8,
    pub properties: Vec<ScriptProperty>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptAdapter {
    pub version: i16,
    pub object_format: i16,
    pub scripts: Vec<Script>,
    /// 脚本列表之后的片段数据
    pub fragments: Vec<u8>,
}

impl ScriptAdapter {
    pub fn decode(subrecord: &Subrecord, ctx: &DecodeContext<'_>) -> Result<Self, EspError> {
        let data = &subrecord.data[..];
        let mut cursor = Cursor::new(data);

        let version = read_i16(&mut cursor)?;
        let object_format = read_i16(&mut cursor)?;
        let script_count = read_u16(&mut cursor)?;

        let mut reader = AdapterReader {
            cursor,
            version,
            object_format,
            ctx,
        };

        let mut scripts = Vec::with_capacity(script_count as usize);
        for _ in 0..script_count {
            scripts.push(reader.read_script()?);
        }

        let mut fragments = Vec::new();
        reader.cursor.read_to_end(&mut fragments)?;

        Ok(ScriptAdapter {
            version,
            object_format,
            scripts,
            fragments,
        })
    }

    pub fn encode(&self, ctx: &EncodeContext<'_>) -> Result<Subrecord, EspError> {
        let mut data = Vec::new();
        write_i16(&mut data, self.version)?;
        write_i16(&mut data, self.object_format)?;
        write_u16(&mut data, self.scripts.len() as u16)?;

        for script in &self.scripts {
            write_wstring(&mut data, &script.name)?;
            if self.version >= 4 {
                write_u8(&mut data, script.flags)?;
            }
            write_u16(&mut data, script.properties.len() as u16)?;

            for property in &script.properties {
                write_wstring(&mut data, &property.name)?;
                write_u8(&mut data, property.value.type_code())?;
                if self.version >= 4 {
                    write_u8(&mut data, property.status)?;
                }
                self.write_value(&mut data, &property.value, ctx)?;
            }
        }

        data.extend_from_slice(&self.fragments);
        Ok(Subrecord::new(*b"VMAD", data))
    }

    fn write_value(&self, data: &mut Vec<u8>, value: &PropertyValue, ctx: &EncodeContext<'_>) -> Result<(), EspError> {
        match value {
            PropertyValue::Object(object) => self.write_object(data, object, ctx)?,
            PropertyValue::String(text) => write_wstring(data, text)?,
            PropertyValue::Int(value) => write_i32(data, *value)?,
            PropertyValue::Float(value) => write_f32(data, *value)?,
            PropertyValue::Bool(value) => write_u8(data, u8::from(*value))?,
            PropertyValue::ObjectList(objects) => {
                write_u32(data, objects.len() as u32)?;
                for object in objects {
                    self.write_object(data, object, ctx)?;
                }
            }
            PropertyValue::StringList(texts) => {
                write_u32(data, texts.len() as u32)?;
                for text in texts {
                    write_wstring(data, text)?;
                }
            }
            PropertyValue::IntList(values) => {
                write_u32(data, values.len() as u32)?;
                for value in values {
                    write_i32(data, *value)?;
                }
            }
            PropertyValue::FloatList(values) => {
                write_u32(data, values.len() as u32)?;
                for value in values {
                    write_f32(data, *value)?;
                }
            }
            PropertyValue::BoolList(values) => {
                write_u32(data, values.len() as u32)?;
                for value in values {
                    write_u8(data, u8::from(*value))?;
                }
            }
        }
        Ok(())
    }

    fn write_object(&self, data: &mut Vec<u8>, object: &ScriptObject, ctx: &EncodeContext<'_>) -> Result<(), EspError> {
        let raw = ctx.raw_optional(object.target.as_ref())?;
        if self.object_format == 1 {
            write_u32(data, raw)?;
            write_i16(data, object.alias)?;
            write_u16(data, object.unused)?;
        } else {
            write_u16(data, object.unused)?;
            write_i16(data, object.alias)?;
            write_u32(data, raw)?;
        }
        Ok(())
    }

    /// 适配器上唯一的脚本
    pub fn single_script_mut(&mut self) -> Result<&mut Script, RewriteError> {
        select_unique(&mut self.scripts, "script on adapter", |_| true)
    }

    /// 将唯一脚本中名为 `name` 的对象属性指向 `target`
    pub fn set_object_property(&mut self, name: &str, target: FormKey) -> Result<(), RewriteError> {
        let script = self.single_script_mut()?;
        let script_name = script.name.clone();
        let property = select_unique(&mut script.properties, &format!("property {} on {}", name, script_name), |p| {
            p.name == name
        })?;

        match &mut property.value {
            PropertyValue::Object(object) => {
                object.target = Some(target);
                Ok(())
            }
            _ => Err(RewriteError::NotAReference {
                target: format!("property {} on {}", name, script_name),
            }),
        }
    }

    /// 按名称查找对象属性的目标
    pub fn object_property(&self, name: &str) -> Option<&FormKey> {
        self.scripts
            .iter()
            .flat_map(|script| script.properties.iter())
            .find(|property| property.name == name)
            .and_then(|property| match &property.value {
                PropertyValue::Object(object) => object.target.as_ref(),
                _ => None,
            })
    }
}

struct AdapterReader<'a, 'c> {
    cursor: Cursor<&'a [u8]>,
    version: i16,
    object_format: i16,
    ctx: &'c DecodeContext<'c>,
}

impl AdapterReader<'_, '_> {
    fn read_script(&mut self) -> Result<Script, EspError> {
        let name = RawString::parse_wstring(&mut self.cursor)?.content;
        let flags = if self.version >= 4 { read_u8(&mut self.cursor)? } else { 0 };
        let property_count = read_u16(&mut self.cursor)?;

        let mut properties = Vec::with_capacity(property_count as usize);
        for _ in 0..property_count {
            let name = RawString::parse_wstring(&mut self.cursor)?.content;
            let type_code = read_u8(&mut self.cursor)?;
            let status = if self.version >= 4 { read_u8(&mut self.cursor)? } else { 0 };
            let value = self.read_value(type_code)?;
            properties.push(ScriptProperty { name, status, value });
        }

        Ok(Script { name, flags, properties })
    }

    fn read_value(&mut self, type_code: u8) -> Result<PropertyValue, EspError> {
        let value = match type_code {
            1 => PropertyValue::Object(self.read_object()?),
            2 => PropertyValue::String(RawString::parse_wstring(&mut self.cursor)?.content),
            3 => PropertyValue::Int(read_i32(&mut self.cursor)?),
            4 => PropertyValue::Float(read_f32(&mut self.cursor)?),
            5 => PropertyValue::Bool(read_u8(&mut self.cursor)? != 0),
            11..=15 => {
                let count = read_u32(&mut self.cursor)? as usize;
                match type_code {
                    11 => PropertyValue::ObjectList(
                        (0..count).map(|_| self.read_object()).collect::<Result<_, _>>()?,
                    ),
                    12 => PropertyValue::StringList(
                        (0..count)
                            .map(|_| RawString::parse_wstring(&mut self.cursor).map(|s| s.content))
                            .collect::<Result<_, _>>()?,
                    ),
                    13 => PropertyValue::IntList(
                        (0..count).map(|_| read_i32(&mut self.cursor)).collect::<Result<_, _>>()?,
                    ),
                    14 => PropertyValue::FloatList(
                        (0..count).map(|_| read_f32(&mut self.cursor)).collect::<Result<_, _>>()?,
                    ),
                    _ => PropertyValue::BoolList(
                        (0..count)
                            .map(|_| read_u8(&mut self.cursor).map(|b| b != 0))
                            .collect::<Result<_, _>>()?,
                    ),
                }
            }
            other => {
                return Err(EspError::InvalidFormat(format!("未知的脚本属性类型: {}", other)));
            }
        };
        Ok(value)
    }

    fn read_object(&mut self) -> Result<ScriptObject, EspError> {
        let (raw, alias, unused) = if self.object_format == 1 {
            let raw = read_u32(&mut self.cursor)?;
            let alias = read_i16(&mut self.cursor)?;
            let unused = read_u16(&mut self.cursor)?;
            (raw, alias, unused)
        } else {
            let unused = read_u16(&mut self.cursor)?;
            let alias = read_i16(&mut self.cursor)?;
            let raw = read_u32(&mut self.cursor)?;
            (raw, alias, unused)
        };

        Ok(ScriptObject {
            target: self.ctx.form_key(raw),
            alias,
            unused,
        })
    }
}

impl Linked for ScriptObject {
    fn links(&self) -> Vec<&FormKey> {
        self.target.iter().collect()
    }

    fn links_mut(&mut self) -> Vec<&mut FormKey> {
        self.target.iter_mut().collect()
    }
}

impl Linked for ScriptProperty {
    fn links(&self) -> Vec<&FormKey> {
        match &self.value {
            PropertyValue::Object(object) => object.links(),
            PropertyValue::ObjectList(objects) => objects.links(),
            _ => Vec::new(),
        }
    }

    fn links_mut(&mut self) -> Vec<&mut FormKey> {
        match &mut self.value {
            PropertyValue::Object(object) => object.links_mut(),
            PropertyValue::ObjectList(objects) => objects.links_mut(),
            _ => Vec::new(),
        }
    }
}

impl Linked for Script {
    fn links(&self) -> Vec<&FormKey> {
        self.properties.links()
    }

    fn links_mut(&mut self) -> Vec<&mut FormKey> {
        self.properties.links_mut()
    }
}

impl Linked for ScriptAdapter {
    fn links(&self) -> Vec<&FormKey> {
        self.scripts.links()
    }

    fn links_mut(&mut self) -> Vec<&mut FormKey> {
        self.scripts.links_mut()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::form_key::ModKey;
    use crate::records::test_support::*;

    pub fn object(target: Option<FormKey>) -> PropertyValue {
        PropertyValue::Object(ScriptObject {
            target,
            alias: -1,
            unused: 0,
        })
    }

    pub fn toggle_adapter(parent: Option<FormKey>) -> ScriptAdapter {
        ScriptAdapter {
            version: 5,
            object_format: 2,
            scripts: vec![Script {
                name: "STToggleEffectScript".into(),
                flags: 0,
                properties: vec![
                    ScriptProperty { name: "CostPerk".into(), status: 1, value: object(None) },
                    ScriptProperty { name: "CostSpell".into(), status: 1, value: object(None) },
                    ScriptProperty { name: "ParentEffect".into(), status: 1, value: object(parent) },
                    ScriptProperty { name: "ParentSpell".into(), status: 1, value: object(None) },
                    ScriptProperty { name: "Magnitude".into(), status: 1, value: PropertyValue::Float(1.5) },
                ],
            }],
            fragments: Vec::new(),
        }
    }

    #[test]
    fn test_adapter_bytes_survive_decode_encode() {
        let masters = vec![mod_key("Skyrim.esm")];
        let patch = ModKey::new("Patch.esp");
        let mut adapter = toggle_adapter(Some(key("Skyrim.esm", 0x012FCD)));
        adapter.fragments = vec![2, 0, 0];
        adapter.scripts[0].properties.push(ScriptProperty {
            name: "Tags".into(),
            status: 1,
            value: PropertyValue::StringList(vec!["a".into(), "b".into()]),
        });

        let encoded = adapter.encode(&EncodeContext::new(&patch, &masters)).unwrap();
        let ctx = DecodeContext::new(patch.clone(), &masters);
        let decoded = ScriptAdapter::decode(&encoded, &ctx).unwrap();
        assert_eq!(decoded, adapter);
    }

    #[test]
    fn test_object_format_one_layout() {
        let mut data = Vec::new();
        data.extend_from_slice(&5i16.to_le_bytes());
        data.extend_from_slice(&1i16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(b"Foo");
        data.push(0);
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(b"Bar");
        data.push(1);
        data.push(1);
        data.extend_from_slice(&0x0000_0801u32.to_le_bytes());
        data.extend_from_slice(&(-1i16).to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());

        let ctx = DecodeContext::new(mod_key("Foo.esp"), &[]);
        let adapter = ScriptAdapter::decode(&Subrecord::new(*b"VMAD", data), &ctx).unwrap();
        assert_eq!(adapter.object_property("Bar"), Some(&key("Foo.esp", 0x801)));
        assert!(adapter.fragments.is_empty());
    }

    #[test]
    fn test_set_object_property_fills_null() {
        let mut adapter = toggle_adapter(None);
        adapter.set_object_property("CostSpell", key("Patch.esp", 0x800)).unwrap();
        assert_eq!(adapter.object_property("CostSpell"), Some(&key("Patch.esp", 0x800)));
        assert_eq!(adapter.links().len(), 1);
    }

    #[test]
    fn test_set_object_property_errors() {
        let mut adapter = toggle_adapter(None);
        assert!(matches!(
            adapter.set_object_property("Magnitude", key("Patch.esp", 0x800)),
            Err(RewriteError::NotAReference { .. })
        ));
        assert!(matches!(
            adapter.set_object_property("Missing", key("Patch.esp", 0x800)),
            Err(RewriteError::AmbiguousTarget { matches: 0, .. })
        ));
        // 属性名按原样比较
        assert!(matches!(
            adapter.set_object_property("costspell", key("Patch.esp", 0x800)),
            Err(RewriteError::AmbiguousTarget { matches: 0, .. })
        ));
        assert_eq!(adapter.object_property("costspell"), None);

        adapter.scripts.push(adapter.scripts[0].clone());
        assert!(matches!(
            adapter.set_object_property("CostSpell", key("Patch.esp", 0x800)),
            Err(RewriteError::AmbiguousTarget { matches: 2, .. })
        ));
    }
}
