//! 集成测试共用的插件构造工具
//!
//! 记录通过公开 API 构造，再用补丁写入器编码成真实的插件文件。

#![allow(dead_code)]

use std::path::Path;

use esp_spell_toggle::records::condition::GET_IS_ID;
use esp_spell_toggle::records::{
    ComparisonValue, Condition, ConditionParameter, Effect, EffectData, Field, PerkCondition, PerkEffect,
    PerkEffectKind, PropertyValue, Script, ScriptAdapter, ScriptObject, ScriptProperty,
};
use esp_spell_toggle::{encode_patch, FormKey, MagicEffect, MajorRecord, ModKey, PatchHeader, PatchMod, Perk, Spell};

pub const BASE: &str = "STToggle.esp";
pub const SOURCE: &str = "Foo.esp";

pub fn key(name: &str, local: u32) -> FormKey {
    ModKey::new(name).make_form_key(local)
}

pub fn condition(function: u16, parameter_one: ConditionParameter, value: f32) -> Condition {
    Condition {
        operator: 0,
        unused: [0; 3],
        comparison: ComparisonValue::Float(value),
        function,
        padding: 0,
        parameter_one,
        parameter_two: ConditionParameter::Raw(0),
        run_on: 0,
        reference: ConditionParameter::Raw(0),
        parameter_three: Some(-1),
        strings: Vec::new(),
    }
}

fn object(name: &str) -> ScriptProperty {
    ScriptProperty {
        name: name.into(),
        status: 1,
        value: PropertyValue::Object(ScriptObject {
            target: None,
            alias: -1,
            unused: 0,
        }),
    }
}

pub fn effect(base: FormKey, magnitude: f32) -> Effect {
    Effect {
        data: Some(EffectData {
            magnitude,
            area: 0,
            duration: 0,
        }),
        ..Effect::new(base.as_link())
    }
}

fn named_spell(form_key: FormKey, editor_id: &str, name: &str) -> Spell {
    let mut spell = Spell {
        editor_id: Some(editor_id.into()),
        ..Spell::new(form_key)
    };
    spell.set_name(name);
    spell
}

fn cost_perk() -> Perk {
    let entry = |priority: u8| PerkEffect {
        kind: PerkEffectKind::EntryPoint,
        rank: 0,
        priority,
        data: Some(Field::plain(*b"DATA", vec![27, 2, 3])),
        conditions: vec![PerkCondition {
            run_on_tab: 1,
            conditions: vec![condition(GET_IS_ID, ConditionParameter::Reference(None), 1.0)],
        }],
        function: vec![
            Field::plain(*b"EPFT", vec![1]),
            Field::plain(*b"EPFD", 0.0f32.to_le_bytes().to_vec()),
        ],
    };

    Perk {
        editor_id: Some("STTemplateCostPerk".into()),
        fields: vec![Field::plain(*b"DATA", vec![0, 0, 1, 1, 0])],
        effects: vec![entry(0), entry(1)],
        ..Perk::new(key(BASE, 0x1D8E))
    }
}

/// 基础插件的五个模板记录
pub fn base_records() -> PatchMod {
    let single = MagicEffect {
        editor_id: Some("STTemplateEffect".into()),
        scripts: Some(ScriptAdapter {
            version: 5,
            object_format: 2,
            scripts: vec![Script {
                name: "STToggleEffectScript".into(),
                flags: 0,
                properties: vec![
                    object("CostPerk"),
                    object("CostSpell"),
                    object("ParentEffect"),
                    object("ParentSpell"),
                ],
            }],
            fragments: Vec::new(),
        }),
        conditions: vec![condition(0, ConditionParameter::Raw(0), 0.0)],
        ..MagicEffect::new(key(BASE, 0x1D8C))
    };
    let dual = MagicEffect {
        editor_id: Some("STTemplateEffectDualCast".into()),
        ..MagicEffect::new(key(BASE, 0x285E))
    };

    let mut cost_spell = named_spell(key(BASE, 0x285C), "STTemplateCostSpell", "Template");
    cost_spell.effects.push(effect(key(BASE, 0x1D8C), 0.0));

    let mut effects_spell = named_spell(key(BASE, 0x434D), "STTemplateEffects", "Effects");
    effects_spell.effects.push(effect(key(BASE, 0x1D8C), 1.0));
    effects_spell.effects.push(effect(key(BASE, 0x285E), 2.0));

    let mut plugin = PatchMod::new(ModKey::new(BASE));
    plugin.insert(single).unwrap();
    plugin.insert(dual).unwrap();
    plugin.insert(cost_spell).unwrap();
    plugin.insert(effects_spell).unwrap();
    plugin.insert(cost_perk()).unwrap();
    plugin
}

/// 来源插件：一个覆盖 Skyrim.esm 效果的法术
pub fn source_records() -> PatchMod {
    let mut flames = named_spell(key(SOURCE, 0x012345), "Flames", "Flames");
    flames.effects.push(effect(key("Skyrim.esm", 0x013CA7), 8.0));

    let mut plugin = PatchMod::new(ModKey::new(SOURCE));
    plugin.insert(flames).unwrap();
    plugin
}

/// 在 `data_dir` 中写入基础插件、来源插件、plugins.txt 与 spells.json
pub fn write_data_dir(data_dir: &Path, plugins_txt: &str) {
    write_data_dir_with(data_dir, plugins_txt, source_records());
}

/// 同 [`write_data_dir`]，来源插件由调用方给出
pub fn write_data_dir_with(data_dir: &Path, plugins_txt: &str, source: PatchMod) {
    let listing = vec![ModKey::new("Skyrim.esm"), ModKey::new(BASE), ModKey::new(SOURCE)];
    for plugin in [base_records(), source] {
        let bytes = encode_patch(&plugin, &listing, &PatchHeader::default()).unwrap();
        std::fs::write(data_dir.join(plugin.mod_key().name()), bytes).unwrap();
    }

    std::fs::write(data_dir.join("plugins.txt"), plugins_txt).unwrap();
    std::fs::write(
        data_dir.join("spells.json"),
        r#"[{ "Plugin": "Foo.esp", "Spells": ["0x012345"] }]"#,
    )
    .unwrap();
}
