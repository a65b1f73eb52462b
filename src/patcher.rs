//! 补丁流程
//!
//! 对每个声明的目标法术依次经过
//! `Declared → Resolved → Duplicated → Rewired → Inserted`，
//! 任何一步失败都会中止整个运行。

pub mod config;
pub mod declarations;

use std::fmt;

use thiserror::Error;

use crate::form_key::{FormKey, FormLink, ModKey};
use crate::load_order::{LoadOrderProvider, ResolutionError};
use crate::patch::PatchMod;
use crate::records::{Condition, Effect, MagicEffect, MajorRecord, Perk, Record, Spell};
use crate::rewrite::{find_unique, rewrite, select_unique, RewriteError, Substitutions};
use crate::templating::{apply_overrides, duplicate, duplicate_into, ScalarOverride};

pub use config::{PatcherConfig, TemplateKeys};
pub use declarations::{load_declarations, parse_declarations, validate_declarations, Declaration, PluginSpells};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatchError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error("Required plugin {mod_key} is not in the load order or not enabled")]
    MissingDependency { mod_key: ModKey },

    #[error("Record {form_key} is already in the patch")]
    DuplicateIdentifier { form_key: FormKey },

    #[error("No free identifiers left in {mod_key} (limit {limit:#X})")]
    KeySpaceExhausted { mod_key: ModKey, limit: u32 },

    #[error("Spell {form_key} is declared more than once")]
    DuplicateTarget { form_key: FormKey },

    #[error("Invalid spell id {value:?} declared for {plugin}")]
    InvalidDeclaration { plugin: String, value: String },
}

/// 单个目标所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStage {
    Declared,
    Resolved,
    Duplicated,
    Rewired,
    Inserted,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Declared => "declared",
            PipelineStage::Resolved => "resolved",
            PipelineStage::Duplicated => "duplicated",
            PipelineStage::Rewired => "rewired",
            PipelineStage::Inserted => "inserted",
        };
        f.write_str(name)
    }
}

/// 要求基础插件已列出、已加载且已启用
pub fn check_runnability<P: LoadOrderProvider>(load_order: &P, config: &PatcherConfig) -> Result<(), PatchError> {
    let base = config.base_mod_key();
    if load_order.has_mod(&base) {
        Ok(())
    } else {
        Err(PatchError::MissingDependency { mod_key: base })
    }
}

/// 在新的补丁容器上运行一次
pub fn run_patch<P: LoadOrderProvider>(
    config: &PatcherConfig,
    declarations: &[PluginSpells],
    load_order: &P,
) -> Result<PatchMod, PatchError> {
    let patch = PatchMod::new(config.output_mod_key()).light(config.light);
    Patcher::new(config, load_order).run(patch, declarations)
}

/// 基础插件中的模板记录
struct Templates<'a> {
    cost_spell: &'a Spell,
    cost_perk: &'a Perk,
    single_cast: &'a MagicEffect,
    dual_cast: &'a MagicEffect,
    effects_spell: &'a Spell,
}

impl<'a> Templates<'a> {
    fn resolve<P: LoadOrderProvider>(load_order: &'a P, config: &PatcherConfig) -> Result<Self, PatchError> {
        let keys = &config.templates;
        Ok(Self {
            cost_spell: load_order.resolve(&config.template(keys.cost_spell).as_link())?,
            cost_perk: load_order.resolve(&config.template(keys.cost_perk).as_link())?,
            single_cast: load_order.resolve(&config.template(keys.single_cast_effect).as_link())?,
            dual_cast: load_order.resolve(&config.template(keys.dual_cast_effect).as_link())?,
            effects_spell: load_order.resolve(&config.template(keys.effects_spell).as_link())?,
        })
    }
}

/// 一个目标生成的全部记录，按写入顺序
struct TargetRecords {
    cost_spell: Spell,
    cost_perk: Perk,
    single_cast: MagicEffect,
    dual_cast: MagicEffect,
    spell: Spell,
}

impl TargetRecords {
    fn into_records(self) -> [Record; 5] {
        [
            self.cost_spell.into(),
            self.cost_perk.into(),
            self.single_cast.into(),
            self.dual_cast.into(),
            self.spell.into(),
        ]
    }
}

pub struct Patcher<'a, P> {
    config: &'a PatcherConfig,
    load_order: &'a P,
}

impl<'a, P: LoadOrderProvider> Patcher<'a, P> {
    pub fn new(config: &'a PatcherConfig, load_order: &'a P) -> Self {
        Self { config, load_order }
    }

    /// 在已有的补丁容器上继续运行，分配状态随容器延续
    pub fn run(&self, mut patch: PatchMod, declarations: &[PluginSpells]) -> Result<PatchMod, PatchError> {
        check_runnability(self.load_order, self.config)?;

        let declared = validate_declarations(declarations)?;
        if let Some(existing) = declared.iter().find(|d| patch.contains(&d.target)) {
            return Err(PatchError::DuplicateTarget {
                form_key: existing.target.clone(),
            });
        }

        let templates = Templates::resolve(self.load_order, self.config)?;

        for declaration in &declared {
            let records = self.build_target(&mut patch, &templates, declaration)?;
            for record in records.into_records() {
                patch.insert(record)?;
            }
            advance(&declaration.target, PipelineStage::Inserted);
        }

        tracing::info!("完成：{} 个法术，补丁中共 {} 条记录", declared.len(), patch.len());
        Ok(patch)
    }

    fn build_target(
        &self,
        patch: &mut PatchMod,
        templates: &Templates<'_>,
        declaration: &Declaration,
    ) -> Result<TargetRecords, PatchError> {
        let target = &declaration.target;
        advance(target, PipelineStage::Declared);

        let spell = self.load_order.resolve(&FormLink::<Spell>::new(target.clone()))?;
        let stem = spell.editor_id.clone().unwrap_or_else(|| target.identifier_stem());
        let name = spell.name().unwrap_or_default();
        tracing::info!("处理法术 {} ({})", target, name);
        advance(target, PipelineStage::Resolved);

        let mut cost_spell = duplicate_into(patch, templates.cost_spell)?;
        apply_overrides(
            &mut cost_spell,
            &[
                ScalarOverride::EditorId(format!("STMaintainCostSpell{}", stem)),
                ScalarOverride::Name(format!("Maintain {}", name)),
            ],
        )?;

        let mut cost_perk = duplicate_into(patch, templates.cost_perk)?;
        apply_overrides(&mut cost_perk, &[ScalarOverride::EditorId(format!("ST{}Cost", stem))])?;

        let mut single_cast = duplicate_into(patch, templates.single_cast)?;
        apply_overrides(
            &mut single_cast,
            &[ScalarOverride::EditorId(format!("STMaintainSpellEffect{}", stem))],
        )?;

        // 双持效果由改写后的单持效果复制，标识符按顺序先行分配
        let dual_cast_key = patch.allocate_identifier()?;
        advance(target, PipelineStage::Duplicated);

        let mut substitutions = Substitutions::new();
        substitutions
            .insert(&templates.cost_spell.as_link(), &cost_spell.as_link())
            .insert(&templates.cost_perk.as_link(), &cost_perk.as_link())
            .insert(&templates.single_cast.as_link(), &single_cast.as_link())
            .insert(&templates.dual_cast.as_link(), &FormLink::new(dual_cast_key.clone()));

        rewrite(&mut cost_spell, &substitutions);
        rewrite(&mut cost_perk, &substitutions);
        rewrite(&mut single_cast, &substitutions);

        rewire_cost_perk(&mut cost_perk, target, cost_spell.form_key())?;
        rewire_effect_script(&mut single_cast, spell, &cost_perk, &cost_spell)?;

        let mut dual_cast = duplicate(&single_cast, dual_cast_key);
        apply_overrides(
            &mut dual_cast,
            &[
                ScalarOverride::EditorId(format!("STMaintainSpellEffect{}DualCast", stem)),
                ScalarOverride::ConditionComparison { index: 0, value: 1.0 },
            ],
        )?;

        let mut modified = spell.clone();
        modified.effects.push(effect_entry(
            templates.effects_spell,
            templates.single_cast,
            &single_cast,
            &substitutions,
        )?);
        modified.effects.push(effect_entry(
            templates.effects_spell,
            templates.dual_cast,
            &dual_cast,
            &substitutions,
        )?);
        advance(target, PipelineStage::Rewired);

        Ok(TargetRecords {
            cost_spell,
            cost_perk,
            single_cast,
            dual_cast,
            spell: modified,
        })
    }
}

fn advance(target: &FormKey, stage: PipelineStage) {
    tracing::debug!(spell = %target, "stage: {}", stage);
}

/// 优先级 0 的条目检查目标法术，优先级 1 的条目检查新的消耗法术
fn rewire_cost_perk(perk: &mut Perk, target: &FormKey, cost_spell: &FormKey) -> Result<(), RewriteError> {
    let perk_key = perk.form_key.clone();

    let entry = select_unique(&mut perk.effects, &format!("priority 0 entry on {}", perk_key), |e| {
        e.priority == 0
    })?;
    for tab in entry.conditions.iter_mut() {
        let condition = select_unique(
            &mut tab.conditions,
            &format!("condition in priority 0 entry on {}", perk_key),
            |_| true,
        )?;
        retarget(condition, target, &perk_key)?;
    }

    let entry = select_unique(&mut perk.effects, &format!("priority 1 entry on {}", perk_key), |e| {
        e.priority == 1
    })?;
    let tab = select_unique(
        &mut entry.conditions,
        &format!("condition tab in priority 1 entry on {}", perk_key),
        |_| true,
    )?;
    let condition = select_unique(
        &mut tab.conditions,
        &format!("condition in priority 1 entry on {}", perk_key),
        |_| true,
    )?;
    retarget(condition, cost_spell, &perk_key)
}

fn retarget(condition: &mut Condition, target: &FormKey, owner: &FormKey) -> Result<(), RewriteError> {
    if condition.retarget_parameter_one(target.clone()) {
        Ok(())
    } else {
        Err(RewriteError::NotAReference {
            target: format!("first parameter of condition function {} on {}", condition.function, owner),
        })
    }
}

fn rewire_effect_script(
    effect: &mut MagicEffect,
    spell: &Spell,
    cost_perk: &Perk,
    cost_spell: &Spell,
) -> Result<(), RewriteError> {
    let parent_effect = spell
        .effects
        .first()
        .map(|e| e.base_effect.form_key().clone())
        .ok_or_else(|| RewriteError::AmbiguousTarget {
            target: format!("first effect on {}", spell.form_key),
            matches: 0,
        })?;

    let effect_key = effect.form_key.clone();
    let scripts = effect.scripts.as_mut().ok_or_else(|| RewriteError::AmbiguousTarget {
        target: format!("script on {}", effect_key),
        matches: 0,
    })?;

    scripts.set_object_property("CostPerk", cost_perk.form_key.clone())?;
    scripts.set_object_property("CostSpell", cost_spell.form_key.clone())?;
    scripts.set_object_property("ParentEffect", parent_effect)?;
    scripts.set_object_property("ParentSpell", spell.form_key.clone())
}

/// 复制效果模板法术中以 `template` 为基础效果的唯一条目，指向 `replacement`
fn effect_entry(
    effects_spell: &Spell,
    template: &MagicEffect,
    replacement: &MagicEffect,
    substitutions: &Substitutions,
) -> Result<Effect, RewriteError> {
    let mut effect = find_unique(
        &effects_spell.effects,
        &format!("effect using {} on {}", template.form_key, effects_spell.form_key),
        |e| e.base_effect.form_key() == &template.form_key,
    )?
    .clone();

    effect.base_effect = replacement.as_link();
    rewrite(&mut effect, substitutions);
    Ok(effect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_order::{LoadOrder, ModFile, ModListing};
    use crate::records::perk::tests::cost_perk;
    use crate::records::script::tests::toggle_adapter;
    use crate::records::test_support::*;
    use crate::records::{ComparisonValue, ConditionParameter, EffectData, Linked, RecordKind};
    use std::collections::HashSet;

    const BASE: &str = "STToggle.esp";

    fn spell_named(form_key: FormKey, editor_id: &str, name: &str) -> Spell {
        let mut spell = Spell {
            editor_id: Some(editor_id.into()),
            ..Spell::new(form_key)
        };
        spell.set_name(name);
        spell
    }

    fn effect(base: FormKey, magnitude: f32) -> Effect {
        Effect {
            data: Some(EffectData { magnitude, area: 0, duration: 0 }),
            ..Effect::new(base.as_link())
        }
    }

    fn base_plugin() -> ModFile {
        let single = MagicEffect {
            editor_id: Some("STTemplateEffect".into()),
            scripts: Some(toggle_adapter(None)),
            conditions: vec![float_condition(0.0)],
            ..MagicEffect::new(key(BASE, 0x1D8C))
        };
        let dual = MagicEffect {
            editor_id: Some("STTemplateEffectDualCast".into()),
            ..MagicEffect::new(key(BASE, 0x285E))
        };

        // 消耗法术模板引用单持效果模板，复制后应指向新的效果
        let mut cost_spell = spell_named(key(BASE, 0x285C), "STTemplateCostSpell", "Template");
        cost_spell.effects.push(effect(key(BASE, 0x1D8C), 0.0));

        let mut effects_spell = spell_named(key(BASE, 0x434D), "STTemplateEffects", "Effects");
        effects_spell.effects.push(effect(key(BASE, 0x1D8C), 1.0));
        effects_spell.effects.push(effect(key(BASE, 0x285E), 2.0));

        ModFile::new(mod_key(BASE))
            .with_record(single)
            .with_record(dual)
            .with_record(cost_spell)
            .with_record(effects_spell)
            .with_record(cost_perk(key(BASE, 0x1D8E)))
    }

    fn flames() -> Spell {
        let mut spell = spell_named(key("Foo.esp", 0x012345), "Flames", "Flames");
        spell.effects.push(effect(key("Skyrim.esm", 0x013CA7), 8.0));
        spell
    }

    fn load_order_with(source: ModFile) -> LoadOrder {
        LoadOrder::new(vec![
            ModListing::new(mod_key("Skyrim.esm"), true),
            ModListing::new(mod_key(BASE), true),
            ModListing::new(mod_key("Foo.esp"), true),
        ])
        .with_file(base_plugin())
        .with_file(source)
    }

    fn load_order() -> LoadOrder {
        load_order_with(ModFile::new(mod_key("Foo.esp")).with_record(flames()))
    }

    fn declarations() -> Vec<PluginSpells> {
        vec![PluginSpells::new("Foo.esp", &["0x012345"])]
    }

    fn parameter_one(condition: &Condition) -> Option<&FormKey> {
        match &condition.parameter_one {
            ConditionParameter::Reference(target) => target.as_ref(),
            ConditionParameter::Raw(_) => None,
        }
    }

    #[test]
    fn test_end_to_end() {
        let config = PatcherConfig::default();
        let patch = run_patch(&config, &declarations(), &load_order()).unwrap();
        let out = |local: u32| key("STToggle_Patch2.esp", local);

        let kinds: Vec<(RecordKind, FormKey)> =
            patch.records().iter().map(|r| (r.kind(), r.form_key().clone())).collect();
        assert_eq!(
            kinds,
            vec![
                (RecordKind::Spell, out(0x800)),
                (RecordKind::Perk, out(0x801)),
                (RecordKind::MagicEffect, out(0x802)),
                (RecordKind::MagicEffect, out(0x803)),
                (RecordKind::Spell, key("Foo.esp", 0x012345)),
            ]
        );

        let records: Vec<&Spell> = patch.records_of::<Spell>().collect();
        let cost_spell = records[0];
        assert_eq!(cost_spell.editor_id.as_deref(), Some("STMaintainCostSpellFlames"));
        assert_eq!(cost_spell.name().as_deref(), Some("Maintain Flames"));
        assert_eq!(cost_spell.effects[0].base_effect.form_key(), &out(0x802));

        let perk = patch.records_of::<Perk>().next().unwrap();
        assert_eq!(perk.editor_id.as_deref(), Some("STFlamesCost"));
        let first = &perk.effects.iter().find(|e| e.priority == 0).unwrap().conditions[0].conditions[0];
        let second = &perk.effects.iter().find(|e| e.priority == 1).unwrap().conditions[0].conditions[0];
        assert_eq!(parameter_one(first), Some(&key("Foo.esp", 0x012345)));
        assert_eq!(parameter_one(second), Some(&out(0x800)));

        let effects: Vec<&MagicEffect> = patch.records_of::<MagicEffect>().collect();
        let (single, dual) = (effects[0], effects[1]);
        assert_eq!(single.editor_id.as_deref(), Some("STMaintainSpellEffectFlames"));
        assert_eq!(dual.editor_id.as_deref(), Some("STMaintainSpellEffectFlamesDualCast"));

        let scripts = single.scripts.as_ref().unwrap();
        assert_eq!(scripts.object_property("CostPerk"), Some(&out(0x801)));
        assert_eq!(scripts.object_property("CostSpell"), Some(&out(0x800)));
        assert_eq!(scripts.object_property("ParentEffect"), Some(&key("Skyrim.esm", 0x013CA7)));
        assert_eq!(scripts.object_property("ParentSpell"), Some(&key("Foo.esp", 0x012345)));
        assert_eq!(dual.scripts, single.scripts);
        assert_eq!(single.conditions[0].comparison, ComparisonValue::Float(0.0));
        assert_eq!(dual.conditions[0].comparison, ComparisonValue::Float(1.0));

        let modified = records[1];
        assert_eq!(modified.effects.len(), 3);
        assert_eq!(modified.effects[0], flames().effects[0]);
        assert_eq!(modified.effects[1].base_effect.form_key(), &out(0x802));
        assert_eq!(modified.effects[1].data.map(|d| d.magnitude), Some(1.0));
        assert_eq!(modified.effects[2].base_effect.form_key(), &out(0x803));
        assert_eq!(modified.name().as_deref(), Some("Flames"));

        // 没有记录仍引用模板
        let templates: HashSet<FormKey> =
            [0x1D8C, 0x285E, 0x1D8E, 0x285C, 0x434D].iter().map(|&k| key(BASE, k)).collect();
        assert!(patch.records().iter().flat_map(|r| r.links()).all(|link| !templates.contains(link)));
    }

    #[test]
    fn test_missing_base_plugin() {
        let load_order = LoadOrder::new(vec![ModListing::new(mod_key("Foo.esp"), true)])
            .with_file(ModFile::new(mod_key("Foo.esp")).with_record(flames()));

        let error = run_patch(&PatcherConfig::default(), &declarations(), &load_order).unwrap_err();
        assert_eq!(error, PatchError::MissingDependency { mod_key: mod_key(BASE) });

        // 已列出但被禁用
        let load_order = LoadOrder::new(vec![ModListing::new(mod_key(BASE), false)]).with_file(base_plugin());
        assert!(matches!(
            check_runnability(&load_order, &PatcherConfig::default()),
            Err(PatchError::MissingDependency { .. })
        ));
    }

    #[test]
    fn test_spell_without_editor_id_uses_identifier_stem() {
        let spell = Spell {
            editor_id: None,
            ..flames()
        };
        let load_order = load_order_with(ModFile::new(mod_key("Foo.esp")).with_record(spell));
        let patch = run_patch(&PatcherConfig::default(), &declarations(), &load_order).unwrap();

        let perk = patch.records_of::<Perk>().next().unwrap();
        assert_eq!(perk.editor_id.as_deref(), Some("ST012345_Foo_espCost"));
    }

    #[test]
    fn test_spell_without_effects_fails() {
        let spell = Spell {
            effects: Vec::new(),
            ..flames()
        };
        let load_order = load_order_with(ModFile::new(mod_key("Foo.esp")).with_record(spell));
        let error = run_patch(&PatcherConfig::default(), &declarations(), &load_order).unwrap_err();
        assert!(matches!(
            error,
            PatchError::Rewrite(RewriteError::AmbiguousTarget { matches: 0, .. })
        ));
    }

    #[test]
    fn test_ambiguous_perk_entry_fails() {
        let mut base = base_plugin();
        let mut perk = cost_perk(key(BASE, 0x1D8E));
        perk.effects[1].priority = 0;
        base.insert(perk);

        let load_order = LoadOrder::default()
            .with_file(base)
            .with_file(ModFile::new(mod_key("Foo.esp")).with_record(flames()));
        let error = run_patch(&PatcherConfig::default(), &declarations(), &load_order).unwrap_err();
        assert!(matches!(
            error,
            PatchError::Rewrite(RewriteError::AmbiguousTarget { matches: 2, .. })
        ));
    }

    #[test]
    fn test_target_must_be_a_spell() {
        let load_order = load_order();
        let declarations = vec![PluginSpells::new(BASE, &["0x1D8C"])];
        let error = run_patch(&PatcherConfig::default(), &declarations, &load_order).unwrap_err();
        assert!(matches!(
            error,
            PatchError::Resolution(ResolutionError::TypeMismatch { found: RecordKind::MagicEffect, .. })
        ));
    }

    #[test]
    fn test_unknown_target() {
        let declarations = vec![PluginSpells::new("Foo.esp", &["0x999999"])];
        let error = run_patch(&PatcherConfig::default(), &declarations, &load_order()).unwrap_err();
        assert_eq!(
            error,
            PatchError::Resolution(ResolutionError::RecordNotFound { form_key: key("Foo.esp", 0x999999) })
        );
    }

    #[test]
    fn test_declaration_errors_stop_before_any_allocation() {
        let declarations = vec![PluginSpells::new("Foo.esp", &["0x012345", "0x012345"])];
        let error = run_patch(&PatcherConfig::default(), &declarations, &load_order()).unwrap_err();
        assert_eq!(error, PatchError::DuplicateTarget { form_key: key("Foo.esp", 0x012345) });

        let declarations = vec![PluginSpells::new("Foo.esp", &["nope"])];
        let error = run_patch(&PatcherConfig::default(), &declarations, &load_order()).unwrap_err();
        assert!(matches!(error, PatchError::InvalidDeclaration { .. }));
    }

    #[test]
    fn test_two_runs_share_allocator() {
        let mut second_spell = spell_named(key("Foo.esp", 0x012346), "Sparks", "Sparks");
        second_spell.effects.push(effect(key("Skyrim.esm", 0x013CA8), 4.0));
        let load_order =
            load_order_with(ModFile::new(mod_key("Foo.esp")).with_record(flames()).with_record(second_spell));
        let config = PatcherConfig::default();
        let patcher = Patcher::new(&config, &load_order);

        let patch = patcher.run(PatchMod::new(config.output_mod_key()), &declarations()).unwrap();
        let first_keys: HashSet<FormKey> = patch.records().iter().map(|r| r.form_key().clone()).collect();

        let patch = patcher
            .run(patch, &[PluginSpells::new("Foo.esp", &["0x012346"])])
            .unwrap();
        assert_eq!(patch.len(), 10);
        assert_eq!(patch.next_local_key(), 0x808);

        let second_keys: HashSet<FormKey> =
            patch.records()[5..].iter().map(|r| r.form_key().clone()).collect();
        assert!(first_keys.is_disjoint(&second_keys));

        // 同一目标不能在同一容器中处理两次
        assert_eq!(
            patcher.run(patch, &declarations()).unwrap_err(),
            PatchError::DuplicateTarget { form_key: key("Foo.esp", 0x012345) }
        );
    }

    #[test]
    fn test_pipeline_is_deterministic() {
        let config = PatcherConfig::default();
        let first = run_patch(&config, &declarations(), &load_order()).unwrap();
        let second = run_patch(&config, &declarations(), &load_order()).unwrap();
        assert_eq!(first.records(), second.records());
    }

    #[test]
    fn test_templates_are_untouched() {
        let load_order = load_order();
        run_patch(&PatcherConfig::default(), &declarations(), &load_order).unwrap();

        let template: &MagicEffect = load_order.resolve(&key(BASE, 0x1D8C).as_link()).unwrap();
        assert_eq!(template.scripts, Some(toggle_adapter(None)));
        assert_eq!(template.editor_id.as_deref(), Some("STTemplateEffect"));
    }
}
