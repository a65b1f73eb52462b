//! 模板复制与标量覆盖
//!
//! 复制得到的记录与模板不共享任何可变存储；除自身 FormKey 外，
//! 所有引用初始仍指向模板所指的位置，需由 [`crate::rewrite`] 显式改写。

use crate::form_key::FormKey;
use crate::patch::PatchMod;
use crate::patcher::PatchError;
use crate::records::{ComparisonValue, MajorRecord};
use crate::rewrite::RewriteError;

/// 以新的标识符复制模板
pub fn duplicate<T: MajorRecord>(template: &T, new_key: FormKey) -> T {
    let mut copy = template.clone();
    copy.set_form_key(new_key);
    copy
}

/// 从补丁容器分配标识符并复制模板
pub fn duplicate_into<T: MajorRecord>(patch: &mut PatchMod, template: &T) -> Result<T, PatchError> {
    let new_key = patch.allocate_identifier()?;
    tracing::debug!("复制 {} {} -> {}", T::KIND, template.form_key(), new_key);
    Ok(duplicate(template, new_key))
}

/// 复制后对单个标量字段的修改
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarOverride {
    EditorId(String),
    Name(String),
    /// 第 `index` 个记录级条件的比较值
    ConditionComparison { index: usize, value: f32 },
}

impl ScalarOverride {
    pub fn apply<T: MajorRecord>(&self, record: &mut T) -> Result<(), RewriteError> {
        match self {
            ScalarOverride::EditorId(editor_id) => record.set_editor_id(Some(editor_id.clone())),
            ScalarOverride::Name(name) => record.set_name(name),
            ScalarOverride::ConditionComparison { index, value } => {
                let form_key = record.form_key().clone();
                let condition = record.conditions_mut().get_mut(*index).ok_or_else(|| {
                    RewriteError::AmbiguousTarget {
                        target: format!("condition #{} on {} {}", index, T::KIND, form_key),
                        matches: 0,
                    }
                })?;

                match &mut condition.comparison {
                    ComparisonValue::Float(current) => *current = *value,
                    ComparisonValue::Global(_) => {
                        return Err(RewriteError::NotAFloatComparison { index: *index });
                    }
                }
            }
        }
        Ok(())
    }
}

/// 依次应用覆盖；出错时之前的覆盖已生效，调用方应丢弃该记录
pub fn apply_overrides<T: MajorRecord>(record: &mut T, overrides: &[ScalarOverride]) -> Result<(), RewriteError> {
    overrides.iter().try_for_each(|item| item.apply(record))
}
