//! 引用重写
//!
//! [`rewrite`] 按替换表遍历记录声明的全部引用位置（[`Linked`]），
//! 每个命中的位置只替换一次，替换结果不会再次参与匹配。
//!
//! 当记录中有多个形状相同的子结构时，由调用方提供判别条件，
//! [`select_unique`] 要求恰好命中一个，否则返回 [`RewriteError::AmbiguousTarget`]
//! 且不修改任何内容。

use std::collections::HashMap;

use thiserror::Error;

use crate::form_key::{FormKey, FormLink};
use crate::records::{Linked, MajorRecord};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RewriteError {
    #[error("Expected exactly one {target}, found {matches}")]
    AmbiguousTarget { target: String, matches: usize },

    #[error("{target} does not hold a record reference")]
    NotAReference { target: String },

    #[error("Condition #{index} compares against a global, not a float")]
    NotAFloatComparison { index: usize },
}

/// 引用替换表
#[derive(Debug, Clone, Default)]
pub struct Substitutions {
    map: HashMap<FormKey, FormKey>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同类型引用之间的替换
    pub fn insert<T: MajorRecord>(&mut self, from: &FormLink<T>, to: &FormLink<T>) -> &mut Self {
        self.insert_key(from.form_key().clone(), to.form_key().clone())
    }

    pub fn insert_key(&mut self, from: FormKey, to: FormKey) -> &mut Self {
        self.map.insert(from, to);
        self
    }

    pub fn get(&self, key: &FormKey) -> Option<&FormKey> {
        self.map.get(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// 替换 `target` 中所有命中替换表的引用，返回替换的位置数
pub fn rewrite<L: Linked + ?Sized>(target: &mut L, substitutions: &Substitutions) -> usize {
    if substitutions.is_empty() {
        return 0;
    }

    let mut replaced = 0;
    for slot in target.links_mut() {
        if let Some(replacement) = substitutions.get(slot) {
            *slot = replacement.clone();
            replaced += 1;
        }
    }
    replaced
}

/// 选出唯一满足条件的元素
pub fn select_unique<'a, T, P>(items: &'a mut [T], description: &str, predicate: P) -> Result<&'a mut T, RewriteError>
where
    P: Fn(&T) -> bool,
{
    let mut matching = items.iter_mut().filter(|item| predicate(item));
    let first = matching.next();
    let extra = matching.count();

    match first {
        Some(item) if extra == 0 => Ok(item),
        Some(_) => Err(RewriteError::AmbiguousTarget {
            target: description.to_string(),
            matches: extra + 1,
        }),
        None => Err(RewriteError::AmbiguousTarget {
            target: description.to_string(),
            matches: 0,
        }),
    }
}

/// 只读版本的 [`select_unique`]
pub fn find_unique<'a, T, P>(items: &'a [T], description: &str, predicate: P) -> Result<&'a T, RewriteError>
where
    P: Fn(&T) -> bool,
{
    let mut matching = items.iter().filter(|item| predicate(item));
    match (matching.next(), matching.count()) {
        (Some(item), 0) => Ok(item),
        (first, extra) => Err(RewriteError::AmbiguousTarget {
            target: description.to_string(),
            matches: extra + usize::from(first.is_some()),
        }),
    }
}

/// 选出唯一的子结构后对其重写
pub fn rewrite_selected<T, P>(
    items: &mut [T],
    description: &str,
    predicate: P,
    substitutions: &Substitutions,
) -> Result<usize, RewriteError>
where
    T: Linked,
    P: Fn(&T) -> bool,
{
    let item = select_unique(items, description, predicate)?;
    Ok(rewrite(item, substitutions))
}
