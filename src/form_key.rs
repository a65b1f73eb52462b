//! 跨文件记录标识符
//!
//! - [`ModKey`]: 插件文件身份（文件名，大小写不敏感）
//! - [`FormKey`]: 所属文件 + 24 位本地键
//! - [`FormLink`]: 带编译期目标类型的引用

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::records::{MajorRecord, RecordKind};

/// 本地键的有效位
pub const LOCAL_KEY_MASK: u32 = 0x00FF_FFFF;

/// 插件文件身份
///
/// 比较与哈希按 ASCII 忽略大小写，显示时保留原始拼写。
#[derive(Clone)]
pub struct ModKey {
    name: Arc<str>,
}

impl ModKey {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self { name: Arc::from(name.as_ref().trim()) }
    }

    /// 文件名（含扩展名）
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 不含扩展名的文件名（STRING 文件按此命名）
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(pos) => &self.name[..pos],
            None => &self.name,
        }
    }

    /// 扩展名（小写）
    pub fn extension(&self) -> Option<String> {
        self.name.rfind('.').map(|pos| self.name[pos + 1..].to_ascii_lowercase())
    }

    /// 给定本地键构造属于本文件的 FormKey
    pub fn make_form_key(&self, local_key: u32) -> FormKey {
        FormKey::new(self.clone(), local_key)
    }
}

impl PartialEq for ModKey {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for ModKey {}

impl Hash for ModKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.name.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xFF);
    }
}

impl PartialOrd for ModKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ModKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let left = self.name.bytes().map(|b| b.to_ascii_lowercase());
        let right = other.name.bytes().map(|b| b.to_ascii_lowercase());
        left.cmp(right)
    }
}

impl fmt::Debug for ModKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModKey({})", self.name)
    }
}

impl fmt::Display for ModKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// 记录标识符：(所属文件, 本地键)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormKey {
    mod_key: ModKey,
    local_key: u32,
}

impl FormKey {
    /// 本地键会被截取为 24 位
    pub fn new(mod_key: ModKey, local_key: u32) -> Self {
        Self {
            mod_key,
            local_key: local_key & LOCAL_KEY_MASK,
        }
    }

    pub fn mod_key(&self) -> &ModKey {
        &self.mod_key
    }

    pub fn local_key(&self) -> u32 {
        self.local_key
    }

    /// 转换为带类型的引用
    pub fn as_link<T: MajorRecord>(&self) -> FormLink<T> {
        FormLink::new(self.clone())
    }

    /// 适合作为 EditorID 片段的形式，如 `012345_Foo_esp`
    pub fn identifier_stem(&self) -> String {
        let file: String = self
            .mod_key
            .name()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{:06X}_{}", self.local_key, file)
    }
}

impl fmt::Debug for FormKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FormKey({})", self)
    }
}

impl fmt::Display for FormKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}:{}", self.local_key, self.mod_key)
    }
}

/// 带目标类型的引用
pub struct FormLink<T> {
    form_key: FormKey,
    _target: PhantomData<fn() -> T>,
}

impl<T: MajorRecord> FormLink<T> {
    pub fn new(form_key: FormKey) -> Self {
        Self {
            form_key,
            _target: PhantomData,
        }
    }

    pub fn form_key(&self) -> &FormKey {
        &self.form_key
    }

    pub fn form_key_mut(&mut self) -> &mut FormKey {
        &mut self.form_key
    }

    pub fn into_form_key(self) -> FormKey {
        self.form_key
    }

    /// 期望解析到的记录类型
    pub fn kind(&self) -> RecordKind {
        T::KIND
    }
}

impl<T> Clone for FormLink<T> {
    fn clone(&self) -> Self {
        Self {
            form_key: self.form_key.clone(),
            _target: PhantomData,
        }
    }
}

impl<T> PartialEq for FormLink<T> {
    fn eq(&self, other: &Self) -> bool {
        self.form_key == other.form_key
    }
}

impl<T> Eq for FormLink<T> {}

impl<T> Hash for FormLink<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.form_key.hash(state);
    }
}

impl<T: MajorRecord> fmt::Debug for FormLink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FormLink<{}>({})", T::KIND, self.form_key)
    }
}

impl<T: MajorRecord> fmt::Display for FormLink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", T::KIND, self.form_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Spell;
    use std::collections::HashSet;

    #[test]
    fn test_mod_key_ignores_case() {
        let a = ModKey::new("STToggle.esp");
        let b = ModKey::new("sttoggle.ESP");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert_eq!(b.name(), "sttoggle.ESP");
    }

    #[test]
    fn test_mod_key_parts() {
        let key = ModKey::new("Foo.Bar.esp");
        assert_eq!(key.stem(), "Foo.Bar");
        assert_eq!(key.extension().as_deref(), Some("esp"));
    }

    #[test]
    fn test_form_key_masks_local_key() {
        let key = ModKey::new("Foo.esp").make_form_key(0xFE01_2345);
        assert_eq!(key.local_key(), 0x012345);
        assert_eq!(key.to_string(), "012345:Foo.esp");
        assert_eq!(key.identifier_stem(), "012345_Foo_esp");
    }

    #[test]
    fn test_form_key_equality_needs_both_parts() {
        let foo = ModKey::new("Foo.esp");
        let bar = ModKey::new("Bar.esp");
        assert_eq!(foo.make_form_key(1), foo.make_form_key(1));
        assert_ne!(foo.make_form_key(1), foo.make_form_key(2));
        assert_ne!(foo.make_form_key(1), bar.make_form_key(1));
    }

    #[test]
    fn test_form_link_reports_kind() {
        let link: FormLink<Spell> = ModKey::new("Foo.esp").make_form_key(0x800).as_link();
        assert_eq!(link.kind(), RecordKind::Spell);
        assert_eq!(link.to_string(), "SPEL 000800:Foo.esp");
    }
}
