//! 输出补丁容器
//!
//! 持有新建记录与标识符分配状态。分配器从 `0x800` 开始单调递增，
//! 永不回绕；同一个容器上的多次运行共享分配状态。

use std::collections::HashMap;
use std::fmt;

use crate::form_key::{FormKey, ModKey, LOCAL_KEY_MASK};
use crate::patcher::PatchError;
use crate::records::{MajorRecord, Record, RecordKind};

/// 插件可用的第一个本地键
pub const FIRST_LOCAL_KEY: u32 = 0x800;
/// 轻量插件（ESL）的本地键上限
pub const LIGHT_LOCAL_KEY_LIMIT: u32 = 0xFFF;

#[derive(Debug, Clone)]
pub struct PatchMod {
    mod_key: ModKey,
    light: bool,
    next_local_key: u32,
    records: Vec<Record>,
    index: HashMap<FormKey, usize>,
}

impl PatchMod {
    pub fn new(mod_key: ModKey) -> Self {
        Self {
            mod_key,
            light: false,
            next_local_key: FIRST_LOCAL_KEY,
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// 以轻量插件（ESL）输出
    pub fn light(mut self, light: bool) -> Self {
        self.light = light;
        self
    }

    pub fn mod_key(&self) -> &ModKey {
        &self.mod_key
    }

    pub fn is_light(&self) -> bool {
        self.light
    }

    /// 本地键上限
    pub fn key_limit(&self) -> u32 {
        if self.light {
            LIGHT_LOCAL_KEY_LIMIT
        } else {
            LOCAL_KEY_MASK
        }
    }

    /// 下一个将被分配的本地键（写入 HEDR 的 next object id）
    pub fn next_local_key(&self) -> u32 {
        self.next_local_key
    }

    /// 分配一个新的、属于本文件的标识符
    pub fn allocate_identifier(&mut self) -> Result<FormKey, PatchError> {
        let limit = self.key_limit();
        if self.next_local_key > limit {
            return Err(PatchError::KeySpaceExhausted {
                mod_key: self.mod_key.clone(),
                limit,
            });
        }

        let key = self.mod_key.make_form_key(self.next_local_key);
        self.next_local_key += 1;
        tracing::debug!("分配标识符 {}", key);
        Ok(key)
    }

    pub fn next_identifier(&mut self) -> Result<FormKey, PatchError> {
        self.allocate_identifier()
    }

    /// 加入一条完整的记录
    pub fn insert(&mut self, record: impl Into<Record>) -> Result<(), PatchError> {
        let record = record.into();
        let form_key = record.form_key().clone();

        if self.index.contains_key(&form_key) {
            debug_assert!(false, "重复的记录标识符 {}", form_key);
            return Err(PatchError::DuplicateIdentifier { form_key });
        }

        tracing::debug!("写入记录 {} {}", record.kind(), form_key);
        self.index.insert(form_key, self.records.len());
        self.records.push(record);
        Ok(())
    }

    /// 按插入顺序
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, form_key: &FormKey) -> Option<&Record> {
        self.index.get(form_key).map(|&i| &self.records[i])
    }

    pub fn contains(&self, form_key: &FormKey) -> bool {
        self.index.contains_key(form_key)
    }

    /// 指定类型的记录，按插入顺序
    pub fn records_of<'a, T: MajorRecord + 'a>(&'a self) -> impl Iterator<Item = &'a T> {
        self.records.iter().filter_map(T::from_record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn summary(&self, targets: usize) -> PatchSummary {
        let mut summary = PatchSummary {
            targets,
            ..PatchSummary::default()
        };
        for record in &self.records {
            match record.kind() {
                RecordKind::Spell => summary.spells += 1,
                RecordKind::Perk => summary.perks += 1,
                RecordKind::MagicEffect => summary.magic_effects += 1,
            }
        }
        summary
    }
}

/// 运行结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSummary {
    pub targets: usize,
    pub spells: usize,
    pub perks: usize,
    pub magic_effects: usize,
}

impl fmt::Display for PatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== 补丁统计 ===")?;
        writeln!(f, "处理的法术: {}", self.targets)?;
        writeln!(f, "SPEL 记录: {}", self.spells)?;
        writeln!(f, "PERK 记录: {}", self.perks)?;
        write!(f, "MGEF 记录: {}", self.magic_effects)
    }
}
