//! 加载顺序与引用解析
//!
//! 解析按直接引用进行：要求引用所属的文件已列出、已加载且已启用，
//! 然后取该文件自身定义的记录，不沿覆盖链合并。

pub mod listing;

use std::collections::HashMap;
use std::path::Path;

use rayon::prelude::*;
use thiserror::Error;

use crate::form_key::{FormKey, FormLink, ModKey};
use crate::plugin::PluginFile;
use crate::records::{MajorRecord, Record, RecordKind};
use crate::utils::EspError;

pub use listing::ModListing;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("Plugin {mod_key} is not loaded or not enabled")]
    FileNotLoaded { mod_key: ModKey },

    #[error("Record {form_key} not found")]
    RecordNotFound { form_key: FormKey },

    #[error("Record {form_key} exists but could not be decoded: {reason}")]
    Malformed { form_key: FormKey, reason: String },

    #[error("Record {form_key} is {found}, expected {expected}")]
    TypeMismatch {
        form_key: FormKey,
        expected: RecordKind,
        found: RecordKind,
    },
}

/// 一个已加载插件的已解码内容
#[derive(Debug, Clone)]
pub struct ModFile {
    pub mod_key: ModKey,
    pub masters: Vec<ModKey>,
    records: Vec<Record>,
    index: HashMap<FormKey, usize>,
    /// 解码失败的记录及其原因
    failures: HashMap<FormKey, String>,
}

impl ModFile {
    pub fn new(mod_key: ModKey) -> Self {
        Self {
            mod_key,
            masters: Vec::new(),
            records: Vec::new(),
            index: HashMap::new(),
            failures: HashMap::new(),
        }
    }

    pub fn with_masters(mut self, masters: Vec<ModKey>) -> Self {
        self.masters = masters;
        self
    }

    /// 加入记录；同一 FormKey 出现多次时后者生效
    pub fn insert(&mut self, record: impl Into<Record>) {
        let record = record.into();
        self.failures.remove(record.form_key());
        match self.index.get(record.form_key()) {
            Some(&i) => self.records[i] = record,
            None => {
                self.index.insert(record.form_key().clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn with_record(mut self, record: impl Into<Record>) -> Self {
        self.insert(record);
        self
    }

    pub fn get(&self, form_key: &FormKey) -> Option<&Record> {
        self.index.get(form_key).map(|&i| &self.records[i])
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// 记录一条存在但无法解码的记录
    pub fn record_failure(&mut self, form_key: FormKey, reason: impl Into<String>) {
        if !self.index.contains_key(&form_key) {
            self.failures.insert(form_key, reason.into());
        }
    }

    pub fn failure(&self, form_key: &FormKey) -> Option<&str> {
        self.failures.get(form_key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// 加载顺序的只读接口
pub trait LoadOrderProvider {
    /// 已加载的文件（不考虑启用状态）
    fn get_file(&self, mod_key: &ModKey) -> Option<&ModFile>;

    fn is_enabled(&self, mod_key: &ModKey) -> bool;

    /// 文件自身定义的、本地键为 `local_key` 的记录
    fn get_record(&self, mod_key: &ModKey, local_key: u32) -> Option<&Record> {
        self.get_file(mod_key)?.get(&mod_key.make_form_key(local_key))
    }

    /// 文件是否已列出、已加载且已启用
    fn has_mod(&self, mod_key: &ModKey) -> bool {
        self.is_enabled(mod_key) && self.get_file(mod_key).is_some()
    }

    /// 将带类型的引用解析为具体记录
    fn resolve<T: MajorRecord>(&self, link: &FormLink<T>) -> Result<&T, ResolutionError>
    where
        Self: Sized,
    {
        let form_key = link.form_key();
        let mod_key = form_key.mod_key();

        if !self.has_mod(mod_key) {
            return Err(ResolutionError::FileNotLoaded {
                mod_key: mod_key.clone(),
            });
        }

        let record = self.get_record(mod_key, form_key.local_key()).ok_or_else(|| {
            match self.get_file(mod_key).and_then(|file| file.failure(form_key)) {
                Some(reason) => ResolutionError::Malformed {
                    form_key: form_key.clone(),
                    reason: reason.to_string(),
                },
                None => ResolutionError::RecordNotFound {
                    form_key: form_key.clone(),
                },
            }
        })?;

        T::from_record(record).ok_or_else(|| ResolutionError::TypeMismatch {
            form_key: form_key.clone(),
            expected: T::KIND,
            found: record.kind(),
        })
    }
}

/// 按列表顺序排列的插件集合
#[derive(Debug, Clone, Default)]
pub struct LoadOrder {
    listings: Vec<ModListing>,
    mods: HashMap<ModKey, ModFile>,
}

impl LoadOrder {
    pub fn new(listings: Vec<ModListing>) -> Self {
        Self {
            listings,
            mods: HashMap::new(),
        }
    }

    /// 加入已解码的文件（未列出的文件会作为已启用项追加到列表末尾）
    pub fn add_file(&mut self, file: ModFile) {
        if self.position(&file.mod_key).is_none() {
            self.listings.push(ModListing::new(file.mod_key.clone(), true));
        }
        self.mods.insert(file.mod_key.clone(), file);
    }

    pub fn with_file(mut self, file: ModFile) -> Self {
        self.add_file(file);
        self
    }

    /// 从数据目录并行加载 `wanted` 中已列出且已启用的插件
    ///
    /// 其余列出的插件只保留列表项，不解析。
    pub fn load(
        data_dir: &Path,
        listings: Vec<ModListing>,
        wanted: &[ModKey],
        language: &str,
    ) -> Result<Self, EspError> {
        let to_load: Vec<&ModListing> = listings
            .iter()
            .filter(|listing| listing.enabled && wanted.contains(&listing.mod_key))
            .collect();

        let files: Vec<Option<ModFile>> = to_load
            .par_iter()
            .map(|listing| -> Result<Option<ModFile>, EspError> {
                let path = data_dir.join(listing.mod_key.name());
                if !path.exists() {
                    tracing::warn!("插件 {} 已列出但不存在于 {}", listing.mod_key, data_dir.display());
                    return Ok(None);
                }
                let plugin = PluginFile::load(&path)?;
                let file = plugin.decode_with_strings(language)?;
                tracing::info!("已加载 {}（{} 条记录）", listing.mod_key, file.len());
                Ok(Some(file))
            })
            .collect::<Result<_, _>>()?;

        let mut load_order = LoadOrder::new(listings);
        for file in files.into_iter().flatten() {
            load_order.mods.insert(file.mod_key.clone(), file);
        }
        Ok(load_order)
    }

    pub fn listings(&self) -> &[ModListing] {
        &self.listings
    }

    /// 在列表中的位置
    pub fn position(&self, mod_key: &ModKey) -> Option<usize> {
        self.listings.iter().position(|listing| &listing.mod_key == mod_key)
    }

    /// 按列表顺序的文件身份
    pub fn mod_keys(&self) -> Vec<ModKey> {
        self.listings.iter().map(|listing| listing.mod_key.clone()).collect()
    }
}

impl LoadOrderProvider for LoadOrder {
    fn get_file(&self, mod_key: &ModKey) -> Option<&ModFile> {
        self.mods.get(mod_key)
    }

    fn is_enabled(&self, mod_key: &ModKey) -> bool {
        self.listings
            .iter()
            .any(|listing| &listing.mod_key == mod_key && listing.enabled)
    }
}
