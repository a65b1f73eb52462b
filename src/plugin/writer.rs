//! 补丁写入
//!
//! 把 [`PatchMod`] 编码为插件二进制：TES4 头部、按游戏顺序排列的顶级组。

use std::collections::BTreeSet;

use crate::datatypes::{encode_zstring, RecordFlags};
use crate::form_key::ModKey;
use crate::group::{Group, GroupChild};
use crate::patch::PatchMod;
use crate::record::{RawRecord, RecordHeader};
use crate::records::{EncodeContext, Linked, RecordKind};
use crate::subrecord::Subrecord;
use crate::utils::EspError;

/// HEDR 中的格式版本（SSE）
pub const HEADER_VERSION: f32 = 1.71;

/// 主文件数量上限
pub const MAX_MASTERS: usize = 255;

/// 头部中可配置的部分
#[derive(Debug, Clone)]
pub struct PatchHeader {
    /// CNAM
    pub author: String,
    /// SNAM（为空时不写）
    pub description: Option<String>,
}

impl Default for PatchHeader {
    fn default() -> Self {
        Self {
            author: "DEFAULT".to_string(),
            description: None,
        }
    }
}

/// 计算补丁的主文件列表
///
/// 包含补丁记录引用到的所有文件，以及覆盖记录所属的文件（补丁自身除外），
/// 按 `listing` 中的位置排序；未列出的文件按名称排在最后。
pub fn collect_masters(patch: &PatchMod, listing: &[ModKey]) -> Result<Vec<ModKey>, EspError> {
    let mut referenced: BTreeSet<ModKey> = BTreeSet::new();

    for record in patch.records() {
        referenced.insert(record.form_key().mod_key().clone());
        for link in record.links() {
            referenced.insert(link.mod_key().clone());
        }
    }
    referenced.remove(patch.mod_key());

    let mut masters: Vec<ModKey> = listing
        .iter()
        .filter(|mod_key| referenced.contains(*mod_key))
        .cloned()
        .collect();
    masters.extend(referenced.into_iter().filter(|mod_key| !listing.contains(mod_key)));

    if masters.len() > MAX_MASTERS {
        return Err(EspError::TooManyMasters(masters.len()));
    }

    Ok(masters)
}

/// 编码补丁
pub fn encode_patch(patch: &PatchMod, listing: &[ModKey], header: &PatchHeader) -> Result<Vec<u8>, EspError> {
    let masters = collect_masters(patch, listing)?;
    let ctx = EncodeContext::new(patch.mod_key(), &masters);

    let mut groups = Vec::new();
    for kind in RecordKind::ALL {
        let mut group = Group::top_level(kind.signature());
        for record in patch.records().iter().filter(|record| record.kind() == kind) {
            group.children.push(GroupChild::Record(record.encode(&ctx)?));
        }
        if !group.children.is_empty() {
            groups.push(group);
        }
    }

    let record_count = patch.len() + groups.len();
    let tes4 = build_header(patch, &masters, header, record_count as u32);

    let mut output = Vec::new();
    tes4.write(&mut output)?;
    for group in &groups {
        group.write(&mut output)?;
    }

    tracing::debug!(
        "编码补丁 {}: {} 条记录，{} 个主文件，{} bytes",
        patch.mod_key(),
        patch.len(),
        masters.len(),
        output.len()
    );
    Ok(output)
}

fn build_header(patch: &PatchMod, masters: &[ModKey], header: &PatchHeader, record_count: u32) -> RawRecord {
    let mut hedr = Vec::with_capacity(12);
    hedr.extend_from_slice(&HEADER_VERSION.to_le_bytes());
    hedr.extend_from_slice(&record_count.to_le_bytes());
    hedr.extend_from_slice(&patch.next_local_key().to_le_bytes());

    let mut subrecords = vec![
        Subrecord::new(*b"HEDR", hedr),
        Subrecord::new(*b"CNAM", encode_zstring(&header.author)),
    ];
    if let Some(description) = &header.description {
        subrecords.push(Subrecord::new(*b"SNAM", encode_zstring(description)));
    }
    for master in masters {
        subrecords.push(Subrecord::new(*b"MAST", encode_zstring(master.name())));
        subrecords.push(Subrecord::new(*b"DATA", 0u64.to_le_bytes().to_vec()));
    }

    let mut flags = RecordFlags::empty();
    if patch.is_light() {
        flags |= RecordFlags::LIGHT_MASTER;
    }

    RawRecord {
        signature: *b"TES4",
        form_id: 0,
        header: RecordHeader {
            flags,
            ..RecordHeader::default()
        },
        subrecords,
    }
}
