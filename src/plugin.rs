use crate::datatypes::{read_u32, RawString, RecordFlags};
use crate::form_key::{FormKey, ModKey};
use crate::group::Group;
use crate::io::EspReader;
use crate::load_order::ModFile;
use crate::record::RawRecord;
use crate::records::{DecodeContext, Record, RecordKind};
use crate::string_file::StringFileSet;
use crate::subrecord::Signature;
use crate::utils::EspError;
use memmap2::Mmap;
use rayon::prelude::*;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

pub mod writer;

pub use writer::{collect_masters, encode_patch, PatchHeader};

/// 已解析的插件文件
///
/// 只保留会被解码的顶级组（SPEL、PERK、MGEF），其余组在扫描阶段跳过。
#[derive(Debug)]
pub struct PluginFile {
    /// 文件路径
    pub path: PathBuf,
    /// 文件身份
    pub mod_key: ModKey,
    /// 头部记录（TES4）
    pub header: RawRecord,
    /// 主文件列表
    pub masters: Vec<ModKey>,
    /// 组列表
    pub groups: Vec<Group>,
}

impl PluginFile {
    /// 加载插件文件（内存映射）
    pub fn load(path: &Path) -> Result<Self, EspError> {
        let file = std::fs::File::open(path)?;
        // 映射只在本函数内使用，解析结果不借用映射内存
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_bytes(path.to_path_buf(), &mmap[..])
    }

    /// 通过指定的读取器加载
    pub fn read_with(reader: &dyn EspReader, path: &Path) -> Result<Self, EspError> {
        let data = reader.read(path)?;
        Self::from_bytes(path.to_path_buf(), &data.bytes)
    }

    /// 从内存数据解析；文件身份取自路径的文件名
    pub fn from_bytes(path: PathBuf, data: &[u8]) -> Result<Self, EspError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| EspError::InvalidFormat(format!("无法获取插件名称: {}", path.display())))?;
        let mod_key = ModKey::new(name);

        let mut cursor = Cursor::new(data);
        let header = RawRecord::parse(&mut cursor)?;
        Self::validate_esp_file(&header)?;

        let masters = Self::extract_masters(&header);
        let groups = Self::parse_groups(&mut cursor, data)?;

        Ok(PluginFile {
            path,
            mod_key,
            header,
            masters,
            groups,
        })
    }

    /// 验证ESP文件格式
    fn validate_esp_file(header: &RawRecord) -> Result<(), EspError> {
        if &header.signature != b"TES4" {
            return Err(EspError::InvalidFormat(format!(
                "文件头应为 TES4，实际为 {}",
                header.signature_str()
            )));
        }
        Ok(())
    }

    /// 解析需要解码的顶级组（并行）
    fn parse_groups(cursor: &mut Cursor<&[u8]>, data: &[u8]) -> Result<Vec<Group>, EspError> {
        // 第一遍：快速扫描获取所有顶级 Group 边界
        let group_ranges: Vec<(u64, u32)> = Self::scan_group_boundaries(cursor, data)?
            .into_iter()
            .filter(|(_, _, label)| RecordKind::from_signature(label).is_some())
            .map(|(start, size, _)| (start, size))
            .collect();

        // 第二遍：并行解析每个 Group
        group_ranges
            .par_iter()
            .map(|&(start, size)| -> Result<Group, EspError> {
                let end = start + size as u64;
                if end > data.len() as u64 {
                    return Err(EspError::Truncated(format!(
                        "Group 边界超出数据范围: {}..{} (数据长度: {})",
                        start,
                        end,
                        data.len()
                    )));
                }
                let mut group_cursor = Cursor::new(&data[start as usize..end as usize]);
                Group::parse(&mut group_cursor)
            })
            .collect()
    }

    /// 扫描顶级 Group 边界（起始位置，大小，标签）
    fn scan_group_boundaries(cursor: &mut Cursor<&[u8]>, data: &[u8]) -> Result<Vec<(u64, u32, Signature)>, EspError> {
        let mut boundaries = Vec::new();
        let start_pos = cursor.position();

        while cursor.position() < data.len() as u64 {
            let pos = cursor.position();

            // Group 头部前 12 字节：类型、大小、标签
            if pos + 12 > data.len() as u64 {
                break;
            }

            let mut type_bytes = [0u8; 4];
            cursor.read_exact(&mut type_bytes)?;

            if &type_bytes != b"GRUP" {
                return Err(EspError::InvalidFormat(format!(
                    "在位置 {} 期望 GRUP，但找到 {}",
                    pos,
                    String::from_utf8_lossy(&type_bytes)
                )));
            }

            let size = read_u32(cursor)?;
            if !(24..=200_000_000).contains(&size) {
                return Err(EspError::InvalidFormat(format!(
                    "在位置 {} 发现异常 Group 大小: {} bytes",
                    pos, size
                )));
            }

            let mut label = [0u8; 4];
            cursor.read_exact(&mut label)?;

            boundaries.push((pos, size, label));
            cursor.set_position(pos + size as u64);
        }

        cursor.set_position(start_pos);
        Ok(boundaries)
    }

    /// 从头部记录提取主文件列表
    fn extract_masters(header: &RawRecord) -> Vec<ModKey> {
        header
            .subrecords
            .iter()
            .filter(|sr| sr.is(b"MAST"))
            .map(|sr| ModKey::new(RawString::parse_zstring(&sr.data).content))
            .collect()
    }

    /// 是否为主文件（ESM 标志）
    pub fn is_master(&self) -> bool {
        self.header.header.flags.contains(RecordFlags::MASTER_FILE)
    }

    /// 是否本地化
    pub fn is_localized(&self) -> bool {
        self.header.header.flags.contains(RecordFlags::LOCALIZED)
    }

    /// 是否为轻量插件：扩展名为 .esl 或设置了 LightMaster 标志
    pub fn is_light(&self) -> bool {
        self.mod_key
            .extension()
            .map(|ext| ext == "esl")
            .unwrap_or(false)
            || self.header.header.flags.contains(RecordFlags::LIGHT_MASTER)
    }

    /// 已解析的原始记录数
    pub fn record_count(&self) -> usize {
        self.groups.iter().map(|group| group.records().len()).sum()
    }

    /// 查找本地化插件的 STRING 文件
    ///
    /// 依次尝试 `Strings/`、`strings/` 与插件所在目录；都找不到时返回 None。
    pub fn load_string_files(&self, language: &str) -> Option<StringFileSet> {
        let plugin_dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let plugin_name = self.mod_key.stem();

        let search_dirs = [
            plugin_dir.join("Strings"),
            plugin_dir.join("strings"),
            plugin_dir.to_path_buf(),
        ];

        for dir in search_dirs.iter().filter(|dir| dir.exists()) {
            match StringFileSet::load_from_directory(dir, plugin_name, language) {
                Ok(set) if !set.is_empty() => {
                    tracing::debug!("已加载 {} 的 STRING 文件（{}）", self.mod_key, dir.display());
                    return Some(set);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("无法从 {} 加载 STRING 文件: {}", dir.display(), e),
            }
        }

        tracing::warn!("{} 为本地化插件，但未找到 {} 语言的 STRING 文件", self.mod_key, language);
        None
    }

    /// 解码为类型化记录
    ///
    /// 单条记录解码失败时记录警告，并把失败原因保存在 [`ModFile`] 中，
    /// 解析到该记录时报告 [`ResolutionError::Malformed`](crate::load_order::ResolutionError::Malformed)。
    pub fn decode(&self, strings: Option<&StringFileSet>) -> Result<ModFile, EspError> {
        let ctx = DecodeContext {
            file: self.mod_key.clone(),
            masters: &self.masters,
            strings,
            localized: self.is_localized(),
        };

        let decoded: Vec<Vec<Result<Record, (FormKey, EspError)>>> = self
            .groups
            .par_iter()
            .map(|group| {
                group
                    .records()
                    .into_iter()
                    .filter_map(|raw| match Record::decode(raw, &ctx) {
                        Ok(record) => record.map(Ok),
                        Err(e) => Some(Err((ctx.record_key(raw), e))),
                    })
                    .collect()
            })
            .collect();

        let mut file = ModFile::new(self.mod_key.clone()).with_masters(self.masters.clone());
        for result in decoded.into_iter().flatten() {
            match result {
                Ok(record) => file.insert(record),
                Err((form_key, e)) => {
                    tracing::warn!("{} 中的记录 {} 无法解码: {}", self.mod_key, form_key, e);
                    file.record_failure(form_key, e.to_string());
                }
            }
        }
        Ok(file)
    }

    /// 解码，本地化插件先加载对应语言的 STRING 文件
    pub fn decode_with_strings(&self, language: &str) -> Result<ModFile, EspError> {
        let strings = if self.is_localized() {
            self.load_string_files(language)
        } else {
            None
        };
        self.decode(strings.as_ref())
    }
}

impl std::fmt::Display for PluginFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== 插件信息 ===")?;
        writeln!(f, "名称: {}", self.mod_key)?;
        writeln!(f, "主文件: {}", if self.is_master() { "是" } else { "否" })?;
        writeln!(f, "本地化: {}", if self.is_localized() { "是" } else { "否" })?;
        writeln!(f, "轻量: {}", if self.is_light() { "是" } else { "否" })?;
        writeln!(f, "依赖主文件数: {}", self.masters.len())?;
        write!(f, "已解析记录数: {}", self.record_count())
    }
}
