pub mod datatypes;
pub mod record;
pub mod group;
pub mod plugin;
pub mod subrecord;
pub mod string_file;
pub mod utils;
pub mod io;
pub mod form_key;
pub mod records;
pub mod load_order;
pub mod patch;
pub mod templating;
pub mod rewrite;
pub mod patcher;

// 重新导出主要结构
pub use plugin::{encode_patch, PatchHeader, PluginFile};
pub use record::RawRecord;
pub use group::Group;
pub use subrecord::Subrecord;
pub use utils::EspError;
pub use form_key::{FormKey, FormLink, ModKey};
pub use records::{MagicEffect, MajorRecord, Perk, Record, RecordKind, Spell};
pub use load_order::{LoadOrder, LoadOrderProvider, ModFile, ModListing, ResolutionError};
pub use patch::{PatchMod, PatchSummary};
pub use rewrite::{RewriteError, Substitutions};
pub use patcher::{check_runnability, run_patch, PatchError, Patcher, PatcherConfig, PipelineStage, PluginSpells};

// 常量定义
pub const SUPPORTED_EXTENSIONS: &[&str] = &["esp", "esm", "esl"];
