/// IO 抽象层模块
///
/// 插件的读取与补丁的写入通过 trait 注入，便于测试中替换实现。
///
/// - **traits**: Reader/Writer trait 接口
/// - **esp_io**: 基于文件系统的默认实现
///
/// # 使用示例
///
/// ```rust,ignore
/// use esp_spell_toggle::io::{DefaultEspWriter, EspWriter, RawEspData};
///
/// let bytes = encode_patch(&patch, &listing, &PatchHeader::default())?;
/// DefaultEspWriter.write(&RawEspData { bytes }, Path::new("STToggle_Patch2.esp"))?;
/// ```
pub mod traits;
pub mod esp_io;

pub use traits::{EspReader, EspWriter, RawEspData};
pub use esp_io::{DefaultEspReader, DefaultEspWriter};
