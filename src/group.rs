use crate::datatypes::{read_i32, read_u16, read_u32};
use crate::record::RawRecord;
use crate::subrecord::Signature;
use crate::utils::EspError;
use std::io::{Cursor, Read};

/// 组类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupType {
    /// 普通组（顶级）
    Normal,
    /// 世界组
    World,
    /// 单元格组
    Cell,
    /// 未知类型
    Unknown(i32),
}

impl GroupType {
    /// 转换为i32值
    pub fn to_i32(&self) -> i32 {
        match self {
            GroupType::Normal => 0,
            GroupType::World => 1,
            GroupType::Cell => 6,
            GroupType::Unknown(value) => *value,
        }
    }
}

impl From<i32> for GroupType {
    fn from(value: i32) -> Self {
        match value {
            0 => GroupType::Normal,
            1 => GroupType::World,
            6 => GroupType::Cell,
            _ => GroupType::Unknown(value),
        }
    }
}

/// 组结构
#[derive(Debug, Clone)]
pub struct Group {
    /// 标签
    pub label: Signature,
    /// 组类型
    pub group_type: GroupType,
    /// 时间戳
    pub timestamp: u16,
    /// 版本控制信息
    pub version_control_info: u16,
    /// 未知字段
    pub unknown: u32,
    /// 子元素
    pub children: Vec<GroupChild>,
}

/// 组子元素
#[derive(Debug, Clone)]
pub enum GroupChild {
    /// 子组
    Group(Box<Group>),
    /// 记录
    Record(RawRecord),
}

impl Group {
    /// 创建空的顶级组
    pub fn top_level(label: Signature) -> Self {
        Self {
            label,
            group_type: GroupType::Normal,
            timestamp: 0,
            version_control_info: 0,
            unknown: 0,
            children: Vec::new(),
        }
    }

    /// 解析组
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self, EspError> {
        // 检查是否有足够的数据读取头部
        if cursor.position() + 24 > cursor.get_ref().len() as u64 {
            return Err(EspError::Truncated("组头部数据不足".into()));
        }

        let mut type_bytes = [0u8; 4];
        cursor.read_exact(&mut type_bytes)?;

        if &type_bytes != b"GRUP" {
            return Err(EspError::InvalidFormat(format!(
                "Expected GRUP, found {}", String::from_utf8_lossy(&type_bytes)
            )));
        }

        let size = read_u32(cursor)?;

        if size > 200_000_000 {  // 200MB限制
            return Err(EspError::InvalidFormat(format!("组大小异常: {} bytes (可能数据损坏)", size)));
        }

        if size < 24 {
            return Err(EspError::InvalidFormat(format!("组大小太小: {} bytes (最小应为24字节)", size)));
        }

        let mut label = [0u8; 4];
        cursor.read_exact(&mut label)?;
        let group_type = GroupType::from(read_i32(cursor)?);
        let timestamp = read_u16(cursor)?;
        let version_control_info = read_u16(cursor)?;
        let unknown = read_u32(cursor)?;

        let data_size = size - 24;

        if cursor.position() + data_size as u64 > cursor.get_ref().len() as u64 {
            return Err(EspError::Truncated(format!("组数据不足: 期望 {} bytes", data_size)));
        }

        let data_end = cursor.position() + data_size as u64;

        let mut children = Vec::new();
        while cursor.position() < data_end {
            // 预读取4字节判断类型
            let peek_pos = cursor.position();
            let mut peek_bytes = [0u8; 4];
            cursor.read_exact(&mut peek_bytes)?;
            cursor.set_position(peek_pos);

            if &peek_bytes == b"GRUP" {
                let child_group = Group::parse(cursor)?;
                children.push(GroupChild::Group(Box::new(child_group)));
            } else {
                let record = RawRecord::parse(cursor)?;
                children.push(GroupChild::Record(record));
            }
        }

        Ok(Group {
            label,
            group_type,
            timestamp,
            version_control_info,
            unknown,
            children,
        })
    }

    /// 获取所有记录
    pub fn records(&self) -> Vec<&RawRecord> {
        let mut records = Vec::new();
        self.collect_records(&mut records);
        records
    }

    /// 递归收集所有记录
    fn collect_records<'a>(&'a self, records: &mut Vec<&'a RawRecord>) {
        for child in &self.children {
            match child {
                GroupChild::Group(group) => group.collect_records(records),
                GroupChild::Record(record) => records.push(record),
            }
        }
    }

    /// 写入组
    pub fn write(&self, output: &mut Vec<u8>) -> Result<(), EspError> {
        output.extend_from_slice(b"GRUP");

        // 临时占位符，稍后计算实际大小
        let size_pos = output.len();
        output.extend_from_slice(&[0u8; 4]);

        output.extend_from_slice(&self.label);
        output.extend_from_slice(&self.group_type.to_i32().to_le_bytes());
        output.extend_from_slice(&self.timestamp.to_le_bytes());
        output.extend_from_slice(&self.version_control_info.to_le_bytes());
        output.extend_from_slice(&self.unknown.to_le_bytes());

        for child in &self.children {
            match child {
                GroupChild::Group(subgroup) => subgroup.write(output)?,
                GroupChild::Record(record) => record.write(output)?,
            }
        }

        // 计算并写入实际大小（需要包含"GRUP"的4字节）
        let actual_size = (output.len() - size_pos + 4) as u32;
        output[size_pos..size_pos + 4].copy_from_slice(&actual_size.to_le_bytes());

        Ok(())
    }

    /// 获取组标签字符串
    pub fn label_string(&self) -> String {
        String::from_utf8_lossy(&self.label).into_owned()
    }
}
