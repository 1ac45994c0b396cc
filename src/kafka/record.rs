//! 消息记录和 offset 辅助类型

use std::collections::BTreeMap;

/// 从 broker 收到的一条消息，key 为 UTF-8 字符串，value 为原始字节
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub value: Vec<u8>,
    /// 消息时间戳（毫秒）
    pub timestamp: Option<i64>,
}

/// topic 分区上的一个 offset
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl PartitionOffset {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

/// 发送成功的回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// 每个分区处理完成后要提交的 offset（最大 offset + 1）
pub fn next_offsets(records: &[Record]) -> Vec<PartitionOffset> {
    let mut offsets: BTreeMap<(&str, i32), i64> = BTreeMap::new();
    for record in records {
        let entry = offsets
            .entry((record.topic.as_str(), record.partition))
            .or_insert(record.offset);
        *entry = (*entry).max(record.offset);
    }
    offsets
        .into_iter()
        .map(|((topic, partition), offset)| PartitionOffset::new(topic, partition, offset + 1))
        .collect()
}

/// 每个分区本批次的第一条 offset，处理失败时回退到这里重新投递
pub fn first_offsets(records: &[Record]) -> Vec<PartitionOffset> {
    let mut offsets: BTreeMap<(&str, i32), i64> = BTreeMap::new();
    for record in records {
        let entry = offsets
            .entry((record.topic.as_str(), record.partition))
            .or_insert(record.offset);
        *entry = (*entry).min(record.offset);
    }
    offsets
        .into_iter()
        .map(|((topic, partition), offset)| PartitionOffset::new(topic, partition, offset))
        .collect()
}
