use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::domain::model::MessageRecord;

/// 分页游标：当前持有的最早一条记录
///
/// 按 `(created_at, id)` 排序，`id` 用于同一时刻多条记录的稳定次序。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl PageCursor {
    /// 只有带服务端 id 与时间戳的记录才能作为游标
    pub fn from_record(record: &MessageRecord) -> Option<Self> {
        Some(Self {
            created_at: record.created_at?,
            id: record.id.clone()?,
        })
    }
}

/// 实时消息推送通道；丢弃接收端即取消订阅
pub type LiveFeed = mpsc::Receiver<Vec<MessageRecord>>;

/// 消息持久化协作方（需要作为 trait 对象使用，保留 async-trait）
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 订阅会话的实时消息
    ///
    /// 每次服务端的已确认集合变化时推送完整快照。
    async fn subscribe_live(&self, conversation_id: &str) -> Result<LiveFeed>;

    /// 拉取早于 `before` 的一页历史，按 `created_at` 降序，最多 `page_size` 条
    async fn fetch_page(
        &self,
        conversation_id: &str,
        before: Option<&PageCursor>,
        page_size: usize,
    ) -> Result<Vec<MessageRecord>>;

    /// 写入新消息或编辑已有消息（`record.id` 有值时为编辑），返回服务端 id
    async fn write_message(&self, conversation_id: &str, record: &MessageRecord)
    -> Result<String>;

    async fn delete_message(&self, conversation_id: &str, id: &str) -> Result<()>;

    /// 标记消息为已读（可选能力）
    ///
    /// # 注意
    /// 如果实现不支持已读回执，保留默认实现即可，调用方会收到错误。
    async fn mark_read(&self, conversation_id: &str, ids: &[String]) -> Result<()> {
        let _ = (conversation_id, ids);
        Err(anyhow!("mark_read not supported by this message store"))
    }
}
