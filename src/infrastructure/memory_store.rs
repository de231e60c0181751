//! 内存消息存储
//!
//! `MessageStore` 的进程内实现：按会话保存消息，分配服务端 id 与时间戳，
//! 每次变更后向订阅者推送实时快照。支持注入写入/拉取失败与拉取延迟，用于测试。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, instrument};

use crate::domain::model::{MessageRecord, MessageState, TimestampSource};
use crate::domain::repository::{LiveFeed, MessageStore, PageCursor};
use crate::utils::{Clock, SystemClock};

const LIVE_CHANNEL_CAPACITY: usize = 32;

#[derive(Default)]
struct ConversationLog {
    messages: Vec<MessageRecord>,
    subscribers: Vec<mpsc::Sender<Vec<MessageRecord>>>,
}

#[derive(Debug, Default)]
struct FailurePlan {
    writes: usize,
    fetches: usize,
    deletes: usize,
    mark_reads: usize,
}

/// 内存消息存储
pub struct InMemoryMessageStore {
    clock: Arc<dyn Clock>,
    conversations: RwLock<HashMap<String, ConversationLog>>,
    failures: Mutex<FailurePlan>,
    fetch_latency: Option<Duration>,
    write_latency: Option<Duration>,
    /// 实时快照只包含最近的 N 条消息；None 表示全部
    live_window: Option<usize>,
    next_id: AtomicU64,
    fetch_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

impl InMemoryMessageStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            conversations: RwLock::new(HashMap::new()),
            failures: Mutex::new(FailurePlan::default()),
            fetch_latency: None,
            write_latency: None,
            live_window: None,
            next_id: AtomicU64::new(1),
            fetch_calls: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_fetch_latency(mut self, latency: Duration) -> Self {
        self.fetch_latency = Some(latency);
        self
    }

    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = Some(latency);
        self
    }

    pub fn with_live_window(mut self, window: usize) -> Self {
        self.live_window = Some(window);
        self
    }

    /// 直接写入已确认的消息（不经过写入路径，不推送）
    pub async fn seed(&self, conversation_id: &str, records: impl IntoIterator<Item = MessageRecord>) {
        let mut conversations = self.conversations.write().await;
        let log = conversations.entry(conversation_id.to_string()).or_default();
        for mut record in records {
            record.state = MessageState::Confirmed;
            record.failure = None;
            log.messages.push(record);
        }
        sort_ascending(&mut log.messages);
    }

    /// 会话中的全部消息（按时间升序）
    pub async fn messages(&self, conversation_id: &str) -> Vec<MessageRecord> {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    pub async fn fail_next_writes(&self, count: usize) {
        self.failures.lock().await.writes = count;
    }

    pub async fn fail_next_fetches(&self, count: usize) {
        self.failures.lock().await.fetches = count;
    }

    pub async fn fail_next_deletes(&self, count: usize) {
        self.failures.lock().await.deletes = count;
    }

    pub async fn fail_next_mark_reads(&self, count: usize) {
        self.failures.lock().await.mark_reads = count;
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// 向订阅者推送当前快照
    pub async fn publish(&self, conversation_id: &str) {
        let (snapshot, subscribers) = {
            let mut conversations = self.conversations.write().await;
            let Some(log) = conversations.get_mut(conversation_id) else {
                return;
            };
            log.subscribers.retain(|sender| !sender.is_closed());
            (self.live_snapshot(log), log.subscribers.clone())
        };

        for sender in subscribers {
            // 订阅方已取消时忽略
            let _ = sender.send(snapshot.clone()).await;
        }
    }

    fn live_snapshot(&self, log: &ConversationLog) -> Vec<MessageRecord> {
        let skip = self
            .live_window
            .map(|window| log.messages.len().saturating_sub(window))
            .unwrap_or(0);
        log.messages[skip..].to_vec()
    }

    async fn take_failure(&self, pick: impl FnOnce(&mut FailurePlan) -> &mut usize) -> bool {
        let mut failures = self.failures.lock().await;
        let remaining = pick(&mut failures);
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    #[instrument(skip(self))]
    async fn subscribe_live(&self, conversation_id: &str) -> Result<LiveFeed> {
        let (sender, receiver) = mpsc::channel(LIVE_CHANNEL_CAPACITY);
        let snapshot = {
            let mut conversations = self.conversations.write().await;
            let log = conversations.entry(conversation_id.to_string()).or_default();
            log.subscribers.push(sender.clone());
            self.live_snapshot(log)
        };

        // 订阅即推送一次当前集合
        sender
            .send(snapshot)
            .await
            .map_err(|_| anyhow!("live subscriber dropped before initial snapshot"))?;
        debug!(conversation_id, "live subscriber registered");
        Ok(receiver)
    }

    #[instrument(skip(self))]
    async fn fetch_page(
        &self,
        conversation_id: &str,
        before: Option<&PageCursor>,
        page_size: usize,
    ) -> Result<Vec<MessageRecord>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.fetch_latency {
            tokio::time::sleep(latency).await;
        }
        if self.take_failure(|plan| &mut plan.fetches).await {
            return Err(anyhow!("simulated fetch failure"));
        }

        let conversations = self.conversations.read().await;
        let Some(log) = conversations.get(conversation_id) else {
            return Ok(Vec::new());
        };

        // 游标所在位置之前的记录即 "更早"；游标记录已删除时退回按时间戳比较
        let end = match before {
            None => log.messages.len(),
            Some(cursor) => log
                .messages
                .iter()
                .position(|record| record.id.as_deref() == Some(cursor.id.as_str()))
                .unwrap_or_else(|| {
                    log.messages
                        .partition_point(|record| record.created_at < Some(cursor.created_at))
                }),
        };

        let page = log.messages[..end]
            .iter()
            .rev()
            .take(page_size)
            .cloned()
            .collect();
        Ok(page)
    }

    #[instrument(skip(self, record), fields(client_id = ?record.client_id))]
    async fn write_message(&self, conversation_id: &str, record: &MessageRecord) -> Result<String> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.write_latency {
            tokio::time::sleep(latency).await;
        }
        if self.take_failure(|plan| &mut plan.writes).await {
            return Err(anyhow!("simulated write failure"));
        }

        let now = self.clock.now();
        let id = {
            let mut conversations = self.conversations.write().await;
            let log = conversations.entry(conversation_id.to_string()).or_default();

            match record
                .id
                .as_deref()
                .and_then(|id| log.messages.iter_mut().find(|m| m.id.as_deref() == Some(id)))
            {
                Some(existing) => {
                    existing.body = record.body.clone();
                    existing.edited_at = Some(now);
                    existing.id.clone().unwrap_or_default()
                }
                None => {
                    let id = format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
                    let mut stored = record.clone();
                    stored.id = Some(id.clone());
                    stored.created_at = Some(now);
                    stored.timestamp_source = TimestampSource::Server;
                    stored.state = MessageState::Confirmed;
                    stored.failure = None;
                    log.messages.push(stored);
                    sort_ascending(&mut log.messages);
                    id
                }
            }
        };

        self.publish(conversation_id).await;
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn delete_message(&self, conversation_id: &str, id: &str) -> Result<()> {
        if self.take_failure(|plan| &mut plan.deletes).await {
            return Err(anyhow!("simulated delete failure"));
        }

        {
            let mut conversations = self.conversations.write().await;
            let log = conversations
                .get_mut(conversation_id)
                .ok_or_else(|| anyhow!("conversation {conversation_id} not found"))?;
            let before = log.messages.len();
            log.messages.retain(|m| m.id.as_deref() != Some(id));
            if log.messages.len() == before {
                return Err(anyhow!("message {id} not found"));
            }
        }

        self.publish(conversation_id).await;
        Ok(())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn mark_read(&self, conversation_id: &str, ids: &[String]) -> Result<()> {
        if self.take_failure(|plan| &mut plan.mark_reads).await {
            return Err(anyhow!("simulated mark_read failure"));
        }

        {
            let mut conversations = self.conversations.write().await;
            if let Some(log) = conversations.get_mut(conversation_id) {
                for message in log.messages.iter_mut() {
                    if message.id.as_ref().is_some_and(|id| ids.contains(id)) {
                        message.read = true;
                    }
                }
            }
        }

        self.publish(conversation_id).await;
        Ok(())
    }
}

/// 按时间升序；时间相同的消息保持写入顺序（稳定排序）
fn sort_ascending(messages: &mut [MessageRecord]) {
    messages.sort_by_key(|record| record.created_at);
}
