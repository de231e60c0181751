//! 实时订阅生命周期
//!
//! 订阅对象由管理会话生命周期的一方持有：`start` 启动推送任务，
//! `stop` 可重复调用，丢弃对象等价于 `stop`。

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::model::MessageRecord;
use crate::domain::repository::LiveFeed;

pub struct LiveSubscription {
    conversation_id: String,
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl LiveSubscription {
    /// 启动推送任务：每收到一次快照调用一次 `on_update`，通道关闭时任务结束
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn start<F, Fut>(
        conversation_id: impl Into<String>,
        generation: u64,
        mut feed: LiveFeed,
        mut on_update: F,
    ) -> Self
    where
        F: FnMut(Vec<MessageRecord>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let conversation_id = conversation_id.into();
        let task_conversation = conversation_id.clone();
        let handle = tokio::spawn(async move {
            while let Some(snapshot) = feed.recv().await {
                on_update(snapshot).await;
            }
            debug!(
                conversation_id = %task_conversation,
                generation,
                "live feed closed"
            );
        });

        Self {
            conversation_id,
            generation,
            handle: Some(handle),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 推送任务是否仍在运行
    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// 停止订阅；返回本次调用是否真正停止了任务
    pub fn stop(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                // 中止任务会丢弃接收端，协作方随之感知取消
                handle.abort();
                debug!(
                    conversation_id = %self.conversation_id,
                    generation = self.generation,
                    "live subscription stopped"
                );
                true
            }
            None => false,
        }
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LiveSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSubscription")
            .field("conversation_id", &self.conversation_id)
            .field("generation", &self.generation)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::MessageBody;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{Mutex, mpsc};

    fn record(id: &str) -> MessageRecord {
        MessageRecord::confirmed(id, "u1", "Ann", MessageBody::text(id), Utc::now())
    }

    #[tokio::test]
    async fn test_updates_are_forwarded_until_stopped() {
        let (tx, rx) = mpsc::channel(4);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        let mut subscription = LiveSubscription::start("task-1", 1, rx, move |snapshot| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(snapshot.len());
            }
        });
        assert!(subscription.is_active());

        tx.send(vec![record("m1")]).await.unwrap();
        tx.send(vec![record("m1"), record("m2")]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*received.lock().await, vec![1, 2]);

        assert!(subscription.stop());
        assert!(!subscription.stop());
        assert!(!subscription.is_active());

        // 接收端已随任务一起释放
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tx.send(vec![record("m3")]).await.is_err());
    }

    #[tokio::test]
    async fn test_drop_stops_subscription() {
        let (tx, rx) = mpsc::channel(4);
        let subscription = LiveSubscription::start("task-1", 7, rx, |_| async {});
        assert_eq!(subscription.generation(), 7);
        assert_eq!(subscription.conversation_id(), "task-1");

        drop(subscription);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tx.is_closed());
    }
}
