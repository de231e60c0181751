//! 集成测试公共工具

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flare_timeline::{
    Author, ConversationTimeline, InMemoryMessageStore, ManualClock, MessageBody, MessageRecord,
    TimelineConfig, TimelineEntry,
};

pub const START_SECS: i64 = 1_700_000_000;

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(at(START_SECS)))
}

pub fn timeline_with(
    store: Arc<InMemoryMessageStore>,
    clock: Arc<ManualClock>,
    config: &TimelineConfig,
) -> ConversationTimeline {
    ConversationTimeline::with_clock(store, Author::new("u1", "Ann"), config, clock).unwrap()
}

pub fn timeline(store: Arc<InMemoryMessageStore>, clock: Arc<ManualClock>) -> ConversationTimeline {
    timeline_with(store, clock, &TimelineConfig::default())
}

/// 其他参与者发送的历史消息，间隔一分钟
pub fn history(count: usize) -> Vec<MessageRecord> {
    (0..count)
        .map(|n| {
            MessageRecord::confirmed(
                format!("h{n:02}"),
                "u2",
                "Bob",
                MessageBody::text(format!("history #{n}")),
                at(START_SECS - 86_400 + n as i64 * 60),
            )
        })
        .collect()
}

pub fn messages(entries: &[TimelineEntry]) -> Vec<MessageRecord> {
    entries
        .iter()
        .filter_map(TimelineEntry::as_message)
        .cloned()
        .collect()
}

/// 等待视图满足条件（最多两秒）
pub async fn wait_for(
    timeline: &ConversationTimeline,
    predicate: impl Fn(&[MessageRecord]) -> bool,
) -> Vec<MessageRecord> {
    let mut rx = timeline.watch();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let current = messages(&rx.borrow_and_update());
            if predicate(&current) {
                return current;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("timeline did not reach the expected state")
}
