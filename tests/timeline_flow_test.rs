// 会话时间线集成测试：内存协作方 + 完整的发送/分页/实时流程
mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use flare_timeline::{
    InMemoryMessageStore, MessageBody, MessageRecord, MessageState, MessageStore, PageOutcome,
    PageResult, SendMessageCommand, TimelineConfig, TimelineEntry, TimelineError,
};
use tokio_test::{assert_err, assert_ok};

use common::{at, clock, history, messages, timeline, timeline_with, wait_for};

#[tokio::test]
async fn pending_send_becomes_confirmed_in_the_same_slot() {
    let clock = clock();
    let store = Arc::new(
        InMemoryMessageStore::new(clock.clone()).with_write_latency(Duration::from_millis(50)),
    );
    let timeline = timeline(store.clone(), clock);
    assert_ok!(timeline.open("task-1").await);

    let (sent, pending) = tokio::join!(
        timeline.send_message(SendMessageCommand::text("hi").with_client_id("c1")),
        wait_for(&timeline, |m| m.iter().any(MessageRecord::is_pending)),
    );
    assert_eq!(assert_ok!(sent), "c1");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].client_id.as_deref(), Some("c1"));

    let confirmed = wait_for(&timeline, |m| m.iter().any(MessageRecord::is_confirmed)).await;
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].client_id.as_deref(), Some("c1"));
    assert_eq!(confirmed[0].id.as_deref(), Some("msg-1"));
    assert_eq!(confirmed[0].body, MessageBody::text("hi"));
}

#[tokio::test]
async fn history_pages_until_a_short_page() {
    let clock = clock();
    let store = Arc::new(InMemoryMessageStore::new(clock.clone()).with_live_window(3));
    store.seed("task-1", history(17)).await;
    let timeline = timeline(store.clone(), clock);
    assert_ok!(timeline.open("task-1").await);
    assert!(timeline.has_more().await);

    let first = assert_ok!(timeline.load_more().await);
    assert_eq!(
        first,
        PageOutcome::Loaded(PageResult {
            fetched: 10,
            has_more: true
        })
    );
    let second = assert_ok!(timeline.load_more().await);
    assert_eq!(
        second,
        PageOutcome::Loaded(PageResult {
            fetched: 4,
            has_more: false
        })
    );
    assert!(!timeline.has_more().await);

    // 历史已加载完毕：不再访问协作方
    assert_eq!(assert_ok!(timeline.load_more().await), PageOutcome::Skipped);
    assert_eq!(store.fetch_calls(), 2);

    let current = messages(&timeline.snapshot());
    assert_eq!(current.len(), 17);
    let ids: HashSet<_> = current.iter().filter_map(|m| m.id.clone()).collect();
    assert_eq!(ids.len(), 17);
    assert!(current.windows(2).all(|w| w[0].created_at < w[1].created_at));
}

#[tokio::test]
async fn concurrent_load_more_issues_one_fetch() {
    let clock = clock();
    let store = Arc::new(
        InMemoryMessageStore::new(clock.clone())
            .with_live_window(0)
            .with_fetch_latency(Duration::from_millis(50)),
    );
    store.seed("task-1", history(30)).await;
    let timeline = timeline(store.clone(), clock);
    assert_ok!(timeline.open("task-1").await);

    let (a, b) = tokio::join!(timeline.load_more(), timeline.load_more());
    let outcomes = [assert_ok!(a), assert_ok!(b)];

    assert_eq!(store.fetch_calls(), 1);
    assert!(outcomes.contains(&PageOutcome::Skipped));
    assert_eq!(messages(&timeline.snapshot()).len(), 10);
}

#[tokio::test]
async fn page_resolving_after_switch_is_discarded() {
    let clock = clock();
    let store = Arc::new(
        InMemoryMessageStore::new(clock.clone())
            .with_live_window(0)
            .with_fetch_latency(Duration::from_millis(100)),
    );
    store.seed("task-1", history(5)).await;
    let timeline = timeline(store.clone(), clock);
    assert_ok!(timeline.open("task-1").await);

    let (page, switched) = tokio::join!(timeline.load_more(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        timeline.switch_conversation("task-2").await
    });

    assert_ok!(switched);
    assert_eq!(assert_ok!(page), PageOutcome::Stale);
    assert!(timeline.snapshot().is_empty());
    assert!(timeline.has_more().await);
    assert_eq!(timeline.conversation_id().await.as_deref(), Some("task-2"));
}

#[tokio::test]
async fn failed_send_can_be_retried_until_confirmed() {
    let clock = clock();
    let store = Arc::new(InMemoryMessageStore::new(clock.clone()));
    let timeline = timeline(store.clone(), clock);
    assert_ok!(timeline.open("task-1").await);
    store.fail_next_writes(1).await;

    let err = assert_err!(
        timeline
            .send_message(SendMessageCommand::text("hi").with_client_id("c1"))
            .await
    );
    assert!(matches!(err, TimelineError::Storage(_)));

    let current = messages(&timeline.snapshot());
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].state, MessageState::Failed);

    assert_ok!(timeline.retry_message("c1").await);
    let confirmed = wait_for(&timeline, |m| m.iter().all(MessageRecord::is_confirmed)).await;
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].client_id.as_deref(), Some("c1"));
    assert_eq!(store.messages("task-1").await.len(), 1);
}

#[tokio::test]
async fn empty_message_is_never_shown() {
    let clock = clock();
    let store = Arc::new(InMemoryMessageStore::new(clock.clone()));
    let timeline = timeline(store.clone(), clock);
    assert_ok!(timeline.open("task-1").await);

    let err = assert_err!(timeline.send_message(SendMessageCommand::text("")).await);
    assert!(matches!(err, TimelineError::Validation(_)));
    assert!(timeline.snapshot().is_empty());
    assert_eq!(store.write_calls(), 0);
}

#[tokio::test]
async fn two_sends_in_one_tick_follow_submission_order() {
    let clock = clock();
    let store = Arc::new(InMemoryMessageStore::new(clock.clone()));
    let timeline = timeline(store.clone(), clock);
    assert_ok!(timeline.open("task-1").await);

    let (a, b) = tokio::join!(
        timeline.send_message(SendMessageCommand::text("first").with_client_id("a")),
        timeline.send_message(SendMessageCommand::text("second").with_client_id("b")),
    );
    assert_ok!(a);
    assert_ok!(b);

    let current = wait_for(&timeline, |m| {
        m.len() == 2 && m.iter().all(MessageRecord::is_confirmed)
    })
    .await;
    let order: Vec<_> = current.iter().filter_map(|m| m.client_id.as_deref()).collect();
    assert_eq!(order, vec!["a", "b"]);
}

#[tokio::test]
async fn edits_and_deletes_round_trip_through_the_store() {
    let clock = clock();
    let store = Arc::new(InMemoryMessageStore::new(clock.clone()));
    let timeline = timeline(store.clone(), clock);
    assert_ok!(timeline.open("task-1").await);

    assert_ok!(
        timeline
            .send_message(SendMessageCommand::text("tpyo").with_client_id("c1"))
            .await
    );
    wait_for(&timeline, |m| m.iter().any(MessageRecord::is_confirmed)).await;

    assert_ok!(timeline.edit_message("c1", MessageBody::text("typo")).await);
    let edited = wait_for(&timeline, |m| {
        m.len() == 1 && m[0].body == MessageBody::text("typo") && m[0].edited_at.is_some()
    })
    .await;
    assert_eq!(edited[0].state, MessageState::Confirmed);

    assert_ok!(timeline.delete_message("c1").await);
    wait_for(&timeline, |m| m.is_empty()).await;
    assert!(store.messages("task-1").await.is_empty());
}

#[tokio::test]
async fn read_receipts_follow_the_viewer() {
    let clock = clock();
    let store = Arc::new(InMemoryMessageStore::new(clock.clone()));
    store.seed("task-1", history(3)).await;
    let timeline = timeline(store.clone(), clock);
    assert_ok!(timeline.open("task-1").await);

    assert_eq!(timeline.unread_count("u1"), 3);
    // 自己发送的消息不计入
    assert_eq!(timeline.unread_count("u2"), 0);

    assert_eq!(assert_ok!(timeline.mark_read("u1").await), 3);
    assert_eq!(timeline.unread_count("u1"), 0);
    wait_for(&timeline, |m| m.iter().all(|r| r.read)).await;
    assert!(store.messages("task-1").await.iter().all(|r| r.read));
}

#[tokio::test]
async fn date_separators_follow_the_display_timezone() {
    let clock = clock();
    let store = Arc::new(InMemoryMessageStore::new(clock.clone()));
    // 2023-11-14 00:00 UTC
    const MIDNIGHT: i64 = 1_699_920_000;
    let bob = |id: &str, secs: i64| {
        MessageRecord::confirmed(id, "u2", "Bob", MessageBody::text(id), at(MIDNIGHT + secs))
    };
    // 11-14 22:00 UTC 与 11-15 03:00 UTC 在纽约同属 11-14；11-15 15:00 UTC 属于 11-15
    let evening = bob("m1", 22 * 3_600);
    let night = bob("m2", 27 * 3_600);
    let next_day = bob("m3", 39 * 3_600);
    store.seed("task-1", [evening, night, next_day]).await;

    let config = TimelineConfig {
        display_timezone: "America/New_York".to_string(),
        ..TimelineConfig::default()
    };
    let timeline = timeline_with(store, clock, &config);
    assert_ok!(timeline.open("task-1").await);

    let view = timeline.snapshot();
    let shape: Vec<bool> = view.iter().map(TimelineEntry::is_separator).collect();
    assert_eq!(shape, vec![false, false, true, false]);
}

#[tokio::test]
async fn closed_timeline_ignores_further_pushes() {
    let clock = clock();
    let store = Arc::new(InMemoryMessageStore::new(clock.clone()));
    let timeline = timeline(store.clone(), clock);
    assert_ok!(timeline.open("task-1").await);
    timeline.close().await;
    timeline.close().await;

    let draft = MessageRecord::new("u2", "Bob", MessageBody::text("late"));
    assert_ok!(store.write_message("task-1", &draft).await);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(timeline.snapshot().is_empty());
    assert!(matches!(
        timeline.load_more().await,
        Err(TimelineError::InvalidState(_))
    ));
    assert_eq!(timeline.status().await.generation, None);
}

#[tokio::test]
async fn records_leaving_the_live_window_stay_visible() {
    let clock = clock();
    let store = Arc::new(InMemoryMessageStore::new(clock.clone()).with_live_window(3));
    store.seed("task-1", history(5)).await;
    let timeline = timeline(store.clone(), clock);
    assert_ok!(timeline.open("task-1").await);

    assert_eq!(
        assert_ok!(timeline.load_more().await),
        PageOutcome::Loaded(PageResult {
            fetched: 2,
            has_more: false
        })
    );

    let draft = MessageRecord::new("u2", "Bob", MessageBody::text("new"));
    assert_ok!(store.write_message("task-1", &draft).await);
    let current = wait_for(&timeline, |m| m.iter().any(|r| r.id.as_deref() == Some("msg-1"))).await;

    let ids: Vec<_> = current.iter().filter_map(|m| m.id.as_deref()).collect();
    assert_eq!(ids, vec!["h00", "h01", "h02", "h03", "h04", "msg-1"]);
    assert!(!timeline.has_more().await);
    assert_eq!(assert_ok!(timeline.load_more().await), PageOutcome::Skipped);
}

#[tokio::test]
async fn same_timestamp_sends_keep_submission_order_after_confirmation() {
    let clock = clock();
    let store = Arc::new(InMemoryMessageStore::new(clock.clone()));
    let timeline = timeline(store.clone(), clock);
    assert_ok!(timeline.open("task-1").await);

    let client_ids: Vec<String> = (1..=10).map(|n| format!("c{n:02}")).collect();
    for client_id in &client_ids {
        let command = SendMessageCommand::text(client_id.as_str()).with_client_id(client_id.as_str());
        assert_ok!(timeline.send_message(command).await);
    }

    let current = wait_for(&timeline, |m| {
        m.len() == 10 && m.iter().all(MessageRecord::is_confirmed)
    })
    .await;
    let order: Vec<_> = current.iter().filter_map(|m| m.client_id.clone()).collect();
    assert_eq!(order, client_ids);
    // 服务端 id 的字典序（msg-10 < msg-2）不影响位置
    assert_eq!(current[9].id.as_deref(), Some("msg-10"));
}
