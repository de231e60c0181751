//! 时间线合并器
//!
//! 将三类来源合并为渲染层消费的唯一有序序列：
//! 1. 已加载的历史页
//! 2. 实时通道推送的已确认集合
//! 3. 乐观跟踪器中的 Pending/Failed/本地确认条目
//!
//! 合并结果只取决于三类来源与到达顺序的当前内容，与它们被修改的先后顺序无关。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::domain::model::{MessageRecord, MessageState, OrderKey, TimelineEntry};
use crate::domain::service::arrival::ArrivalOrder;
use crate::domain::service::optimistic::OptimisticTracker;
use crate::utils::Clock;

/// 合并输入
#[derive(Clone, Copy)]
pub struct MergeSources<'a> {
    pub history: &'a [MessageRecord],
    pub live: &'a [MessageRecord],
    pub tracker: &'a OptimisticTracker,
    /// 排序键相同时的先后
    pub arrival: &'a ArrivalOrder,
}

/// 三类来源的修订号，任一变化即需要重新合并
///
/// 到达顺序只在某个来源出现新记录时增长，不单独计修订号。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeRevision {
    pub history: u64,
    pub live: u64,
    pub tracker: u64,
}

/// 同一键的多个变体之间的来源优先级（越大越优先）
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Source {
    History,
    Local,
    Live,
}

#[derive(Clone, Debug)]
struct Candidate {
    record: MessageRecord,
    source: Source,
    seq: Option<u64>,
}

impl Candidate {
    /// Confirmed 总是优先于 Pending/Failed；其次是更新的编辑时间，最后是来源
    fn rank(&self) -> (u8, Option<DateTime<Utc>>, Source) {
        let state = match self.record.state {
            MessageState::Confirmed => 2,
            MessageState::Pending => 1,
            MessageState::Failed => 0,
        };
        (state, self.record.edited_at, self.source)
    }

    fn fallback_key(&self) -> &str {
        self.record
            .id
            .as_deref()
            .or(self.record.client_id.as_deref())
            .unwrap_or_default()
    }
}

/// 带缓存的合并器
///
/// 输入未变化时返回同一个 `Arc`；重新合并后内容与上次相同时也复用上次的 `Arc`，
/// 下游可以用 `Arc::ptr_eq` 跳过重绘。
pub struct TimelineMerger {
    display_tz: Tz,
    clock: Arc<dyn Clock>,
    cache: Option<(MergeRevision, Arc<[TimelineEntry]>)>,
}

impl TimelineMerger {
    pub fn new(display_tz: Tz, clock: Arc<dyn Clock>) -> Self {
        Self {
            display_tz,
            clock,
            cache: None,
        }
    }

    pub fn display_tz(&self) -> Tz {
        self.display_tz
    }

    pub fn merge(&mut self, revision: MergeRevision, sources: MergeSources<'_>) -> Arc<[TimelineEntry]> {
        if let Some((cached_revision, view)) = &self.cache {
            if *cached_revision == revision {
                return Arc::clone(view);
            }
        }

        let entries = merge_sources(sources, self.display_tz, self.clock.now());
        let view = match &self.cache {
            Some((_, previous)) if same_entries(previous, &entries) => Arc::clone(previous),
            _ => Arc::from(entries),
        };
        self.cache = Some((revision, Arc::clone(&view)));
        view
    }

    /// 最近一次合并结果
    pub fn current(&self) -> Option<Arc<[TimelineEntry]>> {
        self.cache.as_ref().map(|(_, view)| Arc::clone(view))
    }
}

/// 合并三类来源（纯函数）
pub fn merge_sources(
    sources: MergeSources<'_>,
    display_tz: Tz,
    now: DateTime<Utc>,
) -> Vec<TimelineEntry> {
    let candidates = sources
        .history
        .iter()
        .map(|record| Candidate {
            record: record.clone(),
            source: Source::History,
            seq: None,
        })
        .chain(sources.live.iter().map(|record| Candidate {
            record: record.clone(),
            source: Source::Live,
            seq: None,
        }))
        .chain(sources.tracker.entries().map(|entry| Candidate {
            record: entry.record.clone(),
            source: Source::Local,
            seq: Some(entry.seq),
        }));

    let mut slots = union_by_identity(candidates);

    let tracker = sources.tracker;
    slots.retain(|candidate| !tracker.is_hidden(&candidate.record));
    for candidate in &mut slots {
        apply_overlays(&mut candidate.record, tracker);
    }

    let arrival = sources.arrival;
    let mut keyed: Vec<(OrderKey, Option<i64>, Candidate)> = slots
        .into_iter()
        .map(|candidate| {
            (
                candidate.record.order_key(candidate.seq, now),
                arrival.position(&candidate.record),
                candidate,
            )
        })
        .collect();
    keyed.sort_by(|(a_key, a_arrival, a), (b_key, b_arrival, b)| {
        a_key
            .cmp(b_key)
            .then_with(|| a_arrival.cmp(b_arrival))
            .then_with(|| a.fallback_key().cmp(b.fallback_key()))
    });

    insert_date_separators(
        keyed.into_iter().map(|(_, _, candidate)| candidate.record),
        display_tz,
        now,
    )
}

/// 按 client_id（缺失时按 id）合并重复项，每个键只保留一个槽位
fn union_by_identity(candidates: impl Iterator<Item = Candidate>) -> Vec<Candidate> {
    let mut slots: Vec<Candidate> = Vec::new();
    let mut by_client: HashMap<String, usize> = HashMap::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for candidate in candidates {
        let existing = candidate
            .record
            .client_id
            .as_ref()
            .and_then(|client_id| by_client.get(client_id))
            .or_else(|| candidate.record.id.as_ref().and_then(|id| by_id.get(id)))
            .copied();

        let index = match existing {
            Some(index) => {
                let slot = &mut slots[index];
                if candidate.rank() > slot.rank() {
                    let loser = std::mem::replace(slot, candidate);
                    // 保持身份稳定：胜出者缺失的键从失败者继承
                    if slot.record.client_id.is_none() {
                        slot.record.client_id = loser.record.client_id;
                    }
                    if slot.record.id.is_none() {
                        slot.record.id = loser.record.id;
                    }
                    if slot.seq.is_none() {
                        slot.seq = loser.seq;
                    }
                } else {
                    if slot.record.client_id.is_none() {
                        slot.record.client_id = candidate.record.client_id;
                    }
                    if slot.record.id.is_none() {
                        slot.record.id = candidate.record.id;
                    }
                }
                index
            }
            None => {
                slots.push(candidate);
                slots.len() - 1
            }
        };

        let record = &slots[index].record;
        if let Some(client_id) = &record.client_id {
            by_client.insert(client_id.clone(), index);
        }
        if let Some(id) = &record.id {
            by_id.insert(id.clone(), index);
        }
    }

    slots
}

fn apply_overlays(record: &mut MessageRecord, tracker: &OptimisticTracker) {
    if let Some(edit) = record.id.as_deref().and_then(|id| tracker.edit_for(id)) {
        record.body = edit.body.clone();
        record.edited_at = Some(edit.edited_at);
        if edit.state != MessageState::Confirmed {
            record.state = edit.state;
            record.failure = edit.failure.clone();
        }
    }
    if tracker.is_marked_read(record) {
        record.read = true;
    }
}

/// 相邻两条真实消息的日历日（展示时区）不同时插入日期分隔符
fn insert_date_separators(
    records: impl Iterator<Item = MessageRecord>,
    display_tz: Tz,
    now: DateTime<Utc>,
) -> Vec<TimelineEntry> {
    let mut entries = Vec::new();
    let mut previous: Option<NaiveDate> = None;

    for record in records {
        let date = record
            .display_at(now)
            .with_timezone(&display_tz)
            .date_naive();
        if previous.is_some_and(|prev| prev != date) {
            entries.push(TimelineEntry::DateSeparator { date });
        }
        previous = Some(date);
        entries.push(TimelineEntry::Message(record));
    }

    entries
}

fn same_entries(previous: &[TimelineEntry], next: &[TimelineEntry]) -> bool {
    previous.len() == next.len()
        && previous
            .iter()
            .zip(next)
            .all(|(a, b)| a.is_same_entry(b))
}
