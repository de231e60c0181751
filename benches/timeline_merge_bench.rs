//! 时间线合并基准测试
//!
//! 测试不同历史规模下的全量合并与缓存命中性能

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use flare_timeline::domain::service::{ArrivalOrder, MergeRevision, MergeSources, merge_sources};
use flare_timeline::{ManualClock, MessageBody, MessageRecord, OptimisticTracker, TimelineMerger};

const NOW_SECS: i64 = 1_700_000_000;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// 每小时一条消息，跨越多天以产生日期分隔符
fn history(count: usize) -> Vec<MessageRecord> {
    (0..count)
        .map(|n| {
            MessageRecord::confirmed(
                format!("h{n}"),
                "u2",
                "Bob",
                MessageBody::text(format!("history #{n}")),
                at(NOW_SECS - (count - n) as i64 * 3_600),
            )
        })
        .collect()
}

fn tracker_with_pending(count: usize) -> OptimisticTracker {
    let mut tracker = OptimisticTracker::new();
    for n in 0..count {
        let draft = MessageRecord::new("u1", "Ann", MessageBody::text(format!("pending #{n}")))
            .with_client_id(format!("c{n}"));
        tracker.add_optimistic(draft, at(NOW_SECS));
    }
    tracker
}

fn arrival_of(records: &[MessageRecord]) -> ArrivalOrder {
    let mut arrival = ArrivalOrder::new();
    for record in records {
        arrival.observe_newer(record);
    }
    arrival
}

fn bench_full_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("timeline_merge");

    for size in [100usize, 1_000, 5_000] {
        let records = history(size);
        let (older, live) = records.split_at(size - size / 10);
        let tracker = tracker_with_pending(20);
        let arrival = arrival_of(&records);

        group.bench_with_input(BenchmarkId::new("merge_sources", size), &size, |b, _| {
            b.iter(|| {
                let entries = merge_sources(
                    MergeSources {
                        history: older,
                        live,
                        tracker: &tracker,
                        arrival: &arrival,
                    },
                    Tz::Europe__Berlin,
                    at(NOW_SECS),
                );
                black_box(entries)
            })
        });
    }

    group.finish();
}

fn bench_cached_merge(c: &mut Criterion) {
    let records = history(1_000);
    let tracker = tracker_with_pending(20);
    let arrival = arrival_of(&records);
    let mut merger = TimelineMerger::new(Tz::UTC, Arc::new(ManualClock::new(at(NOW_SECS))));
    let revision = MergeRevision {
        history: 1,
        live: 1,
        tracker: tracker.revision(),
    };
    let sources = MergeSources {
        history: &records,
        live: &[],
        tracker: &tracker,
        arrival: &arrival,
    };
    merger.merge(revision, sources);

    c.bench_function("timeline_merge_cache_hit", |b| {
        b.iter(|| black_box(merger.merge(revision, sources)))
    });
}

criterion_group!(benches, bench_full_merge, bench_cached_merge);
criterion_main!(benches);
