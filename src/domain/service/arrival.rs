//! 到达顺序
//!
//! `created_at` 相同的消息按它们在本会话中首次出现的先后排列。
//! 实时推送与本地提交向后编号；历史页总是早于已持有的记录，向前编号。
//! 同一条消息的 client_id 与服务端 id 共享一个序号，
//! 因此 Pending→Confirmed 交接前后的相对位置不变。

use std::collections::HashMap;

use crate::domain::model::MessageRecord;

#[derive(Debug, Default)]
pub struct ArrivalOrder {
    by_key: HashMap<String, i64>,
    front: i64,
    back: i64,
}

impl ArrivalOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// 较新的到达：实时推送、本地提交
    pub fn observe_newer(&mut self, record: &MessageRecord) {
        self.observe(record, |order| {
            order.back += 1;
            order.back
        });
    }

    /// 较早的到达：历史页，按从新到旧的顺序传入
    pub fn observe_older(&mut self, record: &MessageRecord) {
        self.observe(record, |order| {
            order.front -= 1;
            order.front
        });
    }

    /// 为已知键登记别名（写入成功后服务端 id 与 client_id 关联）
    pub fn alias(&mut self, known: &str, alias: &str) {
        if let Some(&position) = self.by_key.get(known) {
            self.by_key.entry(alias.to_string()).or_insert(position);
        }
    }

    /// 记录的到达序号；从未出现过时为 None
    pub fn position(&self, record: &MessageRecord) -> Option<i64> {
        keys(record).find_map(|key| self.by_key.get(key).copied())
    }

    fn observe(&mut self, record: &MessageRecord, next: impl FnOnce(&mut Self) -> i64) {
        if keys(record).next().is_none() {
            return;
        }
        let position = match self.position(record) {
            Some(position) => position,
            None => next(self),
        };
        for key in keys(record) {
            self.by_key.entry(key.to_string()).or_insert(position);
        }
    }
}

fn keys(record: &MessageRecord) -> impl Iterator<Item = &str> {
    record
        .client_id
        .as_deref()
        .into_iter()
        .chain(record.id.as_deref())
}
