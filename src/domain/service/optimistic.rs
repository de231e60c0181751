//! 乐观条目跟踪器
//!
//! 负责客户端发起的变更在服务端确认前的生命周期：
//! - 发送：Pending → Confirmed / Failed
//! - 编辑：覆盖在已有消息上的待确认主体
//! - 删除：墓碑隐藏，失败时撤销
//! - 已读：本地已读标记，失败时撤销

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::domain::model::{MessageBody, MessageRecord, MessageState, TimestampSource};
use crate::error::{TimelineError, TimelineResult};

/// 跟踪中的条目
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedEntry {
    pub record: MessageRecord,
    /// 本地提交序号，决定未确认条目之间的顺序
    pub seq: u64,
}

/// 待确认的编辑（以目标消息的服务端 id 为键）
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEdit {
    pub body: MessageBody,
    pub state: MessageState,
    pub failure: Option<String>,
    pub edited_at: DateTime<Utc>,
}

/// `resolve` 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// 本地 Pending/Failed 条目转为 Confirmed
    Confirmed,
    /// 本地没有对应条目，确认记录作为新条目插入
    Inserted,
    /// 已确认过，幂等返回
    AlreadyConfirmed,
}

#[derive(Debug, Default)]
pub struct OptimisticTracker {
    entries: HashMap<String, TrackedEntry>,
    /// 已确认且已由实时通道接管的 client_id
    released: HashSet<String>,
    edits: HashMap<String, PendingEdit>,
    tombstones: HashSet<String>,
    read_marks: HashSet<String>,
    next_seq: u64,
    revision: u64,
}

impl OptimisticTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, client_id: &str) -> Option<&TrackedEntry> {
        self.entries.get(client_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &TrackedEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_tracked(&self, client_id: &str) -> bool {
        self.entries.contains_key(client_id) || self.released.contains(client_id)
    }

    /// 添加乐观条目，同步返回 client_id（早于任何网络操作）
    ///
    /// 缺失 client_id 时生成新的 UUID；时间戳标记为客户端临时值。
    pub fn add_optimistic(&mut self, mut record: MessageRecord, now: DateTime<Utc>) -> String {
        let client_id = record
            .client_id
            .take()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if self.is_tracked(&client_id) {
            debug!(client_id = %client_id, "optimistic entry already tracked, ignoring re-add");
            return client_id;
        }

        record.client_id = Some(client_id.clone());
        record.state = MessageState::Pending;
        record.failure = None;
        record.timestamp_source = TimestampSource::Client;
        record.created_at.get_or_insert(now);

        let seq = self.bump_seq();
        self.entries
            .insert(client_id.clone(), TrackedEntry { record, seq });
        self.revision += 1;

        debug!(client_id = %client_id, seq, "optimistic entry added");
        client_id
    }

    /// 以服务端确认记录解析条目
    ///
    /// 每个 client_id 只发生一次 Pending→Confirmed 转换；重复确认幂等。
    /// 本地找不到对应条目时直接插入，确认永远不会被丢弃。
    pub fn resolve(&mut self, client_id: &str, mut confirmed: MessageRecord) -> ResolveOutcome {
        if self.released.contains(client_id) {
            return ResolveOutcome::AlreadyConfirmed;
        }

        confirmed.client_id = Some(client_id.to_string());
        confirmed.state = MessageState::Confirmed;
        confirmed.failure = None;
        if confirmed.timestamp_source == TimestampSource::Client {
            debug!(
                client_id = %client_id,
                "confirmation carries a client timestamp, ordering stays provisional"
            );
        }

        match self.entries.get_mut(client_id) {
            Some(entry) if entry.record.state != MessageState::Confirmed => {
                if confirmed.reply_to.is_none() {
                    confirmed.reply_to = entry.record.reply_to.take();
                }
                entry.record = confirmed;
                self.revision += 1;
                debug!(client_id = %client_id, "optimistic entry confirmed");
                ResolveOutcome::Confirmed
            }
            Some(entry) => {
                let existing = &entry.record;
                let upgrades_timestamp = existing.authoritative_at().is_none()
                    && confirmed.authoritative_at().is_some();
                let newer_edit = confirmed.edited_at > existing.edited_at;
                if (upgrades_timestamp || newer_edit) && !existing.is_same_payload(&confirmed) {
                    entry.record = confirmed;
                    self.revision += 1;
                }
                ResolveOutcome::AlreadyConfirmed
            }
            None => {
                let seq = self.bump_seq();
                self.entries
                    .insert(client_id.to_string(), TrackedEntry { record: confirmed, seq });
                self.revision += 1;
                debug!(client_id = %client_id, "confirmation without local entry inserted");
                ResolveOutcome::Inserted
            }
        }
    }

    /// 写入成功但实时通道尚未回显：记录服务端 id，状态保持 Pending
    pub fn mark_written(&mut self, client_id: &str, id: &str) -> bool {
        match self.entries.get_mut(client_id) {
            Some(entry) if entry.record.state != MessageState::Confirmed => {
                entry.record.id = Some(id.to_string());
                entry.record.state = MessageState::Pending;
                entry.record.failure = None;
                self.revision += 1;
                true
            }
            _ => false,
        }
    }

    /// 转为 Failed；条目保持可见直到用户重试或忽略
    pub fn fail(&mut self, client_id: &str, reason: impl Into<String>) -> bool {
        match self.entries.get_mut(client_id) {
            Some(entry) if entry.record.state == MessageState::Pending => {
                entry.record.state = MessageState::Failed;
                entry.record.failure = Some(reason.into());
                self.revision += 1;
                true
            }
            _ => false,
        }
    }

    /// 移除 Pending/Failed 条目（仅用户显式忽略时调用）
    pub fn discard(&mut self, client_id: &str) -> Option<MessageRecord> {
        let removable = self
            .entries
            .get(client_id)
            .is_some_and(|entry| entry.record.state != MessageState::Confirmed);
        if !removable {
            return None;
        }
        self.revision += 1;
        self.entries.remove(client_id).map(|entry| entry.record)
    }

    /// 无条件移除条目（消息已在服务端删除）
    pub fn forget(&mut self, client_id: &str) {
        if self.entries.remove(client_id).is_some() {
            self.revision += 1;
        }
    }

    /// 重试失败条目：Failed → Pending，保留原提交序号
    pub fn retry(&mut self, client_id: &str) -> TimelineResult<MessageRecord> {
        let entry = self
            .entries
            .get_mut(client_id)
            .ok_or_else(|| TimelineError::not_found(client_id))?;
        if entry.record.state != MessageState::Failed {
            return Err(TimelineError::invalid_state(format!(
                "message {client_id} is {}, only failed messages can be retried",
                entry.record.state.as_str()
            )));
        }
        entry.record.state = MessageState::Pending;
        entry.record.failure = None;
        self.revision += 1;
        Ok(entry.record.clone())
    }

    /// 实时通道已包含这些 client_id：释放已确认条目，由实时集合接管
    pub fn release_confirmed<'a>(&mut self, client_ids: impl IntoIterator<Item = &'a str>) {
        for client_id in client_ids {
            let confirmed = self
                .entries
                .get(client_id)
                .is_some_and(|entry| entry.record.state == MessageState::Confirmed);
            if confirmed {
                self.entries.remove(client_id);
                self.released.insert(client_id.to_string());
                self.revision += 1;
            }
        }
    }

    // ---- 编辑 ----

    pub fn edits(&self) -> &HashMap<String, PendingEdit> {
        &self.edits
    }

    pub fn edit_for(&self, target_id: &str) -> Option<&PendingEdit> {
        self.edits.get(target_id)
    }

    /// 开始编辑；同一目标的新编辑覆盖旧编辑
    pub fn begin_edit(&mut self, target_id: &str, body: MessageBody, now: DateTime<Utc>) {
        self.edits.insert(
            target_id.to_string(),
            PendingEdit {
                body,
                state: MessageState::Pending,
                failure: None,
                edited_at: now,
            },
        );
        self.revision += 1;
    }

    pub fn confirm_edit(&mut self, target_id: &str) -> bool {
        self.transition_edit(target_id, MessageState::Confirmed, None)
    }

    pub fn fail_edit(&mut self, target_id: &str, reason: impl Into<String>) -> bool {
        self.transition_edit(target_id, MessageState::Failed, Some(reason.into()))
    }

    pub fn discard_edit(&mut self, target_id: &str) -> bool {
        let removed = self.edits.remove(target_id).is_some();
        if removed {
            self.revision += 1;
        }
        removed
    }

    /// 服务端记录已反映编辑结果时移除已确认的编辑覆盖
    pub fn release_edit_if_echoed(&mut self, target_id: &str, server_body: &MessageBody) {
        let echoed = self.edits.get(target_id).is_some_and(|edit| {
            edit.state == MessageState::Confirmed && edit.body == *server_body
        });
        if echoed {
            self.edits.remove(target_id);
            self.revision += 1;
        }
    }

    fn transition_edit(
        &mut self,
        target_id: &str,
        state: MessageState,
        failure: Option<String>,
    ) -> bool {
        match self.edits.get_mut(target_id) {
            Some(edit) if edit.state == MessageState::Pending => {
                edit.state = state;
                edit.failure = failure;
                self.revision += 1;
                true
            }
            _ => false,
        }
    }

    // ---- 删除墓碑 ----

    pub fn hide(&mut self, keys: &[String]) {
        let mut changed = false;
        for key in keys {
            changed |= self.tombstones.insert(key.clone());
        }
        self.bump_if(changed);
    }

    pub fn unhide(&mut self, keys: &[String]) {
        let mut changed = false;
        for key in keys {
            changed |= self.tombstones.remove(key);
        }
        self.bump_if(changed);
    }

    pub fn is_hidden(&self, record: &MessageRecord) -> bool {
        record
            .id
            .iter()
            .chain(record.client_id.iter())
            .any(|key| self.tombstones.contains(key))
    }

    // ---- 已读标记 ----

    pub fn mark_read(&mut self, ids: &[String]) {
        let mut changed = false;
        for id in ids {
            changed |= self.read_marks.insert(id.clone());
        }
        self.bump_if(changed);
    }

    pub fn unmark_read(&mut self, ids: &[String]) {
        let mut changed = false;
        for id in ids {
            changed |= self.read_marks.remove(id);
        }
        self.bump_if(changed);
    }

    pub fn is_marked_read(&self, record: &MessageRecord) -> bool {
        record
            .id
            .as_ref()
            .is_some_and(|id| self.read_marks.contains(id))
    }

    fn bump_if(&mut self, changed: bool) {
        if changed {
            self.revision += 1;
        }
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
