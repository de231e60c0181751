//! 会话时间线
//!
//! 渲染层的唯一入口。分页游标、实时集合、乐观跟踪器各自持有互不相交的子状态，
//! 任一变更后由合并器重新计算视图，并通过 `watch` 通道发布。
//!
//! 所有 I/O 都在释放状态锁之后进行；I/O 返回后重新加锁并比对会话代数，
//! 代数不一致的结果直接丢弃。

use std::collections::HashSet;
use std::sync::Arc;

use chrono_tz::Tz;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, instrument};

use crate::application::commands::{Author, SendMessageCommand};
use crate::application::live::LiveSubscription;
use crate::application::queries::TimelineStatus;
use crate::config::TimelineConfig;
use crate::domain::model::{
    MessageBody, MessageRecord, MessageState, PageOutcome, ReplyRef, TimelineEntry,
};
use crate::domain::repository::{MessageStore, PageCursor};
use crate::domain::service::{
    ArrivalOrder, MergeRevision, MergeSources, OptimisticTracker, PaginationCursor,
    ReplyActivated, TimelineMerger,
};
use crate::error::{TimelineError, TimelineResult};
use crate::utils::{Clock, SystemClock, is_blank};

#[derive(Clone, Debug)]
struct ActiveConversation {
    id: String,
    generation: u64,
}

/// 实时通道推送的已确认集合
#[derive(Debug, Default)]
struct LiveSet {
    records: Vec<MessageRecord>,
    revision: u64,
}

struct TimelineState {
    active: Option<ActiveConversation>,
    last_generation: u64,
    pager: PaginationCursor,
    live: LiveSet,
    tracker: OptimisticTracker,
    arrival: ArrivalOrder,
    merger: TimelineMerger,
    reply_target: Option<ReplyRef>,
}

impl TimelineState {
    fn merge_revision(&self) -> MergeRevision {
        MergeRevision {
            history: self.pager.revision(),
            live: self.live.revision,
            tracker: self.tracker.revision(),
        }
    }

    fn view(&mut self) -> Arc<[TimelineEntry]> {
        let revision = self.merge_revision();
        self.merger.merge(
            revision,
            MergeSources {
                history: self.pager.records(),
                live: &self.live.records,
                tracker: &self.tracker,
                arrival: &self.arrival,
            },
        )
    }

    fn active(&self) -> TimelineResult<ActiveConversation> {
        self.active
            .clone()
            .ok_or_else(|| TimelineError::invalid_state("timeline is not attached to a conversation"))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.generation == generation)
    }

    /// 开始新的会话代数并清空三份子状态
    fn attach(&mut self, conversation_id: Option<&str>, clock: &Arc<dyn Clock>) -> u64 {
        self.last_generation += 1;
        let generation = self.last_generation;
        self.active = conversation_id.map(|id| ActiveConversation {
            id: id.to_string(),
            generation,
        });
        self.pager.reset();
        self.live = LiveSet::default();
        self.tracker = OptimisticTracker::new();
        self.arrival = ArrivalOrder::new();
        // 修订号从零重新计数，缓存必须一起丢弃
        self.merger = TimelineMerger::new(self.merger.display_tz(), Arc::clone(clock));
        self.reply_target = None;
        generation
    }

    /// 在当前视图中按服务端 id 或 client_id 查找消息
    fn find(&mut self, target: &str) -> Option<MessageRecord> {
        self.view()
            .iter()
            .filter_map(TimelineEntry::as_message)
            .find(|record| record.matches(target))
            .cloned()
    }

    /// 目标对应的视图记录，以及编辑覆盖使用的键（服务端 id，缺失时为目标本身）
    fn resolve_target(&mut self, target: &str) -> (Option<MessageRecord>, String) {
        let found = self.find(target);
        let target_id = found
            .as_ref()
            .and_then(|record| record.id.clone())
            .unwrap_or_else(|| target.to_string());
        (found, target_id)
    }

    /// 目标对应的乐观发送条目（按 client_id 或已分配的服务端 id）
    fn tracked_client_id(&mut self, target: &str) -> Option<String> {
        if self.tracker.get(target).is_some() {
            return Some(target.to_string());
        }
        self.find(target)
            .and_then(|record| record.client_id)
            .filter(|client_id| self.tracker.get(client_id).is_some())
    }

    fn live_oldest(&self) -> Option<PageCursor> {
        self.live
            .records
            .iter()
            .filter_map(PageCursor::from_record)
            .min()
    }

    /// 从旧实时集合中挑出滑出窗口下沿的记录
    ///
    /// 新集合中缺失、且不晚于新集合最早一条的记录只是离开了窗口，仍属于历史；
    /// 晚于它的记录才是在服务端被删除。本地墓碑隐藏的记录不保留。
    fn slid_out_of_window(&self, next: &[MessageRecord]) -> Vec<MessageRecord> {
        let Some(floor) = next.iter().filter_map(PageCursor::from_record).min() else {
            return Vec::new();
        };
        let kept: HashSet<&str> = next.iter().filter_map(|record| record.id.as_deref()).collect();

        self.live
            .records
            .iter()
            .filter(|record| record.id.as_deref().is_some_and(|id| !kept.contains(id)))
            .filter(|record| record.created_at.is_some_and(|at| at <= floor.created_at))
            .filter(|record| !self.tracker.is_hidden(record))
            .cloned()
            .collect()
    }
}

struct TimelineInner {
    store: Arc<dyn MessageStore>,
    author: Author,
    clock: Arc<dyn Clock>,
    preview_chars: usize,
    state: Mutex<TimelineState>,
    view_tx: watch::Sender<Arc<[TimelineEntry]>>,
}

impl TimelineInner {
    /// 重新合并并发布；视图未变化（同一个 `Arc`）时不通知订阅者
    fn publish(&self, state: &mut TimelineState) {
        let view = state.view();
        self.view_tx.send_if_modified(|current| {
            if Arc::ptr_eq(current, &view) {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    async fn apply_live_snapshot(&self, generation: u64, mut records: Vec<MessageRecord>) -> bool {
        let mut state = self.state.lock().await;
        if !state.is_current(generation) {
            debug!(generation, "discarding live snapshot from a previous conversation");
            return false;
        }

        let mut echoed = Vec::new();
        for record in records.iter_mut() {
            record.state = MessageState::Confirmed;
            record.failure = None;

            if let Some(client_id) = record.client_id.as_deref() {
                if state.tracker.is_tracked(client_id) {
                    state.tracker.resolve(client_id, record.clone());
                    echoed.push(client_id.to_string());
                }
            }
            if let Some(id) = record.id.as_deref() {
                state.tracker.release_edit_if_echoed(id, &record.body);
            }
            state.arrival.observe_newer(record);
        }
        // 实时集合已携带这些消息，由它接管
        state
            .tracker
            .release_confirmed(echoed.iter().map(String::as_str));

        let changed = records.len() != state.live.records.len()
            || records
                .iter()
                .zip(&state.live.records)
                .any(|(next, current)| !next.is_same_payload(current));
        if changed {
            let slid_out = state.slid_out_of_window(&records);
            if !slid_out.is_empty() {
                let kept = state.pager.absorb(slid_out);
                debug!(kept, "records left the live window, kept as history");
            }
            state.live.records = records;
            state.live.revision += 1;
        }

        self.publish(&mut state);
        true
    }
}

/// 会话时间线
pub struct ConversationTimeline {
    inner: Arc<TimelineInner>,
    live: Mutex<Option<LiveSubscription>>,
}

impl ConversationTimeline {
    pub fn new(
        store: Arc<dyn MessageStore>,
        author: Author,
        config: &TimelineConfig,
    ) -> TimelineResult<Self> {
        Self::with_clock(store, author, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn MessageStore>,
        author: Author,
        config: &TimelineConfig,
        clock: Arc<dyn Clock>,
    ) -> TimelineResult<Self> {
        let display_tz: Tz = config.display_tz()?;
        let mut state = TimelineState {
            active: None,
            last_generation: 0,
            pager: PaginationCursor::new(config.page_size),
            live: LiveSet::default(),
            tracker: OptimisticTracker::new(),
            arrival: ArrivalOrder::new(),
            merger: TimelineMerger::new(display_tz, Arc::clone(&clock)),
            reply_target: None,
        };
        let (view_tx, _) = watch::channel(state.view());

        Ok(Self {
            inner: Arc::new(TimelineInner {
                store,
                author,
                clock,
                preview_chars: config.reply_preview_chars,
                state: Mutex::new(state),
                view_tx,
            }),
            live: Mutex::new(None),
        })
    }

    // ---- 会话生命周期 ----

    /// 打开会话：开始新代数、清空子状态、重建实时订阅
    ///
    /// 旧会话在途的分页与写入在返回时会被丢弃。
    #[instrument(skip(self))]
    pub async fn open(&self, conversation_id: &str) -> TimelineResult<u64> {
        if is_blank(conversation_id) {
            return Err(TimelineError::validation("conversation id must not be empty"));
        }

        let mut live = self.live.lock().await;
        if let Some(mut previous) = live.take() {
            previous.stop();
        }

        let generation = {
            let mut state = self.inner.state.lock().await;
            let generation = state.attach(Some(conversation_id), &self.inner.clock);
            self.inner.publish(&mut state);
            generation
        };

        let mut feed = self
            .inner
            .store
            .subscribe_live(conversation_id)
            .await
            .map_err(TimelineError::Storage)?;

        // 首个快照已就绪时同步应用，避免先渲染空列表
        if let Ok(initial) = feed.try_recv() {
            self.inner.apply_live_snapshot(generation, initial).await;
        }

        let weak = Arc::downgrade(&self.inner);
        *live = Some(LiveSubscription::start(
            conversation_id,
            generation,
            feed,
            move |records| {
                let inner = weak.clone();
                async move {
                    if let Some(inner) = inner.upgrade() {
                        inner.apply_live_snapshot(generation, records).await;
                    }
                }
            },
        ));

        info!(conversation_id, generation, "conversation timeline opened");
        Ok(generation)
    }

    pub async fn switch_conversation(&self, conversation_id: &str) -> TimelineResult<u64> {
        debug!(conversation_id, "switching conversation");
        self.open(conversation_id).await
    }

    /// 关闭会话（可重复调用）
    pub async fn close(&self) {
        let mut live = self.live.lock().await;
        if let Some(mut subscription) = live.take() {
            subscription.stop();
        }

        let mut state = self.inner.state.lock().await;
        if state.active.is_none() {
            return;
        }
        let generation = state.attach(None, &self.inner.clock);
        self.inner.publish(&mut state);
        info!(generation, "conversation timeline closed");
    }

    pub async fn conversation_id(&self) -> Option<String> {
        let state = self.inner.state.lock().await;
        state.active.as_ref().map(|active| active.id.clone())
    }

    pub async fn current_generation(&self) -> Option<u64> {
        let state = self.inner.state.lock().await;
        state.active.as_ref().map(|active| active.generation)
    }

    /// 将一次实时推送合入实时集合；来自旧代数的推送返回 `false`
    pub async fn apply_live_snapshot(&self, generation: u64, records: Vec<MessageRecord>) -> bool {
        self.inner.apply_live_snapshot(generation, records).await
    }

    // ---- 视图 ----

    /// 当前合并视图
    pub fn snapshot(&self) -> Arc<[TimelineEntry]> {
        Arc::clone(&self.inner.view_tx.borrow())
    }

    /// 视图变更通知
    pub fn watch(&self) -> watch::Receiver<Arc<[TimelineEntry]>> {
        self.inner.view_tx.subscribe()
    }

    pub async fn has_more(&self) -> bool {
        self.inner.state.lock().await.pager.has_more()
    }

    pub async fn is_loading_more(&self) -> bool {
        self.inner.state.lock().await.pager.is_loading_more()
    }

    pub async fn status(&self) -> TimelineStatus {
        let state = self.inner.state.lock().await;
        let tracker = &state.tracker;
        let count = |wanted: MessageState| {
            tracker
                .entries()
                .filter(|entry| entry.record.state == wanted)
                .count()
                + tracker
                    .edits()
                    .values()
                    .filter(|edit| edit.state == wanted)
                    .count()
        };

        TimelineStatus {
            conversation_id: state.active.as_ref().map(|active| active.id.clone()),
            generation: state.active.as_ref().map(|active| active.generation),
            has_more: state.pager.has_more(),
            is_loading_more: state.pager.is_loading_more(),
            pages_loaded: state.pager.pages_loaded(),
            pending: count(MessageState::Pending),
            failed: count(MessageState::Failed),
        }
    }

    /// 他人发送且尚未读的已确认消息数
    pub fn unread_count(&self, viewer_id: &str) -> usize {
        self.snapshot()
            .iter()
            .filter_map(TimelineEntry::as_message)
            .filter(|record| record.is_confirmed() && !record.read && record.sender_id != viewer_id)
            .count()
    }

    // ---- 分页 ----

    /// 加载更早的一页历史
    ///
    /// 已有请求在途或历史已加载完毕时返回 `Skipped`，不访问协作方；
    /// 请求返回时会话已切换则返回 `Stale` 并丢弃结果。
    #[instrument(skip(self))]
    pub async fn load_more(&self) -> TimelineResult<PageOutcome> {
        let (active, request) = {
            let mut state = self.inner.state.lock().await;
            let active = state.active()?;
            let live_oldest = state.live_oldest();
            let Some(request) = state.pager.begin_load(live_oldest) else {
                debug!("load_more skipped: request in flight or history exhausted");
                return Ok(PageOutcome::Skipped);
            };
            (active, request)
        };

        let result = self
            .inner
            .store
            .fetch_page(&active.id, request.before.as_ref(), request.page_size)
            .await;

        let mut state = self.inner.state.lock().await;
        if !state.is_current(active.generation) {
            debug!(
                conversation_id = %active.id,
                generation = active.generation,
                "discarding page for a previous conversation"
            );
            return Ok(PageOutcome::Stale);
        }

        match result {
            Ok(page) => {
                for record in &page {
                    state.arrival.observe_older(record);
                }
                let outcome = state.pager.complete_load(&request, page);
                self.inner.publish(&mut state);
                debug!(
                    fetched = outcome.fetched,
                    has_more = outcome.has_more,
                    "history page loaded"
                );
                Ok(PageOutcome::Loaded(outcome))
            }
            Err(err) => {
                state.pager.abort_load();
                Err(TimelineError::Storage(err))
            }
        }
    }

    // ---- 发送 ----

    /// 发送消息，返回 client_id
    ///
    /// 校验失败时不插入任何乐观条目。写入失败时条目保持 `Failed` 并返回错误。
    #[instrument(skip(self, command), fields(kind = command.body.as_str()))]
    pub async fn send_message(&self, command: SendMessageCommand) -> TimelineResult<String> {
        command
            .body
            .validate()
            .map_err(TimelineError::Validation)?;

        let (active, client_id, record) = {
            let mut state = self.inner.state.lock().await;
            let active = state.active()?;

            let mut draft = MessageRecord::new(
                self.inner.author.user_id.clone(),
                self.inner.author.display_name.clone(),
                command.body,
            );
            draft.client_id = command.client_id;
            let uses_target = command.reply_to.is_none();
            draft.reply_to = command.reply_to.or_else(|| state.reply_target.clone());

            let before = state.tracker.revision();
            let client_id = state.tracker.add_optimistic(draft, self.inner.clock.now());
            if state.tracker.revision() == before {
                // 同一 client_id 的重复提交，回复目标保留给下一次发送
                return Ok(client_id);
            }
            let Some(record) = state.tracker.get(&client_id).map(|entry| entry.record.clone())
            else {
                return Ok(client_id);
            };
            if uses_target {
                state.reply_target = None;
            }
            state.arrival.observe_newer(&record);
            self.inner.publish(&mut state);
            (active, client_id, record)
        };

        self.submit(active, client_id, record).await
    }

    /// 记录工时（DurationEntry 消息）
    pub async fn send_time_entry(&self, hours: f64) -> TimelineResult<String> {
        self.send_message(SendMessageCommand::new(MessageBody::duration(hours)))
            .await
    }

    /// 重试失败的发送或编辑
    #[instrument(skip(self))]
    pub async fn retry_message(&self, target: &str) -> TimelineResult<String> {
        enum Retry {
            Send(ActiveConversation, String, MessageRecord),
            Edit(String, MessageBody),
        }

        let retry = {
            let mut state = self.inner.state.lock().await;
            let active = state.active()?;

            // 失败的编辑优先：消息本身可能仍是等待回显的发送
            let (found, target_id) = state.resolve_target(target);
            let failed_edit = state
                .tracker
                .edit_for(&target_id)
                .filter(|edit| edit.state == MessageState::Failed)
                .map(|edit| edit.body.clone());

            if let Some(body) = failed_edit {
                Retry::Edit(target_id, body)
            } else if let Some(client_id) = state.tracked_client_id(target) {
                let record = state.tracker.retry(&client_id)?;
                self.inner.publish(&mut state);
                Retry::Send(active, client_id, record)
            } else {
                match state.tracker.edit_for(&target_id) {
                    Some(edit) => {
                        return Err(TimelineError::invalid_state(format!(
                            "edit of {target} is {}, only failed edits can be retried",
                            edit.state.as_str()
                        )));
                    }
                    None if found.is_some() => {
                        return Err(TimelineError::invalid_state(format!(
                            "message {target} has nothing to retry"
                        )));
                    }
                    None => return Err(TimelineError::not_found(target)),
                }
            }
        };

        match retry {
            Retry::Send(active, client_id, record) => {
                info!(client_id = %client_id, "retrying failed send");
                self.submit(active, client_id, record).await
            }
            Retry::Edit(target_id, body) => {
                info!(target_id = %target_id, "retrying failed edit");
                self.edit_message(&target_id, body).await?;
                Ok(target_id)
            }
        }
    }

    /// 用户显式忽略失败的发送或编辑
    pub async fn dismiss_failed(&self, target: &str) -> TimelineResult<()> {
        let mut state = self.inner.state.lock().await;

        let (found, target_id) = state.resolve_target(target);
        let failed_edit = state
            .tracker
            .edit_for(&target_id)
            .is_some_and(|edit| edit.state == MessageState::Failed);
        if failed_edit {
            state.tracker.discard_edit(&target_id);
            self.inner.publish(&mut state);
            debug!(target_id = %target_id, "failed edit dismissed");
            return Ok(());
        }

        if let Some(client_id) = state.tracked_client_id(target) {
            let failed = state
                .tracker
                .get(&client_id)
                .is_some_and(|entry| entry.record.is_failed());
            if !failed {
                return Err(TimelineError::invalid_state(format!(
                    "message {target} has not failed"
                )));
            }
            state.tracker.discard(&client_id);
            self.inner.publish(&mut state);
            debug!(client_id = %client_id, "failed send dismissed");
            return Ok(());
        }

        match state.tracker.edit_for(&target_id) {
            Some(_) => Err(TimelineError::invalid_state(format!(
                "edit of {target} has not failed"
            ))),
            None if found.is_some() => Err(TimelineError::invalid_state(format!(
                "message {target} has not failed"
            ))),
            None => Err(TimelineError::not_found(target)),
        }
    }

    async fn submit(
        &self,
        active: ActiveConversation,
        client_id: String,
        record: MessageRecord,
    ) -> TimelineResult<String> {
        let result = self.inner.store.write_message(&active.id, &record).await;

        let mut state = self.inner.state.lock().await;
        if !state.is_current(active.generation) {
            debug!(client_id = %client_id, "discarding write result for a previous conversation");
            return Ok(client_id);
        }

        match result {
            Ok(id) => {
                // 等待实时通道回显后才转为 Confirmed
                state.tracker.mark_written(&client_id, &id);
                // 服务端 id 沿用提交时的到达序号
                state.arrival.alias(&client_id, &id);
                self.inner.publish(&mut state);
                debug!(client_id = %client_id, id = %id, "message written");
                Ok(client_id)
            }
            Err(err) => {
                state.tracker.fail(&client_id, format!("{err:#}"));
                self.inner.publish(&mut state);
                Err(TimelineError::Storage(err))
            }
        }
    }

    // ---- 编辑与删除 ----

    /// 编辑已持久化的消息；编辑以覆盖层形式立即可见
    #[instrument(skip(self, body), fields(kind = body.as_str()))]
    pub async fn edit_message(&self, target: &str, body: MessageBody) -> TimelineResult<()> {
        body.validate().map_err(TimelineError::Validation)?;

        let (active, id, edited) = {
            let mut state = self.inner.state.lock().await;
            let active = state.active()?;
            let record = state
                .find(target)
                .ok_or_else(|| TimelineError::not_found(target))?;
            self.ensure_author(&record, target)?;
            let id = record.id.clone().ok_or_else(|| {
                TimelineError::invalid_state(format!("message {target} has not been persisted yet"))
            })?;

            let now = self.inner.clock.now();
            state.tracker.begin_edit(&id, body.clone(), now);
            self.inner.publish(&mut state);

            let mut edited = record;
            edited.body = body;
            edited.edited_at = Some(now);
            edited.state = MessageState::Pending;
            edited.failure = None;
            (active, id, edited)
        };

        let result = self.inner.store.write_message(&active.id, &edited).await;

        let mut state = self.inner.state.lock().await;
        if !state.is_current(active.generation) {
            debug!(id = %id, "discarding edit result for a previous conversation");
            return Ok(());
        }

        match result {
            Ok(_) => {
                state.tracker.confirm_edit(&id);
                // 实时回显可能先于写入返回
                let echoed = state
                    .live
                    .records
                    .iter()
                    .find(|record| record.id.as_deref() == Some(id.as_str()))
                    .map(|record| record.body.clone());
                if let Some(body) = echoed {
                    state.tracker.release_edit_if_echoed(&id, &body);
                }
                self.inner.publish(&mut state);
                Ok(())
            }
            Err(err) => {
                state.tracker.fail_edit(&id, format!("{err:#}"));
                self.inner.publish(&mut state);
                Err(TimelineError::Storage(err))
            }
        }
    }

    /// 删除消息；从未持久化的本地条目直接移除，不访问协作方
    #[instrument(skip(self))]
    pub async fn delete_message(&self, target: &str) -> TimelineResult<()> {
        let (active, id, keys) = {
            let mut state = self.inner.state.lock().await;
            let active = state.active()?;
            let record = state
                .find(target)
                .ok_or_else(|| TimelineError::not_found(target))?;
            self.ensure_author(&record, target)?;

            let Some(id) = record.id.clone() else {
                if let Some(client_id) = record.client_id.as_deref() {
                    state.tracker.discard(client_id);
                }
                self.inner.publish(&mut state);
                debug!(target, "unpersisted message removed locally");
                return Ok(());
            };

            let keys: Vec<String> = std::iter::once(id.clone())
                .chain(record.client_id.clone())
                .collect();
            state.tracker.hide(&keys);
            self.inner.publish(&mut state);
            (active, id, keys)
        };

        let result = self.inner.store.delete_message(&active.id, &id).await;

        let mut state = self.inner.state.lock().await;
        if !state.is_current(active.generation) {
            debug!(id = %id, "discarding delete result for a previous conversation");
            return Ok(());
        }

        match result {
            Ok(()) => {
                if let Some(client_id) = keys.get(1) {
                    state.tracker.forget(client_id);
                }
                state.tracker.discard_edit(&id);
                self.inner.publish(&mut state);
                Ok(())
            }
            Err(err) => {
                state.tracker.unhide(&keys);
                self.inner.publish(&mut state);
                Err(TimelineError::Storage(err))
            }
        }
    }

    fn ensure_author(&self, record: &MessageRecord, target: &str) -> TimelineResult<()> {
        if record.sender_id == self.inner.author.user_id {
            Ok(())
        } else {
            Err(TimelineError::invalid_state(format!(
                "message {target} belongs to another participant"
            )))
        }
    }

    // ---- 回复 ----

    /// 设置回复目标，下一次发送会携带该引用
    pub async fn begin_reply(&self, target: &str) -> TimelineResult<ReplyRef> {
        let mut state = self.inner.state.lock().await;
        let reply = state
            .find(target)
            .and_then(|record| ReplyRef::from_record(&record, self.inner.preview_chars))
            .ok_or_else(|| TimelineError::not_found(target))?;
        state.reply_target = Some(reply.clone());
        debug!(target, "reply target set");
        Ok(reply)
    }

    pub async fn cancel_reply(&self) -> Option<ReplyRef> {
        self.inner.state.lock().await.reply_target.take()
    }

    pub async fn reply_target(&self) -> Option<ReplyRef> {
        self.inner.state.lock().await.reply_target.clone()
    }

    /// 拖拽回复手势触发
    pub async fn handle_reply_activated(&self, event: ReplyActivated) -> TimelineResult<ReplyRef> {
        self.begin_reply(&event.message_id).await
    }

    // ---- 已读 ----

    /// 将他人发送的已确认消息标记为已读，返回标记数量；失败时回滚
    #[instrument(skip(self))]
    pub async fn mark_read(&self, viewer_id: &str) -> TimelineResult<usize> {
        let (active, ids) = {
            let mut state = self.inner.state.lock().await;
            let active = state.active()?;
            let ids: Vec<String> = state
                .view()
                .iter()
                .filter_map(TimelineEntry::as_message)
                .filter(|record| {
                    record.is_confirmed() && !record.read && record.sender_id != viewer_id
                })
                .filter_map(|record| record.id.clone())
                .collect();
            if ids.is_empty() {
                return Ok(0);
            }
            state.tracker.mark_read(&ids);
            self.inner.publish(&mut state);
            (active, ids)
        };

        let result = self.inner.store.mark_read(&active.id, &ids).await;

        let mut state = self.inner.state.lock().await;
        if !state.is_current(active.generation) {
            return Ok(ids.len());
        }
        match result {
            Ok(()) => Ok(ids.len()),
            Err(err) => {
                state.tracker.unmark_read(&ids);
                self.inner.publish(&mut state);
                Err(TimelineError::Storage(err))
            }
        }
    }
}

impl std::fmt::Debug for ConversationTimeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationTimeline")
            .field("author", &self.inner.author)
            .finish_non_exhaustive()
    }
}
