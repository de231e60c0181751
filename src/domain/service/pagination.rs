//! 分页游标管理
//!
//! 只维护状态（已加载的历史页、游标、是否还有更多、是否在途），
//! 不直接调用协作方：应用层在 `begin_load` 与 `complete_load`/`abort_load`
//! 之间执行 I/O。这样 "至多一个在途请求" 的约束由状态本身保证。

use std::collections::HashSet;

use crate::domain::model::{MessageKey, MessageRecord, MessageState, PageResult};
use crate::domain::repository::PageCursor;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// 一次分页请求（由 `begin_load` 发放）
#[derive(Clone, Debug, PartialEq)]
pub struct PageRequest {
    /// 只拉取严格早于该游标的记录；None 表示从最新开始
    pub before: Option<PageCursor>,
    pub page_size: usize,
}

/// 分页游标管理器
#[derive(Debug)]
pub struct PaginationCursor {
    page_size: usize,
    records: Vec<MessageRecord>,
    seen: HashSet<MessageKey>,
    oldest: Option<PageCursor>,
    pages_loaded: usize,
    has_more: bool,
    loading: bool,
    revision: u64,
}

impl PaginationCursor {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            records: Vec::new(),
            seen: HashSet::new(),
            oldest: None,
            pages_loaded: 0,
            has_more: true,
            loading: false,
            revision: 0,
        }
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading_more(&self) -> bool {
        self.loading
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn pages_loaded(&self) -> usize {
        self.pages_loaded
    }

    pub fn oldest(&self) -> Option<&PageCursor> {
        self.oldest.as_ref()
    }

    /// 已加载的历史记录（全部为 Confirmed）
    pub fn records(&self) -> &[MessageRecord] {
        &self.records
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// 开始加载下一页
    ///
    /// 在途或已无更多时返回 None，调用方不得请求协作方。
    /// `live_oldest` 为实时集合中最早的记录：尚未加载任何历史页时，
    /// 以它作为游标，避免重复拉取实时窗口内的消息。
    pub fn begin_load(&mut self, live_oldest: Option<PageCursor>) -> Option<PageRequest> {
        if self.loading || !self.has_more {
            return None;
        }
        self.loading = true;

        let before = match (&self.oldest, live_oldest) {
            (Some(ours), Some(live)) => Some(if live < *ours { live } else { ours.clone() }),
            (Some(ours), None) => Some(ours.clone()),
            (None, live) => live,
        };

        Some(PageRequest {
            before,
            page_size: self.page_size,
        })
    }

    /// 完成加载：追加新页并推进游标
    ///
    /// 协作方按 `created_at` 降序返回；`has_more` 以 "返回数 == 页大小" 判断。
    pub fn complete_load(
        &mut self,
        request: &PageRequest,
        page: Vec<MessageRecord>,
    ) -> PageResult {
        self.loading = false;
        let fetched = page.len();

        let mut oldest = request.before.clone();
        for record in page {
            if let Some(cursor) = PageCursor::from_record(&record) {
                if oldest.as_ref().is_none_or(|current| cursor < *current) {
                    oldest = Some(cursor);
                }
            }
            self.hold(record);
        }

        self.oldest = oldest;
        self.pages_loaded += 1;
        self.has_more = fetched == request.page_size;
        self.revision += 1;

        PageResult {
            fetched,
            has_more: self.has_more,
        }
    }

    /// 并入滑出实时窗口的已确认记录
    ///
    /// 这些记录紧邻已持有的范围，游标随之下移；`has_more` 不变。返回新加入的条数。
    pub fn absorb(&mut self, records: impl IntoIterator<Item = MessageRecord>) -> usize {
        let mut added = 0;
        for record in records {
            let cursor = PageCursor::from_record(&record);
            if !self.hold(record) {
                continue;
            }
            added += 1;
            if let Some(cursor) = cursor {
                if self.oldest.as_ref().is_none_or(|current| cursor < *current) {
                    self.oldest = Some(cursor);
                }
            }
        }
        if added > 0 {
            self.revision += 1;
        }
        added
    }

    /// 同一会话内已持有的记录不会重复加入
    fn hold(&mut self, mut record: MessageRecord) -> bool {
        let Some(key) = record.identity_key() else {
            return false;
        };
        if !self.seen.insert(key) {
            return false;
        }
        record.state = MessageState::Confirmed;
        record.failure = None;
        self.records.push(record);
        true
    }

    /// 加载失败：只清除在途标记，游标与已加载页保持不变
    pub fn abort_load(&mut self) {
        self.loading = false;
    }

    /// 清空全部状态（切换会话时使用）
    pub fn reset(&mut self) {
        *self = Self::new(self.page_size);
    }
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}
