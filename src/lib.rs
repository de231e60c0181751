//! Flare Timeline 公共库
//!
//! 会话消息时间线：将历史分页、实时推送与本地乐观条目合并为
//! 去重、有序、带日期分隔符的唯一视图，并提供拖拽回复手势解析。

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod tracing;
pub mod utils;

pub use application::{
    Author, ConversationTimeline, LiveSubscription, SendMessageCommand, TimelineStatus,
};
pub use config::{
    ConfigManager, DragReplyConfig, LogFormat, LoggingConfig, TimelineAppConfig, TimelineConfig,
    app_config, load_config, load_config_with_validation,
};
pub use domain::model::{
    MessageBody, MessageKey, MessageRecord, MessageState, OrderKey, PageOutcome, PageResult,
    ReplyRef, TimelineEntry, TimestampSource,
};
pub use domain::repository::{LiveFeed, MessageStore, PageCursor};
pub use domain::service::{
    DragReplyInterpreter, DragState, OptimisticTracker, PaginationCursor, PointerPoint,
    ReplyActivated, SwipeDirection, TimelineMerger,
};
pub use error::{TimelineError, TimelineResult};
pub use infrastructure::InMemoryMessageStore;
pub use utils::{Clock, ManualClock, SystemClock};
