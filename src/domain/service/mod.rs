//! 时间线领域服务
//!
//! 各组件只持有各自的子状态，通过合并步骤交换结果，互不直接修改对方状态。

pub mod arrival;
pub mod drag_reply;
pub mod merger;
pub mod optimistic;
pub mod pagination;

pub use arrival::ArrivalOrder;
pub use drag_reply::{DragReplyInterpreter, DragState, PointerPoint, ReplyActivated, SwipeDirection};
pub use merger::{MergeRevision, MergeSources, TimelineMerger, merge_sources};
pub use optimistic::{OptimisticTracker, PendingEdit, ResolveOutcome, TrackedEntry};
pub use pagination::{PageRequest, PaginationCursor};
