pub mod commands;
pub mod handlers;
pub mod live;
pub mod queries;

pub use commands::{Author, SendMessageCommand};
pub use handlers::ConversationTimeline;
pub use live::LiveSubscription;
pub use queries::TimelineStatus;
