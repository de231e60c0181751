//! 消息记录模型
//!
//! 定义时间线中各组件共享的实体、身份规则与排序规则。

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{is_blank, truncate_chars};

/// 消息主体（标签联合，构造时确定类型）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Text {
        text: String,
    },
    Image {
        image_ref: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    File {
        file_ref: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
    },
    /// 工时记录（小时）
    DurationEntry {
        hours: f64,
    },
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        MessageBody::Text { text: text.into() }
    }

    pub fn image(image_ref: impl Into<String>) -> Self {
        MessageBody::Image {
            image_ref: image_ref.into(),
            caption: None,
        }
    }

    pub fn file(file_ref: impl Into<String>, file_name: Option<String>) -> Self {
        MessageBody::File {
            file_ref: file_ref.into(),
            file_name,
        }
    }

    pub fn duration(hours: f64) -> Self {
        MessageBody::DurationEntry { hours }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageBody::Text { .. } => "text",
            MessageBody::Image { .. } => "image",
            MessageBody::File { .. } => "file",
            MessageBody::DurationEntry { .. } => "duration_entry",
        }
    }

    /// 校验消息主体，失败时返回原因
    ///
    /// 空文本、空附件引用、非正或非有限的工时都会被拒绝。
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MessageBody::Text { text } if is_blank(text) => {
                Err("message text must not be empty".to_string())
            }
            MessageBody::Image { image_ref, .. } if is_blank(image_ref) => {
                Err("image reference must not be empty".to_string())
            }
            MessageBody::File { file_ref, .. } if is_blank(file_ref) => {
                Err("file reference must not be empty".to_string())
            }
            MessageBody::DurationEntry { hours } if !hours.is_finite() || *hours <= 0.0 => {
                Err(format!("duration must be a positive number of hours, got {hours}"))
            }
            _ => Ok(()),
        }
    }

    /// 用于回复引用的文本预览
    pub fn preview_text(&self) -> Option<String> {
        match self {
            MessageBody::Text { text } => Some(text.clone()),
            MessageBody::Image { caption, .. } => caption.clone(),
            MessageBody::File { file_ref, file_name } => {
                Some(file_name.clone().unwrap_or_else(|| file_ref.clone()))
            }
            MessageBody::DurationEntry { hours } => Some(format!("{hours}h logged")),
        }
    }

    pub fn image_ref(&self) -> Option<&str> {
        match self {
            MessageBody::Image { image_ref, .. } => Some(image_ref.as_str()),
            _ => None,
        }
    }
}

/// 回复引用（弱引用，不延长被引用消息的生命周期）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub id: String,
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl ReplyRef {
    /// 从消息记录构建回复引用，文本预览按字符截断
    ///
    /// 记录既无服务端 id 也无 client_id 时返回 None。
    pub fn from_record(record: &MessageRecord, preview_chars: usize) -> Option<Self> {
        let id = record.id.clone().or_else(|| record.client_id.clone())?;
        Some(Self {
            id,
            sender_name: record.sender_name.clone(),
            text_preview: record
                .body
                .preview_text()
                .map(|text| truncate_chars(&text, preview_chars)),
            image_ref: record.body.image_ref().map(str::to_string),
        })
    }
}

/// 本地生命周期状态（不持久化）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MessageState {
    Pending,
    #[default]
    Confirmed,
    Failed,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Pending => "pending",
            MessageState::Confirmed => "confirmed",
            MessageState::Failed => "failed",
        }
    }
}

/// 时间戳来源
///
/// 只有 `Server` 时间戳对排序具有权威性，`Client` 为乐观阶段的临时值。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    #[default]
    Server,
    Client,
}

/// 消息身份键
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKey {
    /// 客户端生成的 id（跨乐观→确认阶段保持稳定）
    Client(String),
    /// 服务端 id（其他参与者创建的消息没有 client_id）
    Server(String),
}

impl MessageKey {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKey::Client(id) | MessageKey::Server(id) => id,
        }
    }
}

/// 排序键
///
/// 层级从小到大：权威时间戳 < 他人的临时时间戳 < 本地提交（按提交顺序）。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrderKey {
    Authoritative(DateTime<Utc>),
    Provisional(DateTime<Utc>),
    Submitted(u64),
}

/// 消息记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    pub sender_id: String,
    pub sender_name: String,
    pub body: MessageBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyRef>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timestamp_source: TimestampSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read: bool,
    #[serde(skip)]
    pub state: MessageState,
    /// 失败原因（仅 `Failed` 状态有值）
    #[serde(skip)]
    pub failure: Option<String>,
}

impl MessageRecord {
    pub fn new(
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        body: MessageBody,
    ) -> Self {
        Self {
            id: None,
            client_id: None,
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            body,
            reply_to: None,
            created_at: None,
            timestamp_source: TimestampSource::Client,
            edited_at: None,
            read: false,
            state: MessageState::Pending,
            failure: None,
        }
    }

    /// 构造一条已确认的服务端记录
    pub fn confirmed(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        body: MessageBody,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            client_id: None,
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            body,
            reply_to: None,
            created_at: Some(created_at),
            timestamp_source: TimestampSource::Server,
            edited_at: None,
            read: false,
            state: MessageState::Confirmed,
            failure: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: ReplyRef) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// 身份键：优先 client_id，其次服务端 id
    pub fn identity_key(&self) -> Option<MessageKey> {
        self.client_id
            .as_ref()
            .map(|id| MessageKey::Client(id.clone()))
            .or_else(|| self.id.as_ref().map(|id| MessageKey::Server(id.clone())))
    }

    /// 是否可以用 `target`（服务端 id 或 client_id）寻址到该记录
    pub fn matches(&self, target: &str) -> bool {
        self.id.as_deref() == Some(target) || self.client_id.as_deref() == Some(target)
    }

    /// 权威排序时间戳；仅服务端时间戳有效
    pub fn authoritative_at(&self) -> Option<DateTime<Utc>> {
        match self.timestamp_source {
            TimestampSource::Server => self.created_at,
            TimestampSource::Client => None,
        }
    }

    /// 排序键
    ///
    /// `submitted` 为本地提交序号（乐观条目才有），`fallback_now` 用于缺失时间戳的记录。
    pub fn order_key(&self, submitted: Option<u64>, fallback_now: DateTime<Utc>) -> OrderKey {
        if let Some(at) = self.authoritative_at() {
            return OrderKey::Authoritative(at);
        }
        match (self.timestamp_source, submitted) {
            // 服务端来源但时间戳缺失：按 "now" 放置
            (TimestampSource::Server, _) => OrderKey::Authoritative(fallback_now),
            (TimestampSource::Client, Some(seq)) => OrderKey::Submitted(seq),
            (TimestampSource::Client, None) => {
                OrderKey::Provisional(self.created_at.unwrap_or(fallback_now))
            }
        }
    }

    /// 展示用时间（日期分隔符使用）
    pub fn display_at(&self, fallback_now: DateTime<Utc>) -> DateTime<Utc> {
        self.created_at.unwrap_or(fallback_now)
    }

    /// 两条记录的渲染内容是否一致（用于判断更新是否为空操作）
    pub fn is_same_payload(&self, other: &MessageRecord) -> bool {
        self.id == other.id
            && self.client_id == other.client_id
            && self.body == other.body
            && self.reply_to == other.reply_to
            && self.created_at == other.created_at
            && self.timestamp_source == other.timestamp_source
            && self.edited_at == other.edited_at
            && self.read == other.read
            && self.state == other.state
            && self.failure == other.failure
    }

    pub fn is_pending(&self) -> bool {
        self.state == MessageState::Pending
    }

    pub fn is_failed(&self) -> bool {
        self.state == MessageState::Failed
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == MessageState::Confirmed
    }
}

/// 时间线条目：真实消息或派生的日期分隔符
#[derive(Clone, Debug, PartialEq)]
pub enum TimelineEntry {
    Message(MessageRecord),
    DateSeparator { date: NaiveDate },
}

impl TimelineEntry {
    pub fn as_message(&self) -> Option<&MessageRecord> {
        match self {
            TimelineEntry::Message(record) => Some(record),
            TimelineEntry::DateSeparator { .. } => None,
        }
    }

    pub fn is_separator(&self) -> bool {
        matches!(self, TimelineEntry::DateSeparator { .. })
    }

    /// 渲染层面是否等价
    pub fn is_same_entry(&self, other: &TimelineEntry) -> bool {
        match (self, other) {
            (TimelineEntry::Message(a), TimelineEntry::Message(b)) => a.is_same_payload(b),
            (TimelineEntry::DateSeparator { date: a }, TimelineEntry::DateSeparator { date: b }) => {
                a == b
            }
            _ => false,
        }
    }
}

/// 分页结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageResult {
    /// 本页返回的记录数
    pub fetched: usize,
    /// 是否还有更早的历史
    pub has_more: bool,
}

/// `load_more` 的执行结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageOutcome {
    Loaded(PageResult),
    /// 已有请求在途或历史已加载完毕，未调用协作方
    Skipped,
    /// 请求返回时会话已切换，结果被丢弃
    Stale,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_identity_key_prefers_client_id() {
        let record = MessageRecord::confirmed("m1", "u1", "Ann", MessageBody::text("hi"), at(10))
            .with_client_id("c1");
        assert_eq!(record.identity_key(), Some(MessageKey::Client("c1".into())));

        let foreign = MessageRecord::confirmed("m2", "u2", "Bob", MessageBody::text("yo"), at(11));
        assert_eq!(foreign.identity_key(), Some(MessageKey::Server("m2".into())));
    }

    #[test]
    fn test_order_key_tiers() {
        let now = at(1_000);
        let confirmed = MessageRecord::confirmed("m1", "u1", "Ann", MessageBody::text("a"), at(5));
        assert_eq!(confirmed.order_key(None, now), OrderKey::Authoritative(at(5)));

        let mut pending = MessageRecord::new("u1", "Ann", MessageBody::text("b"));
        pending.created_at = Some(at(3));
        assert_eq!(pending.order_key(Some(7), now), OrderKey::Submitted(7));
        assert_eq!(pending.order_key(None, now), OrderKey::Provisional(at(3)));

        let mut missing = confirmed.clone();
        missing.created_at = None;
        assert_eq!(missing.order_key(None, now), OrderKey::Authoritative(now));

        assert!(OrderKey::Authoritative(at(999)) < OrderKey::Provisional(at(1)));
        assert!(OrderKey::Provisional(at(999)) < OrderKey::Submitted(0));
    }

    #[test]
    fn test_validate_body() {
        assert!(MessageBody::text("hello").validate().is_ok());
        assert!(MessageBody::text("   ").validate().is_err());
        assert!(MessageBody::image("").validate().is_err());
        assert!(MessageBody::file("files/a.pdf", None).validate().is_ok());
        assert!(MessageBody::duration(1.5).validate().is_ok());
        assert!(MessageBody::duration(0.0).validate().is_err());
        assert!(MessageBody::duration(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_reply_ref_from_record() {
        let record = MessageRecord::confirmed(
            "m9",
            "u1",
            "Ann",
            MessageBody::text("a fairly long message body"),
            at(1),
        );
        let reply = ReplyRef::from_record(&record, 8).unwrap();
        assert_eq!(reply.id, "m9");
        assert_eq!(reply.sender_name, "Ann");
        assert_eq!(reply.text_preview.as_deref(), Some("a fairl…"));
        assert_eq!(reply.image_ref, None);

        let image = MessageRecord::confirmed("m10", "u2", "Bob", MessageBody::image("img/1.png"), at(2));
        let reply = ReplyRef::from_record(&image, 80).unwrap();
        assert_eq!(reply.image_ref.as_deref(), Some("img/1.png"));
        assert_eq!(reply.text_preview, None);
    }

    #[test]
    fn test_is_same_payload_detects_state_change() {
        let a = MessageRecord::confirmed("m1", "u1", "Ann", MessageBody::text("hi"), at(1));
        let mut b = a.clone();
        assert!(a.is_same_payload(&b));

        b.read = true;
        assert!(!a.is_same_payload(&b));
    }

    #[test]
    fn test_body_wire_shape() {
        let body = MessageBody::duration(2.0);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "duration_entry", "hours": 2.0}));

        let parsed: MessageBody =
            serde_json::from_value(serde_json::json!({"kind": "text", "text": "hi"})).unwrap();
        assert_eq!(parsed, MessageBody::text("hi"));
    }
}
