use crate::domain::model::{MessageBody, ReplyRef};

/// 当前用户（发送、编辑消息的署名）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub user_id: String,
    pub display_name: String,
}

impl Author {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// 发送消息命令
#[derive(Debug, Clone)]
pub struct SendMessageCommand {
    pub body: MessageBody,
    /// 调用方指定的 client_id；缺失时自动生成
    pub client_id: Option<String>,
    /// 显式回复目标；缺失时使用 `begin_reply` 设置的目标
    pub reply_to: Option<ReplyRef>,
}

impl SendMessageCommand {
    pub fn new(body: MessageBody) -> Self {
        Self {
            body,
            client_id: None,
            reply_to: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(MessageBody::text(text))
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: ReplyRef) -> Self {
        self.reply_to = Some(reply_to);
        self
    }
}
