//! Flare Timeline 错误类型定义
//!
//! - 领域/应用层统一使用 `TimelineError`
//! - 持久化协作方（`MessageStore`）返回 `anyhow::Result`，在应用层包装为 `Storage`

use thiserror::Error;

/// 时间线错误类型
#[derive(Debug, Error)]
pub enum TimelineError {
    /// 输入校验失败（发生在任何乐观插入之前）
    #[error("Validation failed: {0}")]
    Validation(String),

    /// 持久化协作方失败（网络、写入拒绝等），不会自动重试
    #[error("Storage operation failed: {0}")]
    Storage(#[source] anyhow::Error),

    /// 目标消息不存在
    #[error("Message not found: {0}")]
    NotFound(String),

    /// 当前状态不允许该操作
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 其他错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 时间线结果类型
pub type TimelineResult<T> = Result<T, TimelineError>;

impl TimelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        TimelineError::Validation(msg.into())
    }

    pub fn not_found(target: impl Into<String>) -> Self {
        TimelineError::NotFound(target.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        TimelineError::InvalidState(msg.into())
    }

    /// 是否为可由用户重试的瞬时 I/O 错误
    pub fn is_transient(&self) -> bool {
        matches!(self, TimelineError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_is_transient() {
        let err = TimelineError::Storage(anyhow::anyhow!("connection reset"));
        assert!(err.is_transient());
        assert_eq!(
            err.to_string(),
            "Storage operation failed: connection reset"
        );

        assert!(!TimelineError::validation("empty body").is_transient());
    }

    #[test]
    fn test_anyhow_converts_to_other() {
        let err: TimelineError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, TimelineError::Other(_)));
        assert_eq!(err.to_string(), "boom");
    }
}
