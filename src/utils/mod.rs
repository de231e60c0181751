//! 工具函数模块
//!
//! 提供时钟抽象、时间戳转换、文本截断等通用工具函数

pub mod helpers;

pub use helpers::{is_blank, truncate_chars};

use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};

/// 时钟抽象
///
/// 合并器在记录缺失时间戳时使用 "now" 作为兜底排序键，
/// 乐观条目使用客户端时间作为临时时间戳，均通过此接口注入。
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动推进的时钟（测试与演示使用）
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// 从毫秒时间戳创建，非法值回退到 UNIX 纪元
    pub fn from_millis(ms: i64) -> Self {
        Self::new(millis_to_datetime(ms).unwrap_or(DateTime::UNIX_EPOCH))
    }

    pub fn advance(&self, delta: Duration) {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *guard += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *guard = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 毫秒数转换为 DateTime
pub fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::from_millis(1_700_000_000_000);
        let start = clock.now();

        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now() - start, Duration::seconds(30));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_millis_to_datetime() {
        let dt = millis_to_datetime(1_000).unwrap();
        assert_eq!(dt.timestamp(), 1);
        assert!(millis_to_datetime(i64::MAX).is_none());
    }
}
