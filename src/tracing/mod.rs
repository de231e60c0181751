//! # 日志初始化模块
//!
//! 为使用时间线的宿主程序提供统一的 tracing 订阅器初始化。

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LoggingConfig};

/// 从配置初始化日志系统
///
/// # 参数
/// * `logging_config` - 日志配置（可选），如果为 None 则使用默认配置（info 级别）
///
/// # 返回
/// 成功安装全局订阅器时返回 `true`；已存在全局订阅器时返回 `false`
///
/// # 示例
/// ```rust,ignore
/// use flare_timeline::config::LoggingConfig;
///
/// init_tracing_from_config(None);
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     with_file: true,
///     with_line_number: true,
///     ..LoggingConfig::default()
/// };
/// init_tracing_from_config(Some(&config));
/// ```
pub fn init_tracing_from_config(logging_config: Option<&LoggingConfig>) -> bool {
    let default_config = LoggingConfig::default();
    let config = logging_config.unwrap_or(&default_config);

    // 优先使用环境变量 RUST_LOG，如果没有则使用配置文件的日志级别
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let builder = fmt::Subscriber::builder()
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_file(config.with_file)
        .with_line_number(config.with_line_number)
        .with_env_filter(env_filter);

    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            ..LoggingConfig::default()
        };
        // 第一次可能被其他测试抢先安装，但第二次一定失败
        let _ = init_tracing_from_config(Some(&config));
        assert!(!init_tracing_from_config(None));
    }
}
