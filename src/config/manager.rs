//! 配置管理器 - 负责处理不同环境下的配置选择和覆盖
//!
//! 该模块提供了配置管理功能，包括：
//! - 加载环境特定配置（`config/environments/{env}.toml`）
//! - 使用环境变量覆盖单个配置项

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use toml::Value;
use tracing::warn;

use super::{TimelineAppConfig, env_var};

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 FLARE_ENV 获取当前环境名称，
    /// 如果未设置则默认为 "development"
    pub fn get_environment() -> String {
        env_var("FLARE_ENV").unwrap_or_else(|| "development".to_string())
    }

    /// 读取当前环境的覆盖配置（文件不存在时返回 None）
    pub fn environment_overlay() -> Result<Option<Value>> {
        let env = Self::get_environment();
        let env_config_path = format!("config/environments/{}.toml", env);

        if !Path::new(&env_config_path).exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&env_config_path)
            .with_context(|| format!("无法读取环境配置文件: {}", env_config_path))?;
        let value: Value = toml::from_str(&content)
            .with_context(|| format!("无效的环境配置格式: {}", env_config_path))?;
        Ok(Some(value))
    }

    /// 使用进程环境变量覆盖配置
    pub fn apply_env_overrides(config: &mut TimelineAppConfig) {
        Self::apply_overrides_from(config, env_var);
    }

    /// 使用给定的查找函数覆盖配置
    ///
    /// 支持的键：
    /// - `TIMELINE_PAGE_SIZE`
    /// - `TIMELINE_DISPLAY_TIMEZONE`
    /// - `TIMELINE_PREVIEW_CHARS`
    /// - `TIMELINE_REPLY_THRESHOLD_PX`
    /// - `TIMELINE_REPLY_MAX_OFFSET_PX`
    /// - `TIMELINE_LOG_LEVEL`
    pub fn apply_overrides_from(
        config: &mut TimelineAppConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) {
        if let Some(page_size) = parse_override::<usize>(&lookup, "TIMELINE_PAGE_SIZE") {
            config.timeline.page_size = page_size;
        }

        if let Some(tz) = lookup("TIMELINE_DISPLAY_TIMEZONE") {
            config.timeline.display_timezone = tz.trim().to_string();
        }

        if let Some(chars) = parse_override::<usize>(&lookup, "TIMELINE_PREVIEW_CHARS") {
            config.timeline.reply_preview_chars = chars;
        }

        if let Some(threshold) = parse_override::<f64>(&lookup, "TIMELINE_REPLY_THRESHOLD_PX") {
            config.drag.threshold_px = threshold;
        }

        if let Some(max) = parse_override::<f64>(&lookup, "TIMELINE_REPLY_MAX_OFFSET_PX") {
            config.drag.max_offset_px = max;
        }

        if let Some(level) = lookup("TIMELINE_LOG_LEVEL") {
            config.logging.level = level.trim().to_string();
        }
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable config override");
            None
        }
    }
}
