//! Flare Timeline 配置模块
//!
//! 该模块提供了时间线的配置管理功能，包括：
//! - 配置文件/目录加载和解析
//! - 环境特定配置覆盖
//! - 环境变量覆盖
//! - 日志、分页、手势等配置定义

use std::env;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use serde::Deserialize;
use toml::Value;
use tracing::warn;

use crate::domain::service::drag_reply::{
    DEFAULT_MAX_OFFSET_PX, DEFAULT_REPLY_THRESHOLD_PX, DragReplyInterpreter, SwipeDirection,
};
use crate::domain::service::pagination::DEFAULT_PAGE_SIZE;
use crate::error::{TimelineError, TimelineResult};

mod manager;
pub use manager::ConfigManager;

/// 全局应用配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<TimelineAppConfig> = OnceLock::new();

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    pub level: String,
    pub format: LogFormat,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file: bool,
    pub with_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

/// 时间线配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// 每页历史消息数量
    pub page_size: usize,
    /// 日期分隔符使用的展示时区（IANA 名称）
    pub display_timezone: String,
    /// 回复引用的文本预览字符数
    pub reply_preview_chars: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            display_timezone: "UTC".to_string(),
            reply_preview_chars: 80,
        }
    }
}

impl TimelineConfig {
    /// 解析展示时区
    pub fn display_tz(&self) -> TimelineResult<Tz> {
        self.display_timezone.trim().parse::<Tz>().map_err(|e| {
            TimelineError::Config(format!(
                "invalid display_timezone '{}': {e}",
                self.display_timezone
            ))
        })
    }
}

/// 拖拽回复配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DragReplyConfig {
    /// 触发回复的最小位移（像素）
    pub threshold_px: f64,
    /// 最大视觉位移（像素）
    pub max_offset_px: f64,
    pub direction: SwipeDirection,
}

impl Default for DragReplyConfig {
    fn default() -> Self {
        Self {
            threshold_px: DEFAULT_REPLY_THRESHOLD_PX,
            max_offset_px: DEFAULT_MAX_OFFSET_PX,
            direction: SwipeDirection::Right,
        }
    }
}

impl DragReplyConfig {
    pub fn build_interpreter(&self) -> DragReplyInterpreter {
        DragReplyInterpreter::new(self.threshold_px, self.max_offset_px, self.direction)
    }
}

/// 应用配置根
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimelineAppConfig {
    pub logging: LoggingConfig,
    pub timeline: TimelineConfig,
    pub drag: DragReplyConfig,
}

impl TimelineAppConfig {
    /// 校验配置取值
    pub fn validate(&self) -> TimelineResult<()> {
        if self.timeline.page_size == 0 {
            return Err(TimelineError::Config(
                "timeline.page_size must be at least 1".to_string(),
            ));
        }
        self.timeline.display_tz()?;

        let drag = &self.drag;
        if !drag.threshold_px.is_finite() || drag.threshold_px <= 0.0 {
            return Err(TimelineError::Config(format!(
                "drag.threshold_px must be positive, got {}",
                drag.threshold_px
            )));
        }
        if !drag.max_offset_px.is_finite() || drag.max_offset_px < drag.threshold_px {
            return Err(TimelineError::Config(format!(
                "drag.max_offset_px ({}) must not be smaller than drag.threshold_px ({})",
                drag.max_offset_px, drag.threshold_px
            )));
        }
        Ok(())
    }
}

/// 加载配置（失败时回退到默认配置）
///
/// 未指定路径时依次尝试 `config/` 目录与 `config.toml` 文件。
pub fn load_config(path: Option<&str>) -> &'static TimelineAppConfig {
    APP_CONFIG.get_or_init(|| {
        let cfg = load_with_fallback(&candidate_paths(path));
        if let Err(e) = cfg.validate() {
            warn!("configuration rejected, falling back to defaults: {}", e);
            return TimelineAppConfig::default();
        }
        cfg
    })
}

/// 加载并严格校验配置
pub fn load_config_with_validation(path: Option<&str>) -> TimelineResult<&'static TimelineAppConfig> {
    if let Some(cfg) = APP_CONFIG.get() {
        return Ok(cfg);
    }

    let mut last_error = None;
    for candidate in candidate_paths(path) {
        match load_config_from_source(&candidate) {
            Ok(cfg) => {
                cfg.validate()?;
                return Ok(APP_CONFIG.get_or_init(|| cfg));
            }
            Err(err) => last_error = Some(err),
        }
    }

    Err(TimelineError::Config(
        last_error
            .map(|e| format!("{e:#}"))
            .unwrap_or_else(|| "no configuration source found".to_string()),
    ))
}

/// 获取应用配置（未初始化时返回 None）
pub fn app_config() -> Option<&'static TimelineAppConfig> {
    APP_CONFIG.get()
}

fn candidate_paths(path: Option<&str>) -> Vec<PathBuf> {
    match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
    }
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> TimelineAppConfig {
    for path in candidates {
        match load_config_from_source(path) {
            Ok(cfg) => return cfg,
            Err(err) => {
                warn!("failed to load config from {}: {err:#}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    let mut cfg = TimelineAppConfig::default();
    ConfigManager::apply_env_overrides(&mut cfg);
    cfg
}

/// 从源加载配置：文件或目录，随后叠加环境配置与环境变量
pub fn load_config_from_source(path: &Path) -> Result<TimelineAppConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    let mut merged = if metadata.is_dir() {
        load_directory_value(path)?
    } else {
        load_toml_value(path)?
    };

    if let Some(overlay) = ConfigManager::environment_overlay()? {
        merge_value(&mut merged, overlay);
    }

    let mut cfg: TimelineAppConfig = merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))?;
    ConfigManager::apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// 从字符串解析配置（不叠加环境）
pub fn parse_config(content: &str) -> Result<TimelineAppConfig> {
    toml::from_str(content).context("invalid config format")
}

/// 从目录加载：`base.toml` 为基础，`overrides/*.toml` 按文件名顺序叠加
fn load_directory_value(path: &Path) -> Result<Value> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;
    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("overrides"))?;
    Ok(merged)
}

/// 合并目录中的配置
fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let value = load_toml_value(&entry.path())?;
        merge_value(root, value);
    }

    Ok(())
}

/// 加载 TOML 值
fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in fragment {}", path.display()))?;
    Ok(value)
}

/// 合并值：表格递归合并，其余类型整体覆盖
fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}

/// 读取环境变量（空值视为未设置）
pub(crate) fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
