//! 拖拽回复手势解析
//!
//! 状态机：`Idle -> Dragging -> {Idle, ReplyActivated}`。
//! 同一时刻只允许一条消息处于拖拽中。

use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_REPLY_THRESHOLD_PX: f64 = 60.0;
pub const DEFAULT_MAX_OFFSET_PX: f64 = 100.0;

/// 触发回复的滑动方向
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwipeDirection {
    #[default]
    Right,
    Left,
}

/// 指针/触摸坐标
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PointerPoint {
    pub x: f64,
    pub y: f64,
}

impl PointerPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DragState {
    Idle,
    Dragging {
        message_id: String,
        origin: PointerPoint,
        offset: f64,
    },
}

/// 回复激活事件
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyActivated {
    pub message_id: String,
}

/// 拖拽回复解析器
pub struct DragReplyInterpreter {
    threshold_px: f64,
    max_offset_px: f64,
    direction: SwipeDirection,
    state: DragState,
    on_reply_activated: Option<Box<dyn FnMut(&str) + Send>>,
}

impl DragReplyInterpreter {
    /// `max_offset_px` 小于阈值时按阈值处理，保证手势始终可以触发
    pub fn new(threshold_px: f64, max_offset_px: f64, direction: SwipeDirection) -> Self {
        Self {
            threshold_px,
            max_offset_px: max_offset_px.max(threshold_px),
            direction,
            state: DragState::Idle,
            on_reply_activated: None,
        }
    }

    /// 注册回复激活回调
    pub fn on_reply_activated(mut self, callback: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_reply_activated = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging { .. })
    }

    pub fn dragged_message_id(&self) -> Option<&str> {
        match &self.state {
            DragState::Dragging { message_id, .. } => Some(message_id),
            DragState::Idle => None,
        }
    }

    /// 当前位移（已限制在最大位移内）
    pub fn drag_offset(&self) -> f64 {
        match &self.state {
            DragState::Dragging { offset, .. } => *offset,
            DragState::Idle => 0.0,
        }
    }

    pub fn is_past_threshold(&self) -> bool {
        self.is_dragging() && self.drag_offset() >= self.threshold_px
    }

    /// 按下：记录起点与消息身份；已有拖拽进行中时忽略
    pub fn start_drag(&mut self, message_id: &str, origin: PointerPoint) -> bool {
        if self.is_dragging() {
            debug!(message_id, "drag already active, ignoring new start");
            return false;
        }
        self.state = DragState::Dragging {
            message_id: message_id.to_string(),
            origin,
            offset: 0.0,
        };
        true
    }

    /// 移动：计算水平位移并限制在 `[0, max_offset_px]`
    pub fn update(&mut self, point: PointerPoint) -> f64 {
        let (threshold, max, direction) = (self.threshold_px, self.max_offset_px, self.direction);
        let DragState::Dragging { origin, offset, .. } = &mut self.state else {
            return 0.0;
        };

        let dx = point.x - origin.x;
        let raw = match direction {
            SwipeDirection::Right => dx,
            SwipeDirection::Left => -dx,
        };
        let crossed_before = *offset >= threshold;
        *offset = if raw.is_finite() { raw.clamp(0.0, max) } else { 0.0 };
        if !crossed_before && *offset >= threshold {
            debug!(offset = *offset, "drag crossed reply threshold");
        }
        *offset
    }

    /// 抬起：最后一次位移达到阈值时发出回复事件，随后回到 Idle
    pub fn end(&mut self) -> Option<ReplyActivated> {
        let DragState::Dragging {
            message_id, offset, ..
        } = std::mem::replace(&mut self.state, DragState::Idle)
        else {
            return None;
        };

        if offset < self.threshold_px {
            return None;
        }

        if let Some(callback) = self.on_reply_activated.as_mut() {
            callback(&message_id);
        }
        Some(ReplyActivated { message_id })
    }

    /// 取消：丢弃手势，不发出事件
    pub fn cancel(&mut self) {
        self.state = DragState::Idle;
    }
}

impl Default for DragReplyInterpreter {
    fn default() -> Self {
        Self::new(
            DEFAULT_REPLY_THRESHOLD_PX,
            DEFAULT_MAX_OFFSET_PX,
            SwipeDirection::Right,
        )
    }
}

impl std::fmt::Debug for DragReplyInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DragReplyInterpreter")
            .field("threshold_px", &self.threshold_px)
            .field("max_offset_px", &self.max_offset_px)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
