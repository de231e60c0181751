/// 时间线状态（渲染层的分页与发送指示）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineStatus {
    pub conversation_id: Option<String>,
    pub generation: Option<u64>,
    pub has_more: bool,
    pub is_loading_more: bool,
    pub pages_loaded: usize,
    /// 等待确认的发送/编辑数量
    pub pending: usize,
    /// 失败且等待用户处理的发送/编辑数量
    pub failed: usize,
}
