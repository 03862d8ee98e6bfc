//! 调试诊断模块
//!
//! 模拟图形驱动调试层的消息通道。调试构建下使用 [`DebugLayer`]，
//! 按消息 ID 过滤已知的无害消息，其余消息作为警告输出；
//! 发布构建使用 [`NoopDiagnostics`]，同一接口但不做任何事。

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;

/// 调试层保留的最大消息数，超出后丢弃最旧的消息
pub const MAX_RETAINED_MESSAGES: usize = 1024;

/// 诊断消息 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// 泄漏报告时设备自身仍然存活（引用计数假象）
    LiveDevice,
    /// 卸载时仍有存活的 GPU 对象
    LiveObject,
    /// 屏障的 before 状态与 GPU 上的实际状态不一致
    ResourceBarrierBeforeAfterMismatch,
    /// 复制目标不处于 COMMON / COPY_DEST 状态
    CopyDestInvalidState,
    /// 绘制 / 派发前未绑定根布局
    MissingRootLayout,
    /// 设备被移除
    DeviceRemoved,
}

/// 诊断消息严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Corruption,
}

/// 一条已上报（未被过滤）的诊断消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessage {
    pub id: MessageId,
    pub severity: Severity,
    pub text: String,
}

/// 诊断消息接收者
///
/// 由设备持有，队列工作线程在 GPU 时间线上上报校验失败，
/// 因此必须是 `Send + Sync`。
pub trait DiagnosticSink: Send + Sync {
    /// 压入一组拒绝过滤器，直到对应的 `pop_filter`
    fn push_deny_filter(&self, ids: &[MessageId]);

    /// 弹出最近压入的过滤器
    fn pop_filter(&self);

    /// 上报一条消息
    fn report(&self, severity: Severity, id: MessageId, text: &str);

    /// 已上报（未被过滤）的消息
    fn messages(&self) -> Vec<DiagnosticMessage>;

    /// 是否为启用的调试层
    fn is_enabled(&self) -> bool;
}

/// 调试层
pub struct DebugLayer {
    filters: Mutex<Vec<Vec<MessageId>>>,
    messages: Mutex<VecDeque<DiagnosticMessage>>,
    capacity: usize,
}

impl Default for DebugLayer {
    fn default() -> Self {
        Self::with_capacity(MAX_RETAINED_MESSAGES)
    }
}

impl DebugLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最多保留 `capacity` 条消息
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            filters: Mutex::new(Vec::new()),
            messages: Mutex::new(VecDeque::with_capacity(capacity.min(MAX_RETAINED_MESSAGES))),
            capacity: capacity.max(1),
        }
    }

    fn is_denied(&self, id: MessageId) -> bool {
        self.filters.lock().iter().any(|filter| filter.contains(&id))
    }
}

impl DiagnosticSink for DebugLayer {
    fn push_deny_filter(&self, ids: &[MessageId]) {
        self.filters.lock().push(ids.to_vec());
    }

    fn pop_filter(&self) {
        self.filters.lock().pop();
    }

    fn report(&self, severity: Severity, id: MessageId, text: &str) {
        if self.is_denied(id) {
            tracing::trace!(?id, "Diagnostic message filtered");
            return;
        }

        match severity {
            Severity::Info => tracing::info!(?id, "{}", text),
            Severity::Warning => tracing::warn!(?id, "{}", text),
            Severity::Error | Severity::Corruption => tracing::error!(?id, ?severity, "{}", text),
        }

        let mut messages = self.messages.lock();
        if messages.len() == self.capacity {
            messages.pop_front();
        }
        messages.push_back(DiagnosticMessage {
            id,
            severity,
            text: text.to_string(),
        });
    }

    fn messages(&self) -> Vec<DiagnosticMessage> {
        self.messages.lock().iter().cloned().collect()
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// 发布构建使用的空实现
#[derive(Debug, Default)]
pub struct NoopDiagnostics;

impl DiagnosticSink for NoopDiagnostics {
    fn push_deny_filter(&self, _ids: &[MessageId]) {}

    fn pop_filter(&self) {}

    fn report(&self, _severity: Severity, _id: MessageId, _text: &str) {}

    fn messages(&self) -> Vec<DiagnosticMessage> {
        Vec::new()
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// 根据配置创建诊断接收者
pub fn create_sink(debug_layer: bool) -> Box<dyn DiagnosticSink> {
    if debug_layer {
        Box::new(DebugLayer::new())
    } else {
        Box::new(NoopDiagnostics)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageId::LiveDevice => "LIVE_DEVICE",
            MessageId::LiveObject => "LIVE_OBJECT",
            MessageId::ResourceBarrierBeforeAfterMismatch => "RESOURCE_BARRIER_BEFORE_AFTER_MISMATCH",
            MessageId::CopyDestInvalidState => "COPY_DEST_INVALID_STATE",
            MessageId::MissingRootLayout => "MISSING_ROOT_LAYOUT",
            MessageId::DeviceRemoved => "DEVICE_REMOVED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_are_scoped() {
        let layer = DebugLayer::new();

        layer.push_deny_filter(&[MessageId::LiveDevice]);
        layer.report(Severity::Warning, MessageId::LiveDevice, "device alive");
        layer.report(Severity::Warning, MessageId::LiveObject, "buffer alive");
        layer.pop_filter();
        layer.report(Severity::Warning, MessageId::LiveDevice, "device alive");

        let ids: Vec<_> = layer.messages().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![MessageId::LiveObject, MessageId::LiveDevice]);
    }

    #[test]
    fn test_noop_sink() {
        let sink = create_sink(false);
        sink.report(Severity::Error, MessageId::DeviceRemoved, "gone");
        assert!(sink.messages().is_empty());
        assert!(!sink.is_enabled());
        assert!(create_sink(true).is_enabled());
    }

    #[test]
    fn test_retained_messages_are_capped() {
        let layer = DebugLayer::with_capacity(3);
        for i in 0..5 {
            layer.report(Severity::Warning, MessageId::LiveObject, &format!("object {}", i));
        }

        let texts: Vec<_> = layer.messages().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["object 2", "object 3", "object 4"]);
    }
}
