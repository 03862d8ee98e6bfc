//! 命令队列模块
//!
//! 每个队列对应一个硬件执行引擎（图形、计算、复制、存储流式读取），
//! 由一个工作线程模拟其 GPU 时间线：按提交顺序执行命令列表、
//! 推进 Fence、在 GPU 侧等待其它队列的 Fence。
//!
//! 同一队列内按提交顺序执行；不同队列之间没有任何顺序保证，
//! 除非显式插入 `wait_gpu`。

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::command::{Command, CommandList, CommandListType};
use super::device::DeviceShared;
use super::diagnostics::{MessageId, Severity};
use super::resource::GpuRegion;
use super::streaming::ReadRequest;
use super::sync::Fence;
use crate::core::error::{GraphicsError, Result};

/// 队列类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// 图形队列（支持图形、计算、复制）
    Graphics,
    /// 计算队列（支持计算、复制）
    Compute,
    /// 复制队列（仅支持复制）
    Copy,
    /// 存储流式读取队列（仅支持文件读取请求）
    Streaming,
}

impl QueueKind {
    pub fn name(&self) -> &'static str {
        match self {
            QueueKind::Graphics => "graphics",
            QueueKind::Compute => "compute",
            QueueKind::Copy => "copy",
            QueueKind::Streaming => "streaming",
        }
    }

    /// 队列能否执行该类型的命令列表
    pub fn accepts(&self, list_type: CommandListType) -> bool {
        match self {
            QueueKind::Graphics => true,
            QueueKind::Compute => matches!(list_type, CommandListType::Compute | CommandListType::Copy),
            QueueKind::Copy => list_type == CommandListType::Copy,
            QueueKind::Streaming => false,
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 提交到 GPU 时间线的工作
pub(crate) enum Submission {
    Execute { list: String, commands: Vec<Command> },
    Signal(u64),
    Wait { fence: Fence, value: u64 },
    Read(ReadRequest),
    Shutdown,
}

/// 命令队列
pub struct Queue {
    kind: QueueKind,
    fence: Fence,
    /// 最近一次 signal 的值；持锁期间发送，保证值按递增顺序入队
    last_submitted: Mutex<u64>,
    sender: Sender<Submission>,
    worker: Option<JoinHandle<()>>,
    shared: Arc<DeviceShared>,
}

impl Queue {
    pub(crate) fn new(kind: QueueKind, shared: Arc<DeviceShared>) -> Result<Self> {
        let fence = Fence::new(format!("{} fence", kind.name()));
        shared.register_fence(fence.clone());

        let (sender, receiver) = unbounded();
        let worker = {
            let fence = fence.clone();
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("gpu-{}", kind.name()))
                .spawn(move || run_timeline(kind, receiver, fence, shared))
                .map_err(|e| {
                    GraphicsError::DeviceCreation(format!("failed to start {} queue: {}", kind, e))
                })?
        };

        tracing::debug!(queue = %kind, "Command queue created");

        Ok(Self {
            kind,
            fence,
            last_submitted: Mutex::new(0),
            sender,
            worker: Some(worker),
            shared,
        })
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// 队列拥有的 Fence
    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// 最近一次 signal 的值
    pub fn last_submitted_value(&self) -> u64 {
        *self.last_submitted.lock()
    }

    fn send(&self, submission: Submission) -> Result<()> {
        self.sender.send(submission).map_err(|_| {
            GraphicsError::CommandExecution(format!("{} queue timeline has stopped", self.kind)).into()
        })
    }

    /// 提交一个已关闭的命令列表
    ///
    /// 列表类型必须与队列类型兼容；提交后列表进入 Pending 状态。
    pub fn execute_command_list(&self, list: &mut CommandList) -> Result<()> {
        if !self.kind.accepts(list.list_type()) {
            return Err(GraphicsError::QueueMismatch {
                queue: self.kind.to_string(),
                list: list.list_type().to_string(),
            }
            .into());
        }

        if let Some(reason) = self.shared.removed_reason() {
            return Err(GraphicsError::DeviceRemoved { reason }.into());
        }

        let commands = list.take_for_submit()?;
        tracing::trace!(queue = %self.kind, list = list.name(), commands = commands.len(), "Command list submitted");
        self.send(Submission::Execute {
            list: list.name().to_string(),
            commands,
        })
    }

    /// 在 GPU 时间线上 signal 一个新的更大的值
    ///
    /// 不阻塞，返回需要等待的值。该值在此前提交的所有工作完成后达到。
    pub fn signal_gpu(&self) -> u64 {
        let mut last = self.last_submitted.lock();
        *last += 1;
        let value = *last;
        if self.send(Submission::Signal(value)).is_err() {
            tracing::error!(queue = %self.kind, value, "Signal dropped: queue timeline has stopped");
        }
        value
    }

    /// 让本队列在 GPU 侧等待另一个 Fence 达到 `value`，不涉及 CPU
    pub fn wait_gpu(&self, fence: &Fence, value: u64) {
        let submission = Submission::Wait {
            fence: fence.clone(),
            value,
        };
        if self.send(submission).is_err() {
            tracing::error!(queue = %self.kind, fence = fence.name(), value, "GPU wait dropped: queue timeline has stopped");
        }
    }

    /// 让 `other` 等待本队列当前已提交的所有工作
    pub fn sync_gpu(&self, other: &Queue) {
        let value = self.signal_gpu();
        other.wait_gpu(&self.fence, value);
    }

    /// 阻塞直到本队列当前已提交的所有工作完成
    pub fn wait_idle(&self) {
        let value = self.signal_gpu();
        self.fence.wait_cpu(value);
    }

    /// 提交一个文件读取请求，仅流式队列可用
    pub(crate) fn enqueue_read(&self, request: ReadRequest) -> Result<()> {
        if self.kind != QueueKind::Streaming {
            return Err(GraphicsError::QueueMismatch {
                queue: self.kind.to_string(),
                list: "file read".to_string(),
            }
            .into());
        }
        self.send(Submission::Read(request))
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        let _ = self.sender.send(Submission::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!(queue = %self.kind, "Queue timeline thread panicked");
            }
        }
        tracing::debug!(queue = %self.kind, "Command queue destroyed");
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("kind", &self.kind)
            .field("last_submitted", &self.last_submitted_value())
            .field("completed", &self.fence.completed_value())
            .finish()
    }
}

/// GPU 时间线：按顺序执行提交的工作
fn run_timeline(kind: QueueKind, receiver: Receiver<Submission>, fence: Fence, shared: Arc<DeviceShared>) {
    for submission in receiver.iter() {
        match submission {
            Submission::Execute { list, commands } => {
                if shared.is_removed() {
                    continue;
                }
                if !shared.gpu_latency.is_zero() {
                    thread::sleep(shared.gpu_latency);
                }

                shared.stats.command_lists.fetch_add(1, Ordering::Relaxed);
                let mut executor = TimelineExecutor {
                    kind,
                    shared: &shared,
                    root_bound: false,
                };
                for command in commands {
                    if let Err(fault) = executor.execute(command) {
                        shared.remove_device(format!(
                            "DXGI_ERROR_DEVICE_HUNG: page fault on the {} queue while executing '{}': {}",
                            kind, list, fault
                        ));
                        break;
                    }
                }
            }
            Submission::Signal(value) => fence.complete(value),
            Submission::Wait { fence: other, value } => other.wait_cpu(value),
            Submission::Read(request) => request.execute(),
            Submission::Shutdown => break,
        }
    }
}

/// 单个命令列表的执行器，像调试层一样校验屏障和复制目标状态
struct TimelineExecutor<'a> {
    kind: QueueKind,
    shared: &'a DeviceShared,
    root_bound: bool,
}

impl TimelineExecutor<'_> {
    fn execute(&mut self, command: Command) -> std::result::Result<(), String> {
        let stats = &self.shared.stats;

        match command {
            Command::CopyBufferRegion { dst, dst_offset, src, src_offset, size } => {
                check_range(&dst, dst_offset, size)?;
                check_range(&src, src_offset, size)?;
                self.check_copy_dest(&dst);
                copy(&src, src.offset + src_offset, &dst, dst.offset + dst_offset, size)?;

                stats.buffer_copies.fetch_add(1, Ordering::Relaxed);
                stats.copied_bytes.fetch_add(size, Ordering::Relaxed);
            }
            Command::CopyTextureRegion { dst, subresource, src, src_offset } => {
                let size = dst.size;
                check_range(&src, src_offset, size)?;
                self.check_copy_dest(&dst);
                copy(&src, src.offset + src_offset, &dst, dst.offset, size)
                    .map_err(|fault| format!("subresource {}: {}", subresource, fault))?;

                stats.texture_copies.fetch_add(1, Ordering::Relaxed);
                stats.copied_bytes.fetch_add(size, Ordering::Relaxed);
            }
            Command::ResourceBarrier(barriers) => {
                for barrier in barriers {
                    if let Some(actual) = self.shared.gpu_state(barrier.resource) {
                        if actual != barrier.before {
                            self.shared.diagnostics.report(
                                Severity::Error,
                                MessageId::ResourceBarrierBeforeAfterMismatch,
                                &format!(
                                    "resource {} is in {:?} on the {} queue, barrier expected {:?}",
                                    barrier.resource, actual, self.kind, barrier.before
                                ),
                            );
                        }
                    }
                    self.shared.set_gpu_state(barrier.resource, barrier.after);
                    stats.barriers.fetch_add(1, Ordering::Relaxed);
                }
            }
            Command::SetRootLayout { .. } => self.root_bound = true,
            Command::SetDescriptorHeap { .. } | Command::SetDescriptorTable { .. } => {}
            Command::Draw { .. } => {
                self.check_root_layout("Draw");
                stats.draws.fetch_add(1, Ordering::Relaxed);
            }
            Command::Dispatch { .. } => {
                self.check_root_layout("Dispatch");
                stats.dispatches.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn check_copy_dest(&self, dst: &GpuRegion) {
        if let Some(state) = self.shared.gpu_state(dst.resource) {
            if !state.accepts_copy() {
                self.shared.diagnostics.report(
                    Severity::Error,
                    MessageId::CopyDestInvalidState,
                    &format!("copy destination {} is in {:?}", dst.resource, state),
                );
            }
        }
    }

    fn check_root_layout(&self, what: &str) {
        if !self.root_bound {
            self.shared.diagnostics.report(
                Severity::Error,
                MessageId::MissingRootLayout,
                &format!("{} on the {} queue without a root layout", what, self.kind),
            );
        }
    }
}

fn check_range(region: &GpuRegion, offset: u64, size: u64) -> std::result::Result<(), String> {
    match offset.checked_add(size) {
        Some(end) if end <= region.size => Ok(()),
        _ => Err(format!(
            "{} bytes at offset {} overrun resource {} ({} bytes)",
            size, offset, region.resource, region.size
        )),
    }
}

/// 先把源数据暂存出来再锁目标，两个队列之间不会出现锁顺序反转
fn copy(src: &GpuRegion, src_offset: u64, dst: &GpuRegion, dst_offset: u64, size: u64) -> std::result::Result<(), String> {
    let staged = src
        .memory
        .read(src_offset, size)
        .ok_or_else(|| format!("read of {} bytes from resource {} out of bounds", size, src.resource))?;
    if dst.memory.write(dst_offset, &staged) {
        Ok(())
    } else {
        Err(format!("write of {} bytes to resource {} out of bounds", size, dst.resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_kind_compatibility() {
        assert!(QueueKind::Graphics.accepts(CommandListType::Direct));
        assert!(QueueKind::Graphics.accepts(CommandListType::Copy));
        assert!(QueueKind::Compute.accepts(CommandListType::Compute));
        assert!(!QueueKind::Compute.accepts(CommandListType::Direct));
        assert!(QueueKind::Copy.accepts(CommandListType::Copy));
        assert!(!QueueKind::Copy.accepts(CommandListType::Compute));
        assert!(!QueueKind::Streaming.accepts(CommandListType::Copy));
    }
}
