//! 设备模块
//!
//! 设备拥有四个独立的提交通道（图形、计算、复制、流式），负责：
//!
//! - 启动时校验硬件特性等级（不支持时返回致命错误）
//! - 按依赖顺序初始化：能力探测 → 流式工厂 → 四个队列
//! - 每帧的设备存活检查（设备移除不可恢复）
//! - 整个管线的排空 `flush`（只在关闭等全同步点使用）
//! - 创建所有 GPU 对象
//!
//! 设备是显式创建、显式销毁的上下文对象，通过引用传给所有依赖它的组件，
//! 没有全局单例。

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::command::{CommandList, CommandListType};
use super::descriptor::DescriptorHeap;
use super::diagnostics::{self, DiagnosticMessage, DiagnosticSink, MessageId, Severity};
use super::queue::{Queue, QueueKind};
use super::resource::{Buffer, GpuMemory, ResourceHeap, ResourceId, ResourceState, Texture, UploadBuffer};
use super::streaming::StreamingFactory;
use super::sync::Fence;
use super::texture::{AlignmentRules, TextureDesc, TextureLayout};
use crate::core::config::{DeviceConfig, FeatureLevel};
use crate::core::error::{GraphicsError, Result};

/// 设备统计（由 GPU 时间线更新）
#[derive(Debug, Default)]
pub struct DeviceStats {
    pub command_lists: AtomicU64,
    pub barriers: AtomicU64,
    pub buffer_copies: AtomicU64,
    pub texture_copies: AtomicU64,
    pub copied_bytes: AtomicU64,
    pub draws: AtomicU64,
    pub dispatches: AtomicU64,
    /// 存活的 GPU 内存块数量
    pub live_objects: AtomicU64,
}

/// 设备统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStatsSnapshot {
    pub command_lists: u64,
    pub barriers: u64,
    pub buffer_copies: u64,
    pub texture_copies: u64,
    pub copied_bytes: u64,
    pub draws: u64,
    pub dispatches: u64,
    pub live_objects: u64,
}

impl DeviceStats {
    pub fn snapshot(&self) -> DeviceStatsSnapshot {
        DeviceStatsSnapshot {
            command_lists: self.command_lists.load(Ordering::Acquire),
            barriers: self.barriers.load(Ordering::Acquire),
            buffer_copies: self.buffer_copies.load(Ordering::Acquire),
            texture_copies: self.texture_copies.load(Ordering::Acquire),
            copied_bytes: self.copied_bytes.load(Ordering::Acquire),
            draws: self.draws.load(Ordering::Acquire),
            dispatches: self.dispatches.load(Ordering::Acquire),
            live_objects: self.live_objects.load(Ordering::Acquire),
        }
    }
}

/// 设备能力
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    pub feature_level: FeatureLevel,
    pub mesh_shaders: bool,
    pub raytracing: bool,
    /// 着色器可见描述符堆的最大描述符数
    pub max_shader_visible_descriptors: u32,
}

impl DeviceCaps {
    fn probe(feature_level: FeatureLevel) -> Self {
        Self {
            feature_level,
            mesh_shaders: feature_level >= FeatureLevel::Level12_2,
            raytracing: feature_level >= FeatureLevel::Level12_1,
            max_shader_visible_descriptors: if feature_level >= FeatureLevel::Level12_0 {
                1_000_000
            } else {
                65_536
            },
        }
    }
}

/// 设备与队列工作线程共享的状态
pub(crate) struct DeviceShared {
    removed_reason: Mutex<Option<String>>,
    fences: Mutex<Vec<Fence>>,
    /// GPU 时间线上每个资源的实际状态，用于校验屏障
    gpu_states: Mutex<HashMap<ResourceId, ResourceState>>,
    next_resource_id: AtomicU32,
    pub(crate) stats: Arc<DeviceStats>,
    pub(crate) diagnostics: Box<dyn DiagnosticSink>,
    pub(crate) gpu_latency: Duration,
}

impl DeviceShared {
    fn new(diagnostics: Box<dyn DiagnosticSink>, gpu_latency: Duration) -> Self {
        Self {
            removed_reason: Mutex::new(None),
            fences: Mutex::new(Vec::new()),
            gpu_states: Mutex::new(HashMap::new()),
            next_resource_id: AtomicU32::new(1),
            stats: Arc::new(DeviceStats::default()),
            diagnostics,
            gpu_latency,
        }
    }

    pub(crate) fn register_fence(&self, fence: Fence) {
        self.fences.lock().push(fence);
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed_reason.lock().is_some()
    }

    pub(crate) fn removed_reason(&self) -> Option<String> {
        self.removed_reason.lock().clone()
    }

    /// 移除设备：记录原因，并把所有 Fence 推进到 `u64::MAX`，任何 CPU 等待都不会挂起
    pub(crate) fn remove_device(&self, reason: String) {
        {
            let mut removed = self.removed_reason.lock();
            if removed.is_some() {
                return;
            }
            tracing::error!(%reason, "Device removed");
            self.diagnostics.report(Severity::Corruption, MessageId::DeviceRemoved, &reason);
            *removed = Some(reason);
        }

        for fence in self.fences.lock().iter() {
            fence.complete(u64::MAX);
        }
    }

    pub(crate) fn gpu_state(&self, id: ResourceId) -> Option<ResourceState> {
        self.gpu_states.lock().get(&id).copied()
    }

    pub(crate) fn set_gpu_state(&self, id: ResourceId, state: ResourceState) {
        self.gpu_states.lock().insert(id, state);
    }

    fn allocate_id(&self) -> ResourceId {
        ResourceId(self.next_resource_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// 卸载报告
#[derive(Debug, Clone)]
pub struct UnloadReport {
    /// 卸载时仍然存活的 GPU 内存块
    pub live_objects: u64,
    /// 调试层在整个设备生命周期内上报的消息
    pub diagnostics: Vec<DiagnosticMessage>,
}

/// 图形设备
pub struct Device {
    caps: DeviceCaps,
    streaming_factory: StreamingFactory,
    graphics_queue: Queue,
    compute_queue: Queue,
    copy_queue: Queue,
    streaming_queue: Queue,
    next_descriptor_address: AtomicU64,
    shared: Arc<DeviceShared>,
}

impl Device {
    /// 创建设备
    ///
    /// 适配器特性等级低于要求的最低等级时返回
    /// `GraphicsError::UnsupportedFeatureLevel`，调用者应当终止进程。
    pub fn initialize(config: &DeviceConfig) -> Result<Self> {
        let _span = crate::span_trace!("Device::initialize").entered();

        tracing::info!(
            adapter = %config.adapter_feature_level,
            required = %config.min_feature_level,
            debug_layer = config.debug_layer,
            "Creating device"
        );

        if config.adapter_feature_level < config.min_feature_level {
            tracing::error!(
                adapter = %config.adapter_feature_level,
                required = %config.min_feature_level,
                "GPU and/or driver unsupported"
            );
            return Err(GraphicsError::UnsupportedFeatureLevel {
                required: config.min_feature_level.to_string(),
                available: config.adapter_feature_level.to_string(),
            }
            .into());
        }

        let shared = Arc::new(DeviceShared::new(
            diagnostics::create_sink(config.debug_layer),
            Duration::from_millis(config.simulated_gpu_latency_ms),
        ));

        let caps = DeviceCaps::probe(config.adapter_feature_level);
        tracing::info!(
            feature_level = %caps.feature_level,
            mesh_shaders = caps.mesh_shaders,
            raytracing = caps.raytracing,
            "Device capabilities probed"
        );

        let streaming_factory = StreamingFactory::new(u32::MAX as u64);

        let graphics_queue = Queue::new(QueueKind::Graphics, shared.clone())?;
        let compute_queue = Queue::new(QueueKind::Compute, shared.clone())?;
        let copy_queue = Queue::new(QueueKind::Copy, shared.clone())?;
        let streaming_queue = Queue::new(QueueKind::Streaming, shared.clone())?;

        crate::engine_info!("Device initialized");

        Ok(Self {
            caps,
            streaming_factory,
            graphics_queue,
            compute_queue,
            copy_queue,
            streaming_queue,
            next_descriptor_address: AtomicU64::new(0x1000),
            shared,
        })
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    pub fn graphics_queue(&self) -> &Queue {
        &self.graphics_queue
    }

    pub fn compute_queue(&self) -> &Queue {
        &self.compute_queue
    }

    pub fn copy_queue(&self) -> &Queue {
        &self.copy_queue
    }

    pub fn streaming_queue(&self) -> &Queue {
        &self.streaming_queue
    }

    pub fn streaming_factory(&self) -> &StreamingFactory {
        &self.streaming_factory
    }

    pub fn diagnostics(&self) -> &dyn DiagnosticSink {
        self.shared.diagnostics.as_ref()
    }

    pub fn stats(&self) -> DeviceStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// 设备是否仍然存活，每帧调用一次
    pub fn check_is_device_alive(&self) -> Result<()> {
        match self.shared.removed_reason() {
            None => Ok(()),
            Some(reason) => {
                tracing::error!(%reason, "Device removed");
                Err(GraphicsError::DeviceRemoved { reason }.into())
            }
        }
    }

    pub fn is_removed(&self) -> bool {
        self.shared.is_removed()
    }

    /// 注入设备移除（故障注入）
    pub fn simulate_device_removal(&self, reason: impl Into<String>) {
        self.shared.remove_device(reason.into());
    }

    /// 排空图形、计算、复制三个队列
    ///
    /// 不要在每帧路径中调用，这会破坏帧间流水线。
    /// 设备已被移除时所有 Fence 都已完成，立即返回。
    pub fn flush(&self) -> Result<()> {
        let queues = [&self.graphics_queue, &self.compute_queue, &self.copy_queue];
        let values: Vec<u64> = queues.iter().map(|queue| queue.signal_gpu()).collect();
        let fences: Vec<&Fence> = queues.iter().map(|queue| queue.fence()).collect();

        tracing::debug!(?values, "Flushing device");
        Fence::wait_cpu_multiple(&fences, &values)
    }

    fn allocate(&self, size: u64, what: &str, name: &str) -> Result<GpuMemory> {
        if size == 0 {
            return Err(GraphicsError::ResourceCreation(format!("{} '{}' has zero size", what, name)).into());
        }
        Ok(GpuMemory::allocate(size, self.shared.stats.clone()))
    }

    fn register(&self, initial_state: ResourceState, name: &str) -> Result<ResourceId> {
        if !initial_state.is_valid() {
            return Err(GraphicsError::InvalidResourceState(format!(
                "'{}' created in {:?}",
                name, initial_state
            ))
            .into());
        }
        let id = self.shared.allocate_id();
        self.shared.set_gpu_state(id, initial_state);
        Ok(id)
    }

    /// 创建提交型缓冲区
    pub fn create_buffer(&self, size: u64, initial_state: ResourceState, name: &str) -> Result<Buffer> {
        let id = self.register(initial_state, name)?;
        let memory = self.allocate(size, "buffer", name)?;
        tracing::trace!(%id, size, name, "Buffer created");
        Ok(Buffer::new(id, name.to_string(), memory))
    }

    /// 创建上传缓冲区（GENERIC_READ 状态）
    pub fn create_upload_buffer(&self, size: u64, name: &str) -> Result<UploadBuffer> {
        let id = self.register(ResourceState::GENERIC_READ, name)?;
        let memory = self.allocate(size, "upload buffer", name)?;
        Ok(UploadBuffer::new(id, name.to_string(), memory))
    }

    /// 创建资源堆
    pub fn create_heap(&self, size: u64, name: &str) -> Result<ResourceHeap> {
        let memory = self.allocate(size, "heap", name)?;
        tracing::debug!(size, name, "Resource heap created");
        Ok(ResourceHeap::new(name.to_string(), memory))
    }

    /// 在资源堆的指定偏移处放置纹理
    ///
    /// # 参数
    ///
    /// * `heap` - 资源堆
    /// * `offset` - 偏移，必须满足纹理的资源对齐
    /// * `desc` / `layout` - 纹理描述与预先计算的布局
    /// * `initial_state` - 初始状态
    pub fn create_placed_texture(
        &self,
        heap: &ResourceHeap,
        offset: u64,
        desc: TextureDesc,
        layout: TextureLayout,
        initial_state: ResourceState,
        name: &str,
    ) -> Result<Texture> {
        if offset % layout.alignment != 0 {
            return Err(GraphicsError::ResourceCreation(format!(
                "placed texture '{}' at offset {} violates its {} byte alignment",
                name, offset, layout.alignment
            ))
            .into());
        }
        if offset.saturating_add(layout.size) > heap.size() {
            return Err(GraphicsError::ResourceCreation(format!(
                "placed texture '{}' ({} bytes at {}) exceeds heap '{}' ({} bytes)",
                name,
                layout.size,
                offset,
                heap.name(),
                heap.size()
            ))
            .into());
        }

        let id = self.register(initial_state, name)?;
        tracing::trace!(%id, offset, size = layout.size, name, "Placed texture created");
        Ok(Texture::new(id, name.to_string(), desc, layout, heap.memory().clone(), offset))
    }

    /// 创建提交型纹理（渲染目标等）
    pub fn create_texture(
        &self,
        desc: TextureDesc,
        rules: &AlignmentRules,
        initial_state: ResourceState,
        name: &str,
    ) -> Result<Texture> {
        let layout = TextureLayout::compute(&desc, rules)?;
        let id = self.register(initial_state, name)?;
        let memory = self.allocate(layout.size, "texture", name)?;
        Ok(Texture::new(id, name.to_string(), desc, layout, memory, 0))
    }

    /// 创建命令列表（Initial 状态）
    pub fn create_command_list(&self, list_type: CommandListType, name: &str) -> CommandList {
        CommandList::new(list_type, name)
    }

    /// 创建着色器可见的描述符堆
    pub fn create_descriptor_heap(&self, capacity: u32, name: &str) -> Result<DescriptorHeap> {
        if capacity == 0 || capacity > self.caps.max_shader_visible_descriptors {
            return Err(GraphicsError::ResourceCreation(format!(
                "descriptor heap '{}' capacity {} outside 1..={}",
                name, capacity, self.caps.max_shader_visible_descriptors
            ))
            .into());
        }
        let address = self
            .next_descriptor_address
            .fetch_add(capacity as u64 * super::descriptor::DESCRIPTOR_INCREMENT_SIZE as u64, Ordering::Relaxed);
        Ok(DescriptorHeap::new(name, capacity, address))
    }

    /// 销毁设备
    ///
    /// 按创建的逆序关闭队列；启用调试层时报告存活对象，
    /// 期间过滤设备自身的"存活设备"消息。调用者应当先 `flush`。
    pub fn unload(self) -> UnloadReport {
        let Device {
            graphics_queue,
            compute_queue,
            copy_queue,
            streaming_queue,
            shared,
            ..
        } = self;

        drop(streaming_queue);
        drop(copy_queue);
        drop(compute_queue);
        drop(graphics_queue);

        let live_objects = shared.stats.live_objects.load(Ordering::Acquire);
        if shared.diagnostics.is_enabled() {
            shared.diagnostics.push_deny_filter(&[MessageId::LiveDevice]);
            shared
                .diagnostics
                .report(Severity::Warning, MessageId::LiveDevice, "Live device: refcount held by the leak report");
            if live_objects > 0 {
                shared.diagnostics.report(
                    Severity::Warning,
                    MessageId::LiveObject,
                    &format!("{} GPU memory blocks still alive at device unload", live_objects),
                );
            }
            shared.diagnostics.pop_filter();
        }

        crate::engine_info!(live_objects, "Device unloaded");

        UnloadReport {
            live_objects,
            diagnostics: shared.diagnostics.messages(),
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("feature_level", &self.caps.feature_level)
            .field("removed", &self.is_removed())
            .field("graphics_queue", &self.graphics_queue)
            .field("streaming_queue", &self.streaming_queue)
            .finish()
    }
}
