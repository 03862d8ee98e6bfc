//! 渲染调度
//!
//! 每帧的驱动者：
//!
//! 1. 切换帧槽位（槽位上一次提交未完成时才等待）
//! 2. 检查设备存活
//! 3. CPU 准备：剔除 / 批次 + 每个通道的 `prepare_rendering`
//! 4. 绑定根布局和场景资源（每帧一次）
//! 5. 按固定顺序运行所有通道
//! 6. 关闭命令列表、提交一次、把 signal 的值记录到槽位
//!
//! 任何通道失败都会中止本帧剩余的通道，把跟踪器回滚到本帧开始录制时的快照，
//! 并返回 `GraphicsError::PassFailed`，调用者把它当作致命错误处理。
//! 关闭或提交失败（例如提交前设备被移除）同样回滚跟踪器并把所有通道放回 Ready。

use std::path::Path;

use super::command::CommandListType;
use super::context::{EngineContext, RenderContext};
use super::device::Device;
use super::frame::FrameContext;
use super::pass::{PassSlot, RenderPass};
use super::tracker::ResourceTracker;
use crate::core::config::{Config, FrameConfig, StreamingConfig};
use crate::core::error::{DistFrameError, GraphicsError, Result};
use crate::scene::{Scene, SceneData};

/// 帧统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// 已提交的帧数
    pub frames_submitted: u64,
    /// 最近一帧 signal 的 Fence 值
    pub last_fence_value: u64,
    /// CPU 因槽位未完成而阻塞的次数
    pub cpu_waits: u64,
    /// 最近一帧记录的屏障数量
    pub barriers_last_frame: u64,
    /// 最近一帧记录的绘制数量
    pub draws_last_frame: u32,
    /// 观察到的最大在途帧数
    pub max_in_flight: usize,
}

/// 初始化后才存在的资源
struct ScheduleResources {
    tracker: ResourceTracker,
    engine: EngineContext,
    frames: FrameContext,
    scene: Scene,
}

/// 渲染调度器
pub struct RenderSchedule {
    frame_config: FrameConfig,
    streaming_config: StreamingConfig,
    passes: Vec<PassSlot>,
    resources: Option<ScheduleResources>,
    frame_index: u64,
    stats: FrameStats,
}

fn not_initialized() -> DistFrameError {
    GraphicsError::InvalidLifecycle {
        object: "render schedule".to_string(),
        expected: "initialized".to_string(),
        actual: "uninitialized".to_string(),
    }
    .into()
}

fn abort_frame(passes: &mut [PassSlot]) {
    for slot in passes {
        slot.abort_frame();
    }
}

fn pass_failure(pass: &str, err: DistFrameError) -> DistFrameError {
    match err {
        DistFrameError::Graphics(GraphicsError::PassFailed { .. }) => err,
        other => GraphicsError::PassFailed {
            pass: pass.to_string(),
            reason: other.to_string(),
        }
        .into(),
    }
}

impl RenderSchedule {
    /// 创建调度器，通道按给定顺序执行
    pub fn new(config: &Config, passes: Vec<Box<dyn RenderPass>>) -> Self {
        Self {
            frame_config: config.frame.clone(),
            streaming_config: config.streaming.clone(),
            passes: passes.into_iter().map(PassSlot::new).collect(),
            resources: None,
            frame_index: 0,
            stats: FrameStats::default(),
        }
    }

    /// 初始化
    ///
    /// 顺序：跟踪器 → 引擎上下文 → 帧上下文 → 开始场景流式读取 → 通道初始化
    /// → 完成场景加载（提交并等待初始化命令列表）→ 流式队列同步到图形队列。
    ///
    /// # 参数
    ///
    /// * `device` - 图形设备
    /// * `scene_folder` - 场景目录
    pub fn initialize(&mut self, device: &Device, scene_folder: &Path) -> Result<()> {
        let _span = crate::span_trace!("RenderSchedule::initialize").entered();

        if self.resources.is_some() {
            return Err(GraphicsError::InvalidLifecycle {
                object: "render schedule".to_string(),
                expected: "uninitialized".to_string(),
                actual: "initialized".to_string(),
            }
            .into());
        }

        let rules = &self.streaming_config.alignment;
        let mut tracker = ResourceTracker::new(self.frame_config.tracker_capacity);
        let engine = EngineContext::initialize(device, &self.frame_config, rules, &mut tracker)?;
        let frames = FrameContext::new(device, self.frame_config.frames_in_flight)?;

        let mut data = SceneData::open(scene_folder, rules)?;
        data.start_streaming(device)?;

        for slot in &mut self.passes {
            slot.initialize(device, &engine)?;
        }

        let mut init_list = device.create_command_list(CommandListType::Direct, "Initialization Command List");
        init_list.reset()?;
        let scene = Scene::initialize(device, &mut data, &mut init_list, &self.streaming_config, &self.frame_config)?;

        device.streaming_queue().sync_gpu(device.graphics_queue());

        crate::engine_info!(
            passes = self.passes.len(),
            frames_in_flight = frames.frames_in_flight(),
            tracked_resources = tracker.len(),
            "Render schedule initialized"
        );

        self.resources = Some(ScheduleResources {
            tracker,
            engine,
            frames,
            scene,
        });
        Ok(())
    }

    /// 渲染一帧
    pub fn render(&mut self, device: &Device) -> Result<()> {
        let resources = self.resources.as_mut().ok_or_else(not_initialized)?;
        let frame_index = self.frame_index;
        let queue = device.graphics_queue();

        let flip = resources.frames.flip_frame(frame_index, queue);
        if flip.waited {
            self.stats.cpu_waits += 1;
        }

        device.check_is_device_alive()?;

        // CPU 准备
        resources.scene.prepare_frame();
        for slot in &mut self.passes {
            if let Err(err) = slot.prepare(&resources.scene) {
                abort_frame(&mut self.passes);
                return Err(err);
            }
        }

        let list = resources.frames.command_list_mut(flip.slot);
        list.reset()?;
        list.set_root_layout(&resources.engine.root_layout);
        resources.scene.bind_resources(list);

        let checkpoint = resources.tracker.checkpoint();
        let barriers_before = resources.tracker.barriers_emitted();

        let mut context = RenderContext {
            list,
            engine: &resources.engine,
            scene: &resources.scene,
            frame_index,
        };

        for index in 0..self.passes.len() {
            let slot = &mut self.passes[index];
            if let Err(err) = slot.render(&mut context, &mut resources.tracker) {
                let err = pass_failure(slot.name(), err);
                crate::engine_error!(frame = frame_index, error = %err, "Render pass failed, frame aborted");
                resources.tracker.rollback(checkpoint);
                abort_frame(&mut self.passes);
                // 已录制的命令不会被提交
                if let Err(close_err) = context.list.close() {
                    crate::engine_warn!(frame = frame_index, error = %close_err, "Aborted frame command list failed to close");
                }
                return Err(err);
            }
        }

        let list = context.list;
        if let Err(err) = list.close() {
            crate::engine_error!(frame = frame_index, error = %err, "Frame command list failed to close");
            resources.tracker.rollback(checkpoint);
            abort_frame(&mut self.passes);
            return Err(err);
        }

        let draws = list.stats().draws;
        if let Err(err) = queue.execute_command_list(list) {
            crate::engine_error!(frame = frame_index, error = %err, "Frame submission failed, frame aborted");
            resources.tracker.rollback(checkpoint);
            abort_frame(&mut self.passes);
            return Err(err);
        }
        let fence_value = queue.signal_gpu();
        resources.frames.record_submission(flip.slot, fence_value);

        for slot in &mut self.passes {
            slot.end_frame()?;
        }

        let in_flight = resources.frames.in_flight(queue.fence().completed_value());
        self.stats.frames_submitted += 1;
        self.stats.last_fence_value = fence_value;
        self.stats.barriers_last_frame = resources.tracker.barriers_emitted() - barriers_before;
        self.stats.draws_last_frame = draws;
        self.stats.max_in_flight = self.stats.max_in_flight.max(in_flight);
        self.frame_index += 1;

        tracing::debug!(
            frame = frame_index,
            slot = flip.slot,
            fence_value,
            in_flight,
            barriers = self.stats.barriers_last_frame,
            "Frame submitted"
        );
        Ok(())
    }

    /// 卸载，调用者必须先 `Device::flush`
    ///
    /// 按初始化的逆序释放。
    pub fn unload(&mut self) -> Result<()> {
        let Some(resources) = self.resources.take() else {
            return Ok(());
        };
        let ScheduleResources {
            mut tracker,
            engine,
            frames,
            scene,
        } = resources;

        for slot in self.passes.iter_mut().rev() {
            slot.unload()?;
        }
        scene.unload();
        drop(frames);
        engine.resources.unload(&mut tracker);

        crate::engine_info!(frames = self.stats.frames_submitted, "Render schedule unloaded");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    pub fn frames_in_flight(&self) -> usize {
        match &self.resources {
            Some(resources) => resources.frames.frames_in_flight(),
            None => self.frame_config.frames_in_flight,
        }
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.stats
    }

    /// 下一帧的序号
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn passes(&self) -> &[PassSlot] {
        &self.passes
    }

    pub fn tracker(&self) -> Option<&ResourceTracker> {
        self.resources.as_ref().map(|resources| &resources.tracker)
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.resources.as_ref().map(|resources| &resources.scene)
    }

    pub fn engine_context(&self) -> Option<&EngineContext> {
        self.resources.as_ref().map(|resources| &resources.engine)
    }
}

impl std::fmt::Debug for RenderSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSchedule")
            .field("passes", &self.passes)
            .field("initialized", &self.is_initialized())
            .field("frame_index", &self.frame_index)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::context::RenderTarget;
    use crate::renderer::pass::PassState;
    use crate::renderer::passes::default_passes;
    use crate::renderer::resource::ResourceState;
    use crate::scene::SceneAssetBuilder;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.device.debug_layer = true;
        config.frame.width = 64;
        config.frame.height = 32;
        config
    }

    fn setup(config: &Config) -> (Device, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        SceneAssetBuilder::synthetic()
            .write(dir.path(), &config.streaming.alignment)
            .unwrap();
        (Device::initialize(&config.device).unwrap(), dir)
    }

    /// 把光照缓冲转换到渲染目标，并记录转换是否产生了屏障
    struct ProbePass {
        name: &'static str,
        target: ResourceState,
        emitted: Arc<AtomicU32>,
    }

    impl RenderPass for ProbePass {
        fn name(&self) -> &str {
            self.name
        }

        fn initialize(&mut self, _device: &Device, _context: &EngineContext) -> Result<()> {
            Ok(())
        }

        fn unload(&mut self) {}

        fn prepare_rendering(&mut self, _scene: &Scene) -> Result<()> {
            Ok(())
        }

        fn render(&mut self, context: &mut RenderContext<'_>, tracker: &mut ResourceTracker) -> Result<()> {
            let id = context.engine.resources.id(RenderTarget::LightBuffer);
            if tracker.transition(context.list, id, self.target)? {
                self.emitted.fetch_add(1, Ordering::SeqCst);
            }
            context.list.draw(3, 1);
            Ok(())
        }
    }

    struct FailingPass;

    impl RenderPass for FailingPass {
        fn name(&self) -> &str {
            "Failing"
        }

        fn initialize(&mut self, _device: &Device, _context: &EngineContext) -> Result<()> {
            Ok(())
        }

        fn unload(&mut self) {}

        fn prepare_rendering(&mut self, _scene: &Scene) -> Result<()> {
            Ok(())
        }

        fn render(&mut self, context: &mut RenderContext<'_>, tracker: &mut ResourceTracker) -> Result<()> {
            let depth = context.engine.resources.id(RenderTarget::Depth);
            tracker.transition(context.list, depth, ResourceState::DEPTH_WRITE)?;
            Err(DistFrameError::Runtime("shader compilation failed".to_string()))
        }
    }

    /// 录制成功，但在提交之前移除设备
    struct RemovesDevicePass {
        device: &'static Device,
    }

    impl RenderPass for RemovesDevicePass {
        fn name(&self) -> &str {
            "RemovesDevice"
        }

        fn initialize(&mut self, _device: &Device, _context: &EngineContext) -> Result<()> {
            Ok(())
        }

        fn unload(&mut self) {}

        fn prepare_rendering(&mut self, _scene: &Scene) -> Result<()> {
            Ok(())
        }

        fn render(&mut self, context: &mut RenderContext<'_>, tracker: &mut ResourceTracker) -> Result<()> {
            let depth = context.engine.resources.id(RenderTarget::Depth);
            tracker.transition(context.list, depth, ResourceState::DEPTH_WRITE)?;
            self.device.simulate_device_removal("removed before submit");
            Ok(())
        }
    }

    #[test]
    fn test_reference_passes_render() {
        let config = test_config();
        let (device, dir) = setup(&config);
        let mut schedule = RenderSchedule::new(&config, default_passes());
        assert!(schedule.render(&device).is_err());

        schedule.initialize(&device, dir.path()).unwrap();
        assert!(schedule.initialize(&device, dir.path()).is_err());

        for _ in 0..4 {
            schedule.render(&device).unwrap();
        }
        assert!(schedule.passes().iter().all(|slot| slot.state() == PassState::Ready));

        let stats = schedule.frame_stats();
        assert_eq!(stats.frames_submitted, 4);
        assert!(stats.draws_last_frame > 0);

        device.flush().unwrap();
        let executed = device.stats();
        assert_eq!(executed.draws as u32, stats.draws_last_frame * 4);
        assert!(device
            .diagnostics()
            .messages()
            .iter()
            .all(|message| message.severity < crate::renderer::diagnostics::Severity::Error));

        let tracker = schedule.tracker().unwrap();
        let back_buffer = schedule.engine_context().unwrap().resources.id(RenderTarget::BackBuffer);
        assert_eq!(tracker.state(back_buffer), Some(ResourceState::PRESENT));

        schedule.unload().unwrap();
        assert!(!schedule.is_initialized());
    }

    #[test]
    fn test_second_pass_in_same_state_emits_no_barrier() {
        let config = test_config();
        let (device, dir) = setup(&config);
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        let passes: Vec<Box<dyn RenderPass>> = vec![
            Box::new(ProbePass {
                name: "First",
                target: ResourceState::RENDER_TARGET,
                emitted: first.clone(),
            }),
            Box::new(ProbePass {
                name: "Second",
                target: ResourceState::RENDER_TARGET,
                emitted: second.clone(),
            }),
        ];
        let mut schedule = RenderSchedule::new(&config, passes);
        schedule.initialize(&device, dir.path()).unwrap();
        schedule.render(&device).unwrap();
        schedule.render(&device).unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert_eq!(schedule.frame_stats().barriers_last_frame, 0);
        device.flush().unwrap();
    }

    #[test]
    fn test_pass_failure_rolls_back_tracker() {
        let config = test_config();
        let (device, dir) = setup(&config);
        let emitted = Arc::new(AtomicU32::new(0));
        let passes: Vec<Box<dyn RenderPass>> = vec![
            Box::new(ProbePass {
                name: "Probe",
                target: ResourceState::RENDER_TARGET,
                emitted,
            }),
            Box::new(FailingPass),
        ];
        let mut schedule = RenderSchedule::new(&config, passes);
        schedule.initialize(&device, dir.path()).unwrap();

        let err = schedule.render(&device).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Graphics error: Render pass 'Failing' failed: Runtime error: shader compilation failed"
        );

        let tracker = schedule.tracker().unwrap();
        let engine = schedule.engine_context().unwrap();
        assert_eq!(tracker.state(engine.resources.id(RenderTarget::LightBuffer)), Some(ResourceState::COMMON));
        assert_eq!(tracker.state(engine.resources.id(RenderTarget::Depth)), Some(ResourceState::COMMON));
        assert_eq!(tracker.barriers_emitted(), 0);
        assert!(schedule.passes().iter().all(|slot| slot.state() == PassState::Ready));
        assert_eq!(schedule.frame_stats().frames_submitted, 0);
        device.flush().unwrap();
    }

    #[test]
    fn test_frame_slots_apply_back_pressure() {
        let mut config = test_config();
        config.device.simulated_gpu_latency_ms = 15;
        let (device, dir) = setup(&config);

        let mut schedule = RenderSchedule::new(&config, default_passes());
        schedule.initialize(&device, dir.path()).unwrap();
        assert_eq!(schedule.frames_in_flight(), 2);

        for _ in 0..6 {
            schedule.render(&device).unwrap();
            let queue = device.graphics_queue();
            let outstanding = queue.last_submitted_value().saturating_sub(queue.fence().completed_value());
            assert!(outstanding <= 2);
        }

        let stats = schedule.frame_stats();
        assert!(stats.cpu_waits > 0);
        assert!(stats.max_in_flight <= 2);
        device.flush().unwrap();
    }

    #[test]
    fn test_device_removal_stops_rendering() {
        let config = test_config();
        let (device, dir) = setup(&config);
        let mut schedule = RenderSchedule::new(&config, default_passes());
        schedule.initialize(&device, dir.path()).unwrap();
        schedule.render(&device).unwrap();

        device.simulate_device_removal("injected");
        let err = schedule.render(&device).unwrap_err();
        assert!(err.is_device_removed());
    }

    #[test]
    fn test_failed_submit_rolls_back_frame() {
        let config = test_config();
        let (device, dir) = setup(&config);
        let device: &'static Device = Box::leak(Box::new(device));

        let mut schedule = RenderSchedule::new(&config, vec![Box::new(RemovesDevicePass { device })]);
        schedule.initialize(device, dir.path()).unwrap();

        let err = schedule.render(device).unwrap_err();
        assert!(err.is_device_removed());

        let tracker = schedule.tracker().unwrap();
        let depth = schedule.engine_context().unwrap().resources.id(RenderTarget::Depth);
        assert_eq!(tracker.state(depth), Some(ResourceState::COMMON));
        assert_eq!(tracker.barriers_emitted(), 0);
        assert!(schedule.passes().iter().all(|slot| slot.state() == PassState::Ready));
        assert_eq!(schedule.frame_stats().frames_submitted, 0);
        assert_eq!(schedule.frame_index(), 0);

        // 后续帧报告设备移除，而不是通道生命周期错误
        let err = schedule.render(device).unwrap_err();
        assert!(err.is_device_removed());
    }
}
