//! 参考渲染通道
//!
//! 固定顺序：Update → Z 预通道 → G-Buffer → 延迟光照 → 天空盒 → 色调映射 → 呈现。
//! 视觉算法本身不在这里，每个通道只记录它需要的资源状态转换和绘制/派发，
//! 足以驱动帧调度、状态跟踪和提交。

use super::context::{EngineContext, RenderContext, RenderTarget, ROOT_TABLE_PASS};
use super::device::Device;
use super::pass::{PipelineState, RenderPass};
use super::resource::ResourceState;
use super::tracker::ResourceTracker;
use crate::core::error::{GraphicsError, Result};
use crate::scene::Scene;

/// 延迟光照之后深度缓冲的状态（只读深度 + 像素着色器读取）
const DEPTH_SAMPLED: ResourceState = ResourceState::DEPTH_READ.union(ResourceState::PIXEL_SHADER_RESOURCE);

fn pipeline_missing(name: &str) -> crate::core::error::DistFrameError {
    GraphicsError::PassFailed {
        pass: name.to_string(),
        reason: "pipeline state not created".to_string(),
    }
    .into()
}

/// 默认的通道序列
pub fn default_passes() -> Vec<Box<dyn RenderPass>> {
    vec![
        Box::new(UpdatePass::default()),
        Box::new(ZPass::default()),
        Box::new(GBufferPass::default()),
        Box::new(DeferredLightingPass::default()),
        Box::new(SkyBoxPass::default()),
        Box::new(ToneMappingPass::default()),
        Box::new(PresentPass::default()),
    ]
}

/// 每帧更新（剔除结果写入间接参数）
#[derive(Debug, Default)]
pub struct UpdatePass {
    pipeline: Option<PipelineState>,
    dispatch_groups: u32,
}

impl RenderPass for UpdatePass {
    fn name(&self) -> &str {
        "Update"
    }

    fn initialize(&mut self, _device: &Device, _context: &EngineContext) -> Result<()> {
        self.pipeline = Some(PipelineState::compute("Update CS"));
        Ok(())
    }

    fn unload(&mut self) {
        self.pipeline = None;
    }

    fn prepare_rendering(&mut self, scene: &Scene) -> Result<()> {
        // 每组 64 个对象
        self.dispatch_groups = scene.object_count().div_ceil(64).max(1);
        Ok(())
    }

    fn render(&mut self, context: &mut RenderContext<'_>, _tracker: &mut ResourceTracker) -> Result<()> {
        if self.pipeline.is_none() {
            return Err(pipeline_missing(self.name()));
        }
        context.list.dispatch(self.dispatch_groups, 1, 1);
        Ok(())
    }
}

/// 深度预通道
#[derive(Debug, Default)]
pub struct ZPass {
    pipeline: Option<PipelineState>,
    draws: u32,
}

impl RenderPass for ZPass {
    fn name(&self) -> &str {
        "ZPass"
    }

    fn initialize(&mut self, _device: &Device, _context: &EngineContext) -> Result<()> {
        self.pipeline = Some(PipelineState::graphics("Depth Only"));
        Ok(())
    }

    fn unload(&mut self) {
        self.pipeline = None;
    }

    fn prepare_rendering(&mut self, scene: &Scene) -> Result<()> {
        self.draws = scene.batches().visible_opaque().len() as u32;
        Ok(())
    }

    fn render(&mut self, context: &mut RenderContext<'_>, tracker: &mut ResourceTracker) -> Result<()> {
        if self.pipeline.is_none() {
            return Err(pipeline_missing(self.name()));
        }
        let depth = context.engine.resources.id(RenderTarget::Depth);
        tracker.transition(context.list, depth, ResourceState::DEPTH_WRITE)?;
        for _ in 0..self.draws {
            context.list.draw(3, 1);
        }
        Ok(())
    }
}

/// G-Buffer 通道
#[derive(Debug, Default)]
pub struct GBufferPass {
    pipeline: Option<PipelineState>,
    draws: u32,
}

impl RenderPass for GBufferPass {
    fn name(&self) -> &str {
        "GBuffer"
    }

    fn initialize(&mut self, _device: &Device, _context: &EngineContext) -> Result<()> {
        self.pipeline = Some(PipelineState::graphics("GBuffer Fill"));
        Ok(())
    }

    fn unload(&mut self) {
        self.pipeline = None;
    }

    fn prepare_rendering(&mut self, scene: &Scene) -> Result<()> {
        self.draws = scene.batches().visible_opaque().len() as u32;
        Ok(())
    }

    fn render(&mut self, context: &mut RenderContext<'_>, tracker: &mut ResourceTracker) -> Result<()> {
        if self.pipeline.is_none() {
            return Err(pipeline_missing(self.name()));
        }
        let resources = &context.engine.resources;
        tracker.transition_many(
            context.list,
            &[
                (resources.id(RenderTarget::GBufferAlbedo), ResourceState::RENDER_TARGET),
                (resources.id(RenderTarget::GBufferNormal), ResourceState::RENDER_TARGET),
                (resources.id(RenderTarget::Depth), ResourceState::DEPTH_READ),
            ],
        )?;
        for _ in 0..self.draws {
            context.list.draw(3, 1);
        }
        Ok(())
    }
}

/// 延迟光照通道
#[derive(Debug, Default)]
pub struct DeferredLightingPass {
    pipeline: Option<PipelineState>,
}

impl RenderPass for DeferredLightingPass {
    fn name(&self) -> &str {
        "DeferredLighting"
    }

    fn initialize(&mut self, _device: &Device, _context: &EngineContext) -> Result<()> {
        self.pipeline = Some(PipelineState::graphics("Deferred Lighting"));
        Ok(())
    }

    fn unload(&mut self) {
        self.pipeline = None;
    }

    fn prepare_rendering(&mut self, _scene: &Scene) -> Result<()> {
        Ok(())
    }

    fn render(&mut self, context: &mut RenderContext<'_>, tracker: &mut ResourceTracker) -> Result<()> {
        if self.pipeline.is_none() {
            return Err(pipeline_missing(self.name()));
        }
        let resources = &context.engine.resources;
        tracker.transition_many(
            context.list,
            &[
                (resources.id(RenderTarget::GBufferAlbedo), ResourceState::PIXEL_SHADER_RESOURCE),
                (resources.id(RenderTarget::GBufferNormal), ResourceState::PIXEL_SHADER_RESOURCE),
                (resources.id(RenderTarget::Depth), DEPTH_SAMPLED),
                (resources.id(RenderTarget::LightBuffer), ResourceState::RENDER_TARGET),
            ],
        )?;
        context.list.set_descriptor_table(ROOT_TABLE_PASS, context.scene.descriptor_heap().gpu_handle(0));
        // 全屏三角形
        context.list.draw(3, 1);
        Ok(())
    }
}

/// 天空盒通道
///
/// 请求的状态与延迟光照留下的完全相同，正常情况下不产生任何屏障。
#[derive(Debug, Default)]
pub struct SkyBoxPass {
    pipeline: Option<PipelineState>,
}

impl RenderPass for SkyBoxPass {
    fn name(&self) -> &str {
        "SkyBox"
    }

    fn initialize(&mut self, _device: &Device, _context: &EngineContext) -> Result<()> {
        self.pipeline = Some(PipelineState::graphics("Sky Box"));
        Ok(())
    }

    fn unload(&mut self) {
        self.pipeline = None;
    }

    fn prepare_rendering(&mut self, _scene: &Scene) -> Result<()> {
        Ok(())
    }

    fn render(&mut self, context: &mut RenderContext<'_>, tracker: &mut ResourceTracker) -> Result<()> {
        if self.pipeline.is_none() {
            return Err(pipeline_missing(self.name()));
        }
        let resources = &context.engine.resources;
        tracker.transition_many(
            context.list,
            &[
                (resources.id(RenderTarget::LightBuffer), ResourceState::RENDER_TARGET),
                (resources.id(RenderTarget::Depth), DEPTH_SAMPLED),
            ],
        )?;
        // 立方体 36 个顶点
        context.list.draw(36, 1);
        Ok(())
    }
}

/// 色调映射通道
#[derive(Debug, Default)]
pub struct ToneMappingPass {
    pipeline: Option<PipelineState>,
}

impl RenderPass for ToneMappingPass {
    fn name(&self) -> &str {
        "ToneMapping"
    }

    fn initialize(&mut self, _device: &Device, _context: &EngineContext) -> Result<()> {
        self.pipeline = Some(PipelineState::graphics("Tone Mapping"));
        Ok(())
    }

    fn unload(&mut self) {
        self.pipeline = None;
    }

    fn prepare_rendering(&mut self, _scene: &Scene) -> Result<()> {
        Ok(())
    }

    fn render(&mut self, context: &mut RenderContext<'_>, tracker: &mut ResourceTracker) -> Result<()> {
        if self.pipeline.is_none() {
            return Err(pipeline_missing(self.name()));
        }
        let resources = &context.engine.resources;
        tracker.transition_many(
            context.list,
            &[
                (resources.id(RenderTarget::LightBuffer), ResourceState::PIXEL_SHADER_RESOURCE),
                (resources.id(RenderTarget::BackBuffer), ResourceState::RENDER_TARGET),
            ],
        )?;
        context.list.draw(3, 1);
        Ok(())
    }
}

/// 呈现：把后备缓冲转换回 PRESENT
#[derive(Debug, Default)]
pub struct PresentPass;

impl RenderPass for PresentPass {
    fn name(&self) -> &str {
        "Present"
    }

    fn initialize(&mut self, _device: &Device, _context: &EngineContext) -> Result<()> {
        Ok(())
    }

    fn unload(&mut self) {}

    fn prepare_rendering(&mut self, _scene: &Scene) -> Result<()> {
        Ok(())
    }

    fn render(&mut self, context: &mut RenderContext<'_>, tracker: &mut ResourceTracker) -> Result<()> {
        let back_buffer = context.engine.resources.id(RenderTarget::BackBuffer);
        tracker.transition(context.list, back_buffer, ResourceState::PRESENT)?;
        Ok(())
    }
}
