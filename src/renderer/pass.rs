//! 渲染通道接口
//!
//! 每个通道实现同一组四个能力：`initialize`、`unload`、`prepare_rendering`、`render`。
//! 通道在帧之间没有状态，只拥有自己的管线对象，从不拥有场景数据。
//!
//! 每帧的状态机：
//!
//! ```text
//! Uninitialized --initialize--> Ready --prepare--> Prepared --render--> Rendered
//!       ^                         |  ^                                      |
//!       +--------unload-----------+  +--------------end_frame---------------+
//! ```
//!
//! [`PassSlot`] 负责检查这些转换。

use std::fmt;

use super::context::{EngineContext, RenderContext};
use super::device::Device;
use super::tracker::ResourceTracker;
use crate::core::error::{GraphicsError, Result};
use crate::scene::Scene;

/// 通道在帧内的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Uninitialized,
    Ready,
    Prepared,
    Rendered,
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 通道自己的管线对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineState {
    pub name: String,
    pub compute: bool,
}

impl PipelineState {
    pub fn graphics(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compute: false,
        }
    }

    pub fn compute(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compute: true,
        }
    }
}

/// 渲染通道
pub trait RenderPass {
    /// 通道名称（日志与错误信息使用）
    fn name(&self) -> &str;

    /// 创建通道自己的管线对象
    fn initialize(&mut self, device: &Device, context: &EngineContext) -> Result<()>;

    /// 释放管线对象
    fn unload(&mut self);

    /// 纯 CPU 的预计算，不记录任何 GPU 命令
    fn prepare_rendering(&mut self, scene: &Scene) -> Result<()>;

    /// 记录本通道的命令
    ///
    /// 访问资源前必须先通过 `tracker` 把资源转换到需要的状态。
    fn render(&mut self, context: &mut RenderContext<'_>, tracker: &mut ResourceTracker) -> Result<()>;
}

/// 带状态检查的通道槽位
pub struct PassSlot {
    pass: Box<dyn RenderPass>,
    state: PassState,
}

impl PassSlot {
    pub fn new(pass: Box<dyn RenderPass>) -> Self {
        Self {
            pass,
            state: PassState::Uninitialized,
        }
    }

    pub fn name(&self) -> &str {
        self.pass.name()
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    fn expect(&self, expected: PassState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(GraphicsError::InvalidLifecycle {
                object: format!("render pass '{}'", self.pass.name()),
                expected: expected.to_string(),
                actual: self.state.to_string(),
            }
            .into())
        }
    }

    pub fn initialize(&mut self, device: &Device, context: &EngineContext) -> Result<()> {
        self.expect(PassState::Uninitialized)?;
        self.pass.initialize(device, context)?;
        self.state = PassState::Ready;
        tracing::debug!(pass = self.pass.name(), "Render pass initialized");
        Ok(())
    }

    pub fn prepare(&mut self, scene: &Scene) -> Result<()> {
        self.expect(PassState::Ready)?;
        self.pass.prepare_rendering(scene)?;
        self.state = PassState::Prepared;
        Ok(())
    }

    pub fn render(&mut self, context: &mut RenderContext<'_>, tracker: &mut ResourceTracker) -> Result<()> {
        self.expect(PassState::Prepared)?;
        self.pass.render(context, tracker)?;
        self.state = PassState::Rendered;
        Ok(())
    }

    /// 帧结束：Rendered → Ready
    pub fn end_frame(&mut self) -> Result<()> {
        self.expect(PassState::Rendered)?;
        self.state = PassState::Ready;
        Ok(())
    }

    /// 帧被中止：回到 Ready，不管进行到哪一步
    pub fn abort_frame(&mut self) {
        if matches!(self.state, PassState::Prepared | PassState::Rendered) {
            self.state = PassState::Ready;
        }
    }

    /// 只能在 Ready 状态卸载，卸载后回到 Uninitialized
    pub fn unload(&mut self) -> Result<()> {
        self.expect(PassState::Ready)?;
        self.pass.unload();
        self.state = PassState::Uninitialized;
        Ok(())
    }
}

impl fmt::Debug for PassSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassSlot")
            .field("pass", &self.pass.name())
            .field("state", &self.state)
            .finish()
    }
}
