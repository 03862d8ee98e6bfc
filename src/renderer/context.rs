//! 渲染上下文
//!
//! - [`RootLayout`]：所有通道共享的绑定表布局，每帧绑定一次
//! - [`ResourceContainer`]：引擎拥有的共享渲染目标（深度、G-Buffer、光照缓冲、后备缓冲）
//! - [`EngineContext`]：通道初始化时拿到的共享上下文
//! - [`RenderContext`]：每帧渲染时传给通道的上下文

use super::command::CommandList;
use super::device::Device;
use super::resource::{GpuResource, ResourceId, ResourceState, Texture};
use super::texture::{AlignmentRules, TextureDesc, TextureFormat};
use super::tracker::ResourceTracker;
use crate::core::config::FrameConfig;
use crate::core::error::Result;
use crate::scene::Scene;

/// 场景几何描述符表
pub const ROOT_TABLE_SCENE_GEOMETRY: u32 = 0;
/// 场景纹理描述符表（天空盒 + 场景纹理）
pub const ROOT_TABLE_SCENE_TEXTURES: u32 = 1;
/// 通道私有描述符表
pub const ROOT_TABLE_PASS: u32 = 2;

/// 根布局
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootLayout {
    name: String,
    table_count: u32,
}

impl RootLayout {
    pub fn new(name: impl Into<String>, table_count: u32) -> Self {
        Self {
            name: name.into(),
            table_count,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_count(&self) -> u32 {
        self.table_count
    }
}

/// 共享渲染目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    Depth,
    GBufferAlbedo,
    GBufferNormal,
    LightBuffer,
    BackBuffer,
}

impl RenderTarget {
    pub const ALL: [RenderTarget; 5] = [
        RenderTarget::Depth,
        RenderTarget::GBufferAlbedo,
        RenderTarget::GBufferNormal,
        RenderTarget::LightBuffer,
        RenderTarget::BackBuffer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RenderTarget::Depth => "Depth Buffer",
            RenderTarget::GBufferAlbedo => "GBuffer Albedo",
            RenderTarget::GBufferNormal => "GBuffer Normal",
            RenderTarget::LightBuffer => "Light Buffer",
            RenderTarget::BackBuffer => "Back Buffer",
        }
    }

    fn format(&self) -> TextureFormat {
        match self {
            RenderTarget::Depth => TextureFormat::Depth32Float,
            RenderTarget::GBufferAlbedo | RenderTarget::GBufferNormal | RenderTarget::BackBuffer => {
                TextureFormat::Rgba8Unorm
            }
            RenderTarget::LightBuffer => TextureFormat::Rgba16Float,
        }
    }
}

/// 引擎拥有的共享渲染目标
///
/// 按 `RenderTarget::ALL` 的顺序保存，可以直接用枚举值索引。
#[derive(Debug)]
pub struct ResourceContainer {
    targets: Vec<Texture>,
}

impl ResourceContainer {
    /// 创建所有渲染目标，并以 COMMON 状态注册到跟踪器
    pub fn initialize(
        device: &Device,
        width: u32,
        height: u32,
        rules: &AlignmentRules,
        tracker: &mut ResourceTracker,
    ) -> Result<Self> {
        let mut targets = Vec::with_capacity(RenderTarget::ALL.len());
        for target in RenderTarget::ALL {
            let desc = TextureDesc::texture_2d(width, height, 1, target.format());
            let texture = device.create_texture(desc, rules, ResourceState::COMMON, target.name())?;
            tracker.register(texture.id(), ResourceState::COMMON)?;
            targets.push(texture);
        }
        Ok(Self { targets })
    }

    pub fn texture(&self, target: RenderTarget) -> &Texture {
        &self.targets[target as usize]
    }

    /// 渲染目标的资源 ID
    pub fn id(&self, target: RenderTarget) -> ResourceId {
        self.texture(target).id()
    }

    /// 从跟踪器注销所有渲染目标
    pub fn unload(self, tracker: &mut ResourceTracker) {
        for texture in &self.targets {
            tracker.unregister(texture.id());
        }
    }
}

/// 通道初始化时拿到的共享上下文
#[derive(Debug)]
pub struct EngineContext {
    pub root_layout: RootLayout,
    pub resources: ResourceContainer,
    pub width: u32,
    pub height: u32,
}

impl EngineContext {
    pub fn initialize(
        device: &Device,
        config: &FrameConfig,
        rules: &AlignmentRules,
        tracker: &mut ResourceTracker,
    ) -> Result<Self> {
        let resources = ResourceContainer::initialize(device, config.width, config.height, rules, tracker)?;
        Ok(Self {
            root_layout: RootLayout::new("Main Root Layout", 3),
            resources,
            width: config.width,
            height: config.height,
        })
    }
}

/// 每帧渲染时传给通道的上下文
pub struct RenderContext<'a> {
    pub list: &'a mut CommandList,
    pub engine: &'a EngineContext,
    pub scene: &'a Scene,
    pub frame_index: u64,
}
