//! 场景模块
//!
//! 场景流式加载器：把离线转换工具输出的场景文件读入 GPU 内存。
//!
//! 加载分两遍：
//!
//! 1. [`SceneLayout`] 只根据头信息算出所有尺寸和偏移
//! 2. [`Scene::initialize`] 创建缓冲区、一个资源堆和放置在其中的纹理，
//!    等待流式读取完成，把数据写入一个上传缓冲区，记录复制命令，
//!    提交并等待完成后释放上传缓冲区
//!
//! 加载完成后场景是只读的，数量固定。
//!
//! # 描述符表布局
//!
//! | 槽位 | 内容 |
//! |------|------|
//! | 0..10 | 十个缓冲区分段（缺失的辅助分段为空描述符） |
//! | 10 | 天空盒立方体贴图 |
//! | 11.. | 场景纹理 |

pub mod batch;
pub mod data;
pub mod format;
pub mod layout;

pub use batch::{BatchKind, BatchManager};
pub use data::SceneData;
pub use format::{BufferSection, SceneAssetBuilder};
pub use layout::SceneLayout;

use nalgebra::Vector3;

use crate::core::config::{FrameConfig, StreamingConfig};
use crate::core::error::{Result, SceneLoadError};
use crate::renderer::command::{Barrier, CommandList};
use crate::renderer::context::{ROOT_TABLE_SCENE_GEOMETRY, ROOT_TABLE_SCENE_TEXTURES};
use crate::renderer::descriptor::{DescriptorHeap, ResourceView};
use crate::renderer::device::Device;
use crate::renderer::resource::{Buffer, GpuResource, ResourceHeap, ResourceState, Texture};

/// 几何分段在描述符表中的起始槽位
pub const GEOMETRY_SRV_OFFSET: u32 = 0;
/// 天空盒槽位
pub const SKY_BOX_SRV_OFFSET: u32 = GEOMETRY_SRV_OFFSET + BufferSection::ALL.len() as u32;
/// 场景纹理起始槽位
pub const SCENE_SRV_OFFSET: u32 = SKY_BOX_SRV_OFFSET + 1;

/// 加载统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneLoadStats {
    pub buffer_copies: usize,
    pub texture_copies: usize,
    pub upload_bytes: u64,
    pub heap_size: u64,
}

/// 已加载的场景
#[derive(Debug)]
pub struct Scene {
    /// 按 [`BufferSection::ALL`] 顺序，缺失的分段为 `None`
    buffers: Vec<Option<Buffer>>,
    sky_box: Texture,
    textures: Vec<Texture>,
    heap: ResourceHeap,
    descriptor_heap: DescriptorHeap,
    batches: BatchManager,
    object_count: u32,
    opaque_count: u32,
    camera_position: Vector3<f32>,
    draw_distance: f32,
    stats: SceneLoadStats,
}

impl Scene {
    /// 完成场景加载
    ///
    /// # 参数
    ///
    /// * `device` - 图形设备
    /// * `data` - 已经开始流式读取的场景数据
    /// * `init_list` - 处于 Recording 状态的 Direct 初始化命令列表；
    ///   本函数记录复制和屏障后关闭、提交并等待它
    /// * `streaming` - 上传缓冲区下限
    /// * `frame` - 剔除使用的相机位置和绘制距离
    ///
    /// # 返回值
    ///
    /// 任何子资源创建失败或上传字节数与布局不一致时返回错误，调用者应当终止进程。
    pub fn initialize(
        device: &Device,
        data: &mut SceneData,
        init_list: &mut CommandList,
        streaming: &StreamingConfig,
        frame: &FrameConfig,
    ) -> Result<Self> {
        let _span = crate::span_trace!("Scene::initialize").entered();

        let layout = data.layout().clone();
        let header = *data.scene_header();

        // 缓冲区
        let mut buffers: Vec<Option<Buffer>> = BufferSection::ALL.iter().map(|_| None).collect();
        for placement in &layout.sections {
            let buffer = device.create_buffer(
                placement.size,
                ResourceState::COPY_DEST,
                &format!("Scene {} buffer", placement.section),
            )?;
            buffers[placement.section as usize] = Some(buffer);
        }

        // 资源堆与放置纹理
        let heap = device.create_heap(layout.heap_size, "Scene Resource Heap")?;
        let sky_box = device.create_placed_texture(
            &heap,
            layout.sky_box.heap_offset,
            layout.sky_box.desc,
            layout.sky_box.layout.clone(),
            ResourceState::COPY_DEST,
            "Scene Sky Box",
        )?;
        let textures = layout
            .textures
            .iter()
            .enumerate()
            .map(|(index, placement)| {
                device.create_placed_texture(
                    &heap,
                    placement.heap_offset,
                    placement.desc,
                    placement.layout.clone(),
                    ResourceState::COPY_DEST,
                    &format!("Scene Texture {}", index),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        // 描述符表
        let mut descriptor_heap =
            device.create_descriptor_heap(SCENE_SRV_OFFSET + header.texture_count, "Scene SRV Heap")?;
        for section in BufferSection::ALL {
            let view = match &buffers[section as usize] {
                Some(buffer) => ResourceView::StructuredBuffer {
                    resource: buffer.id(),
                    element_count: (buffer.size() / section.stride() as u64) as u32,
                    stride: section.stride(),
                },
                None => ResourceView::Null,
            };
            descriptor_heap.create_view(GEOMETRY_SRV_OFFSET + section.descriptor_slot(), view)?;
        }
        descriptor_heap.create_view(
            SKY_BOX_SRV_OFFSET,
            ResourceView::TextureCube {
                resource: sky_box.id(),
                mip_count: sky_box.desc().mip_count,
            },
        )?;
        for (index, texture) in textures.iter().enumerate() {
            descriptor_heap.create_view(
                SCENE_SRV_OFFSET + index as u32,
                ResourceView::Texture2D {
                    resource: texture.id(),
                    mip_count: texture.desc().mip_count,
                },
            )?;
        }

        // 上传
        let staging = device.create_upload_buffer(layout.staging_size(streaming.staging_floor), "Scene Upload Buffer")?;
        let bytes = data.prepare_binary_data()?;
        staging.write(0, bytes)?;

        let mut stats = SceneLoadStats {
            heap_size: layout.heap_size,
            ..SceneLoadStats::default()
        };
        let mut upload_offset = 0;

        for placement in &layout.sections {
            if let Some(buffer) = &buffers[placement.section as usize] {
                init_list.copy_buffer_region(buffer, 0, &staging, upload_offset, placement.size);
                upload_offset += placement.size;
                stats.buffer_copies += 1;
            }
        }

        for texture in std::iter::once(&sky_box).chain(textures.iter()) {
            for (subresource, footprint) in texture.layout().subresources.iter().enumerate() {
                init_list.copy_texture_region(texture, subresource as u32, &staging, upload_offset);
                upload_offset += footprint.size;
                stats.texture_copies += 1;
            }
        }

        if upload_offset != layout.upload_size {
            return Err(SceneLoadError::UploadSizeMismatch {
                expected: layout.upload_size,
                consumed: upload_offset,
            }
            .into());
        }
        stats.upload_bytes = upload_offset;

        let barriers = buffers
            .iter()
            .flatten()
            .map(|buffer| buffer.id())
            .chain(std::iter::once(sky_box.id()))
            .chain(textures.iter().map(|texture| texture.id()))
            .map(|resource| Barrier {
                resource,
                before: ResourceState::COPY_DEST,
                after: ResourceState::ALL_SHADER_RESOURCE,
            })
            .collect();
        init_list.resource_barrier(barriers);

        // 提交初始化命令列表并等待
        init_list.close()?;
        let queue = device.graphics_queue();
        queue.execute_command_list(init_list)?;
        let fence_value = queue.signal_gpu();
        tracing::debug!(fence_value, "Waiting for scene upload");
        queue.fence().wait_cpu(fence_value);
        device.check_is_device_alive()?;

        drop(staging);
        data.release_binary_data();

        let batches = BatchManager::new(data.object_headers(), header.opaque_count as usize);

        tracing::info!(
            buffer_copies = stats.buffer_copies,
            texture_copies = stats.texture_copies,
            upload_bytes = stats.upload_bytes,
            heap_size = stats.heap_size,
            "Scene loaded"
        );

        Ok(Self {
            buffers,
            sky_box,
            textures,
            heap,
            descriptor_heap,
            batches,
            object_count: header.object_count,
            opaque_count: header.opaque_count,
            camera_position: Vector3::from(frame.camera_position),
            draw_distance: frame.draw_distance,
            stats,
        })
    }

    pub fn object_count(&self) -> u32 {
        self.object_count
    }

    pub fn opaque_object_count(&self) -> u32 {
        self.opaque_count
    }

    pub fn load_stats(&self) -> SceneLoadStats {
        self.stats
    }

    pub fn buffer(&self, section: BufferSection) -> Option<&Buffer> {
        self.buffers[section as usize].as_ref()
    }

    pub fn sky_box(&self) -> &Texture {
        &self.sky_box
    }

    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    pub fn heap(&self) -> &ResourceHeap {
        &self.heap
    }

    pub fn descriptor_heap(&self) -> &DescriptorHeap {
        &self.descriptor_heap
    }

    pub fn batches(&self) -> &BatchManager {
        &self.batches
    }

    /// 每帧的 CPU 准备：剔除并生成批次
    pub fn prepare_frame(&mut self) {
        self.batches.prepare_batches(self.camera_position, self.draw_distance);
    }

    /// 绑定描述符堆和两张场景表，每个一次调用
    pub fn bind_resources(&self, list: &mut CommandList) {
        list.set_descriptor_heap(&self.descriptor_heap);
        list.set_descriptor_table(ROOT_TABLE_SCENE_TEXTURES, self.descriptor_heap.gpu_handle(SKY_BOX_SRV_OFFSET));
        list.set_descriptor_table(ROOT_TABLE_SCENE_GEOMETRY, self.descriptor_heap.gpu_handle(GEOMETRY_SRV_OFFSET));
    }

    /// 释放场景，调用者必须保证 GPU 不再使用这些资源
    pub fn unload(mut self) {
        self.batches.clear();
        tracing::debug!(textures = self.textures.len(), "Scene unloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceConfig;
    use crate::renderer::command::CommandListType;
    use crate::renderer::diagnostics::Severity;
    use crate::renderer::texture::AlignmentRules;
    use crate::scene::format::fill_byte;
    use std::path::Path;

    fn device() -> Device {
        Device::initialize(&DeviceConfig {
            debug_layer: true,
            ..DeviceConfig::default()
        })
        .unwrap()
    }

    fn load(device: &Device, folder: &Path) -> Result<Scene> {
        let rules = AlignmentRules::default();
        let mut data = SceneData::open(folder, &rules)?;
        data.start_streaming(device)?;
        let mut list = device.create_command_list(CommandListType::Direct, "Initialization Command List");
        list.reset()?;
        Scene::initialize(device, &mut data, &mut list, &StreamingConfig::default(), &FrameConfig::default())
    }

    fn scenario() -> SceneAssetBuilder {
        SceneAssetBuilder::new()
            .section(BufferSection::VertexA, 256)
            .section(BufferSection::VertexB, 256)
            .section(BufferSection::VertexIndirection, 64)
            .section(BufferSection::PrimitiveIndex, 128)
            .section(BufferSection::Meshlets, 64)
            .section(BufferSection::Objects, 32)
            .sky_box(4, 3)
            .object([0.0, 0.0, 0.0, 1.0], true)
    }

    #[test]
    fn test_scenario_load() {
        let dir = tempfile::tempdir().unwrap();
        scenario().write(dir.path(), &AlignmentRules::default()).unwrap();

        let device = device();
        let scene = load(&device, dir.path()).unwrap();

        let stats = scene.load_stats();
        assert_eq!(stats.buffer_copies, 6);
        assert_eq!(stats.texture_copies, 18);
        assert_eq!(stats.upload_bytes, 13088);
        assert_eq!(stats.heap_size, 12288);
        assert_eq!(scene.heap().size(), 12288);
        assert!(scene.buffer(BufferSection::Materials).is_none());
        assert_eq!(scene.descriptor_heap().view(7), Some(&ResourceView::Null));

        let executed = device.stats();
        assert_eq!(executed.buffer_copies, 6);
        assert_eq!(executed.texture_copies, 18);
        assert_eq!(executed.copied_bytes, 13088);

        // 初始化过程中调试层不应该报告任何错误
        assert!(device
            .diagnostics()
            .messages()
            .iter()
            .all(|message| message.severity < Severity::Error));
    }

    #[test]
    fn test_uploaded_bytes_reach_gpu_memory() {
        let dir = tempfile::tempdir().unwrap();
        SceneAssetBuilder::synthetic().write(dir.path(), &AlignmentRules::default()).unwrap();

        let device = device();
        let scene = load(&device, dir.path()).unwrap();

        let vertices = scene.buffer(BufferSection::VertexA).unwrap().read_back();
        assert_eq!(vertices[0], fill_byte(0));
        assert_eq!(vertices[17], fill_byte(17));

        let vertex_b = scene.buffer(BufferSection::VertexB).unwrap().read_back();
        assert_eq!(vertex_b[3], fill_byte(vertices.len() as u64 + 3));

        let sky_box_offset = scene
            .load_stats()
            .upload_bytes
            - scene.textures().iter().map(|t| t.layout().upload_size).sum::<u64>()
            - scene.sky_box().layout().upload_size;
        let first_face = scene.sky_box().read_subresource(0).unwrap();
        assert_eq!(first_face[5], fill_byte(sky_box_offset + 5));

        assert_eq!(scene.descriptor_heap().capacity(), SCENE_SRV_OFFSET + 2);
        assert!(matches!(
            scene.descriptor_heap().view(SKY_BOX_SRV_OFFSET),
            Some(ResourceView::TextureCube { mip_count: 5, .. })
        ));
    }

    #[test]
    fn test_minimum_texture_upload() {
        let dir = tempfile::tempdir().unwrap();
        scenario()
            .texture(1, 1, 1)
            .write(dir.path(), &AlignmentRules::default())
            .unwrap();

        let device = device();
        let scene = load(&device, dir.path()).unwrap();
        let stats = scene.load_stats();
        assert_eq!(stats.texture_copies, 19);
        assert_eq!(stats.upload_bytes, 13088 + 512);
        assert_eq!(stats.heap_size, 12288 + 4096);
        assert_eq!(scene.textures()[0].heap_offset(), 12288);
    }

    #[test]
    fn test_zero_sized_section_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        scenario()
            .section(BufferSection::Meshlets, 0)
            .write(dir.path(), &AlignmentRules::default())
            .unwrap();

        let device = device();
        let err = load(&device, dir.path()).unwrap_err();
        assert!(err.to_string().contains("'meshlets' has zero size"));
    }

    #[test]
    fn test_culling_uses_frame_config() {
        let dir = tempfile::tempdir().unwrap();
        SceneAssetBuilder::synthetic().write(dir.path(), &AlignmentRules::default()).unwrap();

        let device = device();
        let mut scene = load(&device, dir.path()).unwrap();
        scene.prepare_frame();
        assert_eq!(scene.object_count(), 8);
        assert_eq!(scene.batches().visible_opaque().len(), 6);
        assert_eq!(scene.batches().visible_transparent().len(), 2);
    }
}
