//! 描述符管理模块
//!
//! 提供着色器可见的描述符堆，用于场景资源视图的绑定。
//! 场景资源在固定的表槽位上创建视图，
//! 渲染通道用一次调用绑定整张表，而不是逐个资源绑定。
//!
//! # DirectX 12 描述符类型
//!
//! - **CBV** (Constant Buffer View)：常量缓冲视图，用于着色器常量
//! - **SRV** (Shader Resource View)：着色资源视图，用于着色器读取纹理/缓冲
//! - **UAV** (Unordered Access View)：无序访问视图，用于计算着色器读写
//!
//! 本模块只实现 CBV/SRV/UAV 堆；RTV/DSV 由渲染目标直接引用。

use crate::core::error::{GraphicsError, Result};
use super::resource::ResourceId;

/// 描述符增量大小（字节）
pub const DESCRIPTOR_INCREMENT_SIZE: u32 = 32;

/// 描述符类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    /// 常量缓冲视图 (CBV)
    ConstantBufferView,
    /// 着色资源视图 (SRV)
    ShaderResourceView,
    /// 无序访问视图 (UAV)
    UnorderedAccessView,
}

impl DescriptorType {
    /// 获取描述符类型名称
    pub fn name(&self) -> &'static str {
        match self {
            DescriptorType::ConstantBufferView => "CBV",
            DescriptorType::ShaderResourceView => "SRV",
            DescriptorType::UnorderedAccessView => "UAV",
        }
    }
}

/// 描述符句柄（CPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: usize,
    /// 描述符索引
    pub index: u32,
}

impl CpuDescriptorHandle {
    /// 创建新的 CPU 描述符句柄
    pub fn new(ptr: usize, index: u32) -> Self {
        Self { ptr, index }
    }

    /// 偏移句柄
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + (count * increment_size) as usize,
            index: self.index + count,
        }
    }
}

/// 描述符句柄（GPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: u64,
    /// 描述符索引
    pub index: u32,
}

impl GpuDescriptorHandle {
    /// 创建新的 GPU 描述符句柄
    pub fn new(ptr: u64, index: u32) -> Self {
        Self { ptr, index }
    }

    /// 偏移句柄
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + (count * increment_size) as u64,
            index: self.index + count,
        }
    }
}

/// 资源视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceView {
    /// 结构化缓冲区 SRV
    StructuredBuffer {
        resource: ResourceId,
        element_count: u32,
        stride: u32,
    },
    /// 2D 纹理 SRV
    Texture2D { resource: ResourceId, mip_count: u32 },
    /// 立方体贴图 SRV
    TextureCube { resource: ResourceId, mip_count: u32 },
    /// 空描述符（资源不存在时着色器读到 0）
    Null,
}

/// 着色器可见的描述符堆
#[derive(Debug)]
pub struct DescriptorHeap {
    name: String,
    descriptor_type: DescriptorType,
    cpu_start: CpuDescriptorHandle,
    gpu_start: GpuDescriptorHandle,
    slots: Vec<Option<ResourceView>>,
}

impl DescriptorHeap {
    /// 创建新的描述符堆
    ///
    /// # 参数
    ///
    /// * `name` - 调试名称
    /// * `capacity` - 描述符数量
    /// * `base_address` - 模拟的堆起始地址
    pub(crate) fn new(name: impl Into<String>, capacity: u32, base_address: u64) -> Self {
        Self {
            name: name.into(),
            descriptor_type: DescriptorType::ShaderResourceView,
            cpu_start: CpuDescriptorHandle::new(base_address as usize, 0),
            gpu_start: GpuDescriptorHandle::new(base_address, 0),
            slots: vec![None; capacity as usize],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor_type(&self) -> DescriptorType {
        self.descriptor_type
    }

    /// 描述符容量
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// 已写入的描述符数量
    pub fn written_count(&self) -> u32 {
        self.slots.iter().filter(|slot| slot.is_some()).count() as u32
    }

    /// 槽位的 CPU 句柄
    pub fn cpu_handle(&self, slot: u32) -> CpuDescriptorHandle {
        self.cpu_start.offset(slot, DESCRIPTOR_INCREMENT_SIZE)
    }

    /// 槽位的 GPU 句柄，用于设置描述符表
    pub fn gpu_handle(&self, slot: u32) -> GpuDescriptorHandle {
        self.gpu_start.offset(slot, DESCRIPTOR_INCREMENT_SIZE)
    }

    /// 在指定槽位创建视图
    pub fn create_view(&mut self, slot: u32, view: ResourceView) -> Result<()> {
        let capacity = self.capacity();
        let entry = self.slots.get_mut(slot as usize).ok_or_else(|| {
            GraphicsError::ResourceCreation(format!(
                "descriptor slot {} is outside heap '{}' ({} descriptors)",
                slot, self.name, capacity
            ))
        })?;
        *entry = Some(view);
        Ok(())
    }

    /// 读取槽位中的视图
    pub fn view(&self, slot: u32) -> Option<&ResourceView> {
        self.slots.get(slot as usize).and_then(|slot| slot.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_handle_offset() {
        let cpu = CpuDescriptorHandle::new(1000, 0);
        let offset = cpu.offset(5, 32);
        assert_eq!(offset.ptr, 1000 + 5 * 32);
        assert_eq!(offset.index, 5);

        let gpu = GpuDescriptorHandle::new(2000, 0);
        let offset = gpu.offset(3, 64);
        assert_eq!(offset.ptr, 2000 + 3 * 64);
        assert_eq!(offset.index, 3);
    }

    #[test]
    fn test_descriptor_heap_views() {
        let mut heap = DescriptorHeap::new("Scene SRV Heap", 4, 0x1000);
        assert_eq!(heap.capacity(), 4);
        assert_eq!(heap.written_count(), 0);

        heap.create_view(0, ResourceView::Null).unwrap();
        heap.create_view(
            3,
            ResourceView::StructuredBuffer { resource: ResourceId(7), element_count: 16, stride: 16 },
        )
        .unwrap();
        assert!(heap.create_view(4, ResourceView::Null).is_err());

        assert_eq!(heap.written_count(), 2);
        assert_eq!(heap.view(0), Some(&ResourceView::Null));
        assert!(heap.view(1).is_none());
        assert_eq!(heap.gpu_handle(3).ptr, 0x1000 + 3 * DESCRIPTOR_INCREMENT_SIZE as u64);
        assert_eq!(heap.cpu_handle(2).index, 2);
    }

    #[test]
    fn test_descriptor_type_name() {
        assert_eq!(DescriptorType::ShaderResourceView.name(), "SRV");
        assert_eq!(DescriptorType::UnorderedAccessView.name(), "UAV");
    }
}
