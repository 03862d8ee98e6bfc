//! 资源管理模块
//!
//! 提供 GPU 资源（缓冲区、资源堆、放置纹理、上传缓冲区）的抽象。
//!
//! # 设计原则
//!
//! - **单一状态来源**：资源本身不保存"当前状态"，由 `ResourceTracker` 记录
//! - **放置资源**：纹理是资源堆内某个偏移处的视图，不拥有内存
//! - **生命周期管理**：内存块引用计数归零时自动释放并更新存活对象计数
//!
//! 所有资源都由 [`Device`](super::device::Device) 创建。

use bitflags::bitflags;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::device::DeviceStats;
use super::texture::{TextureDesc, TextureLayout};
use crate::core::error::{GraphicsError, Result};

bitflags! {
    /// 资源状态
    ///
    /// 与 D3D12_RESOURCE_STATES 的取值一致。写状态不能与其它位组合。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        const INDEX_BUFFER = 0x2;
        const RENDER_TARGET = 0x4;
        const UNORDERED_ACCESS = 0x8;
        const DEPTH_WRITE = 0x10;
        const DEPTH_READ = 0x20;
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        const PIXEL_SHADER_RESOURCE = 0x80;
        const INDIRECT_ARGUMENT = 0x200;
        const COPY_DEST = 0x400;
        const COPY_SOURCE = 0x800;
        const RAYTRACING_ACCELERATION_STRUCTURE = 0x40_0000;

        const ALL_SHADER_RESOURCE = Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits();
        const GENERIC_READ = Self::VERTEX_AND_CONSTANT_BUFFER.bits()
            | Self::INDEX_BUFFER.bits()
            | Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits()
            | Self::INDIRECT_ARGUMENT.bits()
            | Self::COPY_SOURCE.bits();
    }
}

impl ResourceState {
    /// 呈现状态与 COMMON 相同
    pub const PRESENT: ResourceState = ResourceState::COMMON;

    /// 写状态
    pub const WRITE_STATES: ResourceState = ResourceState::RENDER_TARGET
        .union(ResourceState::UNORDERED_ACCESS)
        .union(ResourceState::DEPTH_WRITE)
        .union(ResourceState::COPY_DEST);

    /// 状态组合是否合法：写状态必须单独出现
    pub fn is_valid(&self) -> bool {
        let writes = self.intersection(Self::WRITE_STATES);
        writes.is_empty() || (writes.bits().count_ones() == 1 && *self == writes)
    }

    /// 是否可以作为复制目标（COMMON 会被隐式提升为 COPY_DEST）
    pub fn accepts_copy(&self) -> bool {
        *self == ResourceState::COMMON || *self == ResourceState::COPY_DEST
    }
}

/// 资源 ID，设备内唯一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 模拟的 GPU 内存块
///
/// 克隆只增加引用计数。最后一个引用释放时存活对象计数减一。
#[derive(Clone)]
pub struct GpuMemory {
    block: Arc<MemoryBlock>,
}

struct MemoryBlock {
    bytes: Mutex<Vec<u8>>,
    len: u64,
    stats: Arc<DeviceStats>,
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        self.stats.live_objects.fetch_sub(1, Ordering::AcqRel);
    }
}

impl GpuMemory {
    pub(crate) fn allocate(len: u64, stats: Arc<DeviceStats>) -> Self {
        stats.live_objects.fetch_add(1, Ordering::AcqRel);
        Self {
            block: Arc::new(MemoryBlock {
                bytes: Mutex::new(vec![0; len as usize]),
                len,
                stats,
            }),
        }
    }

    pub fn len(&self) -> u64 {
        self.block.len
    }

    pub fn is_empty(&self) -> bool {
        self.block.len == 0
    }

    /// 读取一段字节，越界时返回 `None`
    pub fn read(&self, offset: u64, len: u64) -> Option<Vec<u8>> {
        let end = offset.checked_add(len)?;
        if end > self.block.len {
            return None;
        }
        let bytes = self.block.bytes.lock();
        Some(bytes[offset as usize..end as usize].to_vec())
    }

    /// 写入一段字节，越界时返回 `false`
    pub fn write(&self, offset: u64, data: &[u8]) -> bool {
        let end = match offset.checked_add(data.len() as u64) {
            Some(end) if end <= self.block.len => end,
            _ => return false,
        };
        let mut bytes = self.block.bytes.lock();
        bytes[offset as usize..end as usize].copy_from_slice(data);
        true
    }
}

impl fmt::Debug for GpuMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuMemory").field("len", &self.block.len).finish()
    }
}

/// 资源内的一段区域，命令引用资源时使用
#[derive(Debug, Clone)]
pub struct GpuRegion {
    pub resource: ResourceId,
    pub memory: GpuMemory,
    /// 区域在内存块中的起始偏移
    pub offset: u64,
    pub size: u64,
}

/// 可以被命令引用的 GPU 资源
pub trait GpuResource {
    fn id(&self) -> ResourceId;
    fn name(&self) -> &str;
    fn size(&self) -> u64;
    /// 整个资源对应的内存区域
    fn region(&self) -> GpuRegion;
}

/// 提交型缓冲区（独立分配）
#[derive(Debug)]
pub struct Buffer {
    id: ResourceId,
    name: String,
    size: u64,
    memory: GpuMemory,
}

impl Buffer {
    pub(crate) fn new(id: ResourceId, name: String, memory: GpuMemory) -> Self {
        Self {
            id,
            name,
            size: memory.len(),
            memory,
        }
    }

    /// 读回缓冲区内容（模拟 readback）
    pub fn read_back(&self) -> Vec<u8> {
        self.memory.read(0, self.size).unwrap_or_default()
    }
}

impl GpuResource for Buffer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn region(&self) -> GpuRegion {
        GpuRegion {
            resource: self.id,
            memory: self.memory.clone(),
            offset: 0,
            size: self.size,
        }
    }
}

/// 资源堆
///
/// 一块连续的 GPU 内存，纹理按调用者计算好的偏移放置其中。
#[derive(Debug)]
pub struct ResourceHeap {
    name: String,
    size: u64,
    memory: GpuMemory,
}

impl ResourceHeap {
    pub(crate) fn new(name: String, memory: GpuMemory) -> Self {
        Self {
            name,
            size: memory.len(),
            memory,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn memory(&self) -> &GpuMemory {
        &self.memory
    }
}

/// 纹理
///
/// 放置纹理引用所属堆的内存块；渲染目标使用独立分配的内存块，偏移为 0。
#[derive(Debug)]
pub struct Texture {
    id: ResourceId,
    name: String,
    desc: TextureDesc,
    layout: TextureLayout,
    memory: GpuMemory,
    heap_offset: u64,
}

impl Texture {
    pub(crate) fn new(
        id: ResourceId,
        name: String,
        desc: TextureDesc,
        layout: TextureLayout,
        memory: GpuMemory,
        heap_offset: u64,
    ) -> Self {
        Self {
            id,
            name,
            desc,
            layout,
            memory,
            heap_offset,
        }
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn layout(&self) -> &TextureLayout {
        &self.layout
    }

    /// 在堆中的偏移
    pub fn heap_offset(&self) -> u64 {
        self.heap_offset
    }

    /// 子资源数量
    pub fn subresource_count(&self) -> u32 {
        self.layout.subresources.len() as u32
    }

    /// 子资源对应的内存区域
    pub fn subresource_region(&self, subresource: u32) -> Option<GpuRegion> {
        let footprint = self.layout.subresources.get(subresource as usize)?;
        Some(GpuRegion {
            resource: self.id,
            memory: self.memory.clone(),
            offset: self.heap_offset + footprint.offset,
            size: footprint.size,
        })
    }

    /// 读回子资源内容（模拟 readback）
    pub fn read_subresource(&self, subresource: u32) -> Option<Vec<u8>> {
        let region = self.subresource_region(subresource)?;
        region.memory.read(region.offset, region.size)
    }
}

impl GpuResource for Texture {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.layout.size
    }

    fn region(&self) -> GpuRegion {
        GpuRegion {
            resource: self.id,
            memory: self.memory.clone(),
            offset: self.heap_offset,
            size: self.layout.size,
        }
    }
}

/// 上传缓冲区（CPU -> GPU）
///
/// CPU 直接映射写入，之后由复制命令搬运到默认堆资源。
#[derive(Debug)]
pub struct UploadBuffer {
    id: ResourceId,
    name: String,
    size: u64,
    memory: GpuMemory,
}

impl UploadBuffer {
    pub(crate) fn new(id: ResourceId, name: String, memory: GpuMemory) -> Self {
        Self {
            id,
            name,
            size: memory.len(),
            memory,
        }
    }

    /// 映射写入
    ///
    /// # 参数
    ///
    /// * `offset` - 写入起始偏移
    /// * `data` - 数据
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if self.memory.write(offset, data) {
            Ok(())
        } else {
            Err(GraphicsError::ResourceCreation(format!(
                "write of {} bytes at offset {} overflows upload buffer '{}' ({} bytes)",
                data.len(),
                offset,
                self.name,
                self.size
            ))
            .into())
        }
    }
}

impl GpuResource for UploadBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn region(&self) -> GpuRegion {
        GpuRegion {
            resource: self.id,
            memory: self.memory.clone(),
            offset: 0,
            size: self.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_validity() {
        assert!(ResourceState::COMMON.is_valid());
        assert!(ResourceState::GENERIC_READ.is_valid());
        assert!(ResourceState::ALL_SHADER_RESOURCE.is_valid());
        assert!(ResourceState::RENDER_TARGET.is_valid());
        assert!(!(ResourceState::RENDER_TARGET | ResourceState::PIXEL_SHADER_RESOURCE).is_valid());
        assert!(!(ResourceState::COPY_DEST | ResourceState::UNORDERED_ACCESS).is_valid());
        assert_eq!(ResourceState::PRESENT, ResourceState::COMMON);
    }

    #[test]
    fn test_copy_acceptance() {
        assert!(ResourceState::COMMON.accepts_copy());
        assert!(ResourceState::COPY_DEST.accepts_copy());
        assert!(!ResourceState::PIXEL_SHADER_RESOURCE.accepts_copy());
    }

    #[test]
    fn test_memory_bounds_and_live_count() {
        let stats = Arc::new(DeviceStats::default());
        let memory = GpuMemory::allocate(16, stats.clone());
        assert_eq!(stats.live_objects.load(Ordering::Acquire), 1);

        assert!(memory.write(8, &[1, 2, 3, 4]));
        assert_eq!(memory.read(8, 4), Some(vec![1, 2, 3, 4]));
        assert!(!memory.write(14, &[0; 4]));
        assert_eq!(memory.read(12, 8), None);
        assert_eq!(memory.read(u64::MAX, 2), None);

        let clone = memory.clone();
        drop(memory);
        assert_eq!(stats.live_objects.load(Ordering::Acquire), 1);
        drop(clone);
        assert_eq!(stats.live_objects.load(Ordering::Acquire), 0);
    }
}
