//! 纹理布局模块
//!
//! 计算纹理 mip 链在内存中的布局，规则与离线资产转换工具一致：
//!
//! - 每行字节数向上对齐到 pitch 对齐（256 字节）
//! - 每个子资源（mip 层级 × 数组层）向上对齐到放置对齐（512 字节）
//! - 整个资源按其占用大小选择资源对齐：不超过 64 KiB 时为 4 KiB，否则为 64 KiB
//!
//! 子资源按数组层优先、mip 其次的顺序排列：`index = slice * mip_count + mip`。
//! 放置到堆中的纹理与上传缓冲区中的数据使用完全相同的布局，
//! 因此每个子资源的复制都是等长的字节拷贝。

use serde::{Deserialize, Serialize};

use crate::core::error::{ConfigError, Result, SceneLoadError};

/// 对齐规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentRules {
    /// 行对齐
    #[serde(default = "default_pitch")]
    pub pitch: u64,

    /// 子资源放置对齐
    #[serde(default = "default_placement")]
    pub placement: u64,

    /// 小资源对齐
    #[serde(default = "default_small_resource")]
    pub small_resource: u64,

    /// 默认资源对齐
    #[serde(default = "default_default_resource")]
    pub default_resource: u64,

    /// 使用小资源对齐的最大占用
    #[serde(default = "default_small_resource_limit")]
    pub small_resource_limit: u64,
}

fn default_pitch() -> u64 { 256 }
fn default_placement() -> u64 { 512 }
fn default_small_resource() -> u64 { 4096 }
fn default_default_resource() -> u64 { 65536 }
fn default_small_resource_limit() -> u64 { 65536 }

impl Default for AlignmentRules {
    fn default() -> Self {
        Self {
            pitch: default_pitch(),
            placement: default_placement(),
            small_resource: default_small_resource(),
            default_resource: default_default_resource(),
            small_resource_limit: default_small_resource_limit(),
        }
    }
}

impl AlignmentRules {
    /// 所有对齐值必须是 2 的幂
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("pitch", self.pitch),
            ("placement", self.placement),
            ("small_resource", self.small_resource),
            ("default_resource", self.default_resource),
        ];

        for (name, value) in fields {
            if !value.is_power_of_two() {
                return Err(ConfigError::InvalidValue {
                    field: format!("streaming.alignment.{}", name),
                    reason: format!("{} is not a power of two", value),
                }
                .into());
            }
        }
        Ok(())
    }

    /// 资源对齐
    pub fn resource_alignment(&self, unaligned_size: u64) -> u64 {
        if unaligned_size <= self.small_resource_limit {
            self.small_resource
        } else {
            self.default_resource
        }
    }
}

/// 向上对齐到 `alignment`（必须是 2 的幂），溢出时返回 `None`
pub fn align_up(value: u64, alignment: u64) -> Option<u64> {
    debug_assert!(alignment.is_power_of_two());
    Some(value.checked_add(alignment - 1)? & !(alignment - 1))
}

/// 纹理格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// RGBA 8位无符号整数（场景纹理）
    Rgba8Unorm,
    /// RGBA 16位浮点（光照缓冲）
    Rgba16Float,
    /// RGBA 32位浮点（天空盒）
    Rgba32Float,
    /// 深度 32位浮点
    Depth32Float,
}

impl TextureFormat {
    /// 每像素字节数
    pub fn bytes_per_pixel(&self) -> u64 {
        match self {
            TextureFormat::Rgba8Unorm => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
            TextureFormat::Depth32Float => 4,
        }
    }
}

/// 纹理维度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureDimension {
    Texture2D,
    /// 立方体贴图（6 个数组层）
    TextureCube,
}

/// 纹理描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    pub format: TextureFormat,
    pub dimension: TextureDimension,
}

impl TextureDesc {
    /// 2D 纹理
    pub fn texture_2d(width: u32, height: u32, mip_count: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            mip_count,
            format,
            dimension: TextureDimension::Texture2D,
        }
    }

    /// 立方体贴图
    pub fn cube(resolution: u32, mip_count: u32, format: TextureFormat) -> Self {
        Self {
            width: resolution,
            height: resolution,
            mip_count,
            format,
            dimension: TextureDimension::TextureCube,
        }
    }

    /// 数组层数
    pub fn array_size(&self) -> u32 {
        match self.dimension {
            TextureDimension::Texture2D => 1,
            TextureDimension::TextureCube => 6,
        }
    }

    /// 子资源数量
    pub fn subresource_count(&self) -> u32 {
        self.array_size() * self.mip_count
    }
}

/// 子资源在资源内的布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceFootprint {
    /// 相对资源起始的偏移
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    /// 对齐后的行字节数
    pub row_pitch: u64,
    /// 对齐后的子资源大小
    pub size: u64,
}

/// 纹理布局
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureLayout {
    pub subresources: Vec<SubresourceFootprint>,
    /// 所有子资源之和（上传字节数）
    pub upload_size: u64,
    /// 资源对齐
    pub alignment: u64,
    /// 资源大小（对齐到资源对齐）
    pub size: u64,
}

impl TextureLayout {
    /// 计算纹理布局
    ///
    /// # 参数
    ///
    /// * `desc` - 纹理描述
    /// * `rules` - 对齐规则
    ///
    /// # 返回值
    ///
    /// 尺寸为 0、mip 数为 0、某个 mip 层级缩小到 0 像素或字节数超出 `u64` 时返回
    /// `SceneLoadError::InvalidTexture`（index 固定为 0，调用者负责改写为实际的纹理序号）。
    pub fn compute(desc: &TextureDesc, rules: &AlignmentRules) -> Result<Self> {
        if desc.width == 0 || desc.height == 0 {
            return Err(invalid(format!("dimensions {}x{}", desc.width, desc.height)));
        }
        if desc.mip_count == 0 {
            return Err(invalid("mip count is 0".to_string()));
        }
        if desc.mip_count > 32
            || (desc.width >> (desc.mip_count - 1)) == 0
            || (desc.height >> (desc.mip_count - 1)) == 0
        {
            return Err(invalid(format!(
                "{} mips do not fit a {}x{} texture",
                desc.mip_count, desc.width, desc.height
            )));
        }

        let overflow = || {
            invalid(format!(
                "{}x{} with {} mips overflows the addressable size",
                desc.width, desc.height, desc.mip_count
            ))
        };

        let bpp = desc.format.bytes_per_pixel();
        let mut subresources = Vec::with_capacity(desc.subresource_count() as usize);
        let mut offset: u64 = 0;

        for _slice in 0..desc.array_size() {
            for mip in 0..desc.mip_count {
                let width = desc.width >> mip;
                let height = desc.height >> mip;
                let row_pitch = align_up(width as u64 * bpp, rules.pitch).ok_or_else(overflow)?;
                let size = row_pitch
                    .checked_mul(height as u64)
                    .and_then(|bytes| align_up(bytes, rules.placement))
                    .ok_or_else(overflow)?;

                subresources.push(SubresourceFootprint {
                    offset,
                    width,
                    height,
                    row_pitch,
                    size,
                });
                offset = offset.checked_add(size).ok_or_else(overflow)?;
            }
        }

        let upload_size = offset;
        let alignment = rules.resource_alignment(upload_size);

        Ok(Self {
            subresources,
            upload_size,
            alignment,
            size: align_up(upload_size, alignment).ok_or_else(overflow)?,
        })
    }
}

fn invalid(reason: String) -> crate::core::error::DistFrameError {
    SceneLoadError::InvalidTexture { index: 0, reason }.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), Some(0));
        assert_eq!(align_up(1, 256), Some(256));
        assert_eq!(align_up(256, 256), Some(256));
        assert_eq!(align_up(257, 512), Some(512));
        assert_eq!(align_up(u64::MAX - 10, 256), None);
    }

    #[test]
    fn test_skybox_layout() {
        let desc = TextureDesc::cube(4, 3, TextureFormat::Rgba32Float);
        let layout = TextureLayout::compute(&desc, &AlignmentRules::default()).unwrap();

        assert_eq!(layout.subresources.len(), 18);
        // 4 像素 * 16 字节 = 64 -> 256 行对齐
        assert_eq!(layout.subresources[0].row_pitch, 256);
        assert_eq!(layout.subresources[0].size, 1024);
        assert_eq!(layout.subresources[1].size, 512);
        assert_eq!(layout.subresources[2].size, 512);
        // 第二个面从 2048 开始
        assert_eq!(layout.subresources[3].offset, 2048);
        assert_eq!(layout.upload_size, 12288);
        assert_eq!(layout.alignment, 4096);
        assert_eq!(layout.size, 12288);
    }

    #[test]
    fn test_large_texture_uses_default_alignment() {
        let desc = TextureDesc::texture_2d(256, 256, 1, TextureFormat::Rgba8Unorm);
        let layout = TextureLayout::compute(&desc, &AlignmentRules::default()).unwrap();
        assert_eq!(layout.upload_size, 262144);
        assert_eq!(layout.alignment, 65536);
        assert_eq!(layout.size % 65536, 0);
    }

    #[test]
    fn test_minimum_texture() {
        let desc = TextureDesc::texture_2d(1, 1, 1, TextureFormat::Rgba8Unorm);
        let layout = TextureLayout::compute(&desc, &AlignmentRules::default()).unwrap();
        assert_eq!(layout.subresources.len(), 1);
        assert_eq!(layout.upload_size, 512);
        assert_eq!(layout.size, 4096);
    }

    #[test]
    fn test_invalid_textures() {
        let rules = AlignmentRules::default();
        assert!(TextureLayout::compute(&TextureDesc::texture_2d(0, 4, 1, TextureFormat::Rgba8Unorm), &rules).is_err());
        assert!(TextureLayout::compute(&TextureDesc::texture_2d(4, 4, 0, TextureFormat::Rgba8Unorm), &rules).is_err());
        // 4x4 最多 3 个 mip
        assert!(TextureLayout::compute(&TextureDesc::texture_2d(4, 4, 4, TextureFormat::Rgba8Unorm), &rules).is_err());
        assert!(TextureLayout::compute(&TextureDesc::texture_2d(4, 4, 3, TextureFormat::Rgba8Unorm), &rules).is_ok());
    }

    #[test]
    fn test_alignment_rules_validation() {
        assert!(AlignmentRules::default().validate().is_ok());
        let rules = AlignmentRules { placement: 500, ..AlignmentRules::default() };
        assert!(rules.validate().is_err());
    }
}
