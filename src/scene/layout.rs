//! 场景布局
//!
//! 两遍算法的第一遍：只根据头信息算出所有尺寸和偏移，不创建任何 GPU 对象。
//!
//! - 堆：天空盒放在偏移 0，场景纹理按声明顺序依次放置，每张对齐到自己的资源对齐
//! - 上传缓冲区：存在的缓冲区分段按声明顺序紧密排列，其后是天空盒（面 × mip），
//!   再后是每张纹理的 mip 链
//!
//! 同样的输入永远得到同样的布局。

use super::format::{BufferSection, SceneHeader, TextureHeader, SKY_BOX_FORMAT};
use crate::core::error::{DistFrameError, Result, SceneLoadError};
use crate::renderer::texture::{align_up, AlignmentRules, TextureDesc, TextureLayout};

/// 缓冲区分段在上传缓冲区中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionPlacement {
    pub section: BufferSection,
    pub size: u64,
    pub upload_offset: u64,
}

/// 纹理在堆和上传缓冲区中的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TexturePlacement {
    pub desc: TextureDesc,
    pub layout: TextureLayout,
    pub heap_offset: u64,
    pub upload_offset: u64,
}

/// 场景布局
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneLayout {
    /// 存在的分段，按声明顺序
    pub sections: Vec<SectionPlacement>,
    pub sky_box: TexturePlacement,
    pub textures: Vec<TexturePlacement>,
    /// 纹理堆大小
    pub heap_size: u64,
    /// 所有分段的字节数
    pub buffer_bytes: u64,
    /// 上传缓冲区需要的字节数
    pub upload_size: u64,
}

fn retag_texture_error(err: DistFrameError, index: usize) -> DistFrameError {
    match err {
        DistFrameError::SceneLoading(SceneLoadError::InvalidTexture { reason, .. }) => {
            SceneLoadError::InvalidTexture { index, reason }.into()
        }
        other => other,
    }
}

fn size_overflow(what: &str) -> DistFrameError {
    SceneLoadError::InvalidFormat(format!("{} size overflows u64", what)).into()
}

impl SceneLayout {
    /// 计算布局
    ///
    /// # 参数
    ///
    /// * `header` - 场景头
    /// * `textures` - 纹理头，数量必须等于 `header.texture_count`
    /// * `rules` - 对齐规则
    ///
    /// # 返回值
    ///
    /// 必需分段为 0、不透明对象多于对象总数、纹理描述无效或总字节数溢出时返回错误。
    pub fn compute(header: &SceneHeader, textures: &[TextureHeader], rules: &AlignmentRules) -> Result<Self> {
        let mut sections = Vec::with_capacity(BufferSection::ALL.len());
        let mut upload_offset = 0;
        for section in BufferSection::ALL {
            let size = header.section_size(section);
            if size == 0 {
                if section.is_required() {
                    return Err(SceneLoadError::ZeroSizedSection(section.name()).into());
                }
                continue;
            }
            sections.push(SectionPlacement {
                section,
                size,
                upload_offset,
            });
            upload_offset += size;
        }
        let buffer_bytes = upload_offset;

        if header.opaque_count > header.object_count {
            return Err(SceneLoadError::InvalidFormat(format!(
                "{} opaque objects out of {} objects",
                header.opaque_count, header.object_count
            ))
            .into());
        }
        if textures.len() != header.texture_count as usize {
            return Err(SceneLoadError::InvalidFormat(format!(
                "header declares {} textures, {} texture records present",
                header.texture_count,
                textures.len()
            ))
            .into());
        }

        let sky_box_desc = TextureDesc::cube(header.sky_box_resolution, header.sky_box_mip_count, SKY_BOX_FORMAT);
        let sky_box_layout = TextureLayout::compute(&sky_box_desc, rules).map_err(|err| match err {
            DistFrameError::SceneLoading(SceneLoadError::InvalidTexture { reason, .. }) => {
                SceneLoadError::InvalidFormat(format!("sky box: {}", reason)).into()
            }
            other => other,
        })?;

        let mut heap_end = sky_box_layout.size;
        let sky_box = TexturePlacement {
            desc: sky_box_desc,
            heap_offset: 0,
            upload_offset,
            layout: sky_box_layout,
        };
        upload_offset = upload_offset
            .checked_add(sky_box.layout.upload_size)
            .ok_or_else(|| size_overflow("upload buffer"))?;

        let mut placements = Vec::with_capacity(textures.len());
        for (index, texture) in textures.iter().enumerate() {
            let desc = texture.desc();
            let layout = TextureLayout::compute(&desc, rules).map_err(|err| retag_texture_error(err, index))?;

            let heap_offset = align_up(heap_end, layout.alignment).ok_or_else(|| size_overflow("texture heap"))?;
            heap_end = heap_offset
                .checked_add(layout.size)
                .ok_or_else(|| size_overflow("texture heap"))?;

            let placement = TexturePlacement {
                desc,
                heap_offset,
                upload_offset,
                layout,
            };
            upload_offset = upload_offset
                .checked_add(placement.layout.upload_size)
                .ok_or_else(|| size_overflow("upload buffer"))?;
            placements.push(placement);
        }

        Ok(Self {
            sections,
            sky_box,
            textures: placements,
            heap_size: heap_end,
            buffer_bytes,
            upload_size: upload_offset,
        })
    }

    /// 上传缓冲区的实际大小（不小于 `floor`）
    pub fn staging_size(&self, floor: u64) -> u64 {
        self.upload_size.max(floor)
    }

    /// 需要记录的纹理复制次数（每个子资源一次）
    pub fn texture_copy_count(&self) -> usize {
        self.sky_box.layout.subresources.len()
            + self
                .textures
                .iter()
                .map(|t| t.layout.subresources.len())
                .sum::<usize>()
    }
}
