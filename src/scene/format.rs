//! 场景文件格式
//!
//! 场景目录中有两个文件：
//!
//! - `scene.hdr`：格式头、场景头、纹理头、CPU 对象头，长度必须完全匹配
//! - `scene.bin`：上传数据，按以下顺序排列，可以逐字节复制到上传缓冲区
//!   1. 存在的缓冲区分段（按声明顺序）
//!   2. 天空盒：每个面的完整 mip 链
//!   3. 每张场景纹理的 mip 链
//!
//! 纹理数据的行对齐到 pitch 对齐，每个层级对齐到放置对齐，
//! 与 [`TextureLayout`](crate::renderer::texture::TextureLayout) 完全一致。
//!
//! 所有结构体都是小端 `#[repr(C)]`，通过 `bytemuck` 读写。
//! [`SceneAssetBuilder`] 生成合法的头/数据文件对，供测试和合成演示场景使用。

use bytemuck::{Pod, Zeroable};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{Result, SceneLoadError};
use crate::renderer::texture::{AlignmentRules, TextureDesc, TextureFormat, TextureLayout};

/// 格式标记
pub const SCENE_MAGIC: [u8; 8] = *b"DFSCENE\0";
/// 当前格式版本
pub const SCENE_FORMAT_VERSION: u32 = 1;
/// 头文件名
pub const HEADER_FILE_NAME: &str = "scene.hdr";
/// 数据文件名
pub const DATA_FILE_NAME: &str = "scene.bin";

/// 天空盒格式
pub const SKY_BOX_FORMAT: TextureFormat = TextureFormat::Rgba32Float;
/// 场景纹理格式
pub const SCENE_TEXTURE_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// 格式头
#[repr(C)]
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct FormatHeader {
    pub magic: [u8; 8],
    pub version: u32,
    /// 整个头文件的字节数
    pub header_size: u32,
}

/// 场景头（16 个 u32）
#[repr(C)]
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct SceneHeader {
    pub scene_id: u32,
    /// 按 [`BufferSection::ALL`] 顺序排列的分段字节数
    pub section_sizes: [u32; 10],
    pub object_count: u32,
    pub opaque_count: u32,
    pub sky_box_resolution: u32,
    pub sky_box_mip_count: u32,
    pub texture_count: u32,
}

impl SceneHeader {
    pub fn section_size(&self, section: BufferSection) -> u64 {
        self.section_sizes[section as usize] as u64
    }
}

/// 纹理头
#[repr(C)]
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct TextureHeader {
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
}

impl TextureHeader {
    pub fn desc(&self) -> TextureDesc {
        TextureDesc::texture_2d(self.width, self.height, self.mip_count, SCENE_TEXTURE_FORMAT)
    }
}

/// CPU 侧的对象信息（剔除使用）
#[repr(C)]
#[derive(Default, Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CpuObjectHeader {
    /// 包围球：中心 xyz + 半径
    pub bounding_sphere: [f32; 4],
}

/// 缓冲区分段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferSection {
    VertexA,
    VertexB,
    VertexIndirection,
    PrimitiveIndex,
    Meshlets,
    Objects,
    MeshletCulling,
    Materials,
    RtIndices,
    RtObjectOffsets,
}

impl BufferSection {
    pub const ALL: [BufferSection; 10] = [
        BufferSection::VertexA,
        BufferSection::VertexB,
        BufferSection::VertexIndirection,
        BufferSection::PrimitiveIndex,
        BufferSection::Meshlets,
        BufferSection::Objects,
        BufferSection::MeshletCulling,
        BufferSection::Materials,
        BufferSection::RtIndices,
        BufferSection::RtObjectOffsets,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BufferSection::VertexA => "vertex A",
            BufferSection::VertexB => "vertex B",
            BufferSection::VertexIndirection => "vertex indirection",
            BufferSection::PrimitiveIndex => "primitive index",
            BufferSection::Meshlets => "meshlets",
            BufferSection::Objects => "objects",
            BufferSection::MeshletCulling => "meshlet culling",
            BufferSection::Materials => "materials",
            BufferSection::RtIndices => "RT indices",
            BufferSection::RtObjectOffsets => "RT object offsets",
        }
    }

    /// 结构化缓冲区的元素大小
    pub fn stride(&self) -> u32 {
        match self {
            BufferSection::VertexA | BufferSection::VertexB => 16,
            BufferSection::VertexIndirection | BufferSection::PrimitiveIndex => 4,
            BufferSection::Meshlets => 16,
            BufferSection::Objects => 32,
            BufferSection::MeshletCulling | BufferSection::Materials => 16,
            BufferSection::RtIndices | BufferSection::RtObjectOffsets => 4,
        }
    }

    /// 几何分段必须存在，辅助分段为 0 时表示缺失
    pub fn is_required(&self) -> bool {
        (*self as usize) < 6
    }

    /// 在场景描述符表中的槽位
    pub fn descriptor_slot(&self) -> u32 {
        *self as u32
    }
}

impl fmt::Display for BufferSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 解析后的头文件
#[derive(Debug, Clone)]
pub struct ParsedHeader {
    pub format: FormatHeader,
    pub scene: SceneHeader,
    pub textures: Vec<TextureHeader>,
    pub objects: Vec<CpuObjectHeader>,
}

const FORMAT_HEADER_SIZE: usize = std::mem::size_of::<FormatHeader>();
const SCENE_HEADER_SIZE: usize = std::mem::size_of::<SceneHeader>();
const TEXTURE_HEADER_SIZE: usize = std::mem::size_of::<TextureHeader>();
const OBJECT_HEADER_SIZE: usize = std::mem::size_of::<CpuObjectHeader>();

/// 头文件的期望长度
pub fn header_file_size(texture_count: usize, object_count: usize) -> usize {
    FORMAT_HEADER_SIZE + SCENE_HEADER_SIZE + texture_count * TEXTURE_HEADER_SIZE + object_count * OBJECT_HEADER_SIZE
}

fn read_array<T: Pod>(bytes: &[u8], offset: usize, count: usize) -> Vec<T> {
    let size = std::mem::size_of::<T>();
    (0..count)
        .map(|i| bytemuck::pod_read_unaligned(&bytes[offset + i * size..offset + (i + 1) * size]))
        .collect()
}

/// 解析头文件
pub fn parse_header(bytes: &[u8]) -> Result<ParsedHeader> {
    if bytes.len() < FORMAT_HEADER_SIZE + SCENE_HEADER_SIZE {
        return Err(SceneLoadError::InvalidFormat(format!(
            "header file is {} bytes, smaller than the fixed headers",
            bytes.len()
        ))
        .into());
    }

    let format: FormatHeader = bytemuck::pod_read_unaligned(&bytes[..FORMAT_HEADER_SIZE]);
    if format.magic != SCENE_MAGIC {
        return Err(SceneLoadError::InvalidFormat("format marker mismatch".to_string()).into());
    }
    if format.version != SCENE_FORMAT_VERSION {
        return Err(SceneLoadError::InvalidFormat(format!(
            "unsupported version {} (expected {})",
            format.version, SCENE_FORMAT_VERSION
        ))
        .into());
    }
    if format.header_size as usize != bytes.len() {
        return Err(SceneLoadError::InvalidFormat(format!(
            "header declares {} bytes, file has {}",
            format.header_size,
            bytes.len()
        ))
        .into());
    }

    let scene: SceneHeader =
        bytemuck::pod_read_unaligned(&bytes[FORMAT_HEADER_SIZE..FORMAT_HEADER_SIZE + SCENE_HEADER_SIZE]);
    let texture_count = scene.texture_count as usize;
    let object_count = scene.object_count as usize;

    let expected = header_file_size(texture_count, object_count);
    if expected != bytes.len() {
        return Err(SceneLoadError::InvalidFormat(format!(
            "{} textures and {} objects need {} header bytes, file has {}",
            texture_count,
            object_count,
            expected,
            bytes.len()
        ))
        .into());
    }

    let textures_offset = FORMAT_HEADER_SIZE + SCENE_HEADER_SIZE;
    let objects_offset = textures_offset + texture_count * TEXTURE_HEADER_SIZE;

    Ok(ParsedHeader {
        format,
        scene,
        textures: read_array(bytes, textures_offset, texture_count),
        objects: read_array(bytes, objects_offset, object_count),
    })
}

/// 写出场景文件对
pub fn write_scene(folder: &Path, header: &[u8], data: &[u8]) -> Result<()> {
    fs::create_dir_all(folder)?;
    fs::write(folder.join(HEADER_FILE_NAME), header)?;
    fs::write(folder.join(DATA_FILE_NAME), data)?;
    Ok(())
}

/// 数据文件中第 `index` 个字节的确定性填充值
pub fn fill_byte(index: u64) -> u8 {
    (index.wrapping_mul(131).wrapping_add(index >> 8) % 251) as u8
}

/// 序列化后的场景
#[derive(Debug, Clone)]
pub struct SceneAsset {
    pub header: Vec<u8>,
    pub data: Vec<u8>,
}

impl SceneAsset {
    pub fn write(&self, folder: &Path) -> Result<PathBuf> {
        write_scene(folder, &self.header, &self.data)?;
        Ok(folder.to_path_buf())
    }
}

/// 场景资产构建器
#[derive(Debug, Clone)]
pub struct SceneAssetBuilder {
    scene_id: u32,
    section_sizes: [u32; 10],
    sky_box_resolution: u32,
    sky_box_mip_count: u32,
    textures: Vec<TextureHeader>,
    objects: Vec<CpuObjectHeader>,
    opaque_count: u32,
}

impl Default for SceneAssetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneAssetBuilder {
    /// 空的构建器：没有分段、没有纹理、没有对象，4 像素 1 个 mip 的天空盒
    pub fn new() -> Self {
        Self {
            scene_id: 0,
            section_sizes: [0; 10],
            sky_box_resolution: 4,
            sky_box_mip_count: 1,
            textures: Vec::new(),
            objects: Vec::new(),
            opaque_count: 0,
        }
    }

    /// 合成演示场景：所有分段、两张纹理、沿 Z 轴排开的 8 个对象
    pub fn synthetic() -> Self {
        let mut builder = Self::new()
            .scene_id(0x5EED)
            .sky_box(16, 5)
            .texture(64, 64, 7)
            .texture(32, 16, 5);
        for section in BufferSection::ALL {
            builder = builder.section(section, section.stride() * 64);
        }
        for i in 0..8 {
            builder = builder.object([0.0, 0.0, i as f32 * 4.0, 1.5], i < 6);
        }
        builder
    }

    pub fn scene_id(mut self, id: u32) -> Self {
        self.scene_id = id;
        self
    }

    pub fn section(mut self, section: BufferSection, size: u32) -> Self {
        self.section_sizes[section as usize] = size;
        self
    }

    pub fn sky_box(mut self, resolution: u32, mip_count: u32) -> Self {
        self.sky_box_resolution = resolution;
        self.sky_box_mip_count = mip_count;
        self
    }

    pub fn texture(mut self, width: u32, height: u32, mip_count: u32) -> Self {
        self.textures.push(TextureHeader {
            width,
            height,
            mip_count,
        });
        self
    }

    /// 添加一个对象；不透明对象排在透明对象之前
    pub fn object(mut self, bounding_sphere: [f32; 4], opaque: bool) -> Self {
        let header = CpuObjectHeader { bounding_sphere };
        if opaque {
            self.objects.insert(self.opaque_count as usize, header);
            self.opaque_count += 1;
        } else {
            self.objects.push(header);
        }
        self
    }

    pub fn scene_header(&self) -> SceneHeader {
        SceneHeader {
            scene_id: self.scene_id,
            section_sizes: self.section_sizes,
            object_count: self.objects.len() as u32,
            opaque_count: self.opaque_count,
            sky_box_resolution: self.sky_box_resolution,
            sky_box_mip_count: self.sky_box_mip_count,
            texture_count: self.textures.len() as u32,
        }
    }

    /// 数据文件大小：所有分段 + 天空盒与纹理的上传字节数
    ///
    /// 纹理描述无效时返回错误。
    pub fn data_size(&self, rules: &AlignmentRules) -> Result<u64> {
        let mut size: u64 = self.section_sizes.iter().map(|&s| s as u64).sum();

        let sky_box = TextureDesc::cube(self.sky_box_resolution, self.sky_box_mip_count, SKY_BOX_FORMAT);
        size += TextureLayout::compute(&sky_box, rules)?.upload_size;
        for texture in &self.textures {
            size += TextureLayout::compute(&texture.desc(), rules)?.upload_size;
        }
        Ok(size)
    }

    /// 序列化头文件和数据文件
    pub fn build(&self, rules: &AlignmentRules) -> Result<SceneAsset> {
        let scene = self.scene_header();
        let header_size = header_file_size(self.textures.len(), self.objects.len());

        let format = FormatHeader {
            magic: SCENE_MAGIC,
            version: SCENE_FORMAT_VERSION,
            header_size: header_size as u32,
        };

        let mut header = Vec::with_capacity(header_size);
        header.extend_from_slice(bytemuck::bytes_of(&format));
        header.extend_from_slice(bytemuck::bytes_of(&scene));
        header.extend_from_slice(bytemuck::cast_slice(&self.textures));
        header.extend_from_slice(bytemuck::cast_slice(&self.objects));

        let data = (0..self.data_size(rules)?).map(fill_byte).collect();
        Ok(SceneAsset { header, data })
    }

    /// 构建并写入 `folder`
    pub fn write(&self, folder: &Path, rules: &AlignmentRules) -> Result<PathBuf> {
        let asset = self.build(rules)?;
        tracing::info!(
            folder = %folder.display(),
            header_bytes = asset.header.len(),
            data_bytes = asset.data.len(),
            "Scene asset written"
        );
        asset.write(folder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_struct_sizes() {
        assert_eq!(FORMAT_HEADER_SIZE, 16);
        assert_eq!(SCENE_HEADER_SIZE, 64);
        assert_eq!(TEXTURE_HEADER_SIZE, 12);
        assert_eq!(OBJECT_HEADER_SIZE, 16);
    }

    #[test]
    fn test_parse_built_header() {
        let builder = SceneAssetBuilder::synthetic();
        let asset = builder.build(&AlignmentRules::default()).unwrap();
        let parsed = parse_header(&asset.header).unwrap();

        assert_eq!(parsed.scene, builder.scene_header());
        assert_eq!(parsed.textures.len(), 2);
        assert_eq!(parsed.textures[1], TextureHeader { width: 32, height: 16, mip_count: 5 });
        assert_eq!(parsed.objects.len(), 8);
        assert_eq!(parsed.scene.opaque_count, 6);
        // 透明对象排在最后
        assert_eq!(parsed.objects[7].bounding_sphere[2], 28.0);
    }

    #[test]
    fn test_rejects_corrupt_headers() {
        let asset = SceneAssetBuilder::synthetic().build(&AlignmentRules::default()).unwrap();

        let mut bad_magic = asset.header.clone();
        bad_magic[0] = b'X';
        assert!(parse_header(&bad_magic).unwrap_err().to_string().contains("format marker"));

        let mut truncated = asset.header.clone();
        truncated.pop();
        assert!(parse_header(&truncated).is_err());

        assert!(parse_header(&asset.header[..20]).is_err());
    }

    #[test]
    fn test_section_properties() {
        assert!(BufferSection::Objects.is_required());
        assert!(!BufferSection::MeshletCulling.is_required());
        assert_eq!(BufferSection::RtObjectOffsets.descriptor_slot(), 9);
        assert_eq!(BufferSection::Objects.stride(), 32);
    }

    #[test]
    fn test_data_size_matches_layout() {
        let rules = AlignmentRules::default();
        let builder = SceneAssetBuilder::new()
            .section(BufferSection::VertexA, 256)
            .sky_box(4, 3);
        assert_eq!(builder.data_size(&rules).unwrap(), 256 + 12288);
    }
}
