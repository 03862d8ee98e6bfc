//! 场景数据
//!
//! 持有解析后的头文件和数据文件的流式读取请求。
//! 头文件在打开时同步读取（很小）；数据文件在 [`SceneData::start_streaming`]
//! 中交给流式队列，直到 [`SceneData::prepare_binary_data`] 才真正等待。

use std::fs;
use std::path::{Path, PathBuf};

use super::format::{self, CpuObjectHeader, ParsedHeader, SceneHeader, TextureHeader};
use super::layout::SceneLayout;
use crate::core::error::{GraphicsError, Result, SceneLoadError};
use crate::renderer::device::Device;
use crate::renderer::streaming::PendingRead;
use crate::renderer::texture::AlignmentRules;

/// 场景数据
pub struct SceneData {
    folder: PathBuf,
    header: ParsedHeader,
    layout: SceneLayout,
    pending: Option<PendingRead>,
    binary: Option<Vec<u8>>,
}

impl SceneData {
    /// 读取并校验头文件，计算布局
    ///
    /// # 参数
    ///
    /// * `folder` - 场景目录
    /// * `rules` - 对齐规则
    pub fn open(folder: &Path, rules: &AlignmentRules) -> Result<Self> {
        let _span = crate::span_trace!("SceneData::open").entered();

        let header_path = folder.join(format::HEADER_FILE_NAME);
        let bytes = fs::read(&header_path).map_err(|_| SceneLoadError::FileNotFound(header_path.clone()))?;
        let header = format::parse_header(&bytes)?;
        let layout = SceneLayout::compute(&header.scene, &header.textures, rules)?;

        tracing::info!(
            folder = %folder.display(),
            scene_id = header.scene.scene_id,
            objects = header.scene.object_count,
            textures = header.scene.texture_count,
            upload_bytes = layout.upload_size,
            heap_bytes = layout.heap_size,
            "Scene header loaded"
        );

        Ok(Self {
            folder: folder.to_path_buf(),
            header,
            layout,
            pending: None,
            binary: None,
        })
    }

    /// 在流式队列上开始读取数据文件中的上传字节
    pub fn start_streaming(&mut self, device: &Device) -> Result<()> {
        if self.pending.is_some() || self.binary.is_some() {
            return Err(GraphicsError::InvalidLifecycle {
                object: "scene data".to_string(),
                expected: "not streaming".to_string(),
                actual: "already streaming".to_string(),
            }
            .into());
        }

        let factory = device.streaming_factory();
        let file = factory.open_file(&self.folder.join(format::DATA_FILE_NAME))?;
        let pending = factory.enqueue_read(device.streaming_queue(), &file, 0, self.layout.upload_size)?;
        tracing::debug!(bytes = pending.len(), fence_value = pending.fence_value(), "Scene streaming started");
        self.pending = Some(pending);
        Ok(())
    }

    /// 数据是否已经读入主机内存（不阻塞）
    pub fn is_streaming_complete(&self) -> bool {
        self.binary.is_some() || self.pending.as_ref().is_some_and(PendingRead::is_complete)
    }

    /// 等待流式读取完成，返回上传字节
    ///
    /// 加载过程中唯一的 CPU 阻塞点。
    pub fn prepare_binary_data(&mut self) -> Result<&[u8]> {
        if self.binary.is_none() {
            let pending = self.pending.take().ok_or_else(|| GraphicsError::InvalidLifecycle {
                object: "scene data".to_string(),
                expected: "streaming".to_string(),
                actual: "not started".to_string(),
            })?;
            let bytes = pending.wait()?;
            if bytes.len() as u64 != self.layout.upload_size {
                return Err(SceneLoadError::Truncated {
                    expected: self.layout.upload_size,
                    actual: bytes.len() as u64,
                }
                .into());
            }
            self.binary = Some(bytes);
        }
        Ok(self.binary.as_deref().unwrap_or_default())
    }

    /// 上传完成后释放主机内存中的副本
    pub fn release_binary_data(&mut self) {
        self.binary = None;
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn scene_header(&self) -> &SceneHeader {
        &self.header.scene
    }

    pub fn texture_headers(&self) -> &[TextureHeader] {
        &self.header.textures
    }

    pub fn object_headers(&self) -> &[CpuObjectHeader] {
        &self.header.objects
    }

    pub fn layout(&self) -> &SceneLayout {
        &self.layout
    }
}

impl std::fmt::Debug for SceneData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneData")
            .field("folder", &self.folder)
            .field("scene_id", &self.header.scene.scene_id)
            .field("upload_size", &self.layout.upload_size)
            .field("streaming", &self.pending.is_some())
            .field("loaded", &self.binary.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceConfig;
    use crate::scene::format::{fill_byte, SceneAssetBuilder};

    fn device() -> Device {
        Device::initialize(&DeviceConfig {
            debug_layer: false,
            ..DeviceConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_streams_upload_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let rules = AlignmentRules::default();
        SceneAssetBuilder::synthetic().write(dir.path(), &rules).unwrap();

        let device = device();
        let mut data = SceneData::open(dir.path(), &rules).unwrap();
        data.start_streaming(&device).unwrap();
        assert!(data.start_streaming(&device).is_err());

        let upload_size = data.layout().upload_size;
        let bytes = data.prepare_binary_data().unwrap();
        assert_eq!(bytes.len() as u64, upload_size);
        assert_eq!(bytes[100], fill_byte(100));
        assert!(data.is_streaming_complete());
    }

    #[test]
    fn test_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let rules = AlignmentRules::default();
        let err = SceneData::open(dir.path(), &rules).unwrap_err();
        assert!(err.to_string().contains("Scene file not found"));

        // 只有头文件，没有数据文件
        let asset = SceneAssetBuilder::synthetic().build(&rules).unwrap();
        std::fs::write(dir.path().join(format::HEADER_FILE_NAME), &asset.header).unwrap();
        let device = device();
        let mut data = SceneData::open(dir.path(), &rules).unwrap();
        assert!(data.start_streaming(&device).is_err());
    }

    #[test]
    fn test_truncated_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let rules = AlignmentRules::default();
        let mut asset = SceneAssetBuilder::synthetic().build(&rules).unwrap();
        asset.data.truncate(asset.data.len() - 1);
        asset.write(dir.path()).unwrap();

        let device = device();
        let mut data = SceneData::open(dir.path(), &rules).unwrap();
        let err = data.start_streaming(&device).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_prepare_without_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let rules = AlignmentRules::default();
        SceneAssetBuilder::synthetic().write(dir.path(), &rules).unwrap();
        let mut data = SceneData::open(dir.path(), &rules).unwrap();
        assert!(data.prepare_binary_data().is_err());
    }
}
