//! 存储流式读取
//!
//! 文件读取请求在流式队列的 GPU 时间线上执行，完成情况通过该队列的 Fence 观察。
//! CPU 只在真正需要数据时才等待（场景加载时唯一的阻塞点）。

use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::queue::Queue;
use super::sync::Fence;
use crate::core::error::{Result, SceneLoadError};

type ReadSlot = Arc<Mutex<Option<std::result::Result<Vec<u8>, String>>>>;

/// 流式读取工厂
#[derive(Debug)]
pub struct StreamingFactory {
    /// 单个请求的最大字节数
    max_request_size: u64,
}

/// 可以被流式读取的文件
#[derive(Debug, Clone)]
pub struct StreamFile {
    path: PathBuf,
    len: u64,
}

impl StreamFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// 在流式队列上执行的读取请求
pub(crate) struct ReadRequest {
    path: PathBuf,
    offset: u64,
    len: u64,
    slot: ReadSlot,
}

impl ReadRequest {
    pub(crate) fn execute(self) {
        let result = read_range(&self.path, self.offset, self.len)
            .map_err(|e| format!("{}: {}", self.path.display(), e));
        if let Err(error) = &result {
            tracing::error!(%error, "Streaming read failed");
        }
        *self.slot.lock() = Some(result);
    }
}

fn read_range(path: &Path, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut bytes = vec![0; len as usize];
    file.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// 尚未完成的读取
pub struct PendingRead {
    fence: Fence,
    fence_value: u64,
    len: u64,
    slot: ReadSlot,
}

impl PendingRead {
    /// 读取完成时流式队列 Fence 将达到的值
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 是否已经完成（非阻塞）
    pub fn is_complete(&self) -> bool {
        self.fence.is_completed(self.fence_value)
    }

    /// 阻塞直到数据读入主机内存
    pub fn wait(self) -> Result<Vec<u8>> {
        self.fence.wait_cpu(self.fence_value);
        match self.slot.lock().take() {
            Some(Ok(bytes)) => Ok(bytes),
            Some(Err(error)) => Err(SceneLoadError::StreamingFailed(error).into()),
            None => Err(SceneLoadError::StreamingFailed(
                "read never executed on the streaming queue".to_string(),
            )
            .into()),
        }
    }
}

impl StreamingFactory {
    pub(crate) fn new(max_request_size: u64) -> Self {
        Self { max_request_size }
    }

    pub fn max_request_size(&self) -> u64 {
        self.max_request_size
    }

    /// 打开文件并读取其长度
    pub fn open_file(&self, path: &Path) -> Result<StreamFile> {
        let metadata = std::fs::metadata(path)
            .map_err(|_| SceneLoadError::FileNotFound(path.to_path_buf()))?;
        Ok(StreamFile {
            path: path.to_path_buf(),
            len: metadata.len(),
        })
    }

    /// 把一次读取放入流式队列，并在其后 signal
    ///
    /// # 参数
    ///
    /// * `queue` - 流式队列
    /// * `file` - 已打开的文件
    /// * `offset` / `len` - 读取范围，必须在文件内
    pub fn enqueue_read(&self, queue: &Queue, file: &StreamFile, offset: u64, len: u64) -> Result<PendingRead> {
        let end = offset.saturating_add(len);
        if end > file.len {
            return Err(SceneLoadError::Truncated {
                expected: end,
                actual: file.len,
            }
            .into());
        }
        if len > self.max_request_size {
            return Err(SceneLoadError::StreamingFailed(format!(
                "request of {} bytes exceeds the {} byte limit",
                len, self.max_request_size
            ))
            .into());
        }

        let slot: ReadSlot = Arc::new(Mutex::new(None));
        queue.enqueue_read(ReadRequest {
            path: file.path.clone(),
            offset,
            len,
            slot: slot.clone(),
        })?;
        let fence_value = queue.signal_gpu();

        tracing::debug!(path = %file.path.display(), offset, len, fence_value, "Streaming read enqueued");

        Ok(PendingRead {
            fence: queue.fence().clone(),
            fence_value,
            len,
            slot,
        })
    }
}
