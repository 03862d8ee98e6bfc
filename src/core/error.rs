//! 错误处理模块
//!
//! 定义了帧调度核心中使用的统一错误类型。
//!
//! # 设计原则
//!
//! - 为每种错误类型提供清晰的上下文信息
//! - 支持错误链（error source）
//! - 易于模式匹配和错误处理
//! - 库代码只返回错误，从不退出进程；致命错误统一交给 [`terminate`]
//!
//! # 错误分类
//!
//! 本核心中几乎所有错误都是致命的：不支持的硬件特性等级、设备移除、
//! 场景子资源初始化失败、上传字节数校验不一致、渲染通道失败。
//! 它们表示不可支持的硬件或损坏的资产，不存在重试或降级模式。

use std::fmt;
use std::path::PathBuf;

/// 引擎统一的 Result 类型
///
/// 所有可能返回错误的函数都应该使用这个类型。
pub type Result<T> = std::result::Result<T, DistFrameError>;

/// 致命错误的进程退出码
pub const FATAL_EXIT_CODE: i32 = 1;

/// 帧调度核心的错误类型
#[derive(Debug)]
pub enum DistFrameError {
    /// 配置错误
    Config(ConfigError),

    /// 图形设备 / 队列 / 资源错误
    Graphics(GraphicsError),

    /// 场景加载错误
    SceneLoading(SceneLoadError),

    /// IO 错误
    Io(std::io::Error),

    /// 日志系统错误
    Log(String),

    /// 运行时错误
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形设备相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 设备创建失败
    DeviceCreation(String),

    /// 适配器不支持所需的最低特性等级
    UnsupportedFeatureLevel { required: String, available: String },

    /// 设备已被移除（驱动崩溃、重置或挂起）
    DeviceRemoved { reason: String },

    /// 资源创建失败
    ResourceCreation(String),

    /// 命令记录或执行失败
    CommandExecution(String),

    /// 命令列表类型与队列类型不匹配
    QueueMismatch { queue: String, list: String },

    /// 非法的资源状态组合
    InvalidResourceState(String),

    /// 状态跟踪器容量耗尽（配置错误）
    TrackerCapacityExceeded { capacity: usize },

    /// 资源未在状态跟踪器中注册
    UntrackedResource(u32),

    /// 对象生命周期阶段不正确
    InvalidLifecycle { object: String, expected: String, actual: String },

    /// 渲染通道执行失败
    PassFailed { pass: String, reason: String },
}

/// 场景加载相关的错误
#[derive(Debug)]
pub enum SceneLoadError {
    /// 场景文件不存在
    FileNotFound(PathBuf),

    /// 文件格式错误（标记、版本、长度）
    InvalidFormat(String),

    /// 必需的分段大小为 0
    ZeroSizedSection(&'static str),

    /// 纹理描述无效
    InvalidTexture { index: usize, reason: String },

    /// 数据文件长度不足
    Truncated { expected: u64, actual: u64 },

    /// 上传字节数与计算的上传大小不一致
    UploadSizeMismatch { expected: u64, consumed: u64 },

    /// 流式读取失败
    StreamingFailed(String),
}

impl DistFrameError {
    /// 是否为设备移除错误
    pub fn is_device_removed(&self) -> bool {
        matches!(self, DistFrameError::Graphics(GraphicsError::DeviceRemoved { .. }))
    }
}

impl fmt::Display for DistFrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistFrameError::Config(e) => write!(f, "Configuration error: {}", e),
            DistFrameError::Graphics(e) => write!(f, "Graphics error: {}", e),
            DistFrameError::SceneLoading(e) => write!(f, "Scene loading error: {}", e),
            DistFrameError::Io(e) => write!(f, "IO error: {}", e),
            DistFrameError::Log(msg) => write!(f, "Log error: {}", msg),
            DistFrameError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::UnsupportedFeatureLevel { required, available } => write!(
                f,
                "GPU and/or driver unsupported: feature level {} required, adapter supports {}",
                required, available
            ),
            GraphicsError::DeviceRemoved { reason } => write!(f, "Device removed: {}", reason),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
            GraphicsError::QueueMismatch { queue, list } => {
                write!(f, "{} command list cannot be executed on the {} queue", list, queue)
            }
            GraphicsError::InvalidResourceState(msg) => write!(f, "Invalid resource state: {}", msg),
            GraphicsError::TrackerCapacityExceeded { capacity } => {
                write!(f, "Resource tracker capacity of {} slots exceeded", capacity)
            }
            GraphicsError::UntrackedResource(id) => {
                write!(f, "Resource #{} is not registered with the tracker", id)
            }
            GraphicsError::InvalidLifecycle { object, expected, actual } => write!(
                f,
                "{} must be {} for this operation, but is {}",
                object, expected, actual
            ),
            GraphicsError::PassFailed { pass, reason } => {
                write!(f, "Render pass '{}' failed: {}", pass, reason)
            }
        }
    }
}

impl fmt::Display for SceneLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneLoadError::FileNotFound(path) => write!(f, "Scene file not found: {}", path.display()),
            SceneLoadError::InvalidFormat(msg) => write!(f, "Invalid scene format: {}", msg),
            SceneLoadError::ZeroSizedSection(name) => {
                write!(f, "Scene section '{}' has zero size", name)
            }
            SceneLoadError::InvalidTexture { index, reason } => {
                write!(f, "Invalid scene texture {}: {}", index, reason)
            }
            SceneLoadError::Truncated { expected, actual } => write!(
                f,
                "Scene data truncated: expected at least {} bytes, found {}",
                expected, actual
            ),
            SceneLoadError::UploadSizeMismatch { expected, consumed } => write!(
                f,
                "Upload byte accounting mismatch: computed {} bytes, consumed {}",
                expected, consumed
            ),
            SceneLoadError::StreamingFailed(msg) => write!(f, "Scene streaming failed: {}", msg),
        }
    }
}

impl std::error::Error for DistFrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DistFrameError::Io(e) => Some(e),
            DistFrameError::Config(e) => Some(e),
            DistFrameError::Graphics(e) => Some(e),
            DistFrameError::SceneLoading(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}
impl std::error::Error for SceneLoadError {}

// 实现 From trait 以便于错误转换
impl From<std::io::Error> for DistFrameError {
    fn from(err: std::io::Error) -> Self {
        DistFrameError::Io(err)
    }
}

impl From<ConfigError> for DistFrameError {
    fn from(err: ConfigError) -> Self {
        DistFrameError::Config(err)
    }
}

impl From<GraphicsError> for DistFrameError {
    fn from(err: GraphicsError) -> Self {
        DistFrameError::Graphics(err)
    }
}

impl From<SceneLoadError> for DistFrameError {
    fn from(err: SceneLoadError) -> Self {
        DistFrameError::SceneLoading(err)
    }
}

/// 致命错误出口
///
/// 记录诊断信息（日志 + 标准错误输出）后终止进程。
/// 这是整个程序唯一的终止路径：设备移除、硬件不支持、资产损坏、通道失败都走这里。
pub fn terminate(err: &anyhow::Error) -> ! {
    tracing::error!(error = %format!("{:#}", err), "Fatal error, terminating");
    let unsupported_hardware = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<GraphicsError>(),
            Some(GraphicsError::UnsupportedFeatureLevel { .. })
        )
    });
    if unsupported_hardware {
        eprintln!("==============================================");
        eprintln!(" GPU and/or driver unsupported");
        eprintln!("==============================================");
    }
    eprintln!("Fatal: {:#}", err);
    std::process::exit(FATAL_EXIT_CODE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err: DistFrameError = GraphicsError::DeviceRemoved {
            reason: "hang".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "Graphics error: Device removed: hang");
        assert!(err.is_device_removed());

        let err: DistFrameError = SceneLoadError::UploadSizeMismatch {
            expected: 10,
            consumed: 12,
        }
        .into();
        assert!(err.to_string().contains("computed 10 bytes, consumed 12"));
        assert!(!err.is_device_removed());
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let err: DistFrameError = SceneLoadError::ZeroSizedSection("index").into();
        let source = err.source().expect("scene errors expose their source");
        assert_eq!(source.to_string(), "Scene section 'index' has zero size");
    }
}
