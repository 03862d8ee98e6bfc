//! 配置管理模块
//!
//! 提供帧调度核心配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = false
//!
//! [device]
//! min_feature_level = "12_0"
//! adapter_feature_level = "12_1"
//! debug_layer = true
//! simulated_gpu_latency_ms = 2
//!
//! [frame]
//! frames_in_flight = 2
//! tracker_capacity = 20
//!
//! [streaming]
//! scene_path = "scene"
//!
//! [streaming.alignment]
//! pitch = 256
//! placement = 512
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use super::error::{ConfigError, Result};
use crate::renderer::texture::AlignmentRules;

/// 引擎配置
///
/// 包含帧调度核心运行所需的所有配置项。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,

    /// 设备配置
    #[serde(default)]
    pub device: DeviceConfig,

    /// 帧调度配置
    #[serde(default)]
    pub frame: FrameConfig,

    /// 场景流式加载配置
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// 调试 / 故障注入配置
    #[serde(default)]
    pub debug: DebugConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// 硬件特性等级
///
/// 按能力递增排序，可以直接比较大小。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeatureLevel {
    #[serde(rename = "11_0")]
    Level11_0,
    #[serde(rename = "11_1")]
    Level11_1,
    #[serde(rename = "12_0")]
    Level12_0,
    #[serde(rename = "12_1")]
    Level12_1,
    #[serde(rename = "12_2")]
    Level12_2,
}

/// 设备配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// 启动所需的最低特性等级
    #[serde(default = "default_min_feature_level")]
    pub min_feature_level: FeatureLevel,

    /// 模拟适配器支持的特性等级
    #[serde(default = "default_adapter_feature_level")]
    pub adapter_feature_level: FeatureLevel,

    /// 是否启用调试层（诊断消息过滤与泄漏报告）
    #[serde(default = "default_debug_layer")]
    pub debug_layer: bool,

    /// 每个命令列表在 GPU 时间线上的模拟执行耗时（毫秒）
    #[serde(default)]
    pub simulated_gpu_latency_ms: u64,
}

/// 帧调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameConfig {
    /// 同时在途的帧数（N >= 2）
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,

    /// 资源状态跟踪器的槽位容量
    #[serde(default = "default_tracker_capacity")]
    pub tracker_capacity: usize,

    /// 渲染目标宽度
    #[serde(default = "default_width")]
    pub width: u32,

    /// 渲染目标高度
    #[serde(default = "default_height")]
    pub height: u32,

    /// CPU 剔除使用的相机位置
    #[serde(default = "default_camera_position")]
    pub camera_position: [f32; 3],

    /// CPU 剔除的最大绘制距离
    #[serde(default = "default_draw_distance")]
    pub draw_distance: f32,

    /// 演示程序渲染的帧数
    #[serde(default = "default_frame_count")]
    pub frame_count: u64,
}

/// 场景流式加载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// 场景目录（包含 scene.hdr / scene.bin）
    #[serde(default = "default_scene_path")]
    pub scene_path: String,

    /// 启动时先生成一个合成场景再加载
    #[serde(default)]
    pub synthetic: bool,

    /// 上传缓冲区的最小尺寸，避免零大小分配
    #[serde(default = "default_staging_floor")]
    pub staging_floor: u64,

    /// 纹理布局对齐规则
    #[serde(default)]
    pub alignment: AlignmentRules,
}

/// 调试 / 故障注入配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugConfig {
    /// 在指定帧开始前模拟设备移除
    #[serde(default)]
    pub inject_device_removal_at_frame: Option<u64>,
}

// 默认值函数
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "dist_frame.log".to_string() }
fn default_min_feature_level() -> FeatureLevel { FeatureLevel::Level12_0 }
fn default_adapter_feature_level() -> FeatureLevel { FeatureLevel::Level12_1 }
fn default_debug_layer() -> bool { cfg!(debug_assertions) }
fn default_frames_in_flight() -> usize { 2 }
fn default_tracker_capacity() -> usize { 20 }
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_camera_position() -> [f32; 3] { [0.0, 0.0, -10.0] }
fn default_draw_distance() -> f32 { 1000.0 }
fn default_frame_count() -> u64 { 120 }
fn default_scene_path() -> String { "scene".to_string() }
fn default_staging_floor() -> u64 { 64 }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            min_feature_level: default_min_feature_level(),
            adapter_feature_level: default_adapter_feature_level(),
            debug_layer: default_debug_layer(),
            simulated_gpu_latency_ms: 0,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: default_frames_in_flight(),
            tracker_capacity: default_tracker_capacity(),
            width: default_width(),
            height: default_height(),
            camera_position: default_camera_position(),
            draw_distance: default_draw_distance(),
            frame_count: default_frame_count(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            scene_path: default_scene_path(),
            synthetic: false,
            staging_floor: default_staging_floor(),
            alignment: AlignmentRules::default(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或无法解析则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--scene <path>`: 场景目录
    /// - `--synthetic`: 生成并加载合成场景
    /// - `--frames <n>`: 渲染帧数
    /// - `--frames-in-flight <n>`: 在途帧数
    /// - `--min-level <level>` / `--adapter-level <level>`: 特性等级（如 `12_0`）
    /// - `--gpu-latency-ms <ms>`: 模拟 GPU 执行耗时
    /// - `--inject-device-removal <frame>`: 在指定帧模拟设备移除
    /// - `--no-debug-layer`: 关闭调试层
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        let value_of = |flag: &str| -> Option<&String> {
            args.iter()
                .position(|a| a == flag)
                .and_then(|idx| args.get(idx + 1))
        };

        if let Some(path) = value_of("--scene") {
            self.streaming.scene_path = path.clone();
        }

        if args.iter().any(|a| a == "--synthetic") {
            self.streaming.synthetic = true;
        }

        if args.iter().any(|a| a == "--no-debug-layer") {
            self.device.debug_layer = false;
        }

        if let Some(count) = value_of("--frames").and_then(|v| v.parse().ok()) {
            self.frame.frame_count = count;
        }

        if let Some(count) = value_of("--frames-in-flight").and_then(|v| v.parse().ok()) {
            self.frame.frames_in_flight = count;
        }

        if let Some(level) = value_of("--min-level").and_then(|v| v.parse().ok()) {
            self.device.min_feature_level = level;
        }

        if let Some(level) = value_of("--adapter-level").and_then(|v| v.parse().ok()) {
            self.device.adapter_feature_level = level;
        }

        if let Some(ms) = value_of("--gpu-latency-ms").and_then(|v| v.parse().ok()) {
            self.device.simulated_gpu_latency_ms = ms;
        }

        if let Some(frame) = value_of("--inject-device-removal").and_then(|v| v.parse().ok()) {
            self.debug.inject_device_removal_at_frame = Some(frame);
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.frame.frames_in_flight < 2 {
            return Err(ConfigError::InvalidValue {
                field: "frame.frames_in_flight".to_string(),
                reason: "At least 2 frames in flight are required".to_string(),
            }
            .into());
        }

        if self.frame.tracker_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "frame.tracker_capacity".to_string(),
                reason: "Tracker capacity must be greater than 0".to_string(),
            }
            .into());
        }

        if self.frame.width == 0 || self.frame.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "frame.width/height".to_string(),
                reason: "Render target dimensions must be greater than 0".to_string(),
            }
            .into());
        }

        if !(self.frame.draw_distance > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "frame.draw_distance".to_string(),
                reason: "Draw distance must be positive".to_string(),
            }
            .into());
        }

        self.streaming.alignment.validate()?;

        Ok(())
    }
}

impl FeatureLevel {
    /// 特性等级名称（如 "12_0"）
    pub fn name(&self) -> &'static str {
        match self {
            FeatureLevel::Level11_0 => "11_0",
            FeatureLevel::Level11_1 => "11_1",
            FeatureLevel::Level12_0 => "12_0",
            FeatureLevel::Level12_1 => "12_1",
            FeatureLevel::Level12_2 => "12_2",
        }
    }
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for FeatureLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "11_0" => Ok(FeatureLevel::Level11_0),
            "11_1" => Ok(FeatureLevel::Level11_1),
            "12_0" => Ok(FeatureLevel::Level12_0),
            "12_1" => Ok(FeatureLevel::Level12_1),
            "12_2" => Ok(FeatureLevel::Level12_2),
            other => Err(ConfigError::InvalidValue {
                field: "feature_level".to_string(),
                reason: format!("Unknown feature level '{}'", other),
            }),
        }
    }
}
