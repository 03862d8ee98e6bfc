//! dist_frame - 帧调度核心
//!
//! 把一帧 GPU 工作组织起来的那一层：多队列提交与 Fence 同步、
//! 资源状态跟踪与屏障生成、场景资产的流式加载、按固定顺序运行的渲染通道。
//! GPU 由一个在工作线程上执行命令列表的模拟时间线代替。
//!
//! # 模块结构
//!
//! - `core`: 日志、配置、错误处理
//! - `renderer`: 设备、队列、Fence、资源跟踪、渲染通道和帧调度
//! - `scene`: 场景文件格式、布局计算、流式加载和批次剔除
//!
//! # 使用示例
//!
//! ```no_run
//! use dist_frame::core::Config;
//! use dist_frame::renderer::{default_passes, Device, RenderSchedule};
//! use std::path::Path;
//!
//! # fn main() -> dist_frame::core::Result<()> {
//! let config = Config::default();
//! let device = Device::initialize(&config.device)?;
//! let mut schedule = RenderSchedule::new(&config, default_passes());
//! schedule.initialize(&device, Path::new("scene"))?;
//! schedule.render(&device)?;
//! device.flush()?;
//! schedule.unload()?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod renderer;
pub mod scene;
