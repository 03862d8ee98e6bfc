//! 渲染器模块
//!
//! 模拟的 GPU 设备和建立在它之上的帧调度。
//!
//! # 架构
//!
//! - `Device`：拥有四个队列（图形、计算、拷贝、流式）、调试层和资源创建
//! - `Queue` / `Fence`：每个队列一个工作线程，按提交顺序执行命令列表
//! - `ResourceTracker`：每个被跟踪资源的最后记录状态，只在状态变化时生成屏障
//! - `RenderSchedule`：帧槽位、CPU 准备、按固定顺序运行的渲染通道、提交

pub mod command;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod diagnostics;
pub mod frame;
pub mod pass;
pub mod passes;
pub mod queue;
pub mod resource;
pub mod schedule;
pub mod streaming;
pub mod sync;
pub mod texture;
pub mod tracker;

pub use command::{CommandList, CommandListType};
pub use context::{EngineContext, RenderContext, RenderTarget};
pub use device::Device;
pub use pass::{PassState, RenderPass};
pub use passes::default_passes;
pub use queue::{Queue, QueueKind};
pub use resource::{ResourceId, ResourceState};
pub use schedule::{FrameStats, RenderSchedule};
pub use sync::Fence;
pub use tracker::ResourceTracker;
