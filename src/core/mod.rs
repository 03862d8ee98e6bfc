//! 核心功能模块
//!
//! 日志、配置和错误处理。与 GPU 时间线和场景格式无关，可以被任何上层模块使用。
//!
//! # 模块组织
//!
//! - `log`：日志系统，基于 `tracing` 的结构化日志
//! - `config`：配置管理，TOML 文件 + 命令行参数覆盖
//! - `error`：错误处理，统一的错误类型和唯一的致命错误出口

pub mod log;
pub mod config;
pub mod error;

// 重新导出常用类型，方便使用
pub use config::Config;
pub use error::{DistFrameError, Result};
