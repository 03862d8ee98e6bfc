//! dist_frame - 帧调度核心的命令行入口
//!
//! 加载（或生成）一个场景，在模拟的 GPU 时间线上渲染固定数量的帧，然后有序卸载。
//!
//! # 使用方法
//!
//! ```bash
//! # 生成合成场景并渲染 120 帧
//! cargo run -- --synthetic --scene target/scene
//!
//! # 模拟 GPU 耗时，观察帧槽位的背压
//! cargo run -- --synthetic --gpu-latency-ms 8 --frames 30
//!
//! # 在第 5 帧注入设备移除
//! cargo run -- --synthetic --inject-device-removal 5
//!
//! # 导出生效的配置
//! cargo run -- --frames 10 --save-config config.toml
//! ```
//!
//! # 流程
//!
//! ```text
//! Config → Logger → Device → RenderSchedule::initialize
//!        → render × N → Device::flush → unload
//! ```
//!
//! 任何错误都是致命的，统一经由 `core::error::terminate` 退出。

use std::path::PathBuf;

use anyhow::Context;
use dist_frame::core::{error, log, Config};
use dist_frame::renderer::{default_passes, Device, RenderSchedule};
use dist_frame::scene::SceneAssetBuilder;
use tracing::{debug, info};

fn main() {
    if let Err(err) = run() {
        error::terminate(&err);
    }
}

fn run() -> anyhow::Result<()> {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");

    // 2. 应用命令行参数
    let args: Vec<String> = std::env::args().collect();
    config.apply_args(&args);

    // 3. 验证配置
    config.validate().context("Invalid configuration")?;

    // 生效的配置可以导出，作为 config.toml 的起点
    if let Some(path) = flag_value(&args, "--save-config") {
        config
            .save_to_file(path)
            .with_context(|| format!("Failed to save configuration to {}", path))?;
    }

    // 4. 初始化日志系统
    let log_file = if config.logging.file_output {
        Some(config.logging.log_file.as_str())
    } else {
        None
    };
    log::init_logger(config.logging.level, config.logging.file_output, log_file)
        .context("Failed to initialize logging")?;
    info!(version = env!("CARGO_PKG_VERSION"), "dist_frame starting");

    // 5. 设备
    let device = Device::initialize(&config.device).context("Failed to create device")?;

    // 6. 场景
    let scene_folder = PathBuf::from(&config.streaming.scene_path);
    if config.streaming.synthetic {
        SceneAssetBuilder::synthetic()
            .write(&scene_folder, &config.streaming.alignment)
            .context("Failed to write synthetic scene")?;
    }

    let mut schedule = RenderSchedule::new(&config, default_passes());
    schedule
        .initialize(&device, &scene_folder)
        .with_context(|| format!("Failed to initialize render schedule for {}", scene_folder.display()))?;

    // 7. 帧循环
    for frame in 0..config.frame.frame_count {
        if config.debug.inject_device_removal_at_frame == Some(frame) {
            device.simulate_device_removal(format!("injected at frame {}", frame));
        }
        schedule.render(&device).with_context(|| format!("Frame {} failed", frame))?;
    }

    let stats = schedule.frame_stats();
    info!(
        frames = stats.frames_submitted,
        last_fence_value = stats.last_fence_value,
        cpu_waits = stats.cpu_waits,
        max_in_flight = stats.max_in_flight,
        "Frame loop finished"
    );

    // 8. 有序卸载
    device.flush().context("Failed to flush device")?;
    schedule.unload().context("Failed to unload render schedule")?;

    let report = device.unload();
    for message in &report.diagnostics {
        debug!(severity = ?message.severity, id = ?message.id, "{}", message.text);
    }
    info!(
        live_objects = report.live_objects,
        diagnostics = report.diagnostics.len(),
        "Device unloaded"
    );
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|idx| args.get(idx + 1))
        .map(String::as_str)
}
