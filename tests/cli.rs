//! 运行编译好的二进制，检查致命错误路径的退出码和标准错误输出

use std::path::Path;
use std::process::{Command, Output};

fn run(scene: &Path, extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dist_frame"))
        .arg("--synthetic")
        .arg("--scene")
        .arg(scene)
        .args(["--frames", "4"])
        .args(extra)
        .output()
        .expect("failed to launch dist_frame")
}

#[test]
fn renders_synthetic_scene_and_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(&dir.path().join("scene"), &[]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
}

#[test]
fn device_removal_terminates_with_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(&dir.path().join("scene"), &["--inject-device-removal", "2"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Device removed"), "stderr: {}", stderr);
    assert!(stderr.contains("Frame 2 failed"), "stderr: {}", stderr);
}

#[test]
fn unsupported_adapter_terminates() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(&dir.path().join("scene"), &["--adapter-level", "11_0"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("GPU and/or driver unsupported"), "stderr: {}", stderr);
}

#[test]
fn single_frame_in_flight_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(&dir.path().join("scene"), &["--frames-in-flight", "1"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("frame.frames_in_flight"), "stderr: {}", stderr);
}

#[test]
fn saves_effective_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("effective.toml");
    let output = run(
        &dir.path().join("scene"),
        &["--frames-in-flight", "3", "--save-config", config_path.to_str().unwrap()],
    );
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let saved = dist_frame::core::Config::from_file(&config_path).unwrap();
    assert_eq!(saved.frame.frames_in_flight, 3);
    assert_eq!(saved.frame.frame_count, 4);
    assert!(saved.streaming.synthetic);
}
