//! 帧上下文
//!
//! N 个（N ≥ 2）帧槽位轮流使用，每个槽位拥有自己的命令列表和最近一次提交时
//! signal 的 Fence 值。槽位被重新使用前，CPU 必须等到该值完成；
//! 已经完成时不等待，因此 CPU 最多领先 GPU N 帧。

use super::command::{CommandList, CommandListType};
use super::device::Device;
use super::queue::Queue;
use crate::core::error::{ConfigError, Result};

/// 最少的飞行帧数量
pub const MIN_FRAMES_IN_FLIGHT: usize = 2;

/// 单个帧槽位
#[derive(Debug)]
struct FrameSlot {
    list: CommandList,
    /// 最近一次使用该槽位提交时 signal 的值，0 表示从未提交
    fence_value: u64,
}

/// 一次 flip 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFlip {
    /// 本帧使用的槽位
    pub slot: usize,
    /// CPU 是否因为槽位尚未完成而阻塞
    pub waited: bool,
    /// 槽位上一次提交的 Fence 值
    pub previous_value: u64,
}

/// 帧上下文
#[derive(Debug)]
pub struct FrameContext {
    slots: Vec<FrameSlot>,
}

impl FrameContext {
    /// 创建 `count` 个帧槽位
    ///
    /// # 参数
    ///
    /// * `device` - 用于创建每个槽位的命令列表
    /// * `count` - 飞行帧数量，至少为 2
    pub fn new(device: &Device, count: usize) -> Result<Self> {
        if count < MIN_FRAMES_IN_FLIGHT {
            return Err(ConfigError::InvalidValue {
                field: "frame.frames_in_flight".to_string(),
                reason: format!("at least {} frames in flight are required, got {}", MIN_FRAMES_IN_FLIGHT, count),
            }
            .into());
        }

        let slots = (0..count)
            .map(|index| FrameSlot {
                list: device.create_command_list(CommandListType::Direct, &format!("Frame {} Command List", index)),
                fence_value: 0,
            })
            .collect();

        tracing::debug!(frames_in_flight = count, "Frame context created");
        Ok(Self { slots })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// 切换到第 `frame_index` 帧的槽位
    ///
    /// 槽位上一次提交的值尚未在 `queue` 的 Fence 上完成时阻塞等待。
    pub fn flip_frame(&mut self, frame_index: u64, queue: &Queue) -> FrameFlip {
        let slot = (frame_index % self.slots.len() as u64) as usize;
        let previous_value = self.slots[slot].fence_value;
        let fence = queue.fence();

        let waited = !fence.is_completed(previous_value);
        if waited {
            tracing::debug!(
                frame = frame_index,
                slot,
                value = previous_value,
                completed = fence.completed_value(),
                "Waiting for frame slot"
            );
            fence.wait_cpu(previous_value);
        }

        FrameFlip {
            slot,
            waited,
            previous_value,
        }
    }

    pub fn command_list_mut(&mut self, slot: usize) -> &mut CommandList {
        &mut self.slots[slot].list
    }

    /// 记录槽位本次提交 signal 的值
    pub fn record_submission(&mut self, slot: usize, fence_value: u64) {
        self.slots[slot].fence_value = fence_value;
    }

    /// 已提交但 `completed` 尚未覆盖的槽位数量
    pub fn in_flight(&self, completed: u64) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.fence_value > completed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceConfig;

    fn device() -> Device {
        Device::initialize(&DeviceConfig {
            debug_layer: false,
            ..DeviceConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_requires_two_slots() {
        let device = device();
        let err = FrameContext::new(&device, 1).unwrap_err();
        assert!(err.to_string().contains("frames_in_flight"));
        assert_eq!(FrameContext::new(&device, 3).unwrap().frames_in_flight(), 3);
    }

    #[test]
    fn test_flip_waits_only_for_unfinished_slot() {
        let device = device();
        let queue = device.graphics_queue();
        let mut frames = FrameContext::new(&device, 2).unwrap();

        // 从未提交过的槽位不等待
        let flip = frames.flip_frame(0, queue);
        assert_eq!(flip.slot, 0);
        assert!(!flip.waited);

        let value = queue.signal_gpu();
        frames.record_submission(0, value);
        queue.fence().wait_cpu(value);

        let flip = frames.flip_frame(2, queue);
        assert_eq!(flip.slot, 0);
        assert_eq!(flip.previous_value, value);
        assert!(!flip.waited);
        assert_eq!(frames.in_flight(queue.fence().completed_value()), 0);
    }

    #[test]
    fn test_in_flight_counts_pending_slots() {
        let device = device();
        let mut frames = FrameContext::new(&device, 2).unwrap();
        frames.record_submission(0, 5);
        frames.record_submission(1, 6);
        assert_eq!(frames.in_flight(4), 2);
        assert_eq!(frames.in_flight(5), 1);
        assert_eq!(frames.in_flight(6), 0);
    }
}
