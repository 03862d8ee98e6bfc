//! 资源状态跟踪器
//!
//! "资源 R 当前处于什么 GPU 可见状态"的唯一来源。渲染通道从不手写同步，
//! 而是在访问资源前调用 [`ResourceTracker::transition`]：
//!
//! - 状态不同：向当前命令列表追加屏障并更新记录
//! - 状态相同：什么也不做（冗余屏障消除）
//!
//! 记录的是"正在构建的命令流中此刻的状态"，而不是 GPU 上的实时状态。
//! 资源首次使用前以 COMMON 状态注册。跟踪器容量在创建时固定，
//! 超出容量属于配置错误。

use std::collections::HashMap;

use super::command::{Barrier, CommandList};
use super::resource::{ResourceId, ResourceState};
use crate::core::error::{GraphicsError, Result};

/// 跟踪器快照，用于渲染通道失败时回滚
#[derive(Debug, Clone)]
pub struct TrackerCheckpoint {
    states: HashMap<ResourceId, ResourceState>,
    barriers_emitted: u64,
}

/// 资源状态跟踪器
#[derive(Debug)]
pub struct ResourceTracker {
    capacity: usize,
    states: HashMap<ResourceId, ResourceState>,
    barriers_emitted: u64,
}

impl ResourceTracker {
    /// 创建固定容量的跟踪器
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            states: HashMap::with_capacity(capacity),
            barriers_emitted: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 已注册的资源数量
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// 注册资源
    ///
    /// # 参数
    ///
    /// * `id` - 资源 ID
    /// * `initial` - 资源在命令流中的初始状态（通常为 COMMON）
    pub fn register(&mut self, id: ResourceId, initial: ResourceState) -> Result<()> {
        if !initial.is_valid() {
            return Err(GraphicsError::InvalidResourceState(format!(
                "resource {} registered in {:?}",
                id, initial
            ))
            .into());
        }
        if self.states.contains_key(&id) {
            return Err(GraphicsError::InvalidResourceState(format!(
                "resource {} is already registered",
                id
            ))
            .into());
        }
        if self.states.len() >= self.capacity {
            tracing::error!(capacity = self.capacity, resource = %id, "Resource tracker capacity exceeded");
            return Err(GraphicsError::TrackerCapacityExceeded {
                capacity: self.capacity,
            }
            .into());
        }

        self.states.insert(id, initial);
        Ok(())
    }

    /// 注销资源，返回资源是否曾被注册
    pub fn unregister(&mut self, id: ResourceId) -> bool {
        self.states.remove(&id).is_some()
    }

    /// 资源当前记录的状态
    pub fn state(&self, id: ResourceId) -> Option<ResourceState> {
        self.states.get(&id).copied()
    }

    pub fn is_tracked(&self, id: ResourceId) -> bool {
        self.states.contains_key(&id)
    }

    /// 到目前为止记录到命令列表中的屏障数量
    pub fn barriers_emitted(&self) -> u64 {
        self.barriers_emitted
    }

    fn check_request(&self, id: ResourceId, target: ResourceState) -> Result<ResourceState> {
        let current = self
            .state(id)
            .ok_or(GraphicsError::UntrackedResource(id.0))?;
        if !target.is_valid() {
            return Err(GraphicsError::InvalidResourceState(format!(
                "resource {} cannot transition to {:?}",
                id, target
            ))
            .into());
        }
        Ok(current)
    }

    /// 把资源转换到目标状态
    ///
    /// 返回是否记录了屏障；已经处于目标状态时不记录任何东西。
    pub fn transition(&mut self, list: &mut CommandList, id: ResourceId, target: ResourceState) -> Result<bool> {
        let current = self.check_request(id, target)?;
        if current == target {
            return Ok(false);
        }

        list.resource_barrier(vec![Barrier {
            resource: id,
            before: current,
            after: target,
        }]);
        self.states.insert(id, target);
        self.barriers_emitted += 1;
        tracing::trace!(resource = %id, before = ?current, after = ?target, "Resource transition");
        Ok(true)
    }

    /// 批量转换，所有需要的屏障合并为一条屏障命令
    ///
    /// 先校验全部请求，任何一个失败时记录不变。返回记录的屏障数量。
    pub fn transition_many(
        &mut self,
        list: &mut CommandList,
        requests: &[(ResourceId, ResourceState)],
    ) -> Result<usize> {
        for &(id, target) in requests {
            self.check_request(id, target)?;
        }

        let mut barriers = Vec::with_capacity(requests.len());
        for &(id, target) in requests {
            let current = self.states.insert(id, target).unwrap_or(ResourceState::COMMON);
            if current != target {
                barriers.push(Barrier {
                    resource: id,
                    before: current,
                    after: target,
                });
            }
        }

        let count = barriers.len();
        if count > 0 {
            tracing::trace!(barriers = count, "Batched resource transitions");
            list.resource_barrier(barriers);
            self.barriers_emitted += count as u64;
        }
        Ok(count)
    }

    /// 保存当前记录
    pub fn checkpoint(&self) -> TrackerCheckpoint {
        TrackerCheckpoint {
            states: self.states.clone(),
            barriers_emitted: self.barriers_emitted,
        }
    }

    /// 回滚到快照，丢弃快照之后记录但未提交的转换
    pub fn rollback(&mut self, checkpoint: TrackerCheckpoint) {
        tracing::debug!(
            discarded = self.barriers_emitted.saturating_sub(checkpoint.barriers_emitted),
            "Resource tracker rolled back"
        );
        self.states = checkpoint.states;
        self.barriers_emitted = checkpoint.barriers_emitted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::command::{Command, CommandListType};

    fn recording_list() -> CommandList {
        let mut list = CommandList::new(CommandListType::Direct, "test");
        list.reset().unwrap();
        list
    }

    #[test]
    fn test_redundant_transition_is_noop() {
        let mut tracker = ResourceTracker::new(4);
        let mut list = recording_list();
        let id = ResourceId(1);
        tracker.register(id, ResourceState::COMMON).unwrap();

        assert!(tracker.transition(&mut list, id, ResourceState::RENDER_TARGET).unwrap());
        assert!(!tracker.transition(&mut list, id, ResourceState::RENDER_TARGET).unwrap());

        assert_eq!(tracker.state(id), Some(ResourceState::RENDER_TARGET));
        assert_eq!(tracker.barriers_emitted(), 1);
        assert_eq!(list.stats().barriers, 1);
    }

    #[test]
    fn test_transition_many_batches() {
        let mut tracker = ResourceTracker::new(4);
        let mut list = recording_list();
        for id in 1..=3 {
            tracker.register(ResourceId(id), ResourceState::COMMON).unwrap();
        }
        tracker.transition(&mut list, ResourceId(3), ResourceState::PIXEL_SHADER_RESOURCE).unwrap();

        let emitted = tracker
            .transition_many(
                &mut list,
                &[
                    (ResourceId(1), ResourceState::RENDER_TARGET),
                    (ResourceId(2), ResourceState::DEPTH_WRITE),
                    (ResourceId(3), ResourceState::PIXEL_SHADER_RESOURCE),
                ],
            )
            .unwrap();

        assert_eq!(emitted, 2);
        assert_eq!(list.stats().barrier_batches, 2);
        match list.commands().last() {
            Some(Command::ResourceBarrier(barriers)) => assert_eq!(barriers.len(), 2),
            other => panic!("expected a barrier batch, got {:?}", other),
        }
    }

    #[test]
    fn test_transition_many_is_atomic() {
        let mut tracker = ResourceTracker::new(4);
        let mut list = recording_list();
        tracker.register(ResourceId(1), ResourceState::COMMON).unwrap();

        let result = tracker.transition_many(
            &mut list,
            &[
                (ResourceId(1), ResourceState::RENDER_TARGET),
                (ResourceId(9), ResourceState::RENDER_TARGET),
            ],
        );
        assert!(result.is_err());
        assert_eq!(tracker.state(ResourceId(1)), Some(ResourceState::COMMON));
        assert!(list.commands().is_empty());
    }

    #[test]
    fn test_capacity_is_fixed() {
        let mut tracker = ResourceTracker::new(2);
        tracker.register(ResourceId(1), ResourceState::COMMON).unwrap();
        tracker.register(ResourceId(2), ResourceState::COMMON).unwrap();
        let err = tracker.register(ResourceId(3), ResourceState::COMMON).unwrap_err();
        assert!(err.to_string().contains("capacity of 2 slots exceeded"));

        assert!(tracker.unregister(ResourceId(1)));
        assert!(!tracker.unregister(ResourceId(1)));
        tracker.register(ResourceId(3), ResourceState::COMMON).unwrap();
    }

    #[test]
    fn test_invalid_requests() {
        let mut tracker = ResourceTracker::new(2);
        let mut list = recording_list();
        assert!(tracker.transition(&mut list, ResourceId(5), ResourceState::COPY_DEST).is_err());

        tracker.register(ResourceId(1), ResourceState::COMMON).unwrap();
        assert!(tracker.register(ResourceId(1), ResourceState::COMMON).is_err());
        assert!(tracker
            .transition(&mut list, ResourceId(1), ResourceState::RENDER_TARGET | ResourceState::COPY_SOURCE)
            .is_err());
        assert!(tracker
            .register(ResourceId(2), ResourceState::UNORDERED_ACCESS | ResourceState::DEPTH_WRITE)
            .is_err());
    }

    #[test]
    fn test_checkpoint_rollback() {
        let mut tracker = ResourceTracker::new(2);
        let mut list = recording_list();
        let id = ResourceId(1);
        tracker.register(id, ResourceState::COMMON).unwrap();
        tracker.transition(&mut list, id, ResourceState::RENDER_TARGET).unwrap();

        let checkpoint = tracker.checkpoint();
        tracker.transition(&mut list, id, ResourceState::PIXEL_SHADER_RESOURCE).unwrap();
        assert_eq!(tracker.barriers_emitted(), 2);

        tracker.rollback(checkpoint);
        assert_eq!(tracker.state(id), Some(ResourceState::RENDER_TARGET));
        assert_eq!(tracker.barriers_emitted(), 1);
    }
}
