//! GPU 同步机制模块
//!
//! 提供 CPU-GPU 与 GPU-GPU 之间的 Fence 同步原语。
//!
//! # 设计原则
//!
//! - **单调递增**：Fence 值只增不减，重复使用依靠发出更大的新值
//! - **非阻塞 signal**：`Queue::signal_gpu` 只入队，立即返回要等待的值
//! - **阻塞等待**：`wait_cpu` 挂起调用线程直到观察值 >= 目标值
//!
//! # 使用场景
//!
//! 1. **帧同步**：帧槽位复用前等待其上一次提交完成
//! 2. **资源更新**：场景上传完成前不释放暂存缓冲区
//! 3. **多队列协作**：流式队列的 Fence 通过 `Queue::wait_gpu` 接入图形队列

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;

use crate::core::error::{GraphicsError, Result};

/// Fence
///
/// 单调递增的 64 位计数器。由 GPU 时间线（队列工作线程）推进，
/// CPU 可以等待某个值被达到。克隆得到的是同一个 Fence 的另一个引用。
///
/// # 示例
///
/// ```no_run
/// # use dist_frame::renderer::sync::Fence;
/// let fence = Fence::new("Graphics Fence");
/// // 队列工作线程执行到 signal 命令时推进 Fence
/// fence.wait_cpu(1);
/// ```
#[derive(Clone)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

struct FenceInner {
    name: String,
    /// GPU 侧已完成的值
    value: Mutex<u64>,
    cond: Condvar,
}

impl Fence {
    /// 创建新的 Fence，初始值为 0
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(FenceInner {
                name: name.into(),
                value: Mutex::new(0),
                cond: Condvar::new(),
            }),
        }
    }

    /// Fence 名称
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 当前已完成的值（非阻塞）
    pub fn completed_value(&self) -> u64 {
        *self.inner.value.lock()
    }

    /// 检查特定值是否已完成
    pub fn is_completed(&self, value: u64) -> bool {
        self.completed_value() >= value
    }

    /// 推进 Fence 到给定值
    ///
    /// 小于当前值的推进会被忽略，Fence 永不回退。
    pub(crate) fn complete(&self, value: u64) {
        let mut current = self.inner.value.lock();
        if value > *current {
            *current = value;
            self.inner.cond.notify_all();
        }
    }

    /// 阻塞当前线程直到 Fence 达到 `value`
    ///
    /// 如果已经满足则立即返回。
    pub fn wait_cpu(&self, value: u64) {
        let mut current = self.inner.value.lock();
        if *current >= value {
            return;
        }

        tracing::debug!(fence = %self.inner.name, value, completed = *current, "CPU waiting on fence");
        while *current < value {
            self.inner.cond.wait(&mut current);
        }
    }

    /// 阻塞直到所有 Fence 都达到各自对应的值
    ///
    /// 用于整个设备的排空（`Device::flush`）。
    pub fn wait_cpu_multiple(fences: &[&Fence], values: &[u64]) -> Result<()> {
        if fences.len() != values.len() {
            return Err(GraphicsError::CommandExecution(format!(
                "wait_cpu_multiple got {} fences but {} values",
                fences.len(),
                values.len()
            ))
            .into());
        }

        // 逐个等待等价于等待全部：每个等待返回后其条件保持成立
        for (fence, &value) in fences.iter().zip(values) {
            fence.wait_cpu(value);
        }
        Ok(())
    }

    /// 两个句柄是否指向同一个 Fence
    pub fn same_as(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("name", &self.inner.name)
            .field("completed", &self.completed_value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fence_starts_at_zero() {
        let fence = Fence::new("test");
        assert_eq!(fence.completed_value(), 0);
        assert!(fence.is_completed(0));
        assert!(!fence.is_completed(1));
        // 已满足时立即返回
        fence.wait_cpu(0);
    }

    #[test]
    fn test_fence_never_regresses() {
        let fence = Fence::new("test");
        fence.complete(5);
        fence.complete(3);
        assert_eq!(fence.completed_value(), 5);
        fence.complete(6);
        assert_eq!(fence.completed_value(), 6);
    }

    #[test]
    fn test_wait_cpu_blocks_until_reached() {
        let fence = Fence::new("test");
        let signaler = fence.clone();

        let handle = thread::spawn(move || {
            for value in 1..=3 {
                thread::sleep(Duration::from_millis(5));
                signaler.complete(value);
            }
        });

        fence.wait_cpu(3);
        assert!(fence.completed_value() >= 3);
        handle.join().unwrap();
    }

    #[test]
    fn test_observed_values_monotonic() {
        let fence = Fence::new("test");
        let signaler = fence.clone();

        let handle = thread::spawn(move || {
            for value in 1..=200 {
                signaler.complete(value);
            }
        });

        let mut last = 0;
        while last < 200 {
            let observed = fence.completed_value();
            assert!(observed >= last);
            last = observed;
        }
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_cpu_multiple() {
        let a = Fence::new("a");
        let b = Fence::new("b");
        let (a2, b2) = (a.clone(), b.clone());

        let handle = thread::spawn(move || {
            a2.complete(2);
            thread::sleep(Duration::from_millis(5));
            b2.complete(7);
        });

        Fence::wait_cpu_multiple(&[&a, &b], &[2, 7]).unwrap();
        assert!(a.is_completed(2) && b.is_completed(7));
        handle.join().unwrap();

        assert!(Fence::wait_cpu_multiple(&[&a], &[1, 2]).is_err());
    }

    #[test]
    fn test_same_as() {
        let a = Fence::new("a");
        let b = Fence::new("b");
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }
}
