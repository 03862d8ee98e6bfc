//! 批次管理
//!
//! 对象按不透明在前、透明在后的顺序存放，对应两个批次。
//! 每帧在 CPU 上用包围球做距离剔除，结果供渲染通道决定绘制次数。

use nalgebra::Vector3;

use super::format::CpuObjectHeader;

/// 批次类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Opaque,
    Transparent,
}

/// 批次管理器
#[derive(Debug, Default)]
pub struct BatchManager {
    spheres: Vec<(Vector3<f32>, f32)>,
    opaque_count: usize,
    visible_opaque: Vec<u32>,
    visible_transparent: Vec<u32>,
}

impl BatchManager {
    /// # 参数
    ///
    /// * `objects` - 对象头，前 `opaque_count` 个为不透明对象
    pub fn new(objects: &[CpuObjectHeader], opaque_count: usize) -> Self {
        let spheres = objects
            .iter()
            .map(|object| {
                let [x, y, z, radius] = object.bounding_sphere;
                (Vector3::new(x, y, z), radius)
            })
            .collect();

        Self {
            spheres,
            opaque_count: opaque_count.min(objects.len()),
            visible_opaque: Vec::new(),
            visible_transparent: Vec::new(),
        }
    }

    pub fn object_count(&self) -> usize {
        self.spheres.len()
    }

    pub fn batch_len(&self, kind: BatchKind) -> usize {
        match kind {
            BatchKind::Opaque => self.opaque_count,
            BatchKind::Transparent => self.spheres.len() - self.opaque_count,
        }
    }

    /// 每帧的 CPU 剔除
    ///
    /// 包围球最近点到相机的距离不超过 `draw_distance` 时可见。
    pub fn prepare_batches(&mut self, camera: Vector3<f32>, draw_distance: f32) {
        self.visible_opaque.clear();
        self.visible_transparent.clear();

        for (index, (center, radius)) in self.spheres.iter().enumerate() {
            if (center - camera).norm() - radius > draw_distance {
                continue;
            }
            if index < self.opaque_count {
                self.visible_opaque.push(index as u32);
            } else {
                self.visible_transparent.push(index as u32);
            }
        }

        tracing::trace!(
            opaque = self.visible_opaque.len(),
            transparent = self.visible_transparent.len(),
            "Batches prepared"
        );
    }

    pub fn visible_opaque(&self) -> &[u32] {
        &self.visible_opaque
    }

    pub fn visible_transparent(&self) -> &[u32] {
        &self.visible_transparent
    }

    pub fn clear(&mut self) {
        self.spheres.clear();
        self.opaque_count = 0;
        self.visible_opaque.clear();
        self.visible_transparent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn objects() -> Vec<CpuObjectHeader> {
        vec![
            CpuObjectHeader { bounding_sphere: [0.0, 0.0, 5.0, 1.0] },
            CpuObjectHeader { bounding_sphere: [0.0, 0.0, 50.0, 1.0] },
            CpuObjectHeader { bounding_sphere: [0.0, 0.0, 8.0, 2.0] },
        ]
    }

    #[test]
    fn test_batches_split_by_opaque_count() {
        let manager = BatchManager::new(&objects(), 2);
        assert_eq!(manager.object_count(), 3);
        assert_eq!(manager.batch_len(BatchKind::Opaque), 2);
        assert_eq!(manager.batch_len(BatchKind::Transparent), 1);
    }

    #[test]
    fn test_distance_culling() {
        let mut manager = BatchManager::new(&objects(), 2);
        manager.prepare_batches(Vector3::zeros(), 10.0);
        assert_eq!(manager.visible_opaque(), &[0]);
        assert_eq!(manager.visible_transparent(), &[2]);

        // 半径计入距离：50 - 1 = 49
        manager.prepare_batches(Vector3::zeros(), 49.0);
        assert_eq!(manager.visible_opaque(), &[0, 1]);
    }
}
