//! FABRIK 求解器（前向/后向迭代）
//!
//! 位置求解：目标不可达时一次性沿目标方向伸直；否则交替执行
//! 后向（末端钉在目标）和前向（根钉回原位）两遍，每遍都重新施加段长度。
//! 直链的目标落在自身轴线上时先绕根偏折一个小角度，否则两遍都停留在轴线上。

use glam::Vec3;

use crate::config::IkSettings;
use crate::skeleton::{BoneSet, Chain, IkJoint};

use super::{aim_joint, collinear_axis, straight_chain_nudge, write_back_positions};

/// 归一化，零向量时返回 fallback
#[inline]
fn direction_or(v: Vec3, fallback: Vec3) -> Vec3 {
    let n = v.normalize_or_zero();
    if n == Vec3::ZERO {
        fallback
    } else {
        n
    }
}

/// FABRIK 求解器
#[derive(Clone, Copy, Debug)]
pub struct FabrikSolver {
    pub max_iterations: u32,
    pub tolerance: f32,
}

impl Default for FabrikSolver {
    fn default() -> Self {
        Self::from_settings(&IkSettings::default())
    }
}

impl FabrikSolver {
    pub fn new(max_iterations: u32, tolerance: f32) -> Self {
        Self { max_iterations, tolerance }
    }

    pub fn from_settings(settings: &IkSettings) -> Self {
        Self::new(settings.fabrik_iterations, settings.fabrik_tolerance)
    }

    /// 位置求解
    ///
    /// positions.len() 必须等于 lengths.len() + 1，否则原样返回
    pub fn solve_positions(&self, positions: &[Vec3], lengths: &[f32], target: Vec3) -> Vec<Vec3> {
        let mut joints = positions.to_vec();
        let n = joints.len();
        if n < 2 || lengths.len() != n - 1 {
            return joints;
        }

        let base = joints[0];
        let total: f32 = lengths.iter().sum();

        if base.distance(target) >= total {
            // 不可达：沿目标方向完全伸直
            let dir = direction_or(target - base, Vec3::X);
            for i in 0..n - 1 {
                joints[i + 1] = joints[i] + dir * lengths[i];
            }
            return joints;
        }

        if joints[n - 1].distance(target) >= self.tolerance {
            if let Some(axis) = collinear_axis(&joints, target) {
                let nudge = straight_chain_nudge(axis);
                for p in joints.iter_mut().skip(1) {
                    *p = base + nudge * (*p - base);
                }
            }
        }

        for _ in 0..self.max_iterations {
            if joints[n - 1].distance(target) < self.tolerance {
                break;
            }

            // 后向（末端 -> 根）
            joints[n - 1] = target;
            for i in (0..n - 1).rev() {
                let dir = direction_or(joints[i] - joints[i + 1], Vec3::X);
                joints[i] = joints[i + 1] + dir * lengths[i];
            }

            // 前向（根 -> 末端）
            joints[0] = base;
            for i in 0..n - 1 {
                let dir = direction_or(joints[i + 1] - joints[i], Vec3::X);
                joints[i + 1] = joints[i] + dir * lengths[i];
            }
        }

        joints
    }

    /// 在链节点上求解，写回位置并让每个节点的 base_forward 对准子节点
    pub fn solve_joints(&self, joints: &mut [IkJoint], lengths: &[f32], target: Vec3) {
        let positions: Vec<Vec3> = joints.iter().map(|j| j.position).collect();
        if positions.len() < 2 || lengths.len() != positions.len() - 1 {
            return;
        }
        let solved = self.solve_positions(&positions, lengths, target);

        for (joint, pos) in joints.iter_mut().zip(&solved) {
            joint.position = *pos;
        }
        for i in 0..joints.len() - 1 {
            let forward = joints[i + 1].position - joints[i].position;
            let up = joints[i].rotation * joints[i].base_up;
            aim_joint(&mut joints[i], forward, up);
        }
    }

    /// 在骨骼链上求解，返回末端新位置
    ///
    /// 段长度取当前姿势下的关节距离；求解后把段方向变化换算成旋转写回骨骼
    pub fn solve(&self, bones: &mut BoneSet, chain: &Chain, target: Vec3) -> Vec3 {
        let positions = chain.positions(bones);
        let lengths: Vec<f32> = positions.windows(2).map(|w| w[0].distance(w[1])).collect();
        let solved = self.solve_positions(&positions, &lengths, target);

        write_back_positions(bones, chain, &solved);
        bones.bone_position(chain.end_effector())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::BoneLink;
    use glam::Quat;

    fn assert_vec_near(a: Vec3, b: Vec3, eps: f32) {
        assert!((a - b).length() < eps, "{:?} != {:?}", a, b);
    }

    fn spine() -> BoneSet {
        BoneSet::new(vec![
            BoneLink::new("hips").with_position(Vec3::new(0.0, 1.0, 0.0)),
            BoneLink::new("spine").with_parent(0).with_position(Vec3::new(0.0, 1.2, 0.0)),
            BoneLink::new("chest").with_parent(1).with_position(Vec3::new(0.0, 1.4, 0.0)),
            BoneLink::new("neck").with_parent(2).with_position(Vec3::new(0.0, 1.6, 0.0)),
            BoneLink::new("head").with_parent(3).with_position(Vec3::new(0.0, 1.75, 0.0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_positions_preserve_lengths() {
        let solver = FabrikSolver::default();
        let positions = [Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.0, 2.5, 0.0)];
        let lengths = [1.0, 1.0, 0.5];
        let target = Vec3::new(1.0, 1.5, 0.5);

        let solved = solver.solve_positions(&positions, &lengths, target);
        assert_eq!(solved[0], Vec3::ZERO);
        for i in 0..3 {
            assert!((solved[i].distance(solved[i + 1]) - lengths[i]).abs() < 1e-4);
        }
        assert!(solved[3].distance(target) < 1e-2);
    }

    #[test]
    fn test_unreachable_stretches() {
        let solver = FabrikSolver::default();
        let positions = [Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 2.0, 0.0)];
        let target = Vec3::new(10.0, 0.0, 0.0);

        let solved = solver.solve_positions(&positions, &[1.0, 1.0], target);
        assert_vec_near(solved[1], Vec3::new(1.0, 0.0, 0.0), 1e-6);
        assert_vec_near(solved[2], Vec3::new(2.0, 0.0, 0.0), 1e-6);
    }

    #[test]
    fn test_target_on_chain_axis() {
        let solver = FabrikSolver::default();
        let positions = [Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 2.0, 0.0)];
        let target = Vec3::new(0.0, 1.5, 0.0);

        let solved = solver.solve_positions(&positions, &[1.0, 1.0], target);
        assert!(solved[2].distance(target) < 1e-3, "{:?}", solved);
        assert_eq!(solved[0], Vec3::ZERO);
        assert!((solved[0].distance(solved[1]) - 1.0).abs() < 1e-4);
        assert!((solved[1].distance(solved[2]) - 1.0).abs() < 1e-4);

        // 折叠的直链，末端已在目标上：不偏折
        let folded = [Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 0.5, 0.0)];
        let solved = solver.solve_positions(&folded, &[1.0, 0.5], folded[2]);
        assert_eq!(solved, folded.to_vec());
    }

    #[test]
    fn test_mismatched_lengths_is_noop() {
        let solver = FabrikSolver::default();
        let positions = [Vec3::ZERO, Vec3::Y];
        assert_eq!(solver.solve_positions(&positions, &[1.0, 2.0], Vec3::X), positions.to_vec());
    }

    #[test]
    fn test_joint_rotations_follow_segments() {
        let solver = FabrikSolver::default();
        let mut joints = vec![
            IkJoint::new(Some(0), Vec3::ZERO, Quat::IDENTITY),
            IkJoint::new(Some(1), Vec3::new(0.0, 0.0, 1.0), Quat::IDENTITY),
            IkJoint::new(Some(2), Vec3::new(0.0, 0.0, 2.0), Quat::IDENTITY),
        ];
        let target = Vec3::new(0.02, -0.01, 1.7);
        solver.solve_joints(&mut joints, &[1.0, 1.0], target);

        assert!((joints[0].position.distance(joints[1].position) - 1.0).abs() < 1e-4);
        assert!((joints[1].position.distance(joints[2].position) - 1.0).abs() < 1e-4);
        for i in 0..2 {
            let forward = (joints[i + 1].position - joints[i].position).normalize();
            assert_vec_near(joints[i].rotation * Vec3::Z, forward, 1e-4);
        }
    }

    #[test]
    fn test_solve_bones_spine() {
        let mut bones = spine();
        let chain = bones.chain_by_names("hips", "head").unwrap();
        let lengths = chain.segment_lengths(&bones);
        let target = Vec3::new(0.25, 1.55, 0.1);

        let end = FabrikSolver::default().solve(&mut bones, &chain, target);
        assert!(end.distance(target) < 1e-2);

        let positions = chain.positions(&bones);
        assert_vec_near(positions[0], Vec3::new(0.0, 1.0, 0.0), 1e-6);
        for i in 0..lengths.len() {
            assert!((positions[i].distance(positions[i + 1]) - lengths[i]).abs() < 1e-4);
        }
    }
}
