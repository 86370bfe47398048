//! CCD 求解器（循环坐标下降）
//!
//! 每次迭代从末端执行器的父骨骼开始向根回溯，逐个关节把
//! "关节 -> 末端" 旋转到 "关节 -> 目标"。每调整一个关节立即刷新世界矩阵，
//! 同一轮中后续关节看到的是更新后的姿势。
//!
//! 循环内不施加角度限制（限制在求解后由 BoneConstraints 处理），
//! 只支持可选的单步最大旋转角。收敛性没有严格保证，以最大迭代次数为界；
//! 接近完全伸直的目标收敛较慢。
//!
//! 整条链与目标共线（直链、目标在轴线上且可达）时，每轮开始前把最靠根的
//! 可旋转关节偏折一个小角度，否则每个关节都只会得到同向/反向旋转。
//! 不可旋转（无 ROTATABLE）的骨骼在回溯中跳过。

use glam::{Quat, Vec3};

use crate::config::IkSettings;
use crate::math::{clamp_rotation_angle, from_to_rotation, EPSILON};
use crate::skeleton::{BoneLink, BoneSet, Chain, IkJoint};

use super::{aim_joint, collinear_axis, constraints::apply_role_constraint, straight_chain_nudge};

/// CCD 求解器
#[derive(Clone, Copy, Debug)]
pub struct CcdSolver {
    pub max_iterations: u32,
    pub tolerance: f32,
    /// 单个关节每步最大旋转角（弧度），None 表示不限制
    pub angle_limit: Option<f32>,
}

impl Default for CcdSolver {
    fn default() -> Self {
        Self::from_settings(&IkSettings::default())
    }
}

impl CcdSolver {
    pub fn new(max_iterations: u32, tolerance: f32) -> Self {
        Self { max_iterations, tolerance, angle_limit: None }
    }

    pub fn from_settings(settings: &IkSettings) -> Self {
        Self::new(settings.ccd_iterations, settings.ccd_tolerance)
    }

    pub fn with_angle_limit(mut self, limit: f32) -> Self {
        self.angle_limit = Some(limit);
        self
    }

    /// 一次性求解：末端沿父链回溯到根骨骼
    pub fn solve_ccd(
        bones: &mut BoneSet,
        end_effector: usize,
        target: Vec3,
        max_iterations: u32,
        tolerance: f32,
    ) {
        Self::new(max_iterations, tolerance).solve(bones, end_effector, target);
    }

    /// 求解，回溯到根骨骼；返回末端位置
    pub fn solve(&self, bones: &mut BoneSet, end_effector: usize, target: Vec3) -> Vec3 {
        self.solve_until(bones, end_effector, None, target)
    }

    /// 求解，只调整链内关节；返回末端位置
    pub fn solve_chain(&self, bones: &mut BoneSet, chain: &Chain, target: Vec3) -> Vec3 {
        self.solve_until(bones, chain.end_effector(), Some(chain.root()), target)
    }

    fn solve_until(
        &self,
        bones: &mut BoneSet,
        end_effector: usize,
        stop_at: Option<usize>,
        target: Vec3,
    ) -> Vec3 {
        if end_effector >= bones.len() {
            return Vec3::ZERO;
        }

        // 回溯顺序：末端的父骨骼 -> 根
        let mut sweep = Vec::new();
        let mut next = bones.get(end_effector).and_then(|b| b.parent_id());
        while let Some(joint) = next {
            sweep.push(joint);
            if Some(joint) == stop_at {
                break;
            }
            next = bones.get(joint).and_then(|b| b.parent_id());
        }

        for _ in 0..self.max_iterations {
            bones.update_world_transforms();
            if bones.bone_position(end_effector).distance(target) < self.tolerance {
                break;
            }

            self.unfold_straight_chain(bones, &sweep, end_effector, target);
            for &joint in &sweep {
                self.rotate_joint(bones, joint, end_effector, target);
            }
        }

        bones.bone_position(end_effector)
    }

    /// 链与目标共线且目标可达时，偏折最靠根的可旋转关节
    fn unfold_straight_chain(&self, bones: &mut BoneSet, sweep: &[usize], end_effector: usize, target: Vec3) {
        let Some(&pivot) = sweep.iter().rev().find(|&&i| bones.get(i).is_some_and(BoneLink::is_rotatable)) else {
            return;
        };

        let mut points: Vec<Vec3> = sweep.iter().rev().map(|&i| bones.bone_position(i)).collect();
        points.push(bones.bone_position(end_effector));
        let reach: f32 = points.windows(2).map(|w| w[0].distance(w[1])).sum();
        if points[0].distance(target) >= reach - self.tolerance {
            return;
        }

        if let Some(axis) = collinear_axis(&points, target) {
            log::debug!("[IK] ccd: chain collinear with target, unfolding at bone {}", pivot);
            bones.rotate_bone_world(pivot, straight_chain_nudge(axis));
        }
    }

    /// 把 "关节 -> 末端" 转到 "关节 -> 目标"
    fn rotate_joint(&self, bones: &mut BoneSet, joint: usize, end_effector: usize, target: Vec3) {
        if !bones.get(joint).is_some_and(BoneLink::is_rotatable) {
            return;
        }
        let joint_pos = bones.bone_position(joint);
        let to_end = bones.bone_position(end_effector) - joint_pos;
        let to_target = target - joint_pos;
        if to_end.length_squared() < EPSILON || to_target.length_squared() < EPSILON {
            return;
        }

        let mut rot = from_to_rotation(to_end, to_target);
        if let Some(limit) = self.angle_limit {
            rot = clamp_rotation_angle(rot, limit);
        }
        if rot != Quat::IDENTITY {
            bones.rotate_bone_world(joint, rot);
        }
    }

    /// 在链节点上求解（纯位置），求解后重新计算节点旋转并施加角色约束
    pub fn solve_joints(&self, joints: &mut [IkJoint], target: Vec3) {
        let n = joints.len();
        if n < 2 {
            return;
        }

        let reach: f32 = joints.windows(2).map(|w| w[0].position.distance(w[1].position)).sum();

        for _ in 0..self.max_iterations {
            if joints[n - 1].position.distance(target) < self.tolerance {
                break;
            }

            let base = joints[0].position;
            if base.distance(target) < reach - self.tolerance {
                let points: Vec<Vec3> = joints.iter().map(|j| j.position).collect();
                if let Some(axis) = collinear_axis(&points, target) {
                    let nudge = straight_chain_nudge(axis);
                    for joint in joints.iter_mut().skip(1) {
                        joint.position = base + nudge * (joint.position - base);
                    }
                }
            }

            for i in (0..n - 1).rev() {
                let joint_pos = joints[i].position;
                let to_end = joints[n - 1].position - joint_pos;
                let to_target = target - joint_pos;
                if to_end.length_squared() < EPSILON || to_target.length_squared() < EPSILON {
                    continue;
                }
                let mut rot = from_to_rotation(to_end, to_target);
                if let Some(limit) = self.angle_limit {
                    rot = clamp_rotation_angle(rot, limit);
                }
                for joint in joints.iter_mut().skip(i + 1) {
                    joint.position = joint_pos + rot * (joint.position - joint_pos);
                }
            }
        }

        for i in 0..n - 1 {
            let forward = joints[i + 1].position - joints[i].position;
            let up = joints[i].rotation * joints[i].base_up;
            aim_joint(&mut joints[i], forward, up);
            apply_role_constraint(joints, i);
        }
        joints[n - 1].rotation = joints[n - 2].rotation;
        apply_role_constraint(joints, n - 1);
    }
}
