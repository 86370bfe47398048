//! 两骨骼解析 IK（上臂/前臂、大腿/小腿）
//!
//! 余弦定理求根关节角，极向量确定弯曲平面。
//! 目标距离被钳制到可解区间，段长度始终保持不变。

use glam::{Quat, Vec3};

use crate::config::IkSettings;
use crate::math::{euler_degrees_to_quat, from_to_rotation, look_rotation, quat_to_euler_degrees, EPSILON};
use crate::skeleton::{world_delta_to_pose, BoneSet, Chain, IkJoint};

/// 两骨骼求解结果
///
/// 两个增量均为模型空间旋转：先把 root_delta 作用于根骨骼，
/// 再把 mid_delta 作用于中间骨骼。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TwoBoneSolution {
    pub root_delta: Quat,
    pub mid_delta: Quat,
    /// 求解后的中间关节位置
    pub mid_position: Vec3,
    /// 求解后的末端位置（钳制后的目标）
    pub end_position: Vec3,
    /// 弯曲平面法线
    pub bend_normal: Vec3,
}

impl TwoBoneSolution {
    fn unchanged(mid: Vec3, end: Vec3) -> Self {
        Self {
            root_delta: Quat::IDENTITY,
            mid_delta: Quat::IDENTITY,
            mid_position: mid,
            end_position: end,
            bend_normal: Vec3::ZERO,
        }
    }
}

/// 两骨骼解析求解器
#[derive(Clone, Copy, Debug)]
pub struct AnalyticTwoBoneSolver {
    /// 可解区间收缩量
    pub epsilon: f32,
}

impl Default for AnalyticTwoBoneSolver {
    fn default() -> Self {
        Self::from_settings(&IkSettings::default())
    }
}

impl AnalyticTwoBoneSolver {
    pub fn new(epsilon: f32) -> Self {
        Self { epsilon }
    }

    pub fn from_settings(settings: &IkSettings) -> Self {
        Self::new(settings.two_bone_epsilon)
    }

    /// 求解根/中间关节的旋转增量
    ///
    /// 退化情况：
    /// - 目标与根重合或段长度为零：不旋转
    /// - 极向量与目标方向共线：弯曲平面法线回退到 cross(dir, Y)，再回退到 cross(dir, X)
    #[allow(clippy::too_many_arguments)]
    pub fn solve(
        &self,
        root: Vec3,
        mid: Vec3,
        end: Vec3,
        len_upper: f32,
        len_lower: f32,
        target: Vec3,
        pole: Vec3,
    ) -> TwoBoneSolution {
        let to_target = target - root;
        let raw_dist = to_target.length();
        if raw_dist < EPSILON || len_upper.min(len_lower) <= self.epsilon {
            log::debug!("[IK] two-bone: degenerate input (dist={}, lengths={}/{})", raw_dist, len_upper, len_lower);
            return TwoBoneSolution::unchanged(mid, end);
        }

        let dir = to_target / raw_dist;
        let min_reach = (len_upper - len_lower).abs() + self.epsilon;
        let max_reach = len_upper + len_lower - self.epsilon;
        let dist = raw_dist.clamp(min_reach, max_reach);

        let bend_normal = bend_plane_normal(dir, pole - root);
        let bend_dir = bend_normal.cross(dir).normalize();

        // 余弦定理
        let cos_root = ((len_upper * len_upper + dist * dist - len_lower * len_lower)
            / (2.0 * len_upper * dist))
            .clamp(-1.0, 1.0);
        let root_angle = cos_root.acos();

        let mid_position = root
            + dir * (root_angle.cos() * len_upper)
            + bend_dir * (root_angle.sin() * len_upper);
        let end_position = root + dir * dist;

        let root_delta = from_to_rotation(mid - root, mid_position - root);
        let mid_delta = from_to_rotation(root_delta * (end - mid), end_position - mid_position);

        TwoBoneSolution { root_delta, mid_delta, mid_position, end_position, bend_normal }
    }

    /// 在链节点上求解（joints[0..3] = root, mid, end）
    ///
    /// 写回位置，并把 root/mid 的旋转设为 base_forward 对准子节点、
    /// base_up 对准弯曲平面法线
    pub fn solve_joints(
        &self,
        joints: &mut [IkJoint],
        len_upper: f32,
        len_lower: f32,
        target: Vec3,
        pole: Vec3,
    ) {
        if joints.len() < 3 {
            return;
        }
        let sol = self.solve(
            joints[0].position,
            joints[1].position,
            joints[2].position,
            len_upper,
            len_lower,
            target,
            pole,
        );
        if sol.bend_normal == Vec3::ZERO {
            return;
        }

        joints[1].position = sol.mid_position;
        joints[2].position = sol.end_position;

        for i in 0..2 {
            let forward = joints[i + 1].position - joints[i].position;
            let basis = look_rotation(joints[i].base_forward, joints[i].base_up);
            joints[i].rotation = (look_rotation(forward, sol.bend_normal) * basis.inverse()).normalize();
            joints[i].prev_up = sol.bend_normal;
        }
    }

    /// 在骨骼链上求解（chain 必须正好 3 根骨骼），返回末端新位置
    pub fn solve_bones(&self, bones: &mut BoneSet, chain: &Chain, target: Vec3, pole: Vec3) -> Vec3 {
        let Some(&end_idx) = chain.indices().last() else {
            return Vec3::ZERO;
        };
        if chain.len() != 3 {
            return bones.bone_position(end_idx);
        }
        let (root_idx, mid_idx) = (chain.indices()[0], chain.indices()[1]);

        let root = bones.bone_position(root_idx);
        let mid = bones.bone_position(mid_idx);
        let end = bones.bone_position(end_idx);
        let sol = self.solve(root, mid, end, root.distance(mid), mid.distance(end), target, pole);

        bones.rotate_bone_world(root_idx, sol.root_delta);
        bones.rotate_bone_world(mid_idx, sol.mid_delta);
        bones.bone_position(end_idx)
    }
}

/// 弯曲平面法线
fn bend_plane_normal(dir: Vec3, pole_dir: Vec3) -> Vec3 {
    let n = dir.cross(pole_dir);
    if n.length_squared() >= EPSILON {
        return n.normalize();
    }
    log::debug!("[IK] two-bone: pole colinear with target direction, using world up");
    let n = dir.cross(Vec3::Y);
    if n.length_squared() >= EPSILON {
        return n.normalize();
    }
    dir.cross(Vec3::X).normalize()
}

// ============================================================================
// 欧拉角数组接口（渲染器维护的 旋转/平移 数组）
// ============================================================================

/// 数组长度不足时补零
fn ensure_capacity(list: &mut Vec<Vec3>, count: usize) {
    if list.len() < count {
        list.resize(count, Vec3::ZERO);
    }
}

/// 把模型空间增量写入欧拉角数组（角度，原地修改）
fn apply_world_delta(
    bones: &BoneSet,
    rotations: &mut [Vec3],
    world: &[glam::Mat4],
    index: usize,
    delta: Quat,
) {
    let Some(bone) = bones.get(index) else {
        return;
    };
    let parent_rot = match bone.parent_id() {
        Some(p) => Quat::from_mat4(&world[p]).normalize(),
        None => Quat::IDENTITY,
    };
    let pose = euler_degrees_to_quat(rotations[index]);
    let new_pose = world_delta_to_pose(parent_rot, bone.bind_rotation, pose, delta);
    rotations[index] = quat_to_euler_degrees(new_pose);
}

/// 腿部两骨骼 IK，旋转以欧拉角（度）原地更新
///
/// 返回求解后末端骨骼的位置；骨骼名称找不到时返回零向量
#[allow(clippy::too_many_arguments)]
pub fn solve_leg(
    bones: &BoneSet,
    rotations: &mut Vec<Vec3>,
    translations: &mut Vec<Vec3>,
    upper: &str,
    lower: &str,
    end: &str,
    target: Vec3,
    pole: Vec3,
) -> Vec3 {
    let (Some(upper), Some(lower), Some(end)) =
        (bones.find_bone(upper), bones.find_bone(lower), bones.find_bone(end))
    else {
        return Vec3::ZERO;
    };

    ensure_capacity(rotations, bones.len());
    ensure_capacity(translations, bones.len());

    let world = bones.compute_world_matrices_euler(rotations, translations);
    let root_pos = world[upper].col(3).truncate();
    let mid_pos = world[lower].col(3).truncate();
    let end_pos = world[end].col(3).truncate();

    if root_pos.distance(target) < EPSILON {
        return end_pos;
    }

    let solver = AnalyticTwoBoneSolver::default();
    let sol = solver.solve(
        root_pos,
        mid_pos,
        end_pos,
        root_pos.distance(mid_pos),
        mid_pos.distance(end_pos),
        target,
        pole,
    );

    apply_world_delta(bones, rotations, &world, upper, sol.root_delta);
    let world = bones.compute_world_matrices_euler(rotations, translations);
    apply_world_delta(bones, rotations, &world, lower, sol.mid_delta);

    let world = bones.compute_world_matrices_euler(rotations, translations);
    world[end].col(3).truncate()
}

/// 手臂两骨骼 IK（与腿部相同）
#[allow(clippy::too_many_arguments)]
pub fn solve_arm(
    bones: &BoneSet,
    rotations: &mut Vec<Vec3>,
    translations: &mut Vec<Vec3>,
    upper_arm: &str,
    lower_arm: &str,
    hand: &str,
    target: Vec3,
    pole: Vec3,
) -> Vec3 {
    solve_leg(bones, rotations, translations, upper_arm, lower_arm, hand, target, pole)
}
