//! 按链的形状选择求解器
//!
//! - 躯干链（hips, spine, chest, neck, head）: FABRIK
//! - 四肢链（2~3 根骨骼，根骨骼名含 arm / leg）: 两骨骼解析解，或两根时做极向量扭转
//! - 其他: CCD

use glam::Vec3;

use crate::config::IkSettings;
use crate::skeleton::{BoneSet, Chain};

use super::{AnalyticTwoBoneSolver, CcdSolver, FabrikSolver};

const TORSO_NAMES: [&str; 5] = ["hips", "spine", "chest", "neck", "head"];

/// 链类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainKind {
    Torso,
    Limb,
    Generic,
}

/// 判定链类型（名称不区分大小写）
pub fn classify_chain(bones: &BoneSet, chain: &Chain) -> ChainKind {
    let name_of = |i: usize| bones.get(i).map(|b| b.name.to_lowercase()).unwrap_or_default();

    if chain.len() == TORSO_NAMES.len()
        && chain.indices().iter().zip(TORSO_NAMES).all(|(&i, n)| name_of(i) == n)
    {
        return ChainKind::Torso;
    }

    if (2..=3).contains(&chain.len()) {
        let root = name_of(chain.root());
        if root.contains("arm") || root.contains("leg") {
            return ChainKind::Limb;
        }
    }

    ChainKind::Generic
}

/// 求解任意链，返回末端新位置
///
/// 两根骨骼的四肢链把 target 当作极向量目标（只扭转，不改变末端距离）
pub fn solve_chain(bones: &mut BoneSet, chain: &Chain, target: Vec3, settings: &IkSettings) -> Vec3 {
    match classify_chain(bones, chain) {
        ChainKind::Torso => FabrikSolver::from_settings(settings).solve(bones, chain, target),
        ChainKind::Limb if chain.len() == 3 => {
            let pole = bones.bone_position(chain.indices()[1]);
            AnalyticTwoBoneSolver::from_settings(settings).solve_bones(bones, chain, target, pole);
            // 再做一轮 CCD 修正
            CcdSolver::new(1, 1e-4).solve_chain(bones, chain, target)
        }
        ChainKind::Limb => solve_elbow_knee(bones, chain.root(), chain.end_effector(), target),
        ChainKind::Generic => CcdSolver::from_settings(settings).solve_chain(bones, chain, target),
    }
}

/// 绕 根 -> 末端 轴扭转根骨骼，使中间关节朝向极向量目标
///
/// 末端取 mid 的第一个子骨骼；返回末端位置，找不到末端时返回零向量
pub fn solve_elbow_knee(bones: &mut BoneSet, root: usize, mid: usize, pole_target: Vec3) -> Vec3 {
    let Some(end) = bones.first_child(mid) else {
        return Vec3::ZERO;
    };
    if root >= bones.len() {
        return Vec3::ZERO;
    }

    let root_pos = bones.bone_position(root);
    let mid_pos = bones.bone_position(mid);
    let end_pos = bones.bone_position(end);

    let axis = (end_pos - root_pos).normalize_or_zero();
    if axis == Vec3::ZERO {
        return end_pos;
    }
    let project = |v: Vec3| v - axis * v.dot(axis);
    let current = project(mid_pos - root_pos);
    let desired = project(pole_target - root_pos);
    if current.length_squared() < 1e-8 || desired.length_squared() < 1e-8 {
        return end_pos;
    }
    let (current, desired) = (current.normalize(), desired.normalize());

    let angle = axis.dot(current.cross(desired)).atan2(current.dot(desired));
    if angle.abs() < 1e-5 {
        return end_pos;
    }

    bones.rotate_bone_world(root, glam::Quat::from_axis_angle(axis, angle));
    bones.bone_position(end)
}
