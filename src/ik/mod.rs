//! IK 求解
//!
//! - AnalyticTwoBoneSolver: 两骨骼解析解
//! - FabrikSolver: n 骨骼前向/后向迭代
//! - CcdSolver: 循环坐标下降
//! - BoneConstraints: 求解后的欧拉角盒约束
//!
//! 求解器从不返回错误：退化几何给出确定的回退结果，
//! 索引越界或链过短直接返回。

mod ccd;
mod constraints;
mod dispatch;
mod fabrik;
mod two_bone;

pub use ccd::CcdSolver;
pub use constraints::{apply_role_constraint, apply_role_to_bone, BoneConstraints, Limit};
pub use dispatch::{classify_chain, solve_chain, solve_elbow_knee, ChainKind};
pub use fabrik::FabrikSolver;
pub use two_bone::{solve_arm, solve_leg, AnalyticTwoBoneSolver, TwoBoneSolution};

use glam::{Quat, Vec3};

use crate::math::{any_perpendicular, from_to_rotation, look_rotation, EPSILON};
use crate::skeleton::{BoneLink, BoneSet, Chain, IkJoint};

/// 直链与目标共线时根关节的偏折角（弧度）
pub(crate) const STRAIGHT_CHAIN_NUDGE: f32 = 0.1;

/// 共线判定：点到直线的最大距离
const COLLINEAR_EPSILON: f32 = 1e-4;

/// 根在前的关节点与目标全部共线时返回直线方向
///
/// 这种情况下每个关节得到的都是同向或反向旋转，迭代求解器无法离开该直线
pub(crate) fn collinear_axis(points: &[Vec3], target: Vec3) -> Option<Vec3> {
    let (&origin, rest) = points.split_first()?;
    let axis = rest
        .iter()
        .chain(std::iter::once(&target))
        .map(|p| *p - origin)
        .find(|v| v.length_squared() > EPSILON)?
        .normalize();
    rest.iter()
        .chain(std::iter::once(&target))
        .all(|p| (*p - origin).cross(axis).length() < COLLINEAR_EPSILON)
        .then_some(axis)
}

/// 绕与直线垂直的轴偏折 STRAIGHT_CHAIN_NUDGE
#[inline]
pub(crate) fn straight_chain_nudge(axis: Vec3) -> Quat {
    Quat::from_axis_angle(any_perpendicular(axis), STRAIGHT_CHAIN_NUDGE)
}

/// 让节点的 base_forward 对准 forward，base_up 尽量对准 up_hint
///
/// up 退化时依次回退：上一次的 up、基准平面法线叉乘、世界 Y/X 轴
pub(crate) fn aim_joint(joint: &mut IkJoint, forward: Vec3, up_hint: Vec3) {
    if forward.length_squared() < EPSILON {
        return;
    }
    let forward = forward.normalize();

    let mut up = up_hint - forward * up_hint.dot(forward);
    if joint.pole_vector.length_squared() > EPSILON {
        let pole_up = joint.pole_vector.normalize().cross(forward);
        if pole_up.length_squared() > EPSILON {
            up = pole_up;
        }
    }
    if up.length_squared() < EPSILON {
        up = joint.prev_up - forward * joint.prev_up.dot(forward);
    }
    if up.length_squared() < EPSILON {
        up = (joint.rotation * joint.base_plane_normal()).cross(forward);
    }
    if up.length_squared() < EPSILON {
        let axis = if forward.dot(Vec3::Y).abs() > 0.99 { Vec3::X } else { Vec3::Y };
        up = axis - forward * axis.dot(forward);
    }
    let up = up.normalize();
    joint.prev_up = up;

    let basis = look_rotation(joint.base_forward, joint.base_up);
    joint.rotation = (look_rotation(forward, up) * basis.inverse()).normalize();
}

/// 把求解出的关节位置换算成骨骼旋转写回
///
/// 从根到末端依次把当前段方向旋转到目标段方向（模型空间增量），
/// 每次写回后刷新子树，后续关节看到的是更新后的姿势。
/// 不可旋转的骨骼保持原样
pub(crate) fn write_back_positions(bones: &mut BoneSet, chain: &Chain, positions: &[Vec3]) {
    let indices = chain.indices();
    if positions.len() != indices.len() {
        return;
    }
    for k in 0..indices.len() - 1 {
        if !bones.get(indices[k]).is_some_and(BoneLink::is_rotatable) {
            continue;
        }
        let current = bones.bone_position(indices[k + 1]) - bones.bone_position(indices[k]);
        let desired = positions[k + 1] - positions[k];
        let delta = from_to_rotation(current, desired);
        if delta != Quat::IDENTITY {
            bones.rotate_bone_world(indices[k], delta);
        }
    }
}
