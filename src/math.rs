//! IK 数学工具
//!
//! 四元数最短弧旋转、LookRotation、欧拉角（度）转换等。
//! 所有函数对退化输入（零向量、反向向量）给出确定的回退结果，不会产生 NaN。

use glam::{EulerRot, Mat3, Quat, Vec3};
use std::f32::consts::PI;

/// 退化判定阈值
pub const EPSILON: f32 = 1e-6;

/// 两方向夹角（弧度）小于该值时视为同向
pub const ALIGN_EPSILON: f32 = 1e-5;

/// 从 from 方向旋转到 to 方向的最短弧四元数
///
/// - 任一输入为零向量：返回单位四元数
/// - 夹角小于 ALIGN_EPSILON：返回单位四元数
/// - 接近反向：绕与 from 垂直的任意轴旋转 180°（先试 X 轴，再试 Y 轴）
pub fn from_to_rotation(from: Vec3, to: Vec3) -> Quat {
    if from.length_squared() < EPSILON || to.length_squared() < EPSILON {
        return Quat::IDENTITY;
    }
    let f = from.normalize();
    let t = to.normalize();

    // 接近反向时叉积方向不可靠，直接转 180°
    if f.dot(t) < -1.0 + EPSILON {
        return Quat::from_axis_angle(any_perpendicular(f), PI);
    }
    // 同向用叉积长度（sin）判定，小角度下比点积精确
    if f.cross(t).length() < ALIGN_EPSILON {
        return Quat::IDENTITY;
    }
    Quat::from_rotation_arc(f, t)
}

/// 与 v 垂直的单位向量（稳定选择）
pub fn any_perpendicular(v: Vec3) -> Vec3 {
    let axis = v.cross(Vec3::X);
    if axis.length_squared() < EPSILON {
        v.cross(Vec3::Y).normalize()
    } else {
        axis.normalize()
    }
}

/// LookRotation：+Z 对准 forward，+Y 尽量对准 up
///
/// forward 或 up 退化、或两者共线时返回单位四元数
pub fn look_rotation(forward: Vec3, up: Vec3) -> Quat {
    if forward.length_squared() < EPSILON || up.length_squared() < EPSILON {
        return Quat::IDENTITY;
    }
    let forward = forward.normalize();
    let up = up - forward * up.dot(forward);
    if up.length_squared() < EPSILON {
        return Quat::IDENTITY;
    }
    let up = up.normalize();
    let right = up.cross(forward);
    if right.length_squared() < EPSILON {
        return Quat::IDENTITY;
    }
    let right = right.normalize();
    let new_up = forward.cross(right);

    Quat::from_mat3(&Mat3::from_cols(right, new_up, forward)).normalize()
}

/// 欧拉角（度）转四元数
///
/// 约定：x = pitch（绕 X），y = yaw（绕 Y），z = roll（绕 Z），
/// 作用顺序 roll → pitch → yaw
#[inline]
pub fn euler_degrees_to_quat(euler: Vec3) -> Quat {
    Quat::from_euler(
        EulerRot::YXZ,
        euler.y.to_radians(),
        euler.x.to_radians(),
        euler.z.to_radians(),
    )
}

/// 四元数转欧拉角（度），与 euler_degrees_to_quat 互逆
///
/// pitch 接近 ±90° 时分解不唯一，但重新合成得到同一旋转
#[inline]
pub fn quat_to_euler_degrees(q: Quat) -> Vec3 {
    let (yaw, pitch, roll) = q.normalize().to_euler(EulerRot::YXZ);
    Vec3::new(pitch.to_degrees(), yaw.to_degrees(), roll.to_degrees())
}

/// 旋转向量（轴 * 角度），角度落在 (-π, π]
pub fn rotation_vector(q: Quat) -> Vec3 {
    let q = q.normalize();
    let w = q.w.clamp(-1.0, 1.0);
    let mut angle = 2.0 * w.acos();
    let s = (1.0 - w * w).max(0.0).sqrt();
    let mut axis = if s < EPSILON {
        Vec3::X
    } else {
        Vec3::new(q.x, q.y, q.z) / s
    };
    if angle > PI {
        angle -= 2.0 * PI;
        axis = -axis;
    }
    axis * angle
}

/// 从旋转向量恢复四元数
pub fn from_rotation_vector(v: Vec3) -> Quat {
    let angle = v.length();
    if angle < EPSILON {
        Quat::IDENTITY
    } else {
        Quat::from_axis_angle(v / angle, angle)
    }
}

/// 限制旋转角度（弧度），保持旋转轴
pub fn clamp_rotation_angle(q: Quat, limit: f32) -> Quat {
    let v = rotation_vector(q);
    let angle = v.length();
    if angle <= limit || angle < EPSILON {
        return q;
    }
    Quat::from_axis_angle(v / angle, limit)
}
