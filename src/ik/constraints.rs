//! 旋转限制
//!
//! BoneConstraints 按骨骼名称保存欧拉角（度）盒约束，在求解之后施加。
//! 角色约束（膝盖/脚踝）按旋转向量裁剪：IkJoint 链上取相对上一个节点的旋转，
//! 骨骼上取姿势旋转（相对绑定姿势）。

use std::collections::HashMap;

use glam::{Quat, Vec3};

use crate::math::{euler_degrees_to_quat, from_rotation_vector, quat_to_euler_degrees, rotation_vector};
use crate::skeleton::{BoneSet, Chain, IkJoint, JointRole};
use crate::{IkError, Result};

/// 欧拉角盒约束（度），每个分量 min <= max
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Limit {
    min: Vec3,
    max: Vec3,
}

impl Limit {
    /// 创建并校验约束
    pub fn try_new(bone: &str, min: Vec3, max: Vec3) -> Result<Self> {
        for (axis, lo, hi) in [('x', min.x, max.x), ('y', min.y, max.y), ('z', min.z, max.z)] {
            if lo > hi {
                return Err(IkError::InvalidLimit { bone: bone.to_string(), axis, min: lo, max: hi });
            }
        }
        Ok(Self { min, max })
    }

    #[inline]
    pub fn min(&self) -> Vec3 {
        self.min
    }

    #[inline]
    pub fn max(&self) -> Vec3 {
        self.max
    }

    /// 按分量钳制
    #[inline]
    pub fn clamp(&self, euler: Vec3) -> Vec3 {
        euler.max(self.min).min(self.max)
    }
}

/// 人形默认约束表（度）
const HUMANOID_LIMITS: [(&str, [f32; 3], [f32; 3]); 17] = [
    ("hips", [-30.0, -30.0, -30.0], [30.0, 30.0, 30.0]),
    ("spine", [-20.0, -30.0, -20.0], [20.0, 30.0, 20.0]),
    ("chest", [-30.0, -40.0, -25.0], [30.0, 40.0, 25.0]),
    ("neck", [-40.0, -40.0, -40.0], [40.0, 40.0, 40.0]),
    ("head", [-45.0, -60.0, -45.0], [45.0, 60.0, 45.0]),
    ("leftUpperArm", [-90.0, -45.0, -90.0], [90.0, 135.0, 90.0]),
    ("leftLowerArm", [-10.0, 0.0, -150.0], [10.0, 0.0, 0.0]),
    ("leftHand", [-30.0, -60.0, -80.0], [30.0, 60.0, 80.0]),
    ("rightUpperArm", [-90.0, -135.0, -90.0], [90.0, 45.0, 90.0]),
    ("rightLowerArm", [-10.0, 0.0, 0.0], [10.0, 0.0, 150.0]),
    ("rightHand", [-30.0, -60.0, -80.0], [30.0, 60.0, 80.0]),
    ("leftUpperLeg", [-100.0, -30.0, -40.0], [100.0, 120.0, 40.0]),
    ("leftLowerLeg", [0.0, 0.0, -5.0], [160.0, 0.0, 5.0]),
    ("leftFoot", [-30.0, -20.0, -20.0], [30.0, 45.0, 20.0]),
    ("rightUpperLeg", [-100.0, -120.0, -40.0], [100.0, 30.0, 40.0]),
    ("rightLowerLeg", [0.0, 0.0, -5.0], [160.0, 0.0, 5.0]),
    ("rightFoot", [-30.0, -20.0, -20.0], [30.0, 45.0, 20.0]),
];

/// 按骨骼名称（不区分大小写）索引的约束表
#[derive(Clone, Debug, Default)]
pub struct BoneConstraints {
    limits: HashMap<String, Limit>,
}

impl BoneConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// 批量构建，任一条目非法则整体失败
    pub fn from_entries<'a, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, Vec3, Vec3)>,
    {
        let mut constraints = Self::new();
        for (name, min, max) in entries {
            constraints.insert(name, min, max)?;
        }
        Ok(constraints)
    }

    /// 人形默认约束
    pub fn humanoid_default() -> Self {
        let limits = HUMANOID_LIMITS
            .iter()
            .map(|(name, min, max)| {
                (name.to_lowercase(), Limit { min: Vec3::from_array(*min), max: Vec3::from_array(*max) })
            })
            .collect();
        Self { limits }
    }

    /// 注册约束，同名覆盖
    pub fn insert(&mut self, name: &str, min: Vec3, max: Vec3) -> Result<()> {
        let limit = Limit::try_new(name, min, max)?;
        self.limits.insert(name.to_lowercase(), limit);
        Ok(())
    }

    pub fn get_limit(&self, name: &str) -> Option<&Limit> {
        self.limits.get(&name.to_lowercase())
    }

    /// 钳制欧拉角，未登记的骨骼原样返回
    pub fn clip(&self, name: &str, euler: Vec3) -> Vec3 {
        match self.get_limit(name) {
            Some(limit) => limit.clamp(euler),
            None => euler,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.limits.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    /// 钳制单根骨骼的姿势旋转并刷新其子树，返回是否被修改
    pub fn apply_to_bone(&self, bones: &mut BoneSet, index: usize) -> bool {
        let Some(bone) = bones.get(index) else {
            return false;
        };
        let Some(limit) = self.get_limit(&bone.name) else {
            return false;
        };

        let euler = quat_to_euler_degrees(bone.pose_rotate);
        let clipped = limit.clamp(euler);
        if (clipped - euler).abs().max_element() < 1e-4 {
            return false;
        }
        log::debug!("[IK] clamp '{}': {:?} -> {:?}", bone.name, euler, clipped);
        bones.set_pose_rotation(index, euler_degrees_to_quat(clipped));
        true
    }

    /// 从根到末端依次钳制链上骨骼，返回被修改的骨骼数
    pub fn apply_to_chain(&self, bones: &mut BoneSet, chain: &Chain) -> usize {
        chain
            .indices()
            .iter()
            .filter(|&&i| self.apply_to_bone(bones, i))
            .count()
    }
}

/// 按角色裁剪旋转向量：膝盖只向前弯（x >= 0），脚踝不绕 Z 扭转
fn clamp_role(rot: Vec3, role: JointRole) -> Vec3 {
    match role {
        JointRole::Knee => Vec3::new(rot.x.max(0.0), rot.y, rot.z),
        JointRole::Ankle => Vec3::new(rot.x, rot.y, 0.0),
        JointRole::None => rot,
    }
}

/// 角色约束（链节点）
///
/// 旋转向量取相对上一个节点的旋转；index 为 0 时相对单位旋转
pub fn apply_role_constraint(joints: &mut [IkJoint], index: usize) {
    let Some(role) = joints.get(index).map(|j| j.role) else {
        return;
    };
    if role == JointRole::None {
        return;
    }

    let parent = if index > 0 { joints[index - 1].rotation } else { Quat::IDENTITY };
    let local = (parent.inverse() * joints[index].rotation).normalize();
    let rot = clamp_role(rotation_vector(local), role);

    joints[index].rotation = (parent * from_rotation_vector(rot)).normalize();
}

/// 角色约束（骨骼姿势旋转），返回是否修改了骨骼
pub fn apply_role_to_bone(bones: &mut BoneSet, index: usize, role: JointRole) -> bool {
    if role == JointRole::None {
        return false;
    }
    let Some(pose) = bones.get(index).map(|b| b.pose_rotate) else {
        return false;
    };

    let rot = rotation_vector(pose);
    let clamped = clamp_role(rot, role);
    if (clamped - rot).length_squared() < 1e-10 {
        return false;
    }
    bones.set_pose_rotation(index, from_rotation_vector(clamped));
    log::debug!("[IK] {:?} constraint: bone {} {:?} -> {:?}", role, index, rot, clamped);
    true
}
