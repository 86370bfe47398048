//! IK 链与链节点
//!
//! Chain 只保存骨骼索引（root -> 末端），IkJoint 是求解时使用的
//! 模型空间快照，每帧从 BoneSet 重新采集。

use glam::{Quat, Vec3};

use crate::{IkError, Result};

use super::bone_set::BoneSet;

/// IK 链（root -> 末端执行器的骨骼索引）
///
/// 相邻两项一定是父子关系，长度至少为 2
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chain {
    indices: Vec<usize>,
}

impl Chain {
    /// 创建并校验链
    pub fn new(bones: &BoneSet, indices: Vec<usize>) -> Result<Self> {
        if indices.len() < 2 {
            return Err(IkError::ChainTooShort { len: indices.len(), min: 2 });
        }
        let len = bones.len();
        for &i in &indices {
            if i >= len {
                return Err(IkError::BoneIndexOutOfRange { index: i, len });
            }
        }
        for pair in indices.windows(2) {
            let (parent, child) = (pair[0], pair[1]);
            if bones.get(child).and_then(|b| b.parent_id()) != Some(parent) {
                return Err(IkError::BrokenChain { parent, child });
            }
        }
        Ok(Self { indices })
    }

    #[inline]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// 骨骼数量
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// 段数量
    #[inline]
    pub fn segment_count(&self) -> usize {
        self.indices.len() - 1
    }

    #[inline]
    pub fn root(&self) -> usize {
        self.indices[0]
    }

    /// 末端执行器
    #[inline]
    pub fn end_effector(&self) -> usize {
        self.indices[self.indices.len() - 1]
    }

    /// 当前姿势下的模型空间位置
    pub fn positions(&self, bones: &BoneSet) -> Vec<Vec3> {
        self.indices.iter().map(|&i| bones.bone_position(i)).collect()
    }

    /// 段长度（绑定姿势）
    pub fn segment_lengths(&self, bones: &BoneSet) -> Vec<f32> {
        self.indices
            .windows(2)
            .map(|w| {
                let a = bones.get(w[0]).map(|b| b.bind_position()).unwrap_or(Vec3::ZERO);
                let b = bones.get(w[1]).map(|b| b.bind_position()).unwrap_or(Vec3::ZERO);
                a.distance(b)
            })
            .collect()
    }

    /// 采集求解用的链节点
    pub fn joints(&self, bones: &BoneSet) -> Vec<IkJoint> {
        self.indices
            .iter()
            .map(|&i| IkJoint::from_bone(bones, i))
            .collect()
    }
}

/// 关节角色（用于额外的角色约束）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum JointRole {
    #[default]
    None,
    /// 膝盖：只允许向前弯曲
    Knee,
    /// 脚踝：不允许绕 Z 轴扭转
    Ankle,
}

/// IK 链节点（模型空间快照）
#[derive(Clone, Debug)]
pub struct IkJoint {
    /// 骨骼索引，虚拟节点为 None
    pub bone_index: Option<usize>,
    /// 模型空间位置
    pub position: Vec3,
    /// 模型空间旋转（求解结果）
    pub rotation: Quat,
    /// 绑定时的前向轴
    pub base_forward: Vec3,
    /// 绑定时的上方向
    pub base_up: Vec3,
    /// 上一次求解的上方向（退化时回退）
    pub prev_up: Vec3,
    /// 极向量（为零表示不使用）
    pub pole_vector: Vec3,
    /// 关节角色
    pub role: JointRole,
}

impl IkJoint {
    pub fn new(bone_index: Option<usize>, position: Vec3, rotation: Quat) -> Self {
        Self {
            bone_index,
            position,
            rotation,
            base_forward: Vec3::Z,
            base_up: Vec3::Y,
            prev_up: Vec3::Y,
            pole_vector: Vec3::ZERO,
            role: JointRole::None,
        }
    }

    /// 从骨骼当前姿势采集
    pub fn from_bone(bones: &BoneSet, index: usize) -> Self {
        Self::new(Some(index), bones.bone_position(index), bones.world_rotation(index))
    }

    /// 虚拟节点（映射失败时由骨架生成）
    pub fn virtual_at(position: Vec3) -> Self {
        Self::new(None, position, Quat::IDENTITY)
    }

    pub fn with_role(mut self, role: JointRole) -> Self {
        self.role = role;
        self
    }

    #[inline]
    pub fn is_virtual(&self) -> bool {
        self.bone_index.is_none()
    }

    /// 基准轴所在平面的法线
    #[inline]
    pub fn base_plane_normal(&self) -> Vec3 {
        self.base_forward.cross(self.base_up).normalize_or_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::BoneLink;

    fn leg() -> BoneSet {
        BoneSet::new(vec![
            BoneLink::new("hips").with_position(Vec3::new(0.0, 2.0, 0.0)),
            BoneLink::new("knee").with_parent(0).with_position(Vec3::new(0.0, 1.0, 0.0)),
            BoneLink::new("foot").with_parent(1).with_position(Vec3::new(0.0, 0.0, 0.5)),
            BoneLink::new("other").with_parent(0).with_position(Vec3::new(1.0, 2.0, 0.0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_chain_validation() {
        let set = leg();
        assert!(Chain::new(&set, vec![0, 1, 2]).is_ok());
        assert_eq!(
            Chain::new(&set, vec![0]).unwrap_err(),
            IkError::ChainTooShort { len: 1, min: 2 }
        );
        assert_eq!(
            Chain::new(&set, vec![0, 2]).unwrap_err(),
            IkError::BrokenChain { parent: 0, child: 2 }
        );
        assert_eq!(
            Chain::new(&set, vec![0, 9]).unwrap_err(),
            IkError::BoneIndexOutOfRange { index: 9, len: 4 }
        );
    }

    #[test]
    fn test_segment_lengths() {
        let set = leg();
        let chain = Chain::new(&set, vec![0, 1, 2]).unwrap();
        let lengths = chain.segment_lengths(&set);
        assert!((lengths[0] - 1.0).abs() < 1e-6);
        assert!((lengths[1] - 1.25f32.sqrt()).abs() < 1e-6);
        assert_eq!(chain.root(), 0);
        assert_eq!(chain.end_effector(), 2);
        assert_eq!(chain.segment_count(), 2);
    }

    #[test]
    fn test_joints_snapshot() {
        let set = leg();
        let chain = Chain::new(&set, vec![0, 1, 2]).unwrap();
        let joints = chain.joints(&set);
        assert_eq!(joints.len(), 3);
        assert_eq!(joints[1].bone_index, Some(1));
        assert!((joints[2].position - Vec3::new(0.0, 0.0, 0.5)).length() < 1e-6);
        assert!(JointRole::default() == JointRole::None);
        assert!(IkJoint::virtual_at(Vec3::ONE).is_virtual());
        assert!((joints[0].base_plane_normal() - Vec3::NEG_X).length() < 1e-6);
    }
}
