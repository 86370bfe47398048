//! 骨骼系统
//!
//! 核心设计思想：
//! - BoneLink: 单个骨骼节点
//! - BoneSet: 骨骼层次结构（扁平数组 + 父索引，竞技场式存储）
//! - Chain / IkJoint: IK 求解使用的链与节点快照

mod bone_link;
mod bone_set;
mod chain;

pub use bone_link::{BoneFlags, BoneLink};
pub use bone_set::BoneSet;
pub use chain::{Chain, IkJoint, JointRole};

pub(crate) use bone_set::world_delta_to_pose;

// ============================================================================
// 类型别名
// ============================================================================

/// Bone 别名
pub type Bone = BoneLink;

/// BoneHierarchy 别名
pub type BoneHierarchy = BoneSet;
