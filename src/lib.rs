//! MMD 姿势 IK 引擎
//!
//! 交互式骨骼 IK 摆姿核心：
//! - skeleton: 骨骼层次（扁平数组 + 父索引），世界矩阵计算
//! - ik: 两骨骼解析解 / FABRIK / CCD 求解器 + 角度限制
//! - interaction: 屏幕拾取、拖拽平面、人形 IK 手柄
//!
//! 单线程、逐帧同步调用。求解和拾取从不返回错误，
//! 错误只出现在构建骨骼、链、限制表等初始化阶段。

pub mod config;
pub mod math;
pub mod skeleton;
pub mod ik;
pub mod interaction;

pub use config::{get_settings, reset_settings, set_settings, IkSettings};
pub use skeleton::{BoneFlags, BoneLink, BoneSet, Chain, IkJoint, JointRole};
pub use ik::{
    classify_chain, solve_arm, solve_chain, solve_leg, AnalyticTwoBoneSolver, BoneConstraints, CcdSolver,
    ChainKind, FabrikSolver, Limit,
};
pub use interaction::{
    DragPlane, DragSession, HumanoidRig, IkBoneType, IkController, PickState, Ray, ViewContext,
};

use thiserror::Error;

/// IK 引擎错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IkError {
    #[error("Bone {index} has parent {parent}, parent must precede child")]
    InvalidParent { index: usize, parent: i32 },

    #[error("Bone index {index} out of range (bone count {len})")]
    BoneIndexOutOfRange { index: usize, len: usize },

    #[error("Chain broken: bone {child} is not a child of bone {parent}")]
    BrokenChain { parent: usize, child: usize },

    #[error("Chain too short: {len} bones, need at least {min}")]
    ChainTooShort { len: usize, min: usize },

    #[error("Invalid limit for '{bone}' on axis {axis}: min {min} > max {max}")]
    InvalidLimit { bone: String, axis: char, min: f32, max: f32 },

    #[error("Unknown bone: {0}")]
    UnknownBone(String),
}

pub type Result<T> = std::result::Result<T, IkError>;
