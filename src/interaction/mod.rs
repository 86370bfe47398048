//! 交互层
//!
//! - IkController: 屏幕拾取 + 拖拽平面求交
//! - HumanoidRig: 人形手柄映射与每个手柄的求解器
//!
//! 典型的一帧：
//! pick_bone -> intersect_drag_plane -> HumanoidRig::update_target -> 渲染读取世界矩阵

mod controller;
mod drag;
mod rig;

pub use controller::{IkController, PickState, ViewContext};
pub use drag::{DragPlane, DragSession, Ray};
pub use rig::{HumanoidRig, IkBoneType};
