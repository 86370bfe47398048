//! 骨骼节点
//!
//! BoneLink 是骨骼系统的核心单元，每个 BoneLink 代表骨骼层次中的一个节点。
//! 骨骼以扁平数组存储，通过父索引连接（父骨骼索引总是小于子骨骼索引）。

use glam::{Mat4, Quat, Vec3};
use bitflags::bitflags;

// ============================================================================
// 骨骼标志
// ============================================================================

bitflags! {
    /// 骨骼标志位
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BoneFlags: u32 {
        /// 可旋转（求解器只旋转带此标志的骨骼）
        const ROTATABLE = 1 << 0;
        /// IK 手柄（拾取时使用放大阈值）
        const IK_HANDLE = 1 << 1;
        /// 当前由 IK 求解器驱动
        const IK_ENABLED = 1 << 2;
    }
}

// ============================================================================
// 骨骼节点
// ============================================================================

/// 骨骼节点
///
/// - 静态数据：名称、父子关系、绑定姿势
/// - 动态数据：每帧的姿势旋转/平移（权威数据为四元数）
/// - 变换计算：local_to_world = parent.local_to_world * local_to_parent
#[derive(Clone, Debug)]
pub struct BoneLink {
    // ========================================
    // 静态数据（初始化后不变）
    // ========================================

    /// 骨骼名称
    pub name: String,

    /// 父骨骼索引 (-1 表示根骨骼)
    pub parent_index: i32,

    /// 骨骼标志
    pub flags: BoneFlags,

    /// 初始位置（模型空间，来自模型导入）
    pub initial_position: Vec3,

    /// 绑定旋转（相对父骨骼）
    pub bind_rotation: Quat,

    /// 相对于父骨骼的偏移（在 BoneSet 构建时计算）
    pub body_shift: Vec3,

    /// 绑定姿势世界矩阵
    pub bind_world: Mat4,

    /// 逆绑定矩阵（用于蒙皮）
    pub inverse_bind_world: Mat4,

    // ========================================
    // 动态数据（每帧更新）
    // ========================================

    /// 姿势平移（叠加在 body_shift 上）
    pub pose_translate: Vec3,

    /// 姿势旋转（叠加在 bind_rotation 之后）
    pub pose_rotate: Quat,

    /// 本地变换矩阵 (local_to_parent)
    pub local_to_parent: Mat4,

    /// 全局变换矩阵 (local_to_world)，即模型空间
    pub local_to_world: Mat4,
}

impl BoneLink {
    /// 创建新骨骼
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_index: -1,
            flags: BoneFlags::ROTATABLE,
            initial_position: Vec3::ZERO,
            bind_rotation: Quat::IDENTITY,
            body_shift: Vec3::ZERO,
            bind_world: Mat4::IDENTITY,
            inverse_bind_world: Mat4::IDENTITY,
            pose_translate: Vec3::ZERO,
            pose_rotate: Quat::IDENTITY,
            local_to_parent: Mat4::IDENTITY,
            local_to_world: Mat4::IDENTITY,
        }
    }

    /// 设置父骨骼
    pub fn with_parent(mut self, parent: i32) -> Self {
        self.parent_index = parent;
        self
    }

    /// 设置模型空间初始位置
    pub fn with_position(mut self, position: Vec3) -> Self {
        self.initial_position = position;
        self
    }

    /// 设置绑定旋转
    pub fn with_bind_rotation(mut self, rotation: Quat) -> Self {
        self.bind_rotation = rotation;
        self
    }

    /// 设置标志
    pub fn with_flags(mut self, flags: BoneFlags) -> Self {
        self.flags = flags;
        self
    }

    // ========================================
    // 访问器
    // ========================================

    /// 父骨骼索引
    #[inline]
    pub fn parent_id(&self) -> Option<usize> {
        if self.parent_index >= 0 {
            Some(self.parent_index as usize)
        } else {
            None
        }
    }

    /// 是否为根骨骼
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent_index < 0
    }

    /// 获取模型空间位置
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.local_to_world.col(3).truncate()
    }

    /// 获取模型空间旋转
    #[inline]
    pub fn rotation(&self) -> Quat {
        Quat::from_mat4(&self.local_to_world).normalize()
    }

    /// 绑定姿势下的模型空间位置
    #[inline]
    pub fn bind_position(&self) -> Vec3 {
        self.bind_world.col(3).truncate()
    }

    // ========================================
    // 变换计算
    // ========================================

    /// 重置姿势
    #[inline]
    pub fn reset_pose(&mut self) {
        self.pose_translate = Vec3::ZERO;
        self.pose_rotate = Quat::IDENTITY;
    }

    /// 本地旋转 = bind_rotation * pose_rotate
    #[inline]
    pub fn local_rotation(&self) -> Quat {
        self.bind_rotation * self.pose_rotate
    }

    /// 计算本地变换 (local_to_parent)
    ///
    /// 平移 = body_shift + pose_translate，旋转 = bind_rotation * pose_rotate
    pub fn compute_local_transform(&mut self) {
        let translate = self.body_shift + self.pose_translate;
        self.local_to_parent = Mat4::from_rotation_translation(self.local_rotation(), translate);
    }

    /// 获取蒙皮矩阵
    /// skinning_matrix = local_to_world * inverse_bind_world
    #[inline]
    pub fn skinning_matrix(&self) -> Mat4 {
        self.local_to_world * self.inverse_bind_world
    }

    // ========================================
    // 标志检查方法
    // ========================================

    #[inline]
    pub fn is_rotatable(&self) -> bool {
        self.flags.contains(BoneFlags::ROTATABLE)
    }

    #[inline]
    pub fn is_ik_handle(&self) -> bool {
        self.flags.contains(BoneFlags::IK_HANDLE)
    }

    #[inline]
    pub fn enable_ik(&self) -> bool {
        self.flags.contains(BoneFlags::IK_ENABLED)
    }

    #[inline]
    pub fn set_enable_ik(&mut self, enabled: bool) {
        self.flags.set(BoneFlags::IK_ENABLED, enabled);
    }
}

impl Default for BoneLink {
    fn default() -> Self {
        Self::new(String::new())
    }
}
