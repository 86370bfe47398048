//! IK 配置
//!
//! 所有参数扁平化，直接在代码中修改默认值即可。
//! 控制器在构造时拷贝一份快照，求解过程中不再读取全局配置。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// IK 配置（扁平化，不嵌套）
#[derive(Debug, Clone, PartialEq)]
pub struct IkSettings {
    // ========== 拾取 ==========
    /// 骨骼拾取像素阈值（默认相机距离下），默认 60.0
    pub bone_pick_pixels: f32,
    /// IK 手柄骨骼的拾取阈值倍率，默认 1.5
    /// IK 手柄比普通骨骼更容易被选中
    pub ik_pick_scale: f32,
    /// 默认相机距离，拾取阈值按 当前距离 / 默认距离 缩放，默认 4.0
    pub default_camera_distance: f32,

    // ========== FABRIK ==========
    /// 最大迭代次数，默认 10
    pub fabrik_iterations: u32,
    /// 末端到目标的收敛距离，默认 1e-4
    pub fabrik_tolerance: f32,

    // ========== CCD ==========
    /// 最大迭代次数，默认 10
    pub ccd_iterations: u32,
    /// 末端到目标的收敛距离，默认 1e-3
    pub ccd_tolerance: f32,

    // ========== 两骨骼 ==========
    /// 三角形可解区间的收缩量，默认 1e-4
    pub two_bone_epsilon: f32,

    // ========== 拖拽 ==========
    /// 射线与平面近似平行的判定阈值，默认 1e-6
    pub parallel_epsilon: f32,

    // ========== 调试 ==========
    /// 是否输出调试日志，默认 false
    pub debug_log: bool,
}

impl Default for IkSettings {
    fn default() -> Self {
        Self {
            // ====== 拾取 ======
            bone_pick_pixels: 60.0,
            ik_pick_scale: 1.5,
            default_camera_distance: 4.0,

            // ====== FABRIK ======
            fabrik_iterations: 10,
            fabrik_tolerance: 1e-4,

            // ====== CCD ======
            // 交互拖拽每帧都会调用，10 次足够
            ccd_iterations: 10,
            ccd_tolerance: 1e-3,

            // ====== 两骨骼 ======
            two_bone_epsilon: 1e-4,

            // ====== 拖拽 ======
            parallel_epsilon: 1e-6,

            // ====== 调试 ======
            debug_log: false,
        }
    }
}

/// 全局配置实例
static IK_SETTINGS: Lazy<RwLock<IkSettings>> = Lazy::new(|| {
    RwLock::new(IkSettings::default())
});

/// 获取当前配置（只读）
pub fn get_settings() -> IkSettings {
    IK_SETTINGS.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_settings(settings: IkSettings) {
    *IK_SETTINGS.write().unwrap_or_else(|e| e.into_inner()) = settings;
}

/// 重置为默认配置
pub fn reset_settings() {
    *IK_SETTINGS.write().unwrap_or_else(|e| e.into_inner()) = IkSettings::default();
}
