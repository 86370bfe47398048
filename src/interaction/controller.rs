//! 交互式 IK 控制器
//!
//! 屏幕拾取骨骼 -> 构建拖拽平面 -> 射线求交得到模型空间目标。
//! 控制器只读取骨骼，不修改骨骼；得到的目标由调用方交给求解器（通常是 HumanoidRig）。
//!
//! 状态机：Idle -> Selected（拾取命中）-> Dragging（求交成功）-> Idle（释放）

use glam::{Mat4, Vec2, Vec3};

use crate::config::{get_settings, IkSettings};
use crate::math::EPSILON;
use crate::skeleton::BoneSet;

use super::drag::{DragPlane, DragSession, Ray};

/// 渲染器提供的视图信息
pub trait ViewContext {
    /// 世界空间 -> 裁剪空间
    fn view_projection(&self) -> Mat4;

    /// 视口尺寸（像素）
    fn viewport_size(&self) -> Vec2;

    /// 相机世界空间位置
    fn camera_position(&self) -> Vec3;

    /// 当前相机距离（用于按缩放调整拾取阈值）
    fn camera_distance(&self) -> f32;

    /// 模型空间 -> 世界空间
    fn model_transform(&self) -> Mat4 {
        Mat4::IDENTITY
    }

    fn world_to_model(&self, p: Vec3) -> Vec3 {
        self.model_transform().inverse().transform_point3(p)
    }

    fn model_to_world(&self, p: Vec3) -> Vec3 {
        self.model_transform().transform_point3(p)
    }

    /// 世界坐标投影到屏幕（左上角为原点），位于相机后方（w <= 0）时返回 None
    fn project_to_screen(&self, world: Vec3) -> Option<Vec2> {
        let clip = self.view_projection() * world.extend(1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        let size = self.viewport_size();
        Some(Vec2::new(
            (ndc.x * 0.5 + 0.5) * size.x,
            (-ndc.y * 0.5 + 0.5) * size.y,
        ))
    }
}

/// 拾取状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PickState {
    #[default]
    Idle,
    Selected,
    Dragging,
}

/// 交互式 IK 控制器
pub struct IkController<C: ViewContext> {
    context: C,
    settings: IkSettings,
    session: Option<DragSession>,
    state: PickState,
}

impl<C: ViewContext> IkController<C> {
    /// 使用全局配置快照创建
    pub fn new(context: C) -> Self {
        Self::with_settings(context, get_settings())
    }

    pub fn with_settings(context: C, settings: IkSettings) -> Self {
        Self { context, settings, session: None, state: PickState::Idle }
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn context(&self) -> &C {
        &self.context
    }

    #[inline]
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    #[inline]
    pub fn settings(&self) -> &IkSettings {
        &self.settings
    }

    #[inline]
    pub fn state(&self) -> PickState {
        self.state
    }

    pub fn session(&self) -> Option<&DragSession> {
        self.session.as_ref()
    }

    pub fn selected_bone(&self) -> Option<usize> {
        self.session.map(|s| s.bone_index)
    }

    pub fn drag_plane(&self) -> Option<&DragPlane> {
        self.session.as_ref().map(|s| &s.plane)
    }

    /// 渲染高亮用
    pub fn is_selected(&self, bone_index: usize) -> bool {
        self.selected_bone() == Some(bone_index)
    }

    // ========================================
    // 拾取
    // ========================================

    /// 当前缩放下的基础像素阈值
    fn pick_threshold(&self) -> f32 {
        let scale = if self.settings.default_camera_distance > EPSILON {
            self.context.camera_distance() / self.settings.default_camera_distance
        } else {
            1.0
        };
        self.settings.bone_pick_pixels * scale
    }

    /// 屏幕距离最近且在阈值内的骨骼（纯读取）
    ///
    /// IK 手柄骨骼的阈值乘以 ik_pick_scale
    pub fn find_nearest_bone(&self, bones: &BoneSet, screen_x: f32, screen_y: f32) -> Option<usize> {
        let size = self.context.viewport_size();
        if bones.is_empty() || size.x <= 0.0 || size.y <= 0.0 {
            return None;
        }

        let base = self.pick_threshold();
        let cursor = Vec2::new(screen_x, screen_y);
        let mut best: Option<(usize, f32)> = None;

        for (i, bone) in bones.bones().iter().enumerate() {
            let world = self.context.model_to_world(bone.position());
            let Some(screen) = self.context.project_to_screen(world) else {
                continue;
            };
            let threshold = if bone.is_ik_handle() {
                base * self.settings.ik_pick_scale
            } else {
                base
            };
            let dist = screen.distance(cursor);
            if dist < threshold && best.map_or(true, |(_, d)| dist < d) {
                best = Some((i, dist));
            }
        }

        best.map(|(i, _)| i)
    }

    /// 拾取骨骼（不区分指针）
    pub fn pick_bone(&mut self, bones: &BoneSet, screen_x: f32, screen_y: f32) -> Option<usize> {
        self.pick_bone_for_pointer(bones, screen_x, screen_y, None)
    }

    /// 拾取骨骼并开始拖拽会话；未命中时清除选择回到 Idle
    pub fn pick_bone_for_pointer(
        &mut self,
        bones: &BoneSet,
        screen_x: f32,
        screen_y: f32,
        pointer_id: Option<u64>,
    ) -> Option<usize> {
        match self.find_nearest_bone(bones, screen_x, screen_y) {
            Some(index) => {
                self.select_bone(bones, index, pointer_id);
                Some(index)
            }
            None => {
                log::debug!("[Pick] miss at ({}, {})", screen_x, screen_y);
                self.release_selection();
                None
            }
        }
    }

    /// 直接选中骨骼（宿主自行拾取时使用），构建拖拽平面
    ///
    /// 平面法线为 相机 - 骨骼（模型空间），相机与骨骼重合时取 +Z
    pub fn select_bone(&mut self, bones: &BoneSet, index: usize, pointer_id: Option<u64>) -> bool {
        if index >= bones.len() {
            return false;
        }

        let bone_pos = bones.bone_position(index);
        let camera = self.context.world_to_model(self.context.camera_position());
        let plane = DragPlane::from_point_normal(bone_pos, camera - bone_pos);

        self.session = Some(DragSession { bone_index: index, plane, pointer_id });
        self.state = PickState::Selected;
        log::debug!("[Pick] selected bone {} (normal {:?})", index, plane.normal);
        true
    }

    // ========================================
    // 拖拽
    // ========================================

    /// 世界空间射线与拖拽平面求交，返回模型空间目标点
    ///
    /// 未选中、射线平行于平面或交点在射线起点之后时返回 None
    pub fn intersect_drag_plane(&mut self, ray_origin: Vec3, ray_direction: Vec3) -> Option<Vec3> {
        let session = self.session?;
        let to_model = self.context.model_transform().inverse();
        let ray = Ray::new(ray_origin, ray_direction).transform(&to_model);

        let hit = session.plane.intersect(&ray, self.settings.parallel_epsilon)?;
        self.state = PickState::Dragging;
        Some(hit)
    }

    /// 结束拖拽
    pub fn release_selection(&mut self) {
        self.session = None;
        self.state = PickState::Idle;
    }

    /// 只释放由该指针发起的会话
    pub fn release_pointer(&mut self, pointer_id: u64) -> bool {
        match self.session {
            Some(s) if s.pointer_id == Some(pointer_id) => {
                self.release_selection();
                true
            }
            _ => false,
        }
    }
}
