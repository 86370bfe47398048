//! 人形 IK 骨架
//!
//! 把模型骨骼映射到 11 个人形手柄（髋、胸、头、左右肩/手/膝/脚），
//! 映射失败的手柄生成虚拟节点。每个可驱动的手柄配一个求解器：
//! - 手、脚: 祖父 -> 父 -> 手柄 的两骨骼解析解
//! - 头: 髋 -> 头 的 FABRIK

use std::collections::HashMap;

use glam::Vec3;

use crate::config::IkSettings;
use crate::ik::{apply_role_to_bone, AnalyticTwoBoneSolver, BoneConstraints, FabrikSolver};
use crate::skeleton::{BoneFlags, BoneSet, Chain, IkJoint, JointRole};

/// 默认 髋 - 胸 距离，用于推算模型缩放
const DEFAULT_HIP_CHEST: f32 = 0.2;

/// 人形 IK 手柄类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IkBoneType {
    Hip,
    Chest,
    Head,
    LeftShoulder,
    LeftHand,
    RightShoulder,
    RightHand,
    LeftKnee,
    LeftFoot,
    RightKnee,
    RightFoot,
}

impl IkBoneType {
    /// 全部类型（父类型在前）
    pub const ALL: [IkBoneType; 11] = [
        IkBoneType::Hip,
        IkBoneType::Chest,
        IkBoneType::Head,
        IkBoneType::LeftShoulder,
        IkBoneType::LeftHand,
        IkBoneType::RightShoulder,
        IkBoneType::RightHand,
        IkBoneType::LeftKnee,
        IkBoneType::LeftFoot,
        IkBoneType::RightKnee,
        IkBoneType::RightFoot,
    ];

    pub fn default_name(self) -> &'static str {
        match self {
            IkBoneType::Hip => "hips",
            IkBoneType::Chest => "chest",
            IkBoneType::Head => "head",
            IkBoneType::LeftShoulder => "leftShoulder",
            IkBoneType::LeftHand => "leftHand",
            IkBoneType::RightShoulder => "rightShoulder",
            IkBoneType::RightHand => "rightHand",
            IkBoneType::LeftKnee => "leftKnee",
            IkBoneType::LeftFoot => "leftFoot",
            IkBoneType::RightKnee => "rightKnee",
            IkBoneType::RightFoot => "rightFoot",
        }
    }

    /// 人形骨骼名回退
    pub fn fallback_names(self) -> &'static [&'static str] {
        match self {
            IkBoneType::Chest => &["spine"],
            IkBoneType::LeftShoulder => &["leftUpperArm"],
            IkBoneType::RightShoulder => &["rightUpperArm"],
            IkBoneType::LeftKnee => &["leftLowerLeg"],
            IkBoneType::RightKnee => &["rightLowerLeg"],
            _ => &[],
        }
    }

    pub fn parent(self) -> Option<IkBoneType> {
        match self {
            IkBoneType::Hip => None,
            IkBoneType::Chest => Some(IkBoneType::Hip),
            IkBoneType::Head => Some(IkBoneType::Chest),
            IkBoneType::LeftShoulder | IkBoneType::RightShoulder => Some(IkBoneType::Chest),
            IkBoneType::LeftHand => Some(IkBoneType::LeftShoulder),
            IkBoneType::RightHand => Some(IkBoneType::RightShoulder),
            IkBoneType::LeftKnee | IkBoneType::RightKnee => Some(IkBoneType::Hip),
            IkBoneType::LeftFoot => Some(IkBoneType::LeftKnee),
            IkBoneType::RightFoot => Some(IkBoneType::RightKnee),
        }
    }

    /// 虚拟节点相对父节点的默认偏移（缩放前）
    pub fn default_offset(self) -> Vec3 {
        match self {
            IkBoneType::Hip => Vec3::ZERO,
            IkBoneType::Chest | IkBoneType::Head => Vec3::new(0.0, 0.2, 0.0),
            IkBoneType::LeftShoulder => Vec3::new(-0.2, 0.15, 0.0),
            IkBoneType::LeftHand => Vec3::new(-0.5, 0.0, 0.0),
            IkBoneType::RightShoulder => Vec3::new(0.2, 0.15, 0.0),
            IkBoneType::RightHand => Vec3::new(0.5, 0.0, 0.0),
            IkBoneType::LeftKnee => Vec3::new(-0.2, -0.4, 0.0),
            IkBoneType::LeftFoot => Vec3::new(-0.2, -0.8, 0.0),
            IkBoneType::RightKnee => Vec3::new(0.2, -0.4, 0.0),
            IkBoneType::RightFoot => Vec3::new(0.2, -0.8, 0.0),
        }
    }

    pub fn role(self) -> JointRole {
        match self {
            IkBoneType::LeftKnee | IkBoneType::RightKnee => JointRole::Knee,
            IkBoneType::LeftFoot | IkBoneType::RightFoot => JointRole::Ankle,
            _ => JointRole::None,
        }
    }

    /// 以该类型为末端的求解器
    fn solver_kind(self) -> Option<RigSolverKind> {
        match self {
            IkBoneType::LeftHand
            | IkBoneType::RightHand
            | IkBoneType::LeftFoot
            | IkBoneType::RightFoot => Some(RigSolverKind::TwoBone),
            IkBoneType::Head => Some(RigSolverKind::Fabrik),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RigSolverKind {
    TwoBone,
    Fabrik,
}

#[derive(Clone, Debug)]
struct RigSolver {
    kind: RigSolverKind,
    chain: Chain,
    lengths: Vec<f32>,
    roles: Vec<JointRole>,
}

/// 人形 IK 骨架
#[derive(Clone, Debug)]
pub struct HumanoidRig {
    joints: HashMap<IkBoneType, IkJoint>,
    /// 手柄骨骼索引 -> 求解器
    solvers: HashMap<usize, RigSolver>,
    constraints: BoneConstraints,
    scale_factor: f32,
    settings: IkSettings,
}

impl HumanoidRig {
    /// 构建骨架
    ///
    /// extra_names 为每个类型追加的候选骨骼名（优先级低于默认名，高于回退名）。
    /// 映射成功的骨骼被标记为 IK_HANDLE，求解链上的骨骼标记为 IK_ENABLED。
    pub fn build(bones: &mut BoneSet, extra_names: &[(IkBoneType, &str)], settings: &IkSettings) -> Self {
        let resolve = |ty: IkBoneType| -> Option<usize> {
            std::iter::once(ty.default_name())
                .chain(extra_names.iter().filter(|(t, _)| *t == ty).map(|(_, n)| *n))
                .chain(ty.fallback_names().iter().copied())
                .find_map(|name| bones.find_bone(name))
        };
        let mapping: Vec<(IkBoneType, Option<usize>)> =
            IkBoneType::ALL.iter().map(|&ty| (ty, resolve(ty))).collect();
        let index_of = |ty: IkBoneType| mapping.iter().find(|(t, _)| *t == ty).and_then(|(_, i)| *i);

        let scale_factor = compute_scale(bones, index_of(IkBoneType::Hip), index_of(IkBoneType::Chest));

        let mut joints: HashMap<IkBoneType, IkJoint> = HashMap::with_capacity(IkBoneType::ALL.len());
        for &(ty, index) in &mapping {
            let joint = match index {
                Some(i) => {
                    if let Some(bone) = bones.get_mut(i) {
                        bone.flags |= BoneFlags::IK_HANDLE;
                    }
                    IkJoint::from_bone(bones, i)
                }
                None => {
                    log::warn!("[Rig] {:?} bone not found, using virtual joint", ty);
                    let parent_pos = ty
                        .parent()
                        .and_then(|p| joints.get(&p))
                        .map(|j| j.position)
                        .unwrap_or(Vec3::ZERO);
                    IkJoint::virtual_at(parent_pos + ty.default_offset() * scale_factor)
                }
            };
            joints.insert(ty, joint.with_role(ty.role()));
        }

        let mut solvers = HashMap::new();
        for &(ty, index) in &mapping {
            let (Some(kind), Some(handle)) = (ty.solver_kind(), index) else {
                continue;
            };
            let chain = match kind {
                RigSolverKind::TwoBone => limb_chain(bones, handle),
                RigSolverKind::Fabrik => index_of(IkBoneType::Hip)
                    .and_then(|hip| bones.chain_between(hip, handle).ok()),
            };
            let Some(chain) = chain else {
                log::warn!("[Rig] no solver for {:?}: chain unavailable", ty);
                continue;
            };

            let mut roles = vec![JointRole::None; chain.len()];
            if ty == IkBoneType::LeftFoot || ty == IkBoneType::RightFoot {
                roles[1] = JointRole::Knee;
                roles[2] = JointRole::Ankle;
            }
            for &i in chain.indices() {
                if let Some(bone) = bones.get_mut(i) {
                    bone.set_enable_ik(true);
                }
            }
            let lengths = chain.segment_lengths(bones);
            solvers.insert(handle, RigSolver { kind, chain, lengths, roles });
        }

        if settings.debug_log {
            log::info!(
                "[Rig] mapped {}/{} handles, {} solvers, scale {:.3}",
                mapping.iter().filter(|(_, i)| i.is_some()).count(),
                IkBoneType::ALL.len(),
                solvers.len(),
                scale_factor
            );
        }

        Self {
            joints,
            solvers,
            constraints: BoneConstraints::default(),
            scale_factor,
            settings: settings.clone(),
        }
    }

    // ========================================
    // 访问器
    // ========================================

    pub fn joint(&self, ty: IkBoneType) -> Option<&IkJoint> {
        self.joints.get(&ty)
    }

    /// 手柄映射到的骨骼，虚拟节点返回 None
    pub fn bone_index(&self, ty: IkBoneType) -> Option<usize> {
        self.joints.get(&ty).and_then(|j| j.bone_index)
    }

    /// 骨骼对应的手柄类型
    pub fn handle_type(&self, bone_index: usize) -> Option<IkBoneType> {
        IkBoneType::ALL
            .iter()
            .copied()
            .find(|ty| self.bone_index(*ty) == Some(bone_index))
    }

    /// 拖拽该骨骼是否会驱动求解器
    pub fn has_solver(&self, bone_index: usize) -> bool {
        self.solvers.contains_key(&bone_index)
    }

    /// 求解链（根 -> 手柄）
    pub fn chain(&self, bone_index: usize) -> Option<&Chain> {
        self.solvers.get(&bone_index).map(|s| &s.chain)
    }

    #[inline]
    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    pub fn constraints(&self) -> &BoneConstraints {
        &self.constraints
    }

    pub fn set_constraints(&mut self, constraints: BoneConstraints) {
        self.constraints = constraints;
    }

    // ========================================
    // 求解
    // ========================================

    /// 用骨骼当前位置/旋转刷新已映射的节点
    pub fn refresh(&mut self, bones: &BoneSet) {
        for joint in self.joints.values_mut() {
            if let Some(i) = joint.bone_index {
                joint.position = bones.bone_position(i);
                joint.rotation = bones.world_rotation(i);
            }
        }
    }

    /// 把手柄拖到模型空间目标点，返回手柄新位置
    ///
    /// 在节点链上求解，把段方向变化写回骨骼，再依次施加角色约束
    /// （膝盖/脚踝）和 BoneConstraints 并刷新世界矩阵。
    /// 约束生效时手柄不一定到达目标。手柄没有求解器时返回 None
    pub fn update_target(&mut self, bones: &mut BoneSet, handle: usize, target: Vec3) -> Option<Vec3> {
        let solver = self.solvers.get(&handle)?.clone();

        let mut joints = solver.chain.joints(bones);

        match solver.kind {
            RigSolverKind::TwoBone => {
                let pole = joints[1].position;
                AnalyticTwoBoneSolver::from_settings(&self.settings).solve_joints(
                    &mut joints,
                    solver.lengths[0],
                    solver.lengths[1],
                    target,
                    pole,
                );
            }
            RigSolverKind::Fabrik => {
                FabrikSolver::from_settings(&self.settings).solve_joints(&mut joints, &solver.lengths, target);
            }
        }

        let positions: Vec<Vec3> = joints.iter().map(|j| j.position).collect();
        crate::ik::write_back_positions(bones, &solver.chain, &positions);
        for (&i, &role) in solver.chain.indices().iter().zip(&solver.roles) {
            apply_role_to_bone(bones, i, role);
        }
        self.constraints.apply_to_chain(bones, &solver.chain);
        bones.update_world_transforms();
        self.refresh(bones);

        if self.settings.debug_log {
            log::debug!("[Rig] bone {} -> target {:?}", handle, target);
        }
        Some(bones.bone_position(handle))
    }
}

/// 祖父 -> 父 -> 手柄
fn limb_chain(bones: &BoneSet, handle: usize) -> Option<Chain> {
    let parent = bones.get(handle)?.parent_id()?;
    let grand = bones.get(parent)?.parent_id()?;
    Chain::new(bones, vec![grand, parent, handle]).ok()
}

/// 模型缩放：髋 - 胸距离 / 0.2；缺失时用平均骨骼长度 / 0.2
fn compute_scale(bones: &BoneSet, hip: Option<usize>, chest: Option<usize>) -> f32 {
    let bind = |i: usize| bones.get(i).map(|b| b.bind_position()).unwrap_or(Vec3::ZERO);

    if let (Some(hip), Some(chest)) = (hip, chest) {
        let dist = bind(hip).distance(bind(chest));
        return if dist > 1e-5 { dist / DEFAULT_HIP_CHEST } else { 1.0 };
    }

    let lengths: Vec<f32> = bones
        .bones()
        .iter()
        .enumerate()
        .filter_map(|(i, b)| b.parent_id().map(|p| bind(i).distance(bind(p))))
        .filter(|d| *d > 1e-5)
        .collect();
    if lengths.is_empty() {
        return 1.0;
    }
    let avg = lengths.iter().sum::<f32>() / lengths.len() as f32;
    if avg > 1e-5 {
        avg / DEFAULT_HIP_CHEST
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{quat_to_euler_degrees, rotation_vector};
    use crate::skeleton::BoneLink;

    fn assert_vec_near(a: Vec3, b: Vec3, eps: f32) {
        assert!((a - b).length() < eps, "{:?} != {:?}", a, b);
    }

    /// 左半身完整，右半身缺失
    fn half_body() -> BoneSet {
        BoneSet::new(vec![
            BoneLink::new("hips").with_position(Vec3::new(0.0, 1.0, 0.0)),
            BoneLink::new("spine").with_parent(0).with_position(Vec3::new(0.0, 1.1, 0.0)),
            BoneLink::new("chest").with_parent(1).with_position(Vec3::new(0.0, 1.2, 0.0)),
            BoneLink::new("neck").with_parent(2).with_position(Vec3::new(0.0, 1.4, 0.0)),
            BoneLink::new("head").with_parent(3).with_position(Vec3::new(0.0, 1.55, 0.0)),
            BoneLink::new("leftShoulder").with_parent(2).with_position(Vec3::new(-0.1, 1.35, 0.0)),
            BoneLink::new("leftUpperArm").with_parent(5).with_position(Vec3::new(-0.2, 1.35, 0.0)),
            BoneLink::new("leftLowerArm").with_parent(6).with_position(Vec3::new(-0.45, 1.35, 0.02)),
            BoneLink::new("leftHand").with_parent(7).with_position(Vec3::new(-0.7, 1.35, 0.0)),
            BoneLink::new("leftUpperLeg").with_parent(0).with_position(Vec3::new(-0.1, 0.95, 0.0)),
            BoneLink::new("leftLowerLeg").with_parent(9).with_position(Vec3::new(-0.1, 0.5, 0.03)),
            BoneLink::new("leftFoot").with_parent(10).with_position(Vec3::new(-0.1, 0.08, 0.0)),
        ])
        .unwrap()
    }

    fn rig(bones: &mut BoneSet) -> HumanoidRig {
        HumanoidRig::build(bones, &[], &IkSettings::default())
    }

    #[test]
    fn test_mapping_and_virtual_joints() {
        let mut bones = half_body();
        let rig = rig(&mut bones);

        assert!((rig.scale_factor() - 1.0).abs() < 1e-5);
        assert_eq!(rig.bone_index(IkBoneType::Hip), Some(0));
        assert_eq!(rig.bone_index(IkBoneType::LeftShoulder), Some(5));
        // 回退到 leftLowerLeg
        assert_eq!(rig.bone_index(IkBoneType::LeftKnee), Some(10));
        assert_eq!(rig.joint(IkBoneType::LeftKnee).unwrap().role, JointRole::Knee);

        let rs = rig.joint(IkBoneType::RightShoulder).unwrap();
        assert!(rs.is_virtual());
        assert_vec_near(rs.position, Vec3::new(0.2, 1.35, 0.0), 1e-5);
        let rh = rig.joint(IkBoneType::RightHand).unwrap();
        assert_vec_near(rh.position, Vec3::new(0.7, 1.35, 0.0), 1e-5);

        assert_eq!(rig.handle_type(8), Some(IkBoneType::LeftHand));
        assert_eq!(rig.handle_type(6), None);
    }

    #[test]
    fn test_flags_and_solvers() {
        let mut bones = half_body();
        let rig = rig(&mut bones);

        assert!(bones.get(8).unwrap().is_ik_handle());
        assert!(!bones.get(6).unwrap().is_ik_handle());
        assert!(bones.get(6).unwrap().enable_ik());

        assert!(rig.has_solver(8));
        assert!(rig.has_solver(11));
        assert!(rig.has_solver(4));
        assert!(!rig.has_solver(5));
        assert_eq!(rig.chain(8).unwrap().indices(), &[6, 7, 8]);
        assert_eq!(rig.chain(4).unwrap().indices(), &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_update_hand() {
        let mut bones = half_body();
        let mut rig = rig(&mut bones);
        let lengths = rig.chain(8).unwrap().segment_lengths(&bones);

        let target = bones.bone_position(8) + Vec3::new(0.05, 0.02, 0.0);
        let end = rig.update_target(&mut bones, 8, target).unwrap();
        assert_vec_near(end, target, 1e-3);
        assert!((bones.bone_position(6).distance(bones.bone_position(7)) - lengths[0]).abs() < 1e-4);
        assert!((bones.bone_position(7).distance(bones.bone_position(8)) - lengths[1]).abs() < 1e-4);

        // 节点同步
        assert_vec_near(rig.joint(IkBoneType::LeftHand).unwrap().position, end, 1e-6);
    }

    #[test]
    fn test_update_foot_and_head() {
        let mut bones = half_body();
        let mut rig = rig(&mut bones);

        // 目标在膝盖后方，膝盖向前弯，角色约束不生效
        let target = bones.bone_position(11) + Vec3::new(0.1, 0.15, -0.1);
        let end = rig.update_target(&mut bones, 11, target).unwrap();
        assert_vec_near(end, target, 1e-3);
        assert!(rotation_vector(bones.get(10).unwrap().pose_rotate).x > 0.0);

        let target = Vec3::new(0.05, 1.5, 0.05);
        let end = rig.update_target(&mut bones, 4, target).unwrap();
        assert!(end.distance(target) < 1e-2);
        assert_vec_near(bones.bone_position(0), Vec3::new(0.0, 1.0, 0.0), 1e-6);
    }

    /// 膝盖绑定姿势略向后
    fn backward_knee_leg() -> BoneSet {
        BoneSet::new(vec![
            BoneLink::new("hips").with_position(Vec3::new(0.0, 1.0, 0.0)),
            BoneLink::new("leftUpperLeg").with_parent(0).with_position(Vec3::new(-0.1, 0.95, 0.0)),
            BoneLink::new("leftLowerLeg").with_parent(1).with_position(Vec3::new(-0.1, 0.5, -0.03)),
            BoneLink::new("leftFoot").with_parent(2).with_position(Vec3::new(-0.1, 0.08, 0.0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_knee_role_corrects_bone_pose() {
        let target = Vec3::new(-0.1, 0.28, 0.0);

        // 单纯的两骨骼解会让膝盖向后弯
        let mut free = backward_knee_leg();
        let chain = Chain::new(&free, vec![1, 2, 3]).unwrap();
        let pole = free.bone_position(2);
        AnalyticTwoBoneSolver::default().solve_bones(&mut free, &chain, target, pole);
        assert!(rotation_vector(free.get(2).unwrap().pose_rotate).x < -0.5);

        let mut bones = backward_knee_leg();
        let mut rig = rig(&mut bones);
        assert!(rig.has_solver(3));
        let end = rig.update_target(&mut bones, 3, target).unwrap();

        let knee = rotation_vector(bones.get(2).unwrap().pose_rotate);
        assert!(knee.x >= -1e-4, "{:?}", knee);
        assert!(end.distance(target) > 1e-2);
        assert_vec_near(end, bones.bone_position(3), 1e-6);

        // 节点旋转与骨骼同步
        assert_eq!(rig.joint(IkBoneType::LeftKnee).unwrap().rotation, bones.world_rotation(2));
    }

    #[test]
    fn test_update_without_solver_is_noop() {
        let mut bones = half_body();
        let mut rig = rig(&mut bones);
        let before = bones.pose_rotations();
        assert_eq!(rig.update_target(&mut bones, 6, Vec3::ONE), None);
        assert_eq!(rig.update_target(&mut bones, 99, Vec3::ONE), None);
        assert_eq!(bones.pose_rotations(), before);
    }

    #[test]
    fn test_constraints_applied_after_solve() {
        let mut bones = half_body();
        let mut rig = rig(&mut bones);
        rig.set_constraints(BoneConstraints::humanoid_default());

        let target = Vec3::new(-0.3, 1.1, 0.3);
        rig.update_target(&mut bones, 8, target);

        let limit = *rig.constraints().get_limit("leftLowerArm").unwrap();
        let euler = quat_to_euler_degrees(bones.get(7).unwrap().pose_rotate);
        assert!(euler.cmpge(limit.min() - Vec3::splat(1e-3)).all(), "{:?}", euler);
        assert!(euler.cmple(limit.max() + Vec3::splat(1e-3)).all(), "{:?}", euler);
    }

    #[test]
    fn test_missing_hip_and_extra_names() {
        let mut bones = BoneSet::new(vec![
            BoneLink::new("a"),
            BoneLink::new("b").with_parent(0).with_position(Vec3::new(0.0, 0.4, 0.0)),
        ])
        .unwrap();
        let rig = rig(&mut bones);
        assert!((rig.scale_factor() - 2.0).abs() < 1e-5);
        assert_eq!(rig.joint(IkBoneType::Hip).unwrap().position, Vec3::ZERO);
        assert_vec_near(rig.joint(IkBoneType::Chest).unwrap().position, Vec3::new(0.0, 0.4, 0.0), 1e-6);
        assert_vec_near(rig.joint(IkBoneType::Head).unwrap().position, Vec3::new(0.0, 0.8, 0.0), 1e-6);
        assert!(!rig.has_solver(0) && !rig.has_solver(1));

        let mut bones = BoneSet::new(vec![BoneLink::new("Center")]).unwrap();
        let rig = HumanoidRig::build(&mut bones, &[(IkBoneType::Hip, "center")], &IkSettings::default());
        assert_eq!(rig.bone_index(IkBoneType::Hip), Some(0));
    }
}
