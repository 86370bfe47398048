//! 骨骼集合 - 管理骨骼层次结构
//!
//! 骨骼按导入顺序存放在扁平数组中，父索引总是小于自身索引，
//! 因此世界矩阵可以单次线性遍历完成。

use std::collections::HashMap;

use glam::{Mat4, Quat, Vec3};

use crate::math::euler_degrees_to_quat;
use crate::{IkError, Result};

use super::bone_link::BoneLink;
use super::chain::Chain;

/// 骨骼集合
#[derive(Clone, Debug, Default)]
pub struct BoneSet {
    bones: Vec<BoneLink>,
    /// 小写名称 -> 索引
    name_to_index: HashMap<String, usize>,
    /// 子骨骼缓存
    children_cache: Vec<Vec<usize>>,
}

impl BoneSet {
    /// 构建骨骼集合
    ///
    /// 根据模型空间初始位置推导 body_shift 和绑定矩阵。
    /// 父索引必须小于自身索引。
    pub fn new(mut bones: Vec<BoneLink>) -> Result<Self> {
        let mut name_to_index = HashMap::with_capacity(bones.len());
        let mut children_cache = vec![Vec::new(); bones.len()];

        for i in 0..bones.len() {
            let parent = bones[i].parent_index;
            if parent < -1 || (parent >= 0 && parent as usize >= i) {
                return Err(IkError::InvalidParent { index: i, parent });
            }

            let parent_bind = match bones[i].parent_id() {
                Some(p) => {
                    children_cache[p].push(i);
                    bones[p].bind_world
                }
                None => Mat4::IDENTITY,
            };

            let bone = &mut bones[i];
            bone.body_shift = parent_bind.inverse().transform_point3(bone.initial_position);
            bone.bind_world = parent_bind
                * Mat4::from_rotation_translation(bone.bind_rotation, bone.body_shift);
            bone.inverse_bind_world = bone.bind_world.inverse();

            name_to_index.entry(bone.name.to_lowercase()).or_insert(i);
        }

        let mut set = Self { bones, name_to_index, children_cache };
        set.update_world_transforms();
        Ok(set)
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn len(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&BoneLink> {
        self.bones.get(index)
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut BoneLink> {
        self.bones.get_mut(index)
    }

    #[inline]
    pub fn bones(&self) -> &[BoneLink] {
        &self.bones
    }

    /// 按名称查找骨骼（不区分大小写）
    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(&name.to_lowercase()).copied()
    }

    /// 子骨骼索引
    pub fn children(&self, index: usize) -> &[usize] {
        self.children_cache.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 第一个子骨骼
    pub fn first_child(&self, index: usize) -> Option<usize> {
        self.children(index).first().copied()
    }

    /// 模型空间位置，索引越界返回零向量
    #[inline]
    pub fn bone_position(&self, index: usize) -> Vec3 {
        self.bones.get(index).map(BoneLink::position).unwrap_or(Vec3::ZERO)
    }

    /// 模型空间旋转，索引越界返回单位四元数
    #[inline]
    pub fn world_rotation(&self, index: usize) -> Quat {
        self.bones.get(index).map(BoneLink::rotation).unwrap_or(Quat::IDENTITY)
    }

    /// 当前所有骨骼的姿势旋转
    pub fn pose_rotations(&self) -> Vec<Quat> {
        self.bones.iter().map(|b| b.pose_rotate).collect()
    }

    // ========================================
    // 变换计算
    // ========================================

    /// 重置所有姿势并刷新世界矩阵
    pub fn reset_pose(&mut self) {
        for bone in &mut self.bones {
            bone.reset_pose();
        }
        self.update_world_transforms();
    }

    /// 按索引顺序单次遍历更新全部世界矩阵
    pub fn update_world_transforms(&mut self) {
        for i in 0..self.bones.len() {
            self.bones[i].compute_local_transform();
            let parent_world = match self.bones[i].parent_id() {
                Some(p) => self.bones[p].local_to_world,
                None => Mat4::IDENTITY,
            };
            self.bones[i].local_to_world = parent_world * self.bones[i].local_to_parent;
        }
    }

    /// 递归更新 idx 及其子树的世界矩阵
    pub fn update_world_transforms_from(&mut self, idx: usize) {
        if idx >= self.bones.len() {
            return;
        }

        self.bones[idx].compute_local_transform();
        let parent_world = match self.bones[idx].parent_id() {
            Some(p) => self.bones[p].local_to_world,
            None => Mat4::IDENTITY,
        };
        self.bones[idx].local_to_world = parent_world * self.bones[idx].local_to_parent;

        // 递归更新子骨骼
        for k in 0..self.children_cache[idx].len() {
            let child = self.children_cache[idx][k];
            self.update_world_transforms_from(child);
        }
    }

    /// 以模型空间增量旋转一根骨骼，并刷新其子树
    ///
    /// 新的模型空间旋转 = delta * 旧的模型空间旋转
    pub fn rotate_bone_world(&mut self, idx: usize, delta: Quat) {
        if idx >= self.bones.len() {
            return;
        }
        let parent_rot = match self.bones[idx].parent_id() {
            Some(p) => self.bones[p].rotation(),
            None => Quat::IDENTITY,
        };
        let bone = &mut self.bones[idx];
        bone.pose_rotate = world_delta_to_pose(parent_rot, bone.bind_rotation, bone.pose_rotate, delta);
        self.update_world_transforms_from(idx);
    }

    /// 设置骨骼姿势旋转并刷新其子树
    pub fn set_pose_rotation(&mut self, idx: usize, rotation: Quat) {
        if let Some(bone) = self.bones.get_mut(idx) {
            bone.pose_rotate = rotation.normalize();
            self.update_world_transforms_from(idx);
        }
    }

    /// 纯函数：根据覆盖旋转/平移计算世界矩阵（不修改骨骼状态）
    ///
    /// local = T(body_shift + 平移覆盖) * R(bind_rotation * 旋转覆盖)，
    /// 覆盖数组短于骨骼数时缺失部分视为单位变换
    pub fn compute_world_matrices(
        &self,
        rotation_overrides: &[Quat],
        translation_overrides: &[Vec3],
    ) -> Vec<Mat4> {
        let mut world = Vec::with_capacity(self.bones.len());
        for (i, bone) in self.bones.iter().enumerate() {
            let rot = rotation_overrides.get(i).copied().unwrap_or(Quat::IDENTITY);
            let trans = translation_overrides.get(i).copied().unwrap_or(Vec3::ZERO);
            let local = Mat4::from_rotation_translation(bone.bind_rotation * rot, bone.body_shift + trans);
            let m = match bone.parent_id() {
                Some(p) => world[p] * local,
                None => local,
            };
            world.push(m);
        }
        world
    }

    /// 同 compute_world_matrices，旋转覆盖为欧拉角（度）
    pub fn compute_world_matrices_euler(
        &self,
        rotations_deg: &[Vec3],
        translation_overrides: &[Vec3],
    ) -> Vec<Mat4> {
        let rotations: Vec<Quat> = rotations_deg.iter().map(|e| euler_degrees_to_quat(*e)).collect();
        self.compute_world_matrices(&rotations, translation_overrides)
    }

    // ========================================
    // 链
    // ========================================

    /// 沿父链从 end 回溯到 root，构建 root -> end 的链
    pub fn chain_between(&self, root: usize, end: usize) -> Result<Chain> {
        let len = self.bones.len();
        if root >= len {
            return Err(IkError::BoneIndexOutOfRange { index: root, len });
        }
        if end >= len {
            return Err(IkError::BoneIndexOutOfRange { index: end, len });
        }

        let mut indices = vec![end];
        let mut cur = end;
        while cur != root {
            match self.bones[cur].parent_id() {
                Some(p) => {
                    indices.push(p);
                    cur = p;
                }
                None => return Err(IkError::BrokenChain { parent: root, child: end }),
            }
        }
        indices.reverse();
        Chain::new(self, indices)
    }

    /// 按名称构建链
    pub fn chain_by_names(&self, root: &str, end: &str) -> Result<Chain> {
        let r = self.find_bone(root).ok_or_else(|| IkError::UnknownBone(root.to_string()))?;
        let e = self.find_bone(end).ok_or_else(|| IkError::UnknownBone(end.to_string()))?;
        self.chain_between(r, e)
    }
}

/// 将模型空间增量旋转换算为骨骼姿势旋转
///
/// world = P * B * pose，要求 world' = delta * world，
/// 则 pose' = B⁻¹ * P⁻¹ * delta * P * B * pose
pub(crate) fn world_delta_to_pose(parent_rot: Quat, bind_rot: Quat, pose: Quat, delta: Quat) -> Quat {
    let local = bind_rot * pose;
    let new_local = parent_rot.inverse() * delta * parent_rot * local;
    (bind_rot.inverse() * new_local).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm() -> BoneSet {
        BoneSet::new(vec![
            BoneLink::new("Shoulder").with_position(Vec3::new(0.0, 1.0, 0.0)),
            BoneLink::new("Elbow").with_parent(0).with_position(Vec3::new(1.0, 1.0, 0.0)),
            BoneLink::new("Hand").with_parent(1).with_position(Vec3::new(2.0, 1.0, 0.0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_build_bind_pose() {
        let set = arm();
        assert_eq!(set.len(), 3);
        assert!((set.get(1).unwrap().body_shift - Vec3::X).length() < 1e-6);
        assert!((set.bone_position(2) - Vec3::new(2.0, 1.0, 0.0)).length() < 1e-6);
        assert!((set.get(2).unwrap().bind_position() - Vec3::new(2.0, 1.0, 0.0)).length() < 1e-6);
        assert_eq!(set.children(0), &[1]);
        assert_eq!(set.first_child(2), None);
    }

    #[test]
    fn test_bind_rotation_keeps_positions() {
        let set = BoneSet::new(vec![
            BoneLink::new("root").with_bind_rotation(Quat::from_rotation_z(0.7)),
            BoneLink::new("child").with_parent(0).with_position(Vec3::new(0.0, 2.0, 0.0)),
        ])
        .unwrap();
        assert!((set.bone_position(1) - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_invalid_parent() {
        let err = BoneSet::new(vec![
            BoneLink::new("a").with_parent(1),
            BoneLink::new("b"),
        ])
        .unwrap_err();
        assert_eq!(err, IkError::InvalidParent { index: 0, parent: 1 });
    }

    #[test]
    fn test_find_bone_case_insensitive() {
        let set = arm();
        assert_eq!(set.find_bone("elbow"), Some(1));
        assert_eq!(set.find_bone("HAND"), Some(2));
        assert_eq!(set.find_bone("foot"), None);
    }

    #[test]
    fn test_out_of_range_is_neutral() {
        let set = arm();
        assert_eq!(set.bone_position(10), Vec3::ZERO);
        assert_eq!(set.world_rotation(10), Quat::IDENTITY);
    }

    #[test]
    fn test_compute_world_matrices_overrides() {
        let set = arm();
        let rot = [Quat::from_rotation_z(std::f32::consts::FRAC_PI_2)];
        let world = set.compute_world_matrices(&rot, &[]);
        // 肩部旋转 90°，手臂指向 +Y
        let hand = world[2].col(3).truncate();
        assert!((hand - Vec3::new(0.0, 3.0, 0.0)).length() < 1e-5);

        let world = set.compute_world_matrices(&[], &[Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0)]);
        assert!((world[2].col(3).truncate() - Vec3::new(2.0, 1.0, 1.0)).length() < 1e-5);

        // 纯函数：骨骼状态不变
        assert!((set.bone_position(2) - Vec3::new(2.0, 1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_compute_world_matrices_euler() {
        let set = arm();
        let world = set.compute_world_matrices_euler(&[Vec3::new(0.0, 0.0, 90.0)], &[]);
        assert!((world[2].col(3).truncate() - Vec3::new(0.0, 3.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_rotate_bone_world_under_rotated_parent() {
        let mut set = arm();
        set.rotate_bone_world(0, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        assert!((set.bone_position(1) - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);

        // 在旋转后的父骨骼下，再以模型空间旋转肘部
        set.rotate_bone_world(1, Quat::from_rotation_z(-std::f32::consts::FRAC_PI_2));
        assert!((set.bone_position(2) - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-5);

        set.reset_pose();
        assert!((set.bone_position(2) - Vec3::new(2.0, 1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_chain_between() {
        let set = arm();
        let chain = set.chain_between(0, 2).unwrap();
        assert_eq!(chain.indices(), &[0, 1, 2]);

        let chain = set.chain_by_names("elbow", "hand").unwrap();
        assert_eq!(chain.indices(), &[1, 2]);

        assert!(matches!(set.chain_between(2, 0), Err(IkError::BrokenChain { .. })));
        assert!(matches!(set.chain_by_names("hip", "hand"), Err(IkError::UnknownBone(_))));
    }
}
