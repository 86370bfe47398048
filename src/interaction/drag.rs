//! 拖拽平面与射线
//!
//! 平面以 normal·p + d = 0 表示，全部在模型空间中计算。

use glam::{Mat4, Vec3};

/// 射线（方向不要求归一化）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// 变换到另一个坐标空间
    pub fn transform(&self, m: &Mat4) -> Self {
        Self {
            origin: m.transform_point3(self.origin),
            direction: m.transform_vector3(self.direction),
        }
    }
}

/// 拖拽平面
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DragPlane {
    /// 平面上的锚点（选中骨骼的位置）
    pub origin: Vec3,
    /// 单位法线
    pub normal: Vec3,
    pub d: f32,
}

impl DragPlane {
    /// 过 point、法线为 normal 的平面；normal 为零向量时取 +Z
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = if normal.length_squared() < crate::math::EPSILON {
            Vec3::Z
        } else {
            normal.normalize()
        };
        Self { origin: point, normal, d: -normal.dot(point) }
    }

    /// 有符号距离
    #[inline]
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.d
    }

    /// 射线求交
    ///
    /// 射线与平面近似平行（|normal·dir| < eps）或交点在射线起点之后（t < 0）时返回 None
    pub fn intersect(&self, ray: &Ray, eps: f32) -> Option<Vec3> {
        let denom = self.normal.dot(ray.direction);
        if denom.abs() < eps {
            return None;
        }
        let t = -(self.normal.dot(ray.origin) + self.d) / denom;
        if t < 0.0 {
            return None;
        }
        Some(ray.at(t))
    }
}

/// 一次拖拽会话：拾取时创建，释放时销毁
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DragSession {
    pub bone_index: usize,
    pub plane: DragPlane,
    /// 发起拾取的指针，None 表示不区分指针（鼠标）
    pub pointer_id: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_from_point_normal() {
        let plane = DragPlane::from_point_normal(Vec3::new(1.0, 2.0, -3.0), Vec3::new(0.0, 0.0, -2.0));
        assert_eq!(plane.normal, Vec3::new(0.0, 0.0, -1.0));
        assert!((plane.d + 3.0).abs() < 1e-6);
        assert!(plane.signed_distance(Vec3::new(1.0, 2.0, -3.0)).abs() < 1e-6);
    }

    #[test]
    fn test_intersect() {
        let plane = DragPlane::from_point_normal(Vec3::new(1.0, 2.0, -3.0), Vec3::NEG_Z);
        let ray = Ray::new(Vec3::new(1.0, 2.0, -5.0), Vec3::Z);
        let hit = plane.intersect(&ray, 1e-6).unwrap();
        assert!((hit - Vec3::new(1.0, 2.0, -3.0)).length() < 1e-6);
    }

    #[test]
    fn test_intersect_parallel_and_behind() {
        let plane = DragPlane::from_point_normal(Vec3::ZERO, Vec3::Y);
        assert_eq!(plane.intersect(&Ray::new(Vec3::Y, Vec3::X), 1e-6), None);
        // 交点在起点之后
        assert_eq!(plane.intersect(&Ray::new(Vec3::Y, Vec3::Y), 1e-6), None);
        assert!(plane.intersect(&Ray::new(Vec3::Y, Vec3::NEG_Y), 1e-6).is_some());
    }

    #[test]
    fn test_degenerate_normal_falls_back() {
        let plane = DragPlane::from_point_normal(Vec3::ONE, Vec3::ZERO);
        assert_eq!(plane.normal, Vec3::Z);
    }

    #[test]
    fn test_ray_transform() {
        let flip = Mat4::from_scale(Vec3::new(1.0, 1.0, -1.0));
        let ray = Ray::new(Vec3::new(1.0, 2.0, 5.0), Vec3::NEG_Z).transform(&flip);
        assert_eq!(ray.origin, Vec3::new(1.0, 2.0, -5.0));
        assert_eq!(ray.direction, Vec3::Z);
    }
}
