use glam::{Mat4, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Unit length.
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction: direction.normalize_or_zero() }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    /// World-space distance from the ray origin.
    pub distance: f32,
    pub point: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb { min: Vec3::splat(f32::MAX), max: Vec3::splat(f32::MIN) };

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        points.into_iter().fold(Self::EMPTY, |acc, p| acc.include(*p))
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn include(self, p: Vec3) -> Self {
        Self { min: self.min.min(p), max: self.max.max(p) }
    }

    pub fn union(self, other: Aabb) -> Self {
        if other.is_empty() {
            return self;
        }
        Self { min: self.min.min(other.min), max: self.max.max(other.max) }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Box enclosing this one after an affine transform.
    pub fn transformed(&self, m: &Mat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        let corners = [
            Vec3::new(self.min.x, self.min.y, self.min.z),
            Vec3::new(self.max.x, self.min.y, self.min.z),
            Vec3::new(self.min.x, self.max.y, self.min.z),
            Vec3::new(self.max.x, self.max.y, self.min.z),
            Vec3::new(self.min.x, self.min.y, self.max.z),
            Vec3::new(self.max.x, self.min.y, self.max.z),
            Vec3::new(self.min.x, self.max.y, self.max.z),
            Vec3::new(self.max.x, self.max.y, self.max.z),
        ];
        corners.iter().fold(Self::EMPTY, |acc, c| acc.include(m.transform_point3(*c)))
    }

    /// Slab test. Returns the entry distance (0 when the origin is inside).
    pub fn intersect_ray(&self, ray: &Ray) -> Option<f32> {
        if self.is_empty() {
            return None;
        }
        let inv = ray.direction.recip();
        let t1 = (self.min - ray.origin) * inv;
        let t2 = (self.max - ray.origin) * inv;
        let t_near = t1.min(t2).max_element();
        let t_far = t1.max(t2).min_element();

        // NaN from 0 * inf on an axis-parallel ray fails both comparisons.
        if t_far >= t_near.max(0.0) {
            Some(t_near.max(0.0))
        } else {
            None
        }
    }
}

/// Möller–Trumbore. When `cull_back_faces` is set, triangles whose winding
/// faces away from the ray are ignored, as single-sided materials are.
pub fn intersect_triangle(ray: &Ray, v0: Vec3, v1: Vec3, v2: Vec3, cull_back_faces: bool) -> Option<f32> {
    const EPSILON: f32 = 1e-10;

    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let h = ray.direction.cross(edge2);
    let a = edge1.dot(h);

    if cull_back_faces {
        if a < EPSILON {
            return None;
        }
    } else if a.abs() < EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = ray.origin - v0;
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = f * ray.direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(q);
    if t > EPSILON {
        Some(t)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facing_triangle(z: f32) -> (Vec3, Vec3, Vec3) {
        // Counter-clockwise seen from +Z, so the front face looks at a camera on +Z.
        (Vec3::new(-1.0, -1.0, z), Vec3::new(1.0, -1.0, z), Vec3::new(0.0, 1.0, z))
    }

    #[test]
    fn triangle_hit_distance() {
        let ray = Ray::new(Vec3::ZERO, Vec3::NEG_Z);
        let (a, b, c) = facing_triangle(-2.0);
        let t = intersect_triangle(&ray, a, b, c, true).unwrap();
        assert!((t - 2.0).abs() < 1e-5);
        assert!((ray.at(t) - Vec3::new(0.0, 0.0, -2.0)).length() < 1e-5);
    }

    #[test]
    fn triangle_behind_origin_is_missed() {
        let ray = Ray::new(Vec3::ZERO, Vec3::NEG_Z);
        let (a, b, c) = facing_triangle(2.0);
        assert_eq!(intersect_triangle(&ray, a, b, c, false), None);
    }

    #[test]
    fn back_face_only_hits_when_double_sided() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        let (a, b, c) = facing_triangle(0.0);
        assert_eq!(intersect_triangle(&ray, a, b, c, true), None);
        assert!(intersect_triangle(&ray, a, b, c, false).is_some());
    }

    #[test]
    fn ray_outside_triangle_misses() {
        let ray = Ray::new(Vec3::new(3.0, 0.0, 0.0), Vec3::NEG_Z);
        let (a, b, c) = facing_triangle(-2.0);
        assert_eq!(intersect_triangle(&ray, a, b, c, false), None);
    }

    #[test]
    fn aabb_slab_test() {
        let aabb = Aabb { min: Vec3::splat(-1.0), max: Vec3::splat(1.0) };
        let hit = aabb.intersect_ray(&Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z));
        assert_eq!(hit, Some(4.0));
        assert_eq!(aabb.intersect_ray(&Ray::new(Vec3::ZERO, Vec3::X)), Some(0.0));
        assert_eq!(aabb.intersect_ray(&Ray::new(Vec3::new(0.0, 3.0, 5.0), Vec3::NEG_Z)), None);
        assert_eq!(aabb.intersect_ray(&Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::Z)), None);
    }

    #[test]
    fn empty_box_union_and_transform() {
        assert!(Aabb::EMPTY.is_empty());
        let b = Aabb::from_points(&[Vec3::ZERO, Vec3::new(2.0, 4.0, 6.0)]);
        assert_eq!(Aabb::EMPTY.union(b), b);
        assert_eq!(b.center(), Vec3::new(1.0, 2.0, 3.0));
        let moved = b.transformed(&Mat4::from_translation(Vec3::new(-1.0, -2.0, -3.0)));
        assert!(moved.center().length() < 1e-6);
    }
}
