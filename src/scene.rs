use glam::{Mat4, Vec3};

use crate::raycast::{intersect_triangle, Aabb, Intersection, Ray};

/// Triangle soup kept on the CPU for picking and occlusion queries.
#[derive(Debug, Clone)]
pub struct CollisionMesh {
    positions: Vec<Vec3>,
    indices: Vec<u32>,
    bounds: Aabb,
    double_sided: bool,
}

impl CollisionMesh {
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>, double_sided: bool) -> Self {
        let bounds = Aabb::from_points(&positions);
        Self { positions, indices, bounds, double_sided }
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Nearest hit along a ray expressed in this mesh's local space.
    fn nearest_local_hit(&self, ray: &Ray) -> Option<f32> {
        self.bounds.intersect_ray(ray)?;

        let vertex = |i: u32| self.positions.get(i as usize).copied();
        self.indices
            .chunks_exact(3)
            .filter_map(|tri| {
                let (a, b, c) = (vertex(tri[0])?, vertex(tri[1])?, vertex(tri[2])?);
                intersect_triangle(ray, a, b, c, !self.double_sided)
            })
            .min_by(|a, b| a.total_cmp(b))
    }
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: Option<String>,
    /// Local transform relative to the parent.
    pub transform: Mat4,
    pub meshes: Vec<CollisionMesh>,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: Option<String>, transform: Mat4) -> Self {
        Self { name, transform, meshes: Vec::new(), children: Vec::new() }
    }

    pub fn with_mesh(mut self, mesh: CollisionMesh) -> Self {
        self.meshes.push(mesh);
        self
    }

    pub fn with_child(mut self, child: SceneNode) -> Self {
        self.children.push(child);
        self
    }

    /// World-space bounds of this node and its descendants.
    pub fn world_bounds(&self, parent: Mat4) -> Aabb {
        let world = parent * self.transform;
        let own = self
            .meshes
            .iter()
            .fold(Aabb::EMPTY, |acc, mesh| acc.union(mesh.bounds().transformed(&world)));
        self.children
            .iter()
            .fold(own, |acc, child| acc.union(child.world_bounds(world)))
    }

    /// Translate the node so its bounding-box centre lands on the node's own
    /// original position. Returns the applied offset.
    pub fn recenter(&mut self) -> Vec3 {
        let bounds = self.world_bounds(Mat4::IDENTITY);
        if bounds.is_empty() {
            return Vec3::ZERO;
        }
        let offset = self.transform.w_axis.truncate() - bounds.center();
        self.transform = Mat4::from_translation(offset) * self.transform;
        offset
    }

    fn intersect_into(&self, ray: &Ray, parent: Mat4, recursive: bool, hits: &mut Vec<Intersection>) {
        let world = parent * self.transform;

        if !self.meshes.is_empty() {
            let inverse = world.inverse();
            if inverse.is_finite() {
                let local_ray = Ray::new(
                    inverse.transform_point3(ray.origin),
                    inverse.transform_vector3(ray.direction),
                );
                for mesh in &self.meshes {
                    if let Some(t) = mesh.nearest_local_hit(&local_ray) {
                        let point = world.transform_point3(local_ray.at(t));
                        hits.push(Intersection { distance: point.distance(ray.origin), point });
                    }
                }
            }
        }

        if recursive {
            for child in &self.children {
                child.intersect_into(ray, world, recursive, hits);
            }
        }
    }
}

/// Root of the renderable scene. Starts empty and gains nodes as assets
/// finish loading.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub children: Vec<SceneNode>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: SceneNode) {
        self.children.push(node);
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// All intersections with the scene's nodes, nearest first.
    pub fn intersect(&self, ray: &Ray, recursive: bool) -> Vec<Intersection> {
        let mut hits = Vec::new();
        for node in &self.children {
            node.intersect_into(ray, Mat4::IDENTITY, recursive, &mut hits);
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    pub fn bounding_box(&self) -> Aabb {
        self.children
            .iter()
            .fold(Aabb::EMPTY, |acc, node| acc.union(node.world_bounds(Mat4::IDENTITY)))
    }
}
