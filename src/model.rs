//! CPU side of model loading: GLB parsing into render-ready vertex data and a
//! collision hierarchy for occlusion queries.

use std::borrow::Cow;

use glam::{vec2, vec3, Mat4, Quat, Vec3};

use crate::error::{ViewerError, ViewerResult};
use crate::raycast::Aabb;
use crate::scene::{CollisionMesh, SceneNode};
use crate::uniforms::{MaterialUniform, ModelVertex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    BaseColor,
    Normal,
    MetallicRoughness,
}

impl TextureSlot {
    pub const ALL: [TextureSlot; 3] = [TextureSlot::BaseColor, TextureSlot::Normal, TextureSlot::MetallicRoughness];

    pub fn is_srgb(self) -> bool {
        matches!(self, TextureSlot::BaseColor)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterialData {
    pub factors: MaterialUniform,
    pub base_color_texture: Option<usize>,
    pub normal_texture: Option<usize>,
    pub metallic_roughness_texture: Option<usize>,
    pub blend: bool,
    pub double_sided: bool,
}

impl MaterialData {
    pub fn texture(&self, slot: TextureSlot) -> Option<usize> {
        match slot {
            TextureSlot::BaseColor => self.base_color_texture,
            TextureSlot::Normal => self.normal_texture,
            TextureSlot::MetallicRoughness => self.metallic_roughness_texture,
        }
    }

    /// Slots that read `image_index` decoded in the given colour space.
    pub fn slots_using(&self, image_index: usize, srgb: bool) -> Vec<TextureSlot> {
        TextureSlot::ALL
            .into_iter()
            .filter(|slot| slot.is_srgb() == srgb && self.texture(*slot) == Some(image_index))
            .collect()
    }
}

/// One glTF primitive with vertices baked into model space.
#[derive(Debug, Clone)]
pub struct PrimitiveData {
    pub vertices: Vec<ModelVertex>,
    pub indices: Vec<u32>,
    pub material: MaterialData,
    pub bounds: Aabb,
}

/// Image bytes embedded in the GLB binary chunk, keyed by glTF image index.
#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    pub index: usize,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct ModelAsset {
    /// Collision hierarchy rooted at the model node.
    pub root: SceneNode,
    pub primitives: Vec<PrimitiveData>,
    pub images: Vec<EmbeddedImage>,
}

impl ModelAsset {
    pub fn bounds(&self) -> Aabb {
        self.primitives.iter().fold(Aabb::EMPTY, |acc, p| acc.union(p.bounds))
    }
}

/// Rewrite `"extensionsRequired"` to `"extensionsOptional"` in the JSON chunk
/// so models that demand unsupported extensions still load with fallbacks.
/// The key has the same length, so chunk sizes stay valid.
pub fn relax_required_extensions(bytes: &[u8]) -> Cow<'_, [u8]> {
    const KEY: &[u8] = b"\"extensionsRequired\"";
    const REPLACEMENT: &[u8] = b"\"extensionsOptional\"";

    if bytes.len() < 20 || &bytes[0..4] != b"glTF" || &bytes[16..20] != b"JSON" {
        return Cow::Borrowed(bytes);
    }
    let json_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
    let Some(json) = bytes.get(20..20 + json_len) else {
        return Cow::Borrowed(bytes);
    };
    match json.windows(KEY.len()).position(|w| w == KEY) {
        Some(pos) => {
            let mut owned = bytes.to_vec();
            owned[20 + pos..20 + pos + KEY.len()].copy_from_slice(REPLACEMENT);
            log::warn!("GLB requires extensions; treating them as optional");
            Cow::Owned(owned)
        }
        None => Cow::Borrowed(bytes),
    }
}

/// Parse a binary glTF. The first root node of the default scene becomes the
/// model, matching how single-product exports are laid out.
pub fn parse_glb(bytes: &[u8]) -> ViewerResult<ModelAsset> {
    let bytes = relax_required_extensions(bytes);
    let gltf = gltf::Gltf::from_slice(&bytes)?;
    let document = gltf.document;
    let blob = gltf.blob.unwrap_or_default();

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| ViewerError::ModelParse("glTF has no scenes".to_string()))?;
    let root = scene
        .nodes()
        .next()
        .ok_or_else(|| ViewerError::ModelParse("default scene has no nodes".to_string()))?;

    let mut primitives = Vec::new();
    let root_node = build_node(&root, Mat4::IDENTITY, &blob, &mut primitives);

    let mut images = Vec::new();
    for image in document.images() {
        if let gltf::image::Source::View { view, mime_type } = image.source() {
            let start = view.offset();
            let end = start + view.length();
            if let Some(slice) = blob.get(start..end) {
                images.push(EmbeddedImage { index: image.index(), bytes: slice.to_vec(), mime_type: mime_type.to_string() });
            } else {
                log::warn!("Image {} points outside the binary chunk", image.index());
            }
        }
    }

    log::info!(
        "Parsed model: {} primitives, {} embedded images",
        primitives.len(),
        images.len()
    );

    Ok(ModelAsset { root: root_node, primitives, images })
}

fn build_node(node: &gltf::Node, parent: Mat4, blob: &[u8], primitives: &mut Vec<PrimitiveData>) -> SceneNode {
    let (t, r, s) = node.transform().decomposed();
    let local = Mat4::from_scale_rotation_translation(Vec3::from(s), Quat::from_array(r), Vec3::from(t));
    let world = parent * local;

    let mut scene_node = SceneNode::new(node.name().map(str::to_string), local);

    if let Some(mesh) = node.mesh() {
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                log::warn!("Skipping non-triangle primitive in mesh {:?}", mesh.name());
                continue;
            }
            let reader = primitive.reader(|buffer| match buffer.source() {
                gltf::buffer::Source::Bin => Some(blob),
                _ => None,
            });

            let positions: Vec<[f32; 3]> = reader.read_positions().map(|i| i.collect()).unwrap_or_default();
            if positions.is_empty() {
                continue;
            }
            let indices: Vec<u32> = reader
                .read_indices()
                .map(|i| i.into_u32().collect())
                .unwrap_or_else(|| (0..positions.len() as u32).collect());
            let normals: Vec<[f32; 3]> = reader
                .read_normals()
                .map(|i| i.collect())
                .unwrap_or_else(|| compute_normals(&positions, &indices));
            let tex_coords: Vec<[f32; 2]> = reader
                .read_tex_coords(0)
                .map(|v| v.into_f32().collect())
                .unwrap_or_else(|| vec![[0.0; 2]; positions.len()]);
            let tangents: Vec<[f32; 4]> = reader
                .read_tangents()
                .map(|i| i.collect())
                .unwrap_or_else(|| compute_tangents(&positions, &normals, &tex_coords, &indices));

            let material = material_data(&primitive.material());

            let mut bounds = Aabb::EMPTY;
            let vertices: Vec<ModelVertex> = positions
                .iter()
                .zip(normals.iter())
                .zip(tex_coords.iter())
                .zip(tangents.iter())
                .map(|(((p, n), uv), t)| {
                    let pw = world.transform_point3(Vec3::from(*p));
                    bounds = bounds.include(pw);
                    let nw = world.transform_vector3(Vec3::from(*n)).normalize_or_zero();
                    let tw = world.transform_vector3(vec3(t[0], t[1], t[2])).normalize_or_zero();
                    ModelVertex {
                        position: pw.to_array(),
                        normal: nw.to_array(),
                        tex_coord: *uv,
                        tangent: [tw.x, tw.y, tw.z, t[3]],
                    }
                })
                .collect();

            let local_positions = positions.iter().copied().map(Vec3::from).collect();
            scene_node.meshes.push(CollisionMesh::new(local_positions, indices.clone(), material.double_sided));

            primitives.push(PrimitiveData { vertices, indices, material, bounds });
        }
    }

    for child in node.children() {
        scene_node.children.push(build_node(&child, world, blob, primitives));
    }
    scene_node
}

fn material_data(material: &gltf::Material) -> MaterialData {
    let pbr = material.pbr_metallic_roughness();
    let emissive = material.emissive_factor();
    let texture_index = |info: Option<gltf::Texture>| info.map(|t| t.source().index());

    MaterialData {
        factors: MaterialUniform {
            base_color: pbr.base_color_factor(),
            emissive: [emissive[0], emissive[1], emissive[2], 0.0],
            metallic: pbr.metallic_factor(),
            roughness: pbr.roughness_factor(),
            normal_scale: material.normal_texture().map(|n| n.scale()).unwrap_or(1.0),
            _padding: 0.0,
        },
        base_color_texture: texture_index(pbr.base_color_texture().map(|t| t.texture())),
        normal_texture: texture_index(material.normal_texture().map(|t| t.texture())),
        metallic_roughness_texture: texture_index(pbr.metallic_roughness_texture().map(|t| t.texture())),
        blend: matches!(material.alpha_mode(), gltf::material::AlphaMode::Blend),
        double_sided: material.double_sided(),
    }
}

/// Area-weighted vertex normals for primitives exported without them.
pub fn compute_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let (i1, i2, i3) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        let (Some(a), Some(b), Some(c)) = (positions.get(i1), positions.get(i2), positions.get(i3)) else {
            continue;
        };
        let face = (Vec3::from(*b) - Vec3::from(*a)).cross(Vec3::from(*c) - Vec3::from(*a));
        normals[i1] += face;
        normals[i2] += face;
        normals[i3] += face;
    }
    normals.into_iter().map(|n| n.normalize_or_zero().to_array()).collect()
}

pub fn compute_tangents(positions: &[[f32; 3]], normals: &[[f32; 3]], uvs: &[[f32; 2]], indices: &[u32]) -> Vec<[f32; 4]> {
    let mut tan1 = vec![Vec3::ZERO; positions.len()];
    let mut tan2 = vec![Vec3::ZERO; positions.len()];

    for tri in indices.chunks_exact(3) {
        let (i1, i2, i3) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        if i1 >= positions.len() || i2 >= positions.len() || i3 >= positions.len() {
            continue;
        }

        let v1 = Vec3::from(positions[i1]);
        let v2 = Vec3::from(positions[i2]);
        let v3 = Vec3::from(positions[i3]);

        let w1 = vec2(uvs[i1][0], uvs[i1][1]);
        let w2 = vec2(uvs[i2][0], uvs[i2][1]);
        let w3 = vec2(uvs[i3][0], uvs[i3][1]);

        let e1 = v2 - v1;
        let e2 = v3 - v1;
        let s1 = w2.x - w1.x;
        let s2 = w3.x - w1.x;
        let t1 = w2.y - w1.y;
        let t2 = w3.y - w1.y;

        let r_denom = s1 * t2 - s2 * t1;
        let r = if r_denom.abs() < 1e-6 { 0.0 } else { 1.0 / r_denom };

        let sdir = (e1 * t2 - e2 * t1) * r;
        let tdir = (e2 * s1 - e1 * s2) * r;

        tan1[i1] += sdir;
        tan1[i2] += sdir;
        tan1[i3] += sdir;
        tan2[i1] += tdir;
        tan2[i2] += tdir;
        tan2[i3] += tdir;
    }

    positions
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let n = normals.get(i).copied().map(Vec3::from).unwrap_or(Vec3::Z);
            let t = tan1[i];
            // Gram-Schmidt orthogonalize
            let xyz = (t - n * n.dot(t)).normalize_or_zero();
            let w = if n.cross(t).dot(tan2[i]) < 0.0 { -1.0 } else { 1.0 };
            [xyz.x, xyz.y, xyz.z, w]
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::raycast::Ray;
    use crate::scene::Scene;

    /// A one-quad GLB: a root node translated to z = -2 with a child holding
    /// a red, double-sided unit quad in the XY plane.
    pub(crate) fn quad_glb(extra_json: &str) -> Vec<u8> {
        let positions: [[f32; 3]; 4] = [[-0.5, -0.5, 0.0], [0.5, -0.5, 0.0], [0.5, 0.5, 0.0], [-0.5, 0.5, 0.0]];
        let indices: [u16; 6] = [0, 1, 2, 0, 2, 3];
        let mut bin = Vec::new();
        bin.extend_from_slice(bytemuck::cast_slice(&positions));
        bin.extend_from_slice(bytemuck::cast_slice(&indices));

        let json = format!(
            r#"{{
  "asset": {{ "version": "2.0" }},
  {extra_json}
  "scene": 0,
  "scenes": [{{ "nodes": [0] }}],
  "nodes": [
    {{ "name": "product", "translation": [0.0, 0.0, -2.0], "children": [1] }},
    {{ "name": "body", "mesh": 0 }}
  ],
  "meshes": [{{ "primitives": [{{ "attributes": {{ "POSITION": 0 }}, "indices": 1, "material": 0 }}] }}],
  "materials": [{{ "pbrMetallicRoughness": {{ "baseColorFactor": [1.0, 0.0, 0.0, 1.0], "metallicFactor": 0.25 }}, "doubleSided": true }}],
  "accessors": [
    {{ "bufferView": 0, "componentType": 5126, "count": 4, "type": "VEC3", "min": [-0.5, -0.5, 0.0], "max": [0.5, 0.5, 0.0] }},
    {{ "bufferView": 1, "componentType": 5123, "count": 6, "type": "SCALAR" }}
  ],
  "bufferViews": [
    {{ "buffer": 0, "byteOffset": 0, "byteLength": 48, "target": 34962 }},
    {{ "buffer": 0, "byteOffset": 48, "byteLength": 12, "target": 34963 }}
  ],
  "buffers": [{{ "byteLength": {bin_len} }}]
}}"#,
            bin_len = bin.len()
        );

        let mut json_bytes = json.into_bytes();
        while json_bytes.len() % 4 != 0 {
            json_bytes.push(b' ');
        }
        while bin.len() % 4 != 0 {
            bin.push(0);
        }

        let total = 12 + 8 + json_bytes.len() + 8 + bin.len();
        let mut glb = Vec::with_capacity(total);
        glb.extend_from_slice(b"glTF");
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&(total as u32).to_le_bytes());
        glb.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
        glb.extend_from_slice(b"JSON");
        glb.extend_from_slice(&json_bytes);
        glb.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        glb.extend_from_slice(b"BIN\0");
        glb.extend_from_slice(&bin);
        glb
    }

    #[test]
    fn parses_hierarchy_and_bakes_vertices() {
        let asset = parse_glb(&quad_glb("")).unwrap();

        assert_eq!(asset.root.name.as_deref(), Some("product"));
        assert!(asset.root.meshes.is_empty());
        assert_eq!(asset.root.children.len(), 1);
        assert_eq!(asset.root.children[0].meshes[0].triangle_count(), 2);

        assert_eq!(asset.primitives.len(), 1);
        let primitive = &asset.primitives[0];
        assert!(primitive.vertices.iter().all(|v| (v.position[2] + 2.0).abs() < 1e-6));
        // Normals were generated from the winding.
        assert!((Vec3::from(primitive.vertices[0].normal) - Vec3::Z).length() < 1e-5);
        assert_eq!(primitive.material.factors.base_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(primitive.material.factors.metallic, 0.25);
        assert!(primitive.material.double_sided);
        assert!(!primitive.material.blend);
        assert!(asset.images.is_empty());
    }

    #[test]
    fn collision_root_is_raycastable() {
        let asset = parse_glb(&quad_glb("")).unwrap();
        let mut scene = Scene::new();
        scene.add(asset.root);
        let hits = scene.intersect(&Ray::new(Vec3::ZERO, Vec3::NEG_Z), true);
        assert_eq!(hits.len(), 1);
        assert!((hits[0].distance - 2.0).abs() < 1e-5);
    }

    #[test]
    fn required_extensions_are_relaxed() {
        let glb = quad_glb(r#""extensionsUsed": ["KHR_unknown_ext"], "extensionsRequired": ["KHR_unknown_ext"],"#);
        let relaxed = relax_required_extensions(&glb);
        assert!(matches!(relaxed, Cow::Owned(_)));
        assert_eq!(relaxed.len(), glb.len());
        assert!(parse_glb(&glb).is_ok());
    }

    #[test]
    fn plain_model_is_not_copied() {
        let glb = quad_glb("");
        assert!(matches!(relax_required_extensions(&glb), Cow::Borrowed(_)));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(parse_glb(b"not a model"), Err(ViewerError::ModelParse(_))));
    }

    #[test]
    fn tangents_follow_uv_direction() {
        let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let normals = [[0.0, 0.0, 1.0]; 3];
        let uvs = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let tangents = compute_tangents(&positions, &normals, &uvs, &[0, 1, 2]);
        for t in tangents {
            assert!((Vec3::new(t[0], t[1], t[2]) - Vec3::X).length() < 1e-5);
            assert_eq!(t[3], 1.0);
        }
    }
}
