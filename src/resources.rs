use std::collections::HashSet;
use std::rc::Rc;

use flume::Sender;
use glam::Vec3;
use js_sys::{Array, Uint8Array};
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Blob, BlobPropertyBag, CanvasRenderingContext2d, HtmlCanvasElement, ImageBitmap};
use wgpu::util::DeviceExt;

use crate::environment::EnvironmentMap;
use crate::error::{ViewerError, ViewerResult};
use crate::loader::AssetMessage;
use crate::model::{EmbeddedImage, MaterialData, ModelAsset, TextureSlot};
use crate::raycast::Aabb;

pub struct Texture {
    pub view: wgpu::TextureView,
}

/// Everything a background image decode needs to turn a bitmap into a
/// mipmapped GPU texture.
#[derive(Clone)]
pub struct TextureUploader {
    pub device: Rc<wgpu::Device>,
    pub queue: Rc<wgpu::Queue>,
    pub mipmap_pipeline_linear: Rc<wgpu::RenderPipeline>,
    pub mipmap_pipeline_srgb: Rc<wgpu::RenderPipeline>,
    pub mipmap_bind_group_layout: Rc<wgpu::BindGroupLayout>,
}

impl Texture {
    fn mip_level_count(width: u32, height: u32) -> u32 {
        if width == 0 || height == 0 {
            return 1;
        }
        (width.max(height) as f32).log2().floor() as u32 + 1
    }

    pub fn from_bitmap(uploader: &TextureUploader, bitmap: ImageBitmap, is_srgb: bool) -> Self {
        let device = &uploader.device;
        let queue = &uploader.queue;
        let width = bitmap.width();
        let height = bitmap.height();
        let mip_level_count = Self::mip_level_count(width, height);
        let size = wgpu::Extent3d { width, height, depth_or_array_layers: 1 };

        let format = if is_srgb { wgpu::TextureFormat::Rgba8UnormSrgb } else { wgpu::TextureFormat::Rgba8Unorm };

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Bitmap Texture"),
            size,
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        #[cfg_attr(not(target_arch = "wasm32"), allow(unused_mut))]
        let mut uploaded = false;

        #[cfg(target_arch = "wasm32")]
        {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                queue.copy_external_image_to_texture(
                    &wgpu::ImageCopyExternalImage {
                        source: wgpu::ExternalImageSource::ImageBitmap(bitmap.clone()),
                        origin: wgpu::Origin2d::ZERO,
                        flip_y: false,
                    },
                    wgpu::ImageCopyTextureTagged {
                        texture: &texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                        color_space: wgpu::PredefinedColorSpace::Srgb,
                        premultiplied_alpha: false,
                    },
                    size,
                );
            }));

            match result {
                Ok(()) => uploaded = true,
                Err(_) => log::warn!("copy_external_image_to_texture failed, falling back to canvas upload"),
            }
        }

        if !uploaded {
            if let Err(err) = Self::upload_via_canvas(queue, &texture, &bitmap, size) {
                log::warn!("Texture upload failed: {}", err);
            }
        }

        if mip_level_count > 1 {
            let pipeline = if is_srgb { &uploader.mipmap_pipeline_srgb } else { &uploader.mipmap_pipeline_linear };
            Self::generate_mipmaps(device, queue, &texture, format, mip_level_count, pipeline, &uploader.mipmap_bind_group_layout);
        }

        Self { view: texture.create_view(&wgpu::TextureViewDescriptor::default()) }
    }

    fn upload_via_canvas(queue: &wgpu::Queue, texture: &wgpu::Texture, bitmap: &ImageBitmap, size: wgpu::Extent3d) -> ViewerResult<()> {
        let document = web_sys::window()
            .and_then(|w| w.document())
            .ok_or_else(|| ViewerError::Js("no document".to_string()))?;
        let canvas: HtmlCanvasElement = document.create_element("canvas")?.unchecked_into();
        canvas.set_width(size.width);
        canvas.set_height(size.height);

        let context: CanvasRenderingContext2d = canvas
            .get_context("2d")?
            .ok_or_else(|| ViewerError::Js("2d context unavailable".to_string()))?
            .unchecked_into();
        context.draw_image_with_image_bitmap(bitmap, 0.0, 0.0)?;
        let image_data = context.get_image_data(0.0, 0.0, size.width as f64, size.height as f64)?;

        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &image_data.data(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * size.width),
                rows_per_image: Some(size.height),
            },
            size,
        );
        Ok(())
    }

    pub fn single_pixel(device: &wgpu::Device, queue: &wgpu::Queue, color: [u8; 4], is_srgb: bool) -> Self {
        let size = wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 };
        let format = if is_srgb { wgpu::TextureFormat::Rgba8UnormSrgb } else { wgpu::TextureFormat::Rgba8Unorm };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Pixel Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &color,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            size,
        );

        Self { view: texture.create_view(&wgpu::TextureViewDescriptor::default()) }
    }

    /// Full-precision radiance texture. Read with `textureLoad`, since 32-bit
    /// float formats are not filterable on WebGL2.
    pub fn from_environment(device: &wgpu::Device, queue: &wgpu::Queue, map: &EnvironmentMap) -> Self {
        let size = wgpu::Extent3d { width: map.width, height: map.height, depth_or_array_layers: 1 };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Environment Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&map.texels),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(16 * map.width),
                rows_per_image: Some(map.height),
            },
            size,
        );

        Self { view: texture.create_view(&wgpu::TextureViewDescriptor::default()) }
    }

    /// 1x1 black radiance used until the real environment arrives.
    pub fn empty_environment(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let map = EnvironmentMap { width: 1, height: 1, texels: vec![[0.0, 0.0, 0.0, 1.0]] };
        Self::from_environment(device, queue, &map)
    }

    fn generate_mipmaps(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        texture: &wgpu::Texture,
        format: wgpu::TextureFormat,
        mip_level_count: u32,
        mipmap_pipeline: &wgpu::RenderPipeline,
        mipmap_bind_group_layout: &wgpu::BindGroupLayout,
    ) {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Mipmap Generation Encoder"),
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Mipmap Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        for mip_level in 1..mip_level_count {
            let source_view = texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("Mipmap Source"),
                format: None,
                dimension: Some(wgpu::TextureViewDimension::D2),
                aspect: wgpu::TextureAspect::All,
                base_mip_level: mip_level - 1,
                mip_level_count: Some(1),
                base_array_layer: 0,
                array_layer_count: None,
            });

            let dest_view = texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("Mipmap Dest"),
                format: Some(format),
                dimension: Some(wgpu::TextureViewDimension::D2),
                aspect: wgpu::TextureAspect::All,
                base_mip_level: mip_level,
                mip_level_count: Some(1),
                base_array_layer: 0,
                array_layer_count: None,
            });

            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                layout: mipmap_bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&source_view) },
                    wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&sampler) },
                ],
                label: Some("Mipmap Bind Group"),
            });

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Mipmap Generation Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &dest_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            render_pass.set_pipeline(mipmap_pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        queue.submit(std::iter::once(encoder.finish()));
    }
}

/// Placeholder views bound until a material's own textures finish decoding.
pub struct DefaultTextures {
    pub white_srgb: Rc<wgpu::TextureView>,
    pub flat_normal: Rc<wgpu::TextureView>,
    /// Roughness 1, metallic 1 so the material factors pass through.
    pub white_linear: Rc<wgpu::TextureView>,
    pub sampler: Rc<wgpu::Sampler>,
}

impl DefaultTextures {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Texture Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            lod_min_clamp: 0.0,
            lod_max_clamp: 100.0,
            anisotropy_clamp: 8,
            compare: None,
            border_color: None,
        });

        Self {
            white_srgb: Rc::new(Texture::single_pixel(device, queue, [255, 255, 255, 255], true).view),
            flat_normal: Rc::new(Texture::single_pixel(device, queue, [128, 128, 255, 255], false).view),
            white_linear: Rc::new(Texture::single_pixel(device, queue, [255, 255, 255, 255], false).view),
            sampler: Rc::new(sampler),
        }
    }

    fn for_slot(&self, slot: TextureSlot) -> Rc<wgpu::TextureView> {
        match slot {
            TextureSlot::BaseColor => self.white_srgb.clone(),
            TextureSlot::Normal => self.flat_normal.clone(),
            TextureSlot::MetallicRoughness => self.white_linear.clone(),
        }
    }
}

pub struct Mesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub num_indices: u32,
    pub material: MaterialData,
    pub material_buffer: wgpu::Buffer,
    pub material_bind_group: wgpu::BindGroup,
    pub base_color_view: Rc<wgpu::TextureView>,
    pub normal_view: Rc<wgpu::TextureView>,
    pub metallic_roughness_view: Rc<wgpu::TextureView>,
    pub sampler: Rc<wgpu::Sampler>,
    pub bounds: Aabb,
}

impl Mesh {
    fn create_bind_group(&self, device: &wgpu::Device, layout: &wgpu::BindGroupLayout) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&self.base_color_view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&self.normal_view) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::TextureView(&self.metallic_roughness_view) },
                wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                wgpu::BindGroupEntry { binding: 6, resource: self.material_buffer.as_entire_binding() },
            ],
            label: Some("Material Bind Group"),
        })
    }

    pub fn center(&self) -> Vec3 {
        self.bounds.center()
    }

    /// Swap in a decoded texture for every slot of this mesh that reads it.
    /// Returns whether the bind group was rebuilt.
    pub fn apply_texture(
        &mut self,
        image_index: usize,
        slot: TextureSlot,
        view: &Rc<wgpu::TextureView>,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
    ) -> bool {
        let slots = self.material.slots_using(image_index, slot.is_srgb());
        if slots.is_empty() {
            return false;
        }
        for slot in slots {
            let target = match slot {
                TextureSlot::BaseColor => &mut self.base_color_view,
                TextureSlot::Normal => &mut self.normal_view,
                TextureSlot::MetallicRoughness => &mut self.metallic_roughness_view,
            };
            *target = view.clone();
        }
        self.material_bind_group = self.create_bind_group(device, layout);
        true
    }
}

pub struct Model {
    pub opaque_meshes: Vec<Mesh>,
    pub transparent_meshes: Vec<Mesh>,
}

impl Model {
    pub fn upload(
        device: &wgpu::Device,
        asset: &ModelAsset,
        defaults: &DefaultTextures,
        material_layout: &wgpu::BindGroupLayout,
    ) -> Self {
        let mut opaque_meshes = Vec::new();
        let mut transparent_meshes = Vec::new();

        for primitive in &asset.primitives {
            let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh Vertex Buffer"),
                contents: bytemuck::cast_slice(&primitive.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
            let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh Index Buffer"),
                contents: bytemuck::cast_slice(&primitive.indices),
                usage: wgpu::BufferUsages::INDEX,
            });
            let material_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Material Buffer"),
                contents: bytemuck::cast_slice(&[primitive.material.factors]),
                usage: wgpu::BufferUsages::UNIFORM,
            });

            // Bind groups need views up front; the placeholder is replaced
            // by `apply_texture` once the real image decodes.
            let placeholder_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                layout: material_layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&defaults.white_srgb) },
                    wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&defaults.sampler) },
                    wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&defaults.flat_normal) },
                    wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::Sampler(&defaults.sampler) },
                    wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::TextureView(&defaults.white_linear) },
                    wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::Sampler(&defaults.sampler) },
                    wgpu::BindGroupEntry { binding: 6, resource: material_buffer.as_entire_binding() },
                ],
                label: Some("Material Bind Group"),
            });

            let mesh = Mesh {
                vertex_buffer,
                index_buffer,
                num_indices: primitive.indices.len() as u32,
                material: primitive.material.clone(),
                material_buffer,
                material_bind_group: placeholder_bind_group,
                base_color_view: defaults.for_slot(TextureSlot::BaseColor),
                normal_view: defaults.for_slot(TextureSlot::Normal),
                metallic_roughness_view: defaults.for_slot(TextureSlot::MetallicRoughness),
                sampler: defaults.sampler.clone(),
                bounds: primitive.bounds,
            };

            if primitive.material.blend {
                transparent_meshes.push(mesh);
            } else {
                opaque_meshes.push(mesh);
            }
        }

        Self { opaque_meshes, transparent_meshes }
    }

    pub fn apply_texture(
        &mut self,
        image_index: usize,
        slot: TextureSlot,
        view: &Rc<wgpu::TextureView>,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
    ) -> usize {
        self.opaque_meshes
            .iter_mut()
            .chain(self.transparent_meshes.iter_mut())
            .map(|mesh| mesh.apply_texture(image_index, slot, view, device, layout))
            .filter(|applied| *applied)
            .count()
    }
}

/// Every (image, slot) pair referenced by the model's materials. An image
/// used both as colour and as data is decoded once per colour space.
pub fn texture_requests(asset: &ModelAsset) -> Vec<(usize, TextureSlot)> {
    let mut seen = HashSet::new();
    let mut requests = Vec::new();
    for primitive in &asset.primitives {
        for slot in TextureSlot::ALL {
            if let Some(index) = primitive.material.texture(slot) {
                if seen.insert((index, slot.is_srgb())) {
                    requests.push((index, slot));
                }
            }
        }
    }
    requests
}

/// Decode embedded images off the frame path. Every entry of
/// `texture_requests` posts exactly one `TextureLoaded` or `TextureFailed`.
pub fn spawn_texture_decodes(uploader: &TextureUploader, asset: &ModelAsset, tx: &Sender<AssetMessage>) {
    for (image_index, slot) in texture_requests(asset) {
        let Some(image) = asset.images.iter().find(|img| img.index == image_index) else {
            let error = ViewerError::ModelParse(format!("image {} is not embedded in the GLB", image_index));
            if tx.send(AssetMessage::TextureFailed { image_index, error }).is_err() {
                log::warn!("Frame loop gone before image {} was reported", image_index);
            }
            continue;
        };
        let image = image.clone();
        let uploader = uploader.clone();
        let tx = tx.clone();

        wasm_bindgen_futures::spawn_local(async move {
            let message = match decode_bitmap(&image).await {
                Ok(bitmap) => {
                    let texture = Texture::from_bitmap(&uploader, bitmap, slot.is_srgb());
                    AssetMessage::TextureLoaded { image_index, slot, view: Rc::new(texture.view) }
                }
                Err(error) => AssetMessage::TextureFailed { image_index, error },
            };
            if tx.send(message).is_err() {
                log::warn!("Frame loop gone before image {} decoded", image_index);
            }
        });
    }
}

async fn decode_bitmap(image: &EmbeddedImage) -> ViewerResult<ImageBitmap> {
    let parts = Array::new();
    let bytes = Uint8Array::from(image.bytes.as_slice());
    parts.push(&bytes);

    let props = BlobPropertyBag::new();
    props.set_type(&image.mime_type);
    let blob = Blob::new_with_u8_array_sequence_and_options(&parts, &props)?;

    let window = web_sys::window().ok_or_else(|| ViewerError::Js("no window".to_string()))?;
    let bitmap = JsFuture::from(window.create_image_bitmap_with_blob(&blob)?).await?;
    Ok(bitmap.unchecked_into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_glb;
    use crate::model::tests::quad_glb;

    #[test]
    fn mip_chain_reaches_one_pixel() {
        assert_eq!(Texture::mip_level_count(1024, 512), 11);
        assert_eq!(Texture::mip_level_count(1, 1), 1);
        assert_eq!(Texture::mip_level_count(0, 64), 1);
    }

    #[test]
    fn untextured_model_requests_nothing() {
        let asset = parse_glb(&quad_glb("")).unwrap();
        assert!(texture_requests(&asset).is_empty());
    }

    #[test]
    fn shared_images_are_requested_once_per_color_space() {
        let mut asset = parse_glb(&quad_glb("")).unwrap();
        let mut material = asset.primitives[0].material.clone();
        material.base_color_texture = Some(0);
        material.normal_texture = Some(1);
        material.metallic_roughness_texture = Some(1);
        asset.primitives[0].material = material.clone();
        asset.primitives.push(asset.primitives[0].clone());

        let requests = texture_requests(&asset);
        assert_eq!(requests, vec![(0, TextureSlot::BaseColor), (1, TextureSlot::Normal)]);
    }

    #[test]
    fn decoded_image_binds_to_slots_with_matching_index_and_color_space() {
        let mut material = parse_glb(&quad_glb("")).unwrap().primitives[0].material.clone();
        material.base_color_texture = Some(0);
        material.normal_texture = Some(1);
        material.metallic_roughness_texture = Some(1);

        // One linear decode feeds both data slots.
        assert_eq!(
            material.slots_using(1, TextureSlot::Normal.is_srgb()),
            vec![TextureSlot::Normal, TextureSlot::MetallicRoughness]
        );
        assert_eq!(material.slots_using(0, TextureSlot::BaseColor.is_srgb()), vec![TextureSlot::BaseColor]);
        // Same image decoded in the other colour space is not a match.
        assert!(material.slots_using(0, false).is_empty());
        assert!(material.slots_using(2, true).is_empty());
    }
}
