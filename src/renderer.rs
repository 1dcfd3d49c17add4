use std::rc::Rc;

use flume::Sender;
use glam::{vec3, vec4, Mat4, Vec3, Vec4};
use web_sys::HtmlCanvasElement;
use wgpu::util::DeviceExt;

use crate::camera::PerspectiveCamera;
use crate::config::RenderConfig;
use crate::environment::EnvironmentMap;
use crate::error::{ViewerError, ViewerResult};
use crate::loader::AssetMessage;
use crate::model::{ModelAsset, TextureSlot};
use crate::raycast::Aabb;
use crate::resources::{spawn_texture_decodes, DefaultTextures, Mesh, Model, Texture, TextureUploader};
use crate::state::RenderBackend;
use crate::uniforms::{CameraUniform, ModelVertex, SceneUniform};

pub struct Renderer {
    pub surface: wgpu::Surface<'static>,
    pub device: Rc<wgpu::Device>,
    pub queue: Rc<wgpu::Queue>,
    pub config: wgpu::SurfaceConfiguration,
    pub depth_texture: wgpu::Texture,
    pub depth_view: wgpu::TextureView,
    pub msaa_texture: Option<wgpu::Texture>,
    pub msaa_view: Option<wgpu::TextureView>,
    pub sample_count: u32,
    pub opaque_pipeline: wgpu::RenderPipeline,
    pub opaque_double_sided_pipeline: wgpu::RenderPipeline,
    pub transparent_pipeline: wgpu::RenderPipeline,
    pub transparent_double_sided_pipeline: wgpu::RenderPipeline,
    pub uploader: TextureUploader,
    pub defaults: DefaultTextures,
    pub material_layout: wgpu::BindGroupLayout,
    pub scene_layout: wgpu::BindGroupLayout,
    pub scene_buffer: wgpu::Buffer,
    pub scene_bind_group: wgpu::BindGroup,
    pub environment: Texture,
    pub scene_uniform: SceneUniform,
    pub clear_color: wgpu::Color,
    pub model: Option<Model>,
}

impl Renderer {
    pub async fn new(canvas: HtmlCanvasElement, is_mobile: bool, render_config: &RenderConfig) -> ViewerResult<Self> {
        // Mobile browsers often expose a WebGPU adapter that then fails; stay on GL there.
        let backends = if is_mobile {
            wgpu::Backends::GL
        } else {
            wgpu::Backends::GL | wgpu::Backends::BROWSER_WEBGPU
        };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let surface = instance
            .create_surface(Self::surface_target(canvas.clone())?)
            .map_err(|e| ViewerError::Gpu(format!("Failed to create surface: {}", e)))?;

        // Try each preference with and without the surface, fallback adapters last.
        let attempts = [
            (wgpu::PowerPreference::HighPerformance, true, false),
            (wgpu::PowerPreference::HighPerformance, true, true),
            (wgpu::PowerPreference::LowPower, true, false),
            (wgpu::PowerPreference::LowPower, true, true),
            (wgpu::PowerPreference::HighPerformance, false, true),
            (wgpu::PowerPreference::LowPower, false, true),
        ];
        let mut adapter = None;
        for (power_preference, with_surface, force_fallback_adapter) in attempts {
            adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference,
                    compatible_surface: if with_surface { Some(&surface) } else { None },
                    force_fallback_adapter,
                })
                .await;
            if adapter.is_some() {
                break;
            }
        }
        let adapter = adapter.ok_or_else(|| ViewerError::Gpu("No adapter (including fallback)".to_string()))?;

        let info = adapter.get_info();
        log::info!("Using adapter {:?} on {:?}", info.name, info.backend);

        let mut required_limits = if info.backend == wgpu::Backend::Gl {
            wgpu::Limits::downlevel_defaults()
        } else {
            wgpu::Limits::downlevel_webgl2_defaults()
        };
        let adapter_limits = adapter.limits();
        required_limits.max_texture_dimension_2d = adapter_limits.max_texture_dimension_2d;
        required_limits.max_compute_workgroups_per_dimension = 0;
        required_limits.max_compute_invocations_per_workgroup = 0;
        required_limits.max_compute_workgroup_storage_size = 0;
        required_limits.max_compute_workgroup_size_x = 0;
        required_limits.max_compute_workgroup_size_y = 0;
        required_limits.max_compute_workgroup_size_z = 0;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    required_features: wgpu::Features::empty(),
                    required_limits,
                    label: None,
                },
                None,
            )
            .await
            .map_err(|e| ViewerError::Gpu(e.to_string()))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| {
                surface_caps
                    .formats
                    .iter()
                    .copied()
                    .find(|f| matches!(f, wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Bgra8Unorm))
            })
            .unwrap_or(wgpu::TextureFormat::Rgba8Unorm);

        let present_mode = surface_caps
            .present_modes
            .iter()
            .copied()
            .find(|&mode| mode == wgpu::PresentMode::Mailbox)
            .unwrap_or(wgpu::PresentMode::Fifo);

        let alpha_mode = surface_caps
            .alpha_modes
            .iter()
            .copied()
            .find(|&mode| mode == wgpu::CompositeAlphaMode::PreMultiplied)
            .or_else(|| {
                surface_caps
                    .alpha_modes
                    .iter()
                    .copied()
                    .find(|&mode| mode == wgpu::CompositeAlphaMode::PostMultiplied)
            })
            .or_else(|| surface_caps.alpha_modes.first().copied())
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: canvas.width().max(1),
            height: canvas.height().max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let sample_count = Self::supported_sample_count(&adapter, surface_format, render_config.sample_count, info.backend, is_mobile);

        let (depth_texture, depth_view) = Self::create_depth_texture(&device, &config, sample_count);
        let (msaa_texture, msaa_view) = Self::create_msaa_texture(&device, &config, sample_count)
            .map(|(t, v)| (Some(t), Some(v)))
            .unwrap_or((None, None));

        let shader = device.create_shader_module(wgpu::include_wgsl!("shader.wgsl"));
        let mipmap_shader = device.create_shader_module(wgpu::include_wgsl!("mipmap.wgsl"));

        // Non-sRGB surfaces get the transfer function applied in the shader.
        let mut scene_uniform = SceneUniform::new(render_config.exposure);
        scene_uniform.environment.params[2] = if surface_format.is_srgb() { 0.0 } else { 1.0 };

        let scene_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scene Buffer"),
            contents: bytemuck::cast_slice(&[scene_uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let scene_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                },
            ],
            label: Some("Scene Layout"),
        });

        let environment = Texture::empty_environment(&device, &queue);
        let scene_bind_group = Self::create_scene_bind_group(&device, &scene_layout, &scene_buffer, &environment);

        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
            },
            count: None,
        };
        let sampler_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        };

        let material_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                texture_entry(0),
                sampler_entry(1),
                texture_entry(2),
                sampler_entry(3),
                texture_entry(4),
                sampler_entry(5),
                wgpu::BindGroupLayoutEntry {
                    binding: 6,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
            label: Some("Material Layout"),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Main Pipeline Layout"),
            bind_group_layouts: &[&scene_layout, &material_layout],
            push_constant_ranges: &[],
        });

        let create_model_pipeline = |label: &str, blend: Option<wgpu::BlendState>, depth_write_enabled: bool, cull_mode: Option<wgpu::Face>| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: "vs_model",
                    buffers: &[ModelVertex::desc()],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: "fs_model",
                    targets: &[Some(wgpu::ColorTargetState { format: config.format, blend, write_mask: wgpu::ColorWrites::ALL })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState { cull_mode, ..Default::default() },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: wgpu::TextureFormat::Depth32Float,
                    depth_write_enabled,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: Default::default(),
                    bias: Default::default(),
                }),
                multisample: wgpu::MultisampleState { count: sample_count, mask: !0, alpha_to_coverage_enabled: false },
                multiview: None,
            })
        };

        let opaque_pipeline = create_model_pipeline("Opaque Pipeline", None, true, Some(wgpu::Face::Back));
        let opaque_double_sided_pipeline = create_model_pipeline("Opaque Double-Sided Pipeline", None, true, None);
        let transparent_pipeline = create_model_pipeline("Transparent Pipeline", Some(wgpu::BlendState::ALPHA_BLENDING), false, Some(wgpu::Face::Back));
        let transparent_double_sided_pipeline =
            create_model_pipeline("Transparent Double-Sided Pipeline", Some(wgpu::BlendState::ALPHA_BLENDING), false, None);

        let mipmap_bind_group_layout = Rc::new(device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[texture_entry(0), sampler_entry(1)],
            label: Some("Mipmap Bind Group Layout"),
        }));

        let mipmap_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mipmap Pipeline Layout"),
            bind_group_layouts: &[&mipmap_bind_group_layout],
            push_constant_ranges: &[],
        });

        let create_mipmap_pipeline = |format: wgpu::TextureFormat, label: &str| -> wgpu::RenderPipeline {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&mipmap_pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &mipmap_shader,
                    entry_point: "vs_mipmap",
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &mipmap_shader,
                    entry_point: "fs_mipmap",
                    targets: &[Some(wgpu::ColorTargetState { format, blend: None, write_mask: wgpu::ColorWrites::ALL })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState { topology: wgpu::PrimitiveTopology::TriangleList, ..Default::default() },
                depth_stencil: None,
                multisample: wgpu::MultisampleState { count: 1, mask: !0, alpha_to_coverage_enabled: false },
                multiview: None,
            })
        };

        let mipmap_pipeline_linear = Rc::new(create_mipmap_pipeline(wgpu::TextureFormat::Rgba8Unorm, "Mipmap Pipeline (Linear)"));
        let mipmap_pipeline_srgb = Rc::new(create_mipmap_pipeline(wgpu::TextureFormat::Rgba8UnormSrgb, "Mipmap Pipeline (sRGB)"));

        let device = Rc::new(device);
        let queue = Rc::new(queue);
        let defaults = DefaultTextures::new(&device, &queue);
        let uploader = TextureUploader {
            device: device.clone(),
            queue: queue.clone(),
            mipmap_pipeline_linear,
            mipmap_pipeline_srgb,
            mipmap_bind_group_layout,
        };

        let clear_color = Self::clear_color(render_config, surface_format.is_srgb());

        log::info!("Renderer ready: {:?}, {}x MSAA", surface_format, sample_count);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            depth_texture,
            depth_view,
            msaa_texture,
            msaa_view,
            sample_count,
            opaque_pipeline,
            opaque_double_sided_pipeline,
            transparent_pipeline,
            transparent_double_sided_pipeline,
            uploader,
            defaults,
            material_layout,
            scene_layout,
            scene_buffer,
            scene_bind_group,
            environment,
            scene_uniform,
            clear_color,
            model: None,
        })
    }

    #[cfg(target_arch = "wasm32")]
    fn surface_target(canvas: HtmlCanvasElement) -> ViewerResult<wgpu::SurfaceTarget<'static>> {
        Ok(wgpu::SurfaceTarget::Canvas(canvas))
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn surface_target(_canvas: HtmlCanvasElement) -> ViewerResult<wgpu::SurfaceTarget<'static>> {
        Err(ViewerError::Gpu("canvas surfaces require wasm32".to_string()))
    }

    fn supported_sample_count(
        adapter: &wgpu::Adapter,
        format: wgpu::TextureFormat,
        requested: u32,
        backend: wgpu::Backend,
        is_mobile: bool,
    ) -> u32 {
        if backend == wgpu::Backend::Gl {
            log::warn!("WebGL backend detected, disabling MSAA");
            return 1;
        }
        let requested = if is_mobile { requested.min(2) } else { requested };
        let flags = adapter.get_texture_format_features(format).flags;
        if requested > 1 && flags.sample_count_supported(requested) {
            requested
        } else {
            1
        }
    }

    /// A linear clear colour is correct for sRGB targets; plain targets get
    /// the encoded value written through unchanged.
    fn clear_color(render_config: &RenderConfig, srgb_target: bool) -> wgpu::Color {
        let [r, g, b, a] = if srgb_target {
            render_config.clear_color_linear()
        } else {
            let c = render_config.clear_color;
            let channel = |shift: u32| ((c >> shift) & 0xff) as f64 / 255.0;
            [channel(16), channel(8), channel(0), render_config.clear_alpha as f64]
        };
        wgpu::Color { r, g, b, a }
    }

    fn create_scene_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        buffer: &wgpu::Buffer,
        environment: &Texture,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&environment.view) },
            ],
            label: Some("Scene Bind Group"),
        })
    }

    fn create_depth_texture(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration, sample_count: u32) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Texture"),
            size: wgpu::Extent3d { width: config.width, height: config.height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn create_msaa_texture(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration, sample_count: u32) -> Option<(wgpu::Texture, wgpu::TextureView)> {
        if sample_count <= 1 {
            return None;
        }
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("MSAA Texture"),
            size: wgpu::Extent3d { width: config.width, height: config.height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count,
            dimension: wgpu::TextureDimension::D2,
            format: config.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Some((texture, view))
    }

    fn reconfigure(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);

        let (depth_texture, depth_view) = Self::create_depth_texture(&self.device, &self.config, self.sample_count);
        self.depth_texture = depth_texture;
        self.depth_view = depth_view;

        match Self::create_msaa_texture(&self.device, &self.config, self.sample_count) {
            Some((msaa_texture, msaa_view)) => {
                self.msaa_texture = Some(msaa_texture);
                self.msaa_view = Some(msaa_view);
            }
            None => {
                self.msaa_texture = None;
                self.msaa_view = None;
            }
        }
    }

    fn draw_meshes<'a>(
        render_pass: &mut wgpu::RenderPass<'a>,
        meshes: impl Iterator<Item = &'a Mesh>,
        pipeline: &'a wgpu::RenderPipeline,
        double_sided_pipeline: &'a wgpu::RenderPipeline,
    ) {
        for mesh in meshes {
            let pipeline = if mesh.material.double_sided { double_sided_pipeline } else { pipeline };
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(1, &mesh.material_bind_group, &[]);
            render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            render_pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            render_pass.draw_indexed(0..mesh.num_indices, 0, 0..1);
        }
    }
}

pub(crate) fn is_aabb_in_frustum(view_proj: &[[f32; 4]; 4], aabb: &Aabb) -> bool {
    let m = view_proj;
    let planes = [
        vec4(m[0][3] + m[0][0], m[1][3] + m[1][0], m[2][3] + m[2][0], m[3][3] + m[3][0]),
        vec4(m[0][3] - m[0][0], m[1][3] - m[1][0], m[2][3] - m[2][0], m[3][3] - m[3][0]),
        vec4(m[0][3] + m[0][1], m[1][3] + m[1][1], m[2][3] + m[2][1], m[3][3] + m[3][1]),
        vec4(m[0][3] - m[0][1], m[1][3] - m[1][1], m[2][3] - m[2][1], m[3][3] - m[3][1]),
        vec4(m[0][2], m[1][2], m[2][2], m[3][2]),
        vec4(m[0][3] - m[0][2], m[1][3] - m[1][2], m[2][3] - m[2][2], m[3][3] - m[3][2]),
    ];

    planes.iter().all(|plane| {
        let plane: Vec4 = *plane;
        let p_vertex = vec3(
            if plane.x >= 0.0 { aabb.max.x } else { aabb.min.x },
            if plane.y >= 0.0 { aabb.max.y } else { aabb.min.y },
            if plane.z >= 0.0 { aabb.max.z } else { aabb.min.z },
        );
        plane.truncate().dot(p_vertex) + plane.w >= 0.0
    })
}

impl RenderBackend for Renderer {
    fn upload_model(&mut self, asset: &ModelAsset, textures: &Sender<AssetMessage>) {
        let model = Model::upload(&self.device, asset, &self.defaults, &self.material_layout);
        log::info!(
            "Uploaded model: {} opaque, {} transparent meshes",
            model.opaque_meshes.len(),
            model.transparent_meshes.len()
        );
        self.model = Some(model);
        spawn_texture_decodes(&self.uploader, asset, textures);
    }

    fn upload_environment(&mut self, map: &EnvironmentMap) {
        self.environment = Texture::from_environment(&self.device, &self.queue, map);
        self.scene_bind_group = Self::create_scene_bind_group(&self.device, &self.scene_layout, &self.scene_buffer, &self.environment);
        let ambient = map.average_radiance();
        self.scene_uniform.environment.ambient = [ambient.x, ambient.y, ambient.z, 1.0];
    }

    fn upload_texture(&mut self, image_index: usize, slot: TextureSlot, view: Rc<wgpu::TextureView>) {
        if let Some(model) = &mut self.model {
            let updated = model.apply_texture(image_index, slot, &view, &self.device, &self.material_layout);
            log::debug!("Image {} ({:?}) bound to {} meshes", image_index, slot, updated);
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.reconfigure(width, height);
    }

    fn render(&mut self, camera: &PerspectiveCamera, model_transform: Mat4) {
        let view_proj = camera.view_proj();
        self.scene_uniform.camera = CameraUniform {
            view_proj: view_proj.to_cols_array_2d(),
            inv_view_proj: view_proj.inverse().to_cols_array_2d(),
            camera_pos: camera.position.extend(1.0).to_array(),
        };
        self.scene_uniform.model = model_transform.to_cols_array_2d();
        self.queue.write_buffer(&self.scene_buffer, 0, bytemuck::cast_slice(&[self.scene_uniform]));

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost) => {
                self.reconfigure(self.config.width, self.config.height);
                return;
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                log::error!("WGPU OutOfMemory");
                return;
            }
            Err(e) => {
                log::warn!("{:?}", e);
                return;
            }
        };

        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Render Encoder") });

        {
            let (color_view, resolve_target) = match self.msaa_view {
                Some(ref msaa_view) => (msaa_view, Some(&view)),
                None => (&view, None),
            };

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Main Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    resolve_target,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Discard }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_bind_group(0, &self.scene_bind_group, &[]);

            if let Some(model) = &self.model {
                let vp = &self.scene_uniform.camera.view_proj;
                let visible = |mesh: &&Mesh| is_aabb_in_frustum(vp, &mesh.bounds.transformed(&model_transform));

                Self::draw_meshes(
                    &mut render_pass,
                    model.opaque_meshes.iter().filter(visible),
                    &self.opaque_pipeline,
                    &self.opaque_double_sided_pipeline,
                );

                // Back to front.
                let cam_pos: Vec3 = camera.position;
                let mut transparent: Vec<(&Mesh, f32)> = model
                    .transparent_meshes
                    .iter()
                    .filter(visible)
                    .map(|mesh| (mesh, (model_transform.transform_point3(mesh.center()) - cam_pos).length_squared()))
                    .collect();
                transparent.sort_by(|a, b| b.1.total_cmp(&a.1));

                Self::draw_meshes(
                    &mut render_pass,
                    transparent.into_iter().map(|(mesh, _)| mesh),
                    &self.transparent_pipeline,
                    &self.transparent_double_sided_pipeline,
                );
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;

    fn camera() -> PerspectiveCamera {
        PerspectiveCamera::new(&CameraConfig::default(), 1.0)
    }

    #[test]
    fn box_in_front_of_camera_is_inside_frustum() {
        let vp = camera().view_proj().to_cols_array_2d();
        let aabb = Aabb { min: Vec3::splat(-0.01), max: Vec3::splat(0.01) };
        assert!(is_aabb_in_frustum(&vp, &aabb));
    }

    #[test]
    fn box_behind_camera_is_culled() {
        let vp = camera().view_proj().to_cols_array_2d();
        let aabb = Aabb { min: vec3(-0.01, -0.01, 1.0), max: vec3(0.01, 0.01, 1.1) };
        assert!(!is_aabb_in_frustum(&vp, &aabb));
    }

    #[test]
    fn box_far_to_the_side_is_culled() {
        let vp = camera().view_proj().to_cols_array_2d();
        let aabb = Aabb { min: vec3(5.0, -0.01, -0.01), max: vec3(5.1, 0.01, 0.01) };
        assert!(!is_aabb_in_frustum(&vp, &aabb));
    }

    #[test]
    fn box_straddling_the_edge_is_kept() {
        let vp = camera().view_proj().to_cols_array_2d();
        let aabb = Aabb { min: vec3(-5.0, -0.01, -0.01), max: vec3(5.0, 0.01, 0.01) };
        assert!(is_aabb_in_frustum(&vp, &aabb));
    }

    #[test]
    fn sdr_clear_color_passes_hex_through() {
        let c = Renderer::clear_color(&RenderConfig::default(), false);
        assert!((c.r - 170.0 / 255.0).abs() < 1e-9);
        let linear = Renderer::clear_color(&RenderConfig::default(), true);
        assert!(linear.r < c.r);
        assert_eq!(linear.a, 1.0);
    }
}
