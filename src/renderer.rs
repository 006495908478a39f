use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::{
    camera::PerspectiveCamera,
    error::RenderError,
    scene_tree::Scene,
    viewer::{Renderer, SurfaceSize},
};

pub struct WgpuContext {
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl WgpuContext {
    pub async fn new(window: Arc<Window>) -> Result<Self, RenderError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: None,
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
                },
                None,
            )
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .unwrap_or(wgpu::TextureFormat::Bgra8UnormSrgb);
        // the page behind the canvas should show through
        let alpha_mode = [wgpu::CompositeAlphaMode::PreMultiplied, wgpu::CompositeAlphaMode::PostMultiplied]
            .into_iter()
            .find(|m| surface_caps.alpha_modes.contains(m))
            .or_else(|| surface_caps.alpha_modes.first().copied())
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: surface_caps.present_modes.first().copied().unwrap_or(wgpu::PresentMode::Fifo),
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);
        log::info!("surface {:?} {:?} {}x{}", surface_format, alpha_mode, size.width, size.height);

        Ok(Self {
            surface,
            surface_config,
            device,
            queue,
        })
    }

    fn reconfigure(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.surface_config.width = width;
            self.surface_config.height = height;
            self.surface.configure(&self.device, &self.surface_config);
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct FrameUniform {
    view_proj: [[f32; 4]; 4],
    light: [f32; 4],
    ambient: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct LineVertex {
    position: [f32; 3],
    tangent: [f32; 3],
}

impl LineVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<LineVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// True when both ends lie beyond the same clip plane.
fn outside_view(view_proj: Mat4, start: Vec3, end: Vec3) -> bool {
    let a = view_proj * start.extend(1.0);
    let b = view_proj * end.extend(1.0);
    let beyond = |plane: fn(Vec4) -> bool| plane(a) && plane(b);
    beyond(|c| c.x < -c.w)
        || beyond(|c| c.x > c.w)
        || beyond(|c| c.y < -c.w)
        || beyond(|c| c.y > c.w)
        || beyond(|c| c.z < 0.0)
        || beyond(|c| c.z > c.w)
}

fn skeleton_vertices(scene: &Scene, view_proj: Mat4) -> Vec<LineVertex> {
    scene
        .root_children()
        .iter()
        .flat_map(|&model| scene.bone_segments(model))
        .filter(|seg| !(seg.frustum_culled && outside_view(view_proj, seg.start, seg.end)))
        .filter_map(|seg| {
            let (from, to) = (seg.start, seg.end);
            let tangent = (to - from).normalize_or_zero();
            if tangent == Vec3::ZERO {
                return None;
            }
            let tangent = tangent.to_array();
            Some([
                LineVertex { position: from.to_array(), tangent },
                LineVertex { position: to.to_array(), tangent },
            ])
        })
        .flatten()
        .collect()
}

pub struct SkeletonRenderer {
    context: WgpuContext,
    pipeline: wgpu::RenderPipeline,
    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    vertex_buffer: wgpu::Buffer,
    vertex_capacity: usize,
    pixel_ratio: f64,
    logical_size: SurfaceSize,
}

impl SkeletonRenderer {
    pub fn new(context: WgpuContext) -> Self {
        let device = &context.device;

        let frame_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Frame Buffer"),
            contents: bytemuck::cast_slice(&[FrameUniform::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let frame_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
            label: Some("frame_bind_group_layout"),
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &frame_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
            label: Some("frame_bind_group"),
        });

        let pipeline = Self::create_render_pipeline(&context, &frame_bind_group_layout);
        let vertex_capacity = 256;
        let vertex_buffer = Self::create_vertex_buffer(device, vertex_capacity);
        let logical_size = SurfaceSize::new(context.surface_config.width, context.surface_config.height);

        Self {
            context,
            pipeline,
            frame_buffer,
            frame_bind_group,
            vertex_buffer,
            vertex_capacity,
            pixel_ratio: 1.0,
            logical_size,
        }
    }

    fn create_vertex_buffer(device: &wgpu::Device, capacity: usize) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Skeleton Vertex Buffer"),
            size: (capacity * std::mem::size_of::<LineVertex>()) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn create_render_pipeline(context: &WgpuContext, frame_bind_group_layout: &wgpu::BindGroupLayout) -> wgpu::RenderPipeline {
        let device = &context.device;
        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Skeleton Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/skeleton.wgsl").into()),
        });
        let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Skeleton Pipeline Layout"),
            bind_group_layouts: &[frame_bind_group_layout],
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Skeleton Pipeline"),
            layout: Some(&render_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader_module,
                entry_point: "vs_main",
                buffers: &[LineVertex::layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader_module,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: context.surface_config.format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::LineList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
        })
    }

    fn apply_size(&mut self) {
        let width = (self.logical_size.width as f64 * self.pixel_ratio).round() as u32;
        let height = (self.logical_size.height as f64 * self.pixel_ratio).round() as u32;
        self.context.reconfigure(width, height);
    }
}

impl Renderer for SkeletonRenderer {
    fn set_pixel_ratio(&mut self, ratio: f64) {
        if ratio > 0.0 && ratio != self.pixel_ratio {
            self.pixel_ratio = ratio;
            self.apply_size();
        }
    }

    fn set_size(&mut self, size: SurfaceSize) {
        self.logical_size = size;
        self.apply_size();
    }

    fn render(&mut self, scene: &Scene, camera: &PerspectiveCamera) -> Result<(), RenderError> {
        let vertices = skeleton_vertices(scene, camera.view_proj());
        if vertices.len() > self.vertex_capacity {
            self.vertex_capacity = vertices.len().next_power_of_two();
            self.vertex_buffer = Self::create_vertex_buffer(&self.context.device, self.vertex_capacity);
        }
        if !vertices.is_empty() {
            self.context.queue.write_buffer(&self.vertex_buffer, 0, bytemuck::cast_slice(&vertices));
        }

        let light = &scene.directional_light;
        let frame = FrameUniform {
            view_proj: camera.view_proj().to_cols_array_2d(),
            light: light.direction.extend(light.intensity).to_array(),
            ambient: [scene.ambient_light.intensity, 0.0, 0.0, 0.0],
        };
        self.context.queue.write_buffer(&self.frame_buffer, 0, bytemuck::cast_slice(&[frame]));

        let output = match self.context.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.apply_size();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self.context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
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

            if !vertices.is_empty() {
                render_pass.set_pipeline(&self.pipeline);
                render_pass.set_bind_group(0, &self.frame_bind_group, &[]);
                render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
                render_pass.draw(0..vertices.len() as u32, 0..1);
            }
        }

        self.context.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}
