//! wgpu implementation of the uploader and canvas seams.
use std::sync::{Arc, Mutex};

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use tracing::{debug, warn};
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::camera::{Rect, Size};
use crate::canvas::{Canvas, CanvasElement};
use crate::error::{Error, TextureError};
use crate::source::DecodedImage;
use crate::texture_cache::{Texture, TextureUploader};

/// Device and queue shared by the uploader (blocking pool) and the canvas
/// (event loop thread).
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Acquires an adapter able to present to `surface` and a device with the
    /// adapter's full limits, so large photos need no downscaling.
    pub fn request(
        instance: &wgpu::Instance,
        surface: &wgpu::Surface<'_>,
    ) -> Result<(Self, wgpu::Adapter), Error> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(surface),
            force_fallback_adapter: false,
        }))
        .map_err(|err| Error::Gpu(format!("no suitable adapter: {err}")))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("photo-layer-device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::default(),
        }))
        .map_err(|err| Error::Gpu(format!("device request failed: {err}")))?;
        Ok((Self { device, queue }, adapter))
    }
}

/// Backend handle stored in the texture cache.
pub struct GpuTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl GpuTexture {
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

pub struct WgpuUploader {
    gpu: Arc<GpuContext>,
    // error scopes are per device; keep concurrent uploads from popping each
    // other's errors
    scope: Mutex<()>,
}

impl WgpuUploader {
    pub fn new(gpu: Arc<GpuContext>) -> Self {
        Self {
            gpu,
            scope: Mutex::new(()),
        }
    }
}

impl TextureUploader for WgpuUploader {
    type Handle = GpuTexture;

    fn upload(&self, image: &DecodedImage) -> Result<GpuTexture, TextureError> {
        let (w, h) = (image.width, image.height);
        if w == 0 || h == 0 {
            return Err(TextureError::UploadFailure(format!("empty image {w}x{h}")));
        }
        let expected = w as usize * h as usize * 4;
        if image.pixels.len() != expected {
            return Err(TextureError::UploadFailure(format!(
                "pixel buffer is {} bytes, expected {expected}",
                image.pixels.len()
            )));
        }

        let GpuContext { device, queue } = self.gpu.as_ref();
        let _scope = self.scope.lock().unwrap_or_else(|e| e.into_inner());
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some("photo"),
                size: wgpu::Extent3d {
                    width: w,
                    height: h,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &image.pixels,
        );
        let oom = pollster::block_on(device.pop_error_scope());
        let invalid = pollster::block_on(device.pop_error_scope());
        if let Some(err) = oom.or(invalid) {
            return Err(TextureError::UploadFailure(err.to_string()));
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        debug!(width = w, height = h, "uploaded texture");
        Ok(GpuTexture {
            _texture: texture,
            view,
        })
    }

    fn max_dimension(&self) -> Option<u32> {
        Some(self.gpu.device.limits().max_texture_dimension_2d)
    }
}

/// The window hosting the canvas. Hidden means the frame is cleared to black.
pub struct WindowElement {
    window: Option<Arc<Window>>,
    visible: bool,
    display_size: Size,
}

impl WindowElement {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window: Some(window),
            visible: false,
            display_size: Size::default(),
        }
    }

    pub fn display_size(&self) -> Size {
        self.display_size
    }

    fn request_redraw(&self) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

impl CanvasElement for WindowElement {
    fn show(&mut self) {
        if !self.visible {
            self.visible = true;
            self.request_redraw();
        }
    }

    fn hide(&mut self) {
        if self.visible {
            self.visible = false;
            self.request_redraw();
        }
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn set_display_size(&mut self, size: Size) {
        self.display_size = size;
    }

    fn detach(&mut self) {
        self.visible = false;
        self.request_redraw();
        self.window = None;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PhotoUniforms {
    view_proj: [[f32; 4]; 4],
    texture_size: [f32; 2],
    flip_y: f32,
    clip_enabled: f32,
    clip: [f32; 4],
}

struct Bound {
    size: (u32, u32),
    bind_group: wgpu::BindGroup,
}

/// Draws one photo as a textured quad in world space (texture pixels).
pub struct WgpuCanvas {
    gpu: Arc<GpuContext>,
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniforms: wgpu::Buffer,
    bound: Option<Bound>,
    flip_y: bool,
    clip: Option<Rect>,
    size: Option<Size>,
    projection: Option<Mat4>,
    camera: Option<Mat4>,
    element: WindowElement,
}

impl WgpuCanvas {
    pub fn new(gpu: Arc<GpuContext>, format: wgpu::TextureFormat, element: WindowElement) -> Self {
        let device = &gpu.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("photo-shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("gpu/photo.wgsl").into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("photo-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
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
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("photo-pipeline-layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("photo-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("photo-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("photo-uniforms"),
            contents: bytemuck::bytes_of(&PhotoUniforms::zeroed()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Self {
            gpu,
            pipeline,
            layout,
            sampler,
            uniforms,
            bound: None,
            flip_y: false,
            clip: None,
            size: None,
            projection: None,
            camera: None,
            element,
        }
    }

    pub fn element(&self) -> &WindowElement {
        &self.element
    }

    /// Canvas pixel size last pushed by the layer.
    pub fn size(&self) -> Option<Size> {
        self.size
    }

    /// True while the element is still on screen but the next photo is not
    /// renderable yet. Presenting then would clear to black, so hosts keep
    /// the last presented frame until the layer shows or hides the element.
    pub fn holds_previous_frame(&self) -> bool {
        holds_previous_frame(self.element.visible, self.is_valid())
    }

    /// Records the draw into `encoder`, clearing `target` first.
    pub fn render(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("photo-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        if !self.element.visible || !self.is_valid() {
            return;
        }
        let (Some(bound), Some(size)) = (&self.bound, self.size) else {
            return;
        };
        if size.is_empty() {
            return;
        }
        pass.set_viewport(0.0, 0.0, size.width as f32, size.height as f32, 0.0, 1.0);
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bound.bind_group, &[]);
        pass.draw(0..4, 0..1);
    }

    fn write_uniforms(&self) {
        let (Some(bound), Some(projection), Some(camera)) =
            (&self.bound, self.projection, self.camera)
        else {
            return;
        };
        let clip = self.clip.unwrap_or_default();
        let uniforms = PhotoUniforms {
            view_proj: (projection * camera).to_cols_array_2d(),
            texture_size: [bound.size.0 as f32, bound.size.1 as f32],
            flip_y: if self.flip_y { 1.0 } else { 0.0 },
            clip_enabled: if self.clip.is_some() { 1.0 } else { 0.0 },
            clip: [clip.x, clip.y, clip.width, clip.height],
        };
        self.gpu
            .queue
            .write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));
    }
}

impl Canvas for WgpuCanvas {
    type Handle = GpuTexture;
    type Element = WindowElement;

    fn set_base_texture(&mut self, texture: Option<&Texture<GpuTexture>>, flip_y: bool) {
        self.flip_y = flip_y;
        self.bound = texture.map(|texture| Bound {
            size: (texture.width, texture.height),
            bind_group: self
                .gpu
                .device
                .create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("photo-bind-group"),
                    layout: &self.layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: self.uniforms.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(texture.handle().view()),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::Sampler(&self.sampler),
                        },
                    ],
                }),
        });
    }

    fn set_clip_rect(&mut self, rect: Option<Rect>) {
        self.clip = rect;
    }

    fn set_size(&mut self, size: Size) {
        self.size = Some(size);
    }

    fn set_projection_matrix(&mut self, matrix: Mat4) {
        self.projection = Some(matrix);
    }

    fn set_camera_matrix(&mut self, matrix: Mat4) {
        self.camera = Some(matrix);
    }

    fn update(&mut self) {
        if !self.is_valid() {
            warn!("canvas update without texture or transforms");
            return;
        }
        self.write_uniforms();
        self.element.request_redraw();
    }

    fn is_valid(&self) -> bool {
        self.bound.is_some()
            && self.size.is_some_and(|s| !s.is_empty())
            && self.projection.is_some()
            && self.camera.is_some()
    }

    fn element_mut(&mut self) -> &mut WindowElement {
        &mut self.element
    }
}

fn holds_previous_frame(visible: bool, renderable: bool) -> bool {
    visible && !renderable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_photo_keeps_previous_frame() {
        assert!(holds_previous_frame(true, false));
        assert!(!holds_previous_frame(true, true));
        // hidden: present the cleared frame
        assert!(!holds_previous_frame(false, false));
        assert!(!holds_previous_frame(false, true));
    }

    #[test]
    fn uniforms_match_shader_layout() {
        assert_eq!(std::mem::size_of::<PhotoUniforms>(), 96);
    }
}
