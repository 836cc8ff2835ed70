//! wgpu-backed GPU context.
//!
//! Maps the renderer's GPU abstraction onto an externally created wgpu
//! device and queue; window and surface setup stay with the embedding
//! application. All offscreen targets render into `Rgba16Float`. Programs
//! are WGSL vertex/fragment module pairs with a single uniform block whose
//! layout follows the declared uniform list (16-byte slots, 64 bytes for a
//! matrix); pipelines are built lazily per (program, blend, depth) state.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, UVec2, UVec3, Vec3, Vec4};

use crate::dataset::ScalarType;
use crate::error::{EngineError, EngineResult};
use crate::geometry::SliceVertex;
use crate::render::gpu::{
    BlendMode, GpuContext, ProgramDesc, ProgramHandle, RenderTargetHandle, TextureHandle,
    UniformType,
};

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Volume slot, transfer-function slot, auxiliary (composition) slot
const VOLUME_SLOT: u32 = 0;
const TF_SLOT: u32 = 1;
const AUX_SLOT: u32 = 2;

struct TextureEntry {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    is_3d: bool,
    bytes_per_voxel: u32,
}

struct TargetEntry {
    _color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: Option<wgpu::TextureView>,
}

struct UniformSlot {
    offset: usize,
    size: usize,
}

struct ProgramEntry {
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    layout: HashMap<String, UniformSlot>,
    staging: Vec<u8>,
    buffer: wgpu::Buffer,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    blend: BlendMode,
    depth_test: bool,
    has_depth_attachment: bool,
}

/// [`GpuContext`] over a wgpu device/queue pair
pub struct WgpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,

    next_handle: u64,
    textures: HashMap<TextureHandle, TextureEntry>,
    targets: HashMap<RenderTargetHandle, TargetEntry>,
    programs: HashMap<ProgramHandle, ProgramEntry>,

    bind_group_layout: wgpu::BindGroupLayout,
    uniform_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    placeholder_3d: wgpu::TextureView,
    placeholder_2d: wgpu::TextureView,

    bound_program: Option<ProgramHandle>,
    bound_target: Option<RenderTargetHandle>,
    bound_slots: HashMap<u32, TextureHandle>,
    bound_aux_target: Option<RenderTargetHandle>,
    blend: BlendMode,
    depth_test: bool,
}

impl WgpuContext {
    /// Device features the backend relies on
    pub fn required_features() -> wgpu::Features {
        wgpu::Features::TEXTURE_FORMAT_16BIT_NORM | wgpu::Features::FLOAT32_FILTERABLE
    }

    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pipeline uniforms"),
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
        });

        let texture_entry = |binding, dimension| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: dimension,
                multisampled: false,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pipeline textures"),
            entries: &[
                texture_entry(0, wgpu::TextureViewDimension::D3),
                texture_entry(1, wgpu::TextureViewDimension::D2),
                texture_entry(2, wgpu::TextureViewDimension::D2),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("volume sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let placeholder_3d = Self::placeholder_texture(&device, &queue, true);
        let placeholder_2d = Self::placeholder_texture(&device, &queue, false);

        Self {
            device,
            queue,
            next_handle: 0,
            textures: HashMap::new(),
            targets: HashMap::new(),
            programs: HashMap::new(),
            bind_group_layout,
            uniform_layout,
            sampler,
            placeholder_3d,
            placeholder_2d,
            bound_program: None,
            bound_target: None,
            bound_slots: HashMap::new(),
            bound_aux_target: None,
            blend: BlendMode::Disabled,
            depth_test: false,
        }
    }

    fn placeholder_texture(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        is_3d: bool,
    ) -> wgpu::TextureView {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("placeholder"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: if is_3d {
                wgpu::TextureDimension::D3
            } else {
                wgpu::TextureDimension::D2
            },
            format: wgpu::TextureFormat::R8Unorm,
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
            &[0u8],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(1),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn texture_format(scalar: ScalarType) -> EngineResult<wgpu::TextureFormat> {
        Ok(match scalar {
            ScalarType::U8 => wgpu::TextureFormat::R8Unorm,
            ScalarType::I8 => wgpu::TextureFormat::R8Snorm,
            ScalarType::U16 => wgpu::TextureFormat::R16Unorm,
            ScalarType::I16 => wgpu::TextureFormat::R16Snorm,
            ScalarType::F32 => wgpu::TextureFormat::R32Float,
            // 32-bit integer and f64 volumes have no filterable texture
            // format; they stay CPU-side until quantized by the loader.
            ScalarType::U32 | ScalarType::I32 | ScalarType::F64 => {
                return Err(EngineError::UnsupportedOnGpu {
                    scalar_type: scalar,
                })
            }
        })
    }

    fn uniform_slot_size(ty: UniformType) -> usize {
        match ty {
            UniformType::F32 | UniformType::Vec3 | UniformType::Vec4 => 16,
            UniformType::Mat4 => 64,
        }
    }

    fn write_uniform(&mut self, name: &str, bytes: &[u8]) {
        let Some(program) = self.bound_program else {
            log::warn!("uniform '{}' set with no program bound", name);
            return;
        };
        let Some(entry) = self.programs.get_mut(&program) else {
            return;
        };
        match entry.layout.get(name) {
            Some(slot) => {
                let len = bytes.len().min(slot.size);
                entry.staging[slot.offset..slot.offset + len].copy_from_slice(&bytes[..len]);
            }
            None => log::warn!("program has no uniform '{}'", name),
        }
    }

    fn blend_state(mode: BlendMode) -> Option<wgpu::BlendState> {
        match mode {
            BlendMode::Disabled => None,
            BlendMode::Over => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::OneMinusDstAlpha,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::OneMinusDstAlpha,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
            }),
            BlendMode::Max => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Max,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Max,
                },
            }),
        }
    }

    fn compile_module(
        device: &wgpu::Device,
        label: &str,
        source: &str,
    ) -> EngineResult<wgpu::ShaderModule> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(EngineError::ShaderCompileFailure {
                label: label.to_string(),
                error: error.to_string(),
            });
        }
        Ok(module)
    }

    fn ensure_pipeline(&mut self, program: ProgramHandle, key: PipelineKey) -> EngineResult<()> {
        let entry = self
            .programs
            .get_mut(&program)
            .ok_or_else(|| EngineError::GpuResourceExhausted {
                operation: "draw".to_string(),
                error: "unknown program handle".to_string(),
            })?;
        if entry.pipelines.contains_key(&key) {
            return Ok(());
        }

        let pipeline_layout =
            self.device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("volume pipeline layout"),
                    bind_group_layouts: &[&self.uniform_layout, &self.bind_group_layout],
                    push_constant_ranges: &[],
                });

        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: (6 * std::mem::size_of::<f32>()) as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3],
        };

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("volume pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &entry.vertex,
                    entry_point: "vs_main",
                    buffers: &[vertex_layout],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &entry.fragment,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: Self::blend_state(key.blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: if key.has_depth_attachment {
                    Some(wgpu::DepthStencilState {
                        format: DEPTH_FORMAT,
                        depth_write_enabled: key.depth_test,
                        depth_compare: if key.depth_test {
                            wgpu::CompareFunction::LessEqual
                        } else {
                            wgpu::CompareFunction::Always
                        },
                        stencil: wgpu::StencilState::default(),
                        bias: wgpu::DepthBiasState::default(),
                    })
                } else {
                    None
                },
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });
        entry.pipelines.insert(key, pipeline);
        Ok(())
    }

    fn view_for_slot(&self, slot: u32) -> &wgpu::TextureView {
        if slot == AUX_SLOT {
            if let Some(target) = self.bound_aux_target {
                if let Some(entry) = self.targets.get(&target) {
                    return &entry.color_view;
                }
            }
        }
        match self.bound_slots.get(&slot).and_then(|h| self.textures.get(h)) {
            Some(entry) => &entry.view,
            None if slot == VOLUME_SLOT => &self.placeholder_3d,
            None => &self.placeholder_2d,
        }
    }

    fn submit_draw(&mut self, vertices: &[SliceVertex]) -> EngineResult<()> {
        let program = self
            .bound_program
            .ok_or_else(|| EngineError::GpuResourceExhausted {
                operation: "draw".to_string(),
                error: "no program bound".to_string(),
            })?;
        let target = self
            .bound_target
            .ok_or_else(|| EngineError::GpuResourceExhausted {
                operation: "draw".to_string(),
                error: "no render target bound".to_string(),
            })?;
        let has_depth = self
            .targets
            .get(&target)
            .map(|t| t.depth_view.is_some())
            .unwrap_or(false);

        let key = PipelineKey {
            blend: self.blend,
            depth_test: self.depth_test && has_depth,
            has_depth_attachment: has_depth,
        };
        self.ensure_pipeline(program, key)?;

        // Flatten the vertex stream; positions then texture coordinates.
        let mut data = Vec::with_capacity(vertices.len() * 6);
        for v in vertices {
            data.extend_from_slice(&v.position.to_array());
            data.extend_from_slice(&v.texcoord.to_array());
        }
        let vertex_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("proxy geometry"),
            size: (data.len() * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&vertex_buffer, 0, bytemuck::cast_slice(&data));

        let entry = self.programs.get(&program).expect("pipeline ensured");
        self.queue.write_buffer(&entry.buffer, 0, &entry.staging);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pipeline textures"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(self.view_for_slot(VOLUME_SLOT)),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(self.view_for_slot(TF_SLOT)),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(self.view_for_slot(AUX_SLOT)),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pipeline uniforms"),
            layout: &self.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: entry.buffer.as_entire_binding(),
            }],
        });

        let target_entry = self.targets.get(&target).expect("target checked");
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("draw"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("proxy geometry"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_entry.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: target_entry.depth_view.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            let pipeline = &self.programs[&program].pipelines[&key];
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &uniform_group, &[]);
            pass.set_bind_group(1, &bind_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.draw(0..vertices.len() as u32, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

impl GpuContext for WgpuContext {
    fn create_texture_3d(&mut self, scalar: ScalarType, size: UVec3) -> EngineResult<TextureHandle> {
        let format = Self::texture_format(scalar)?;
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("brick"),
            size: wgpu::Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: size.z,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(EngineError::GpuResourceExhausted {
                operation: "create_texture_3d".to_string(),
                error: error.to_string(),
            });
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let handle = TextureHandle(self.handle());
        self.textures.insert(
            handle,
            TextureEntry {
                _texture: texture,
                view,
                is_3d: true,
                bytes_per_voxel: scalar.size_bytes() as u32,
            },
        );
        Ok(handle)
    }

    fn upload_texture_3d(
        &mut self,
        texture: TextureHandle,
        offset: UVec3,
        size: UVec3,
        data: &[u8],
    ) -> EngineResult<()> {
        let entry =
            self.textures
                .get(&texture)
                .ok_or_else(|| EngineError::GpuResourceExhausted {
                    operation: "upload_texture_3d".to_string(),
                    error: "unknown texture handle".to_string(),
                })?;
        if !entry.is_3d {
            return Err(EngineError::GpuResourceExhausted {
                operation: "upload_texture_3d".to_string(),
                error: "handle is not a 3-D texture".to_string(),
            });
        }
        let row_bytes = size.x * entry.bytes_per_voxel;
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &entry._texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: offset.x,
                    y: offset.y,
                    z: offset.z,
                },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(row_bytes),
                rows_per_image: Some(size.y),
            },
            wgpu::Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: size.z,
            },
        );
        Ok(())
    }

    fn create_texture_rgba(&mut self, size: UVec2, data: &[f32]) -> EngineResult<TextureHandle> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("transfer function"),
            size: wgpu::Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(data),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(size.x * 16),
                rows_per_image: Some(size.y),
            },
            wgpu::Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: 1,
            },
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let handle = TextureHandle(self.handle());
        self.textures.insert(
            handle,
            TextureEntry {
                _texture: texture,
                view,
                is_3d: false,
                bytes_per_voxel: 16,
            },
        );
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
        self.bound_slots.retain(|_, h| *h != texture);
    }

    fn bind_texture(&mut self, texture: TextureHandle, slot: u32) {
        if slot == AUX_SLOT {
            self.bound_aux_target = None;
        }
        self.bound_slots.insert(slot, texture);
    }

    fn create_render_target(
        &mut self,
        size: UVec2,
        with_depth: bool,
    ) -> EngineResult<RenderTargetHandle> {
        let extent = wgpu::Extent3d {
            width: size.x.max(1),
            height: size.y.max(1),
            depth_or_array_layers: 1,
        };
        let color = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen color"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = if with_depth {
            let depth = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("offscreen depth"),
                size: extent,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: DEPTH_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            Some(depth.create_view(&wgpu::TextureViewDescriptor::default()))
        } else {
            None
        };
        let handle = RenderTargetHandle(self.handle());
        self.targets.insert(
            handle,
            TargetEntry {
                _color: color,
                color_view,
                depth_view,
            },
        );
        Ok(handle)
    }

    fn bind_render_target(&mut self, target: Option<RenderTargetHandle>) {
        self.bound_target = target;
    }

    fn bind_target_color(&mut self, target: RenderTargetHandle, slot: u32) {
        if slot == AUX_SLOT {
            self.bound_aux_target = Some(target);
            self.bound_slots.remove(&slot);
        } else {
            log::warn!("target color bound to unsupported slot {}", slot);
        }
    }

    fn clear(&mut self, color: [f32; 4], depth: f32) {
        let Some(target) = self.bound_target.and_then(|t| self.targets.get(&t)) else {
            return;
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: color[0] as f64,
                            g: color[1] as f64,
                            b: color[2] as f64,
                            a: color[3] as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: target.depth_view.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(depth),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn compile_program(&mut self, desc: &ProgramDesc<'_>) -> EngineResult<ProgramHandle> {
        let vertex = Self::compile_module(
            &self.device,
            &format!("{} (vertex)", desc.label),
            desc.vertex_src,
        )?;
        let fragment = Self::compile_module(
            &self.device,
            &format!("{} (fragment)", desc.label),
            desc.fragment_src,
        )?;

        let mut layout = HashMap::new();
        let mut offset = 0;
        for (name, ty) in desc.uniforms {
            let size = Self::uniform_slot_size(*ty);
            layout.insert(name.to_string(), UniformSlot { offset, size });
            offset += size;
        }
        let buffer_size = offset.max(16);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: buffer_size as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let handle = ProgramHandle(self.handle());
        self.programs.insert(
            handle,
            ProgramEntry {
                vertex,
                fragment,
                layout,
                staging: vec![0u8; buffer_size],
                buffer,
                pipelines: HashMap::new(),
            },
        );
        Ok(handle)
    }

    fn bind_program(&mut self, program: ProgramHandle) {
        self.bound_program = Some(program);
    }

    fn set_uniform_f32(&mut self, name: &str, value: f32) {
        self.write_uniform(name, bytemuck::bytes_of(&value));
    }

    fn set_uniform_vec3(&mut self, name: &str, value: Vec3) {
        self.write_uniform(name, bytemuck::cast_slice(&value.to_array()));
    }

    fn set_uniform_vec4(&mut self, name: &str, value: Vec4) {
        self.write_uniform(name, bytemuck::cast_slice(&value.to_array()));
    }

    fn set_uniform_mat4(&mut self, name: &str, value: Mat4) {
        self.write_uniform(name, bytemuck::cast_slice(&value.to_cols_array()));
    }

    fn set_blend(&mut self, mode: BlendMode) {
        self.blend = mode;
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.depth_test = enabled;
    }

    fn draw_triangles(&mut self, vertices: &[SliceVertex]) -> EngineResult<()> {
        if vertices.is_empty() {
            return Ok(());
        }
        self.submit_draw(vertices)
    }

    fn draw_fullscreen(&mut self) -> EngineResult<()> {
        // Two clip-space triangles; the composition vertex shader passes
        // them through untransformed.
        let quad = |x: f32, y: f32, u: f32, v: f32| SliceVertex {
            position: Vec3::new(x, y, 0.0),
            texcoord: Vec3::new(u, v, 0.0),
        };
        let vertices = [
            quad(-1.0, -1.0, 0.0, 1.0),
            quad(1.0, -1.0, 1.0, 1.0),
            quad(1.0, 1.0, 1.0, 0.0),
            quad(-1.0, -1.0, 0.0, 1.0),
            quad(1.0, 1.0, 1.0, 0.0),
            quad(-1.0, 1.0, 0.0, 0.0),
        ];
        self.submit_draw(&vertices)
    }
}
