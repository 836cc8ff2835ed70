//! Headless GPU context.
//!
//! Records every command instead of talking to a device. Used by the test
//! suites and for diagnosing scheduler behavior without a GPU; allocation
//! failures can be injected to exercise the out-of-budget paths.

use std::collections::HashMap;

use glam::{Mat4, UVec2, UVec3, Vec3, Vec4};

use crate::dataset::ScalarType;
use crate::error::{EngineError, EngineResult};
use crate::geometry::SliceVertex;
use crate::render::gpu::{
    BlendMode, GpuContext, ProgramDesc, ProgramHandle, RenderTargetHandle, TextureHandle,
};

/// Snapshot of a uniform value at draw time
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    F32(f32),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

/// One recorded draw call with the state it was issued under
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub program: Option<ProgramHandle>,
    pub target: Option<RenderTargetHandle>,
    pub blend: BlendMode,
    pub depth_test: bool,
    pub vertex_count: usize,
    pub fullscreen: bool,
    pub bound_textures: HashMap<u32, TextureHandle>,
    pub uniforms: HashMap<String, UniformValue>,
    /// First vertex of the submission, for ordering assertions
    pub first_vertex: Option<SliceVertex>,
    /// Position bounds of the submission, for clipping assertions
    pub bounds: Option<(Vec3, Vec3)>,
}

/// Recording [`GpuContext`] with no device behind it
#[derive(Debug, Default)]
pub struct HeadlessContext {
    next_handle: u64,
    texture_bytes: HashMap<TextureHandle, u64>,
    /// Labels of every compiled program
    pub programs: Vec<String>,

    bound_program: Option<ProgramHandle>,
    bound_target: Option<RenderTargetHandle>,
    bound_textures: HashMap<u32, TextureHandle>,
    uniforms: HashMap<String, UniformValue>,
    blend: Option<BlendMode>,
    depth_test: bool,

    /// Every draw in submission order
    pub draws: Vec<DrawRecord>,
    /// Targets that were bound when a clear was issued
    pub clears: Vec<Option<RenderTargetHandle>>,
    /// Uploaded texture byte counts per handle
    pub uploads: Vec<(TextureHandle, usize)>,

    /// Fail 3-D texture allocation after this many successes
    pub texture_3d_budget: Option<usize>,
    texture_3d_allocs: usize,
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Bytes of all live textures
    pub fn live_texture_bytes(&self) -> u64 {
        self.texture_bytes.values().sum()
    }

    pub fn live_texture_count(&self) -> usize {
        self.texture_bytes.len()
    }

    pub fn is_live(&self, texture: TextureHandle) -> bool {
        self.texture_bytes.contains_key(&texture)
    }
}

impl GpuContext for HeadlessContext {
    fn create_texture_3d(&mut self, scalar: ScalarType, size: UVec3) -> EngineResult<TextureHandle> {
        if let Some(budget) = self.texture_3d_budget {
            if self.texture_3d_allocs >= budget {
                return Err(EngineError::GpuResourceExhausted {
                    operation: "create_texture_3d".to_string(),
                    error: "injected allocation failure".to_string(),
                });
            }
        }
        self.texture_3d_allocs += 1;
        let handle = TextureHandle(self.handle());
        let bytes =
            size.x as u64 * size.y as u64 * size.z as u64 * scalar.size_bytes() as u64;
        self.texture_bytes.insert(handle, bytes);
        Ok(handle)
    }

    fn upload_texture_3d(
        &mut self,
        texture: TextureHandle,
        _offset: UVec3,
        _size: UVec3,
        data: &[u8],
    ) -> EngineResult<()> {
        if !self.texture_bytes.contains_key(&texture) {
            return Err(EngineError::GpuResourceExhausted {
                operation: "upload_texture_3d".to_string(),
                error: "upload to destroyed texture".to_string(),
            });
        }
        self.uploads.push((texture, data.len()));
        Ok(())
    }

    fn create_texture_rgba(&mut self, size: UVec2, data: &[f32]) -> EngineResult<TextureHandle> {
        let handle = TextureHandle(self.handle());
        debug_assert_eq!(data.len(), (size.x * size.y * 4) as usize);
        self.texture_bytes
            .insert(handle, (data.len() * std::mem::size_of::<f32>()) as u64);
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.texture_bytes.remove(&texture);
    }

    fn bind_texture(&mut self, texture: TextureHandle, slot: u32) {
        self.bound_textures.insert(slot, texture);
    }

    fn create_render_target(
        &mut self,
        _size: UVec2,
        _with_depth: bool,
    ) -> EngineResult<RenderTargetHandle> {
        Ok(RenderTargetHandle(self.handle()))
    }

    fn bind_render_target(&mut self, target: Option<RenderTargetHandle>) {
        self.bound_target = target;
    }

    fn bind_target_color(&mut self, target: RenderTargetHandle, slot: u32) {
        self.bound_textures.insert(slot, TextureHandle(target.0));
    }

    fn clear(&mut self, _color: [f32; 4], _depth: f32) {
        self.clears.push(self.bound_target);
    }

    fn compile_program(&mut self, desc: &ProgramDesc<'_>) -> EngineResult<ProgramHandle> {
        // The recorder accepts anything except an empty source pair, which
        // stands in for a compile failure in tests.
        if desc.vertex_src.is_empty() || desc.fragment_src.is_empty() {
            return Err(EngineError::ShaderCompileFailure {
                label: desc.label.to_string(),
                error: "empty shader source".to_string(),
            });
        }
        self.programs.push(desc.label.to_string());
        Ok(ProgramHandle(self.handle()))
    }

    fn bind_program(&mut self, program: ProgramHandle) {
        self.bound_program = Some(program);
    }

    fn set_uniform_f32(&mut self, name: &str, value: f32) {
        self.uniforms
            .insert(name.to_string(), UniformValue::F32(value));
    }

    fn set_uniform_vec3(&mut self, name: &str, value: Vec3) {
        self.uniforms
            .insert(name.to_string(), UniformValue::Vec3(value));
    }

    fn set_uniform_vec4(&mut self, name: &str, value: Vec4) {
        self.uniforms
            .insert(name.to_string(), UniformValue::Vec4(value));
    }

    fn set_uniform_mat4(&mut self, name: &str, value: Mat4) {
        self.uniforms
            .insert(name.to_string(), UniformValue::Mat4(value));
    }

    fn set_blend(&mut self, mode: BlendMode) {
        self.blend = Some(mode);
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.depth_test = enabled;
    }

    fn draw_triangles(&mut self, vertices: &[SliceVertex]) -> EngineResult<()> {
        let bounds = vertices.iter().fold(None, |acc, v| match acc {
            None => Some((v.position, v.position)),
            Some((lo, hi)) => Some((lo.min(v.position), hi.max(v.position))),
        });
        self.draws.push(DrawRecord {
            program: self.bound_program,
            target: self.bound_target,
            blend: self.blend.unwrap_or(BlendMode::Disabled),
            depth_test: self.depth_test,
            vertex_count: vertices.len(),
            fullscreen: false,
            bound_textures: self.bound_textures.clone(),
            uniforms: self.uniforms.clone(),
            first_vertex: vertices.first().copied(),
            bounds,
        });
        Ok(())
    }

    fn draw_fullscreen(&mut self) -> EngineResult<()> {
        self.draws.push(DrawRecord {
            program: self.bound_program,
            target: self.bound_target,
            blend: self.blend.unwrap_or(BlendMode::Disabled),
            depth_test: self.depth_test,
            vertex_count: 6,
            fullscreen: true,
            bound_textures: self.bound_textures.clone(),
            uniforms: self.uniforms.clone(),
            first_vertex: None,
            bounds: None,
        });
        Ok(())
    }
}
