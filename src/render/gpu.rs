//! GPU context abstraction.
//!
//! The renderer talks to the GPU exclusively through this trait: typed 3-D
//! textures, offscreen targets, shader programs compiled from source
//! strings, uniforms by name, blend and depth state, triangle submission.
//! Production uses the wgpu backend; tests use the headless recorder.

use glam::{Mat4, UVec2, UVec3, Vec3, Vec4};

use crate::dataset::ScalarType;
use crate::error::EngineResult;
use crate::geometry::SliceVertex;

/// Opaque texture handle issued by a [`GpuContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Opaque offscreen render-target handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetHandle(pub u64);

/// Opaque shader-program handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u64);

/// Fixed-function blend state used by the composition modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Disabled,
    /// `(ONE_MINUS_DST_ALPHA, ONE)`: back-to-front under-compositing of
    /// pre-multiplied color
    Over,
    /// Per-channel maximum, for maximum-intensity projection
    Max,
}

/// Type of a named uniform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformType {
    F32,
    Vec3,
    Vec4,
    Mat4,
}

/// Shader program description: a vertex/fragment source pair plus the
/// uniform block layout the backend allocates for it
#[derive(Debug, Clone, Copy)]
pub struct ProgramDesc<'a> {
    pub label: &'a str,
    pub vertex_src: &'a str,
    pub fragment_src: &'a str,
    pub uniforms: &'a [(&'a str, UniformType)],
}

/// GPU primitives consumed by the cache and the frame scheduler.
///
/// All calls happen on the render thread; implementations need no
/// internal synchronization.
pub trait GpuContext {
    /// Allocate an (uninitialized) 3-D texture for one brick
    fn create_texture_3d(&mut self, scalar: ScalarType, size: UVec3) -> EngineResult<TextureHandle>;

    /// Upload a subregion of a 3-D texture; `data` is tightly packed
    fn upload_texture_3d(
        &mut self,
        texture: TextureHandle,
        offset: UVec3,
        size: UVec3,
        data: &[u8],
    ) -> EngineResult<()>;

    /// Allocate a 2-D RGBA float texture (transfer functions)
    fn create_texture_rgba(&mut self, size: UVec2, data: &[f32]) -> EngineResult<TextureHandle>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn bind_texture(&mut self, texture: TextureHandle, slot: u32);

    /// Allocate an offscreen color target, optionally with depth
    fn create_render_target(
        &mut self,
        size: UVec2,
        with_depth: bool,
    ) -> EngineResult<RenderTargetHandle>;

    /// Bind an offscreen target, or `None` for the default target
    fn bind_render_target(&mut self, target: Option<RenderTargetHandle>);

    /// Bind the color attachment of a target for sampling
    fn bind_target_color(&mut self, target: RenderTargetHandle, slot: u32);

    /// Clear the bound target
    fn clear(&mut self, color: [f32; 4], depth: f32);

    fn compile_program(&mut self, desc: &ProgramDesc<'_>) -> EngineResult<ProgramHandle>;

    fn bind_program(&mut self, program: ProgramHandle);

    fn set_uniform_f32(&mut self, name: &str, value: f32);
    fn set_uniform_vec3(&mut self, name: &str, value: Vec3);
    fn set_uniform_vec4(&mut self, name: &str, value: Vec4);
    fn set_uniform_mat4(&mut self, name: &str, value: Mat4);

    fn set_blend(&mut self, mode: BlendMode);

    fn set_depth_test(&mut self, enabled: bool);

    /// Submit proxy-geometry triangles with the bound state
    fn draw_triangles(&mut self, vertices: &[SliceVertex]) -> EngineResult<()>;

    /// Submit a viewport-covering quad (composition passes)
    fn draw_fullscreen(&mut self) -> EngineResult<()>;
}
