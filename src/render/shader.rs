//! Shader variants of the render modes.
//!
//! Shader source text comes from the embedding application; this module
//! owns the mapping from `(mode, lighting, components)` to the compiled
//! program and the uniform block every variant shares.

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::render::gpu::{GpuContext, ProgramDesc, ProgramHandle, UniformType};
use crate::render::mode::RenderMode;

/// Uniform block shared by every pipeline program
pub const PIPELINE_UNIFORMS: &[(&str, UniformType)] = &[
    ("projection", UniformType::Mat4),
    ("modelview", UniformType::Mat4),
    ("voxel_stepsize", UniformType::Vec3),
    ("domain_scale", UniformType::Vec3),
    ("light_diffuse", UniformType::Vec3),
    ("step_scale", UniformType::F32),
    ("iso_value", UniformType::F32),
];

/// One vertex/fragment source pair
#[derive(Debug, Clone)]
pub struct ProgramSource {
    pub vertex: String,
    pub fragment: String,
}

impl ProgramSource {
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }
}

/// Shader sources for every variant the pipeline can select
#[derive(Debug, Clone)]
pub struct ShaderCatalog {
    pub transfer_1d: ProgramSource,
    pub transfer_1d_lit: ProgramSource,
    pub transfer_2d: ProgramSource,
    pub transfer_2d_lit: ProgramSource,
    pub isosurface: ProgramSource,
    /// Inline-shading isosurface for the avoid-separate-compositing path
    pub isosurface_inline: ProgramSource,
    /// Screen-space shading pass of the two-pass isosurface mode
    pub compose: ProgramSource,
    pub mip: ProgramSource,
}

/// Key of a compiled variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderVariant {
    Transfer1D { lighting: bool },
    Transfer2D { lighting: bool },
    Isosurface { inline: bool },
    Compose,
    Mip,
}

/// Compiled programs of one catalog
#[derive(Debug)]
pub struct ShaderSet {
    programs: HashMap<ShaderVariant, ProgramHandle>,
}

impl ShaderSet {
    /// Compile every variant up front; a single failure aborts
    /// initialization.
    pub fn compile<G: GpuContext + ?Sized>(
        ctx: &mut G,
        catalog: &ShaderCatalog,
    ) -> EngineResult<Self> {
        let entries: [(ShaderVariant, &ProgramSource, &str); 8] = [
            (
                ShaderVariant::Transfer1D { lighting: false },
                &catalog.transfer_1d,
                "transfer-1d",
            ),
            (
                ShaderVariant::Transfer1D { lighting: true },
                &catalog.transfer_1d_lit,
                "transfer-1d-lit",
            ),
            (
                ShaderVariant::Transfer2D { lighting: false },
                &catalog.transfer_2d,
                "transfer-2d",
            ),
            (
                ShaderVariant::Transfer2D { lighting: true },
                &catalog.transfer_2d_lit,
                "transfer-2d-lit",
            ),
            (
                ShaderVariant::Isosurface { inline: false },
                &catalog.isosurface,
                "isosurface",
            ),
            (
                ShaderVariant::Isosurface { inline: true },
                &catalog.isosurface_inline,
                "isosurface-inline",
            ),
            (ShaderVariant::Compose, &catalog.compose, "compose"),
            (ShaderVariant::Mip, &catalog.mip, "mip"),
        ];

        let mut programs = HashMap::new();
        for (variant, source, label) in entries {
            let handle = ctx.compile_program(&ProgramDesc {
                label,
                vertex_src: &source.vertex,
                fragment_src: &source.fragment,
                uniforms: PIPELINE_UNIFORMS,
            })?;
            programs.insert(variant, handle);
        }
        Ok(Self { programs })
    }

    pub fn get(&self, variant: ShaderVariant) -> ProgramHandle {
        self.programs[&variant]
    }

    /// Variant selection for the brick loop.
    ///
    /// Only single-component data is supported; anything else is refused
    /// here rather than producing garbage colors.
    pub fn select(
        &self,
        mode: RenderMode,
        lighting: bool,
        components: u32,
        avoid_separate_compositing: bool,
    ) -> EngineResult<ProgramHandle> {
        if components != 1 {
            return Err(EngineError::InvalidConfig {
                field: "components".to_string(),
                reason: format!("{} components unsupported, expected 1", components),
            });
        }
        let variant = match mode {
            RenderMode::Transfer1D => ShaderVariant::Transfer1D { lighting },
            RenderMode::Transfer2D => ShaderVariant::Transfer2D { lighting },
            RenderMode::Isosurface => ShaderVariant::Isosurface {
                inline: avoid_separate_compositing,
            },
            RenderMode::Invalid => return Err(EngineError::InvalidRenderMode),
        };
        Ok(self.get(variant))
    }
}

impl ShaderCatalog {
    /// Minimal placeholder sources; real applications supply their own.
    pub fn placeholder() -> Self {
        let stub = || ProgramSource::new("// vertex stub", "// fragment stub");
        Self {
            transfer_1d: stub(),
            transfer_1d_lit: stub(),
            transfer_2d: stub(),
            transfer_2d_lit: stub(),
            isosurface: stub(),
            isosurface_inline: stub(),
            compose: stub(),
            mip: stub(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::headless::HeadlessContext;

    #[test]
    fn test_variant_selection() {
        let mut ctx = HeadlessContext::new();
        let set = ShaderSet::compile(&mut ctx, &ShaderCatalog::placeholder()).unwrap();

        let lit = set.select(RenderMode::Transfer1D, true, 1, false).unwrap();
        let unlit = set.select(RenderMode::Transfer1D, false, 1, false).unwrap();
        assert_ne!(lit, unlit);

        let two_pass = set.select(RenderMode::Isosurface, false, 1, false).unwrap();
        let inline = set.select(RenderMode::Isosurface, false, 1, true).unwrap();
        assert_ne!(two_pass, inline);
    }

    #[test]
    fn test_invalid_mode_refused() {
        let mut ctx = HeadlessContext::new();
        let set = ShaderSet::compile(&mut ctx, &ShaderCatalog::placeholder()).unwrap();
        assert!(matches!(
            set.select(RenderMode::Invalid, false, 1, false),
            Err(EngineError::InvalidRenderMode)
        ));
    }

    #[test]
    fn test_multi_component_refused() {
        let mut ctx = HeadlessContext::new();
        let set = ShaderSet::compile(&mut ctx, &ShaderCatalog::placeholder()).unwrap();
        assert!(set.select(RenderMode::Transfer1D, false, 4, false).is_err());
    }

    #[test]
    fn test_compile_failure_aborts() {
        let mut ctx = HeadlessContext::new();
        let mut catalog = ShaderCatalog::placeholder();
        catalog.mip = ProgramSource::new("", "");
        let err = ShaderSet::compile(&mut ctx, &catalog).unwrap_err();
        assert!(matches!(err, EngineError::ShaderCompileFailure { .. }));
    }
}
