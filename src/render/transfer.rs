//! Transfer functions.
//!
//! A transfer function is an RGBA lookup texture over the (normalized)
//! scalar range, plus the support interval the scheduler uses to cull
//! bricks whose values map to nothing visible.

use glam::UVec2;

use crate::error::EngineResult;
use crate::render::gpu::{GpuContext, TextureHandle};

/// Lookup from scalar value (and optionally gradient magnitude) to color
pub trait TransferFunction {
    /// GPU texture of the lookup table, once uploaded
    fn texture(&self) -> Option<TextureHandle>;

    /// Normalized scalar interval with non-zero opacity
    fn support_range(&self) -> (f64, f64);

    fn is_2d(&self) -> bool;
}

/// 1-D RGBA lookup table
pub struct TransferFunction1D {
    rgba: Vec<[f32; 4]>,
    handle: Option<TextureHandle>,
}

impl TransferFunction1D {
    pub fn new(rgba: Vec<[f32; 4]>) -> Self {
        Self { rgba, handle: None }
    }

    /// Linear ramp over the full range, for quick looks at new data
    pub fn ramp(entries: usize) -> Self {
        let n = entries.max(2);
        let rgba = (0..n)
            .map(|i| {
                let t = i as f32 / (n - 1) as f32;
                [t, t, t, t]
            })
            .collect();
        Self::new(rgba)
    }

    pub fn entries(&self) -> usize {
        self.rgba.len()
    }

    /// Upload the table as an n x 1 texture
    pub fn upload<G: GpuContext + ?Sized>(&mut self, ctx: &mut G) -> EngineResult<TextureHandle> {
        let flat: Vec<f32> = self.rgba.iter().flatten().copied().collect();
        let handle = ctx.create_texture_rgba(UVec2::new(self.rgba.len() as u32, 1), &flat)?;
        self.handle = Some(handle);
        Ok(handle)
    }
}

impl TransferFunction for TransferFunction1D {
    fn texture(&self) -> Option<TextureHandle> {
        self.handle
    }

    fn support_range(&self) -> (f64, f64) {
        support_of(self.rgba.len(), |i| self.rgba[i][3] > 0.0)
    }

    fn is_2d(&self) -> bool {
        false
    }
}

/// 2-D RGBA lookup table over (scalar, gradient magnitude)
pub struct TransferFunction2D {
    width: usize,
    height: usize,
    rgba: Vec<[f32; 4]>,
    handle: Option<TextureHandle>,
}

impl TransferFunction2D {
    pub fn new(width: usize, height: usize, rgba: Vec<[f32; 4]>) -> Self {
        debug_assert_eq!(rgba.len(), width * height);
        Self {
            width,
            height,
            rgba,
            handle: None,
        }
    }

    pub fn upload<G: GpuContext + ?Sized>(&mut self, ctx: &mut G) -> EngineResult<TextureHandle> {
        let flat: Vec<f32> = self.rgba.iter().flatten().copied().collect();
        let handle =
            ctx.create_texture_rgba(UVec2::new(self.width as u32, self.height as u32), &flat)?;
        self.handle = Some(handle);
        Ok(handle)
    }
}

impl TransferFunction for TransferFunction2D {
    fn texture(&self) -> Option<TextureHandle> {
        self.handle
    }

    /// Support along the scalar axis: a column counts when any gradient
    /// row in it has non-zero opacity
    fn support_range(&self) -> (f64, f64) {
        support_of(self.width, |x| {
            (0..self.height).any(|y| self.rgba[y * self.width + x][3] > 0.0)
        })
    }

    fn is_2d(&self) -> bool {
        true
    }
}

fn support_of(entries: usize, opaque: impl Fn(usize) -> bool) -> (f64, f64) {
    if entries == 0 {
        return (0.0, 0.0);
    }
    let first = (0..entries).find(|&i| opaque(i));
    let last = (0..entries).rev().find(|&i| opaque(i));
    match (first, last) {
        (Some(a), Some(b)) => {
            let top = (entries - 1).max(1) as f64;
            (a as f64 / top, b as f64 / top)
        }
        _ => (0.0, 0.0),
    }
}
