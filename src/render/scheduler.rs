//! Frame scheduler.
//!
//! Turns `(dataset, view, mode, transfer function)` into draw submissions:
//! per frame it picks a LOD, enumerates the visible brick set, resolves
//! residency through the cache and pushes each brick's proxy geometry
//! through the shader variant of the active mode. Budget overruns coarsen
//! the LOD and restart the frame; view changes abort it at the next brick
//! boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::{Mat4, UVec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::constants::{lod::MAX_VOXELS_PER_PIXEL, slicing};
use crate::dataset::{BrickKey, Dataset};
use crate::error::{EngineError, EngineResult};
use crate::geometry::{Frustum, Plane, SliceGenerator};
use crate::render::cache::GpuBrickCache;
use crate::render::gpu::{BlendMode, GpuContext, RenderTargetHandle};
use crate::render::mode::RenderMode;
use crate::render::shader::{ShaderCatalog, ShaderSet, ShaderVariant};
use crate::render::transfer::TransferFunction;

/// Camera state of one frame
#[derive(Debug, Clone, Copy)]
pub struct ViewState {
    /// Dataset-to-world transform
    pub world: Mat4,
    /// World-to-eye transform
    pub view: Mat4,
    pub projection: Mat4,
    pub viewport: UVec2,
}

impl ViewState {
    pub fn camera_position(&self) -> Vec3 {
        self.view.inverse().w_axis.truncate()
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub cache_capacity: u64,
    pub sample_rate: f32,
    pub lighting: bool,
    pub avoid_separate_compositing: bool,
    /// Normalized isovalue for the isosurface mode
    pub iso_value: f32,
    pub light_diffuse: Vec3,
    /// Wall-clock budget per frame; exceeding it defers remaining bricks
    pub frame_deadline: Option<Duration>,
    pub timestep: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: crate::constants::cache::DEFAULT_CAPACITY_BYTES,
            sample_rate: slicing::DEFAULT_SAMPLE_RATE,
            lighting: false,
            avoid_separate_compositing: false,
            iso_value: 0.5,
            light_diffuse: Vec3::splat(0.8),
            frame_deadline: None,
            timestep: 0,
        }
    }
}

/// Per-frame statistics, for logging and tests
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    pub lod: usize,
    pub bricks_drawn: usize,
    pub culled_frustum: usize,
    pub culled_range: usize,
    /// Bricks skipped because the frame deadline was reached
    pub deferred: usize,
    pub restarts: u32,
    pub completed: bool,
}

/// Visible brick set of one LOD, sorted back-to-front
#[derive(Debug)]
pub struct VisibleSet {
    pub bricks: Vec<BrickKey>,
    pub culled_frustum: usize,
    pub culled_range: usize,
}

/// Enumerate bricks of `lod` whose bounds intersect the frustum and whose
/// value range intersects the transfer function's support, sorted
/// back-to-front by camera distance (stable on ties).
pub fn enumerate_visible(
    dataset: &dyn Dataset,
    view: &ViewState,
    lod: usize,
    timestep: usize,
    support: Option<(f64, f64)>,
) -> EngineResult<VisibleSet> {
    let frustum = Frustum::from_matrix(view.projection * view.view);
    let (range_lo, range_hi) = dataset.range();
    let range_span = (range_hi - range_lo).max(f64::EPSILON);
    let camera = view.camera_position();

    let mut culled_frustum = 0;
    let mut culled_range = 0;
    let mut bricks: Vec<(BrickKey, f32)> = Vec::new();

    for key in dataset.brick_keys() {
        if key.lod != lod || key.timestep != timestep {
            continue;
        }
        let md = dataset.brick_metadata(&key)?;
        let center = view.world.transform_point3(md.center);
        let extents = abs_rotate(&view.world, md.extents);
        if !frustum.intersects_aabb(center, extents) {
            culled_frustum += 1;
            continue;
        }
        if let Some((sup_lo, sup_hi)) = support {
            let (lo, hi) = dataset.brick_range(&key)?;
            let lo = (lo - range_lo) / range_span;
            let hi = (hi - range_lo) / range_span;
            if hi < sup_lo || lo > sup_hi {
                culled_range += 1;
                continue;
            }
        }
        bricks.push((key, (center - camera).length()));
    }

    // Back-to-front: farthest first. The sort is stable, equal distances
    // keep enumeration order.
    bricks.sort_by(|a, b| b.1.total_cmp(&a.1));

    Ok(VisibleSet {
        bricks: bricks.into_iter().map(|(key, _)| key).collect(),
        culled_frustum,
        culled_range,
    })
}

/// Coarsest-acceptable LOD for a view: the finest level whose screen
/// footprint stays at or under 1.5 voxels per pixel.
pub fn choose_lod(dataset: &dyn Dataset, view: &ViewState) -> usize {
    let coarsest = dataset.lod_count().saturating_sub(1);
    if view.viewport.y == 0 {
        return coarsest;
    }

    // Projected pixel radius of the whole domain.
    let scale = dataset.scale();
    let aspect = scale / scale.max_element().max(f32::EPSILON);
    let radius = 0.5 * aspect.length();
    let center = view.world.transform_point3(Vec3::ZERO);
    let distance = (view.camera_position() - center).length().max(1e-3);
    let proj_scale = view.projection.y_axis.y.abs().max(f32::EPSILON);
    let pixel_radius = (proj_scale * radius / distance * view.viewport.y as f32 * 0.5).max(1.0);

    for lod in 0..dataset.lod_count() {
        let voxels_across = dataset.domain_size_at_lod(lod).max_element() as f32;
        let voxels_per_pixel = voxels_across / (2.0 * pixel_radius);
        if voxels_per_pixel <= MAX_VOXELS_PER_PIXEL {
            return lod;
        }
    }
    coarsest
}

/// Conservative world-space half-extents of a transformed box
fn abs_rotate(m: &Mat4, extents: Vec3) -> Vec3 {
    Vec3::new(
        m.x_axis.x.abs() * extents.x + m.y_axis.x.abs() * extents.y + m.z_axis.x.abs() * extents.z,
        m.x_axis.y.abs() * extents.x + m.y_axis.y.abs() * extents.y + m.z_axis.y.abs() * extents.z,
        m.x_axis.z.abs() * extents.x + m.y_axis.z.abs() * extents.y + m.z_axis.z.abs() * extents.z,
    )
}

enum PassResult {
    Completed { drawn: usize, deferred: usize },
    OutOfBudget(EngineError),
    Aborted { drawn: usize },
}

/// The frame scheduler; owns the cache and the offscreen targets
pub struct FrameScheduler {
    config: SchedulerConfig,
    cache: GpuBrickCache,
    shaders: ShaderSet,
    slicer: SliceGenerator,
    mode: RenderMode,

    main_target: RenderTargetHandle,
    iso_target: RenderTargetHandle,

    frame: u64,
    restart: Arc<AtomicBool>,
    interactive: bool,
}

impl FrameScheduler {
    pub fn new<G: GpuContext + ?Sized>(
        ctx: &mut G,
        catalog: &ShaderCatalog,
        config: SchedulerConfig,
        viewport: UVec2,
    ) -> EngineResult<Self> {
        let slicer = SliceGenerator::new(config.sample_rate)?;
        let shaders = ShaderSet::compile(ctx, catalog)?;
        let main_target = ctx.create_render_target(viewport, false)?;
        let iso_target = ctx.create_render_target(viewport, true)?;
        Ok(Self {
            cache: GpuBrickCache::new(config.cache_capacity),
            config,
            shaders,
            slicer,
            mode: RenderMode::Invalid,
            main_target,
            iso_target,
            frame: 0,
            restart: Arc::new(AtomicBool::new(false)),
            interactive: false,
        })
    }

    pub fn set_mode(&mut self, mode: RenderMode) {
        if self.mode != mode {
            self.mode = mode;
            self.restart.store(true, Ordering::Relaxed);
        }
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// World-space clip plane applied to the proxy geometry
    pub fn set_clip_plane(&mut self, plane: Option<Plane>) {
        self.slicer.set_clip_plane(plane);
        self.restart.store(true, Ordering::Relaxed);
    }

    /// Flag that aborts the in-flight frame at the next brick boundary.
    /// View or transfer-function changes store `true` into it.
    pub fn invalidation_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.restart)
    }

    pub fn cache(&self) -> &GpuBrickCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut GpuBrickCache {
        &mut self.cache
    }

    /// Offscreen target holding the finished frame
    pub fn output_target(&self) -> RenderTargetHandle {
        self.main_target
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Render one frame of the active mode.
    ///
    /// Out-of-budget acquires coarsen the LOD by one and restart; reaching
    /// the frame deadline defers the remaining bricks to the next frame.
    pub fn render_frame<G: GpuContext + ?Sized>(
        &mut self,
        ctx: &mut G,
        dataset: &dyn Dataset,
        tf: &dyn TransferFunction,
        view: &ViewState,
    ) -> EngineResult<FrameStats> {
        if self.mode == RenderMode::Invalid {
            return Err(EngineError::InvalidRenderMode);
        }
        let program = self.shaders.select(
            self.mode,
            self.config.lighting,
            dataset.component_count(),
            self.config.avoid_separate_compositing,
        )?;

        let sample_rate = self.effective_sample_rate();
        self.slicer.set_sample_rate(sample_rate)?;
        self.restart.store(false, Ordering::Relaxed);

        let two_pass_iso =
            self.mode == RenderMode::Isosurface && !self.config.avoid_separate_compositing;
        let blend = match self.mode {
            RenderMode::Transfer1D | RenderMode::Transfer2D => BlendMode::Over,
            RenderMode::Isosurface => {
                if two_pass_iso {
                    BlendMode::Disabled
                } else {
                    BlendMode::Over
                }
            }
            RenderMode::Invalid => unreachable!(),
        };

        let deadline = self.config.frame_deadline.map(|d| Instant::now() + d);
        let support = tf.support_range();
        let mut stats = FrameStats::default();
        let mut lod = choose_lod(dataset, view);

        loop {
            self.frame += 1;
            let visible =
                enumerate_visible(dataset, view, lod, self.config.timestep, Some(support))?;
            stats.lod = lod;
            stats.culled_frustum = visible.culled_frustum;
            stats.culled_range = visible.culled_range;

            // Partial results of a previous attempt are discarded here.
            ctx.bind_render_target(Some(self.main_target));
            ctx.clear([0.0; 4], 1.0);
            if two_pass_iso {
                ctx.bind_render_target(Some(self.iso_target));
                ctx.clear([0.0; 4], 1.0);
            } else {
                ctx.bind_render_target(Some(self.main_target));
            }

            ctx.bind_program(program);
            ctx.set_blend(blend);
            ctx.set_depth_test(two_pass_iso);
            if let Some(texture) = tf.texture() {
                ctx.bind_texture(texture, 1);
            }
            self.set_pass_uniforms(ctx, dataset, view, lod, sample_rate);

            match self.draw_brick_pass(ctx, dataset, view, &visible.bricks, deadline)? {
                PassResult::Completed { drawn, deferred } => {
                    stats.bricks_drawn = drawn;
                    stats.deferred = deferred;
                }
                PassResult::OutOfBudget(err) => {
                    if lod + 1 < dataset.lod_count() {
                        log::info!(
                            "frame {}: {} at LOD {}, coarsening",
                            self.frame,
                            err,
                            lod
                        );
                        lod += 1;
                        stats.restarts += 1;
                        continue;
                    }
                    return Err(err);
                }
                PassResult::Aborted { drawn } => {
                    log::debug!("frame {} aborted after {} bricks", self.frame, drawn);
                    self.interactive = true;
                    stats.bricks_drawn = drawn;
                    stats.completed = false;
                    return Ok(stats);
                }
            }

            if two_pass_iso {
                self.compose_isosurface(ctx)?;
            }
            self.interactive = false;
            stats.completed = true;
            return Ok(stats);
        }
    }

    /// High-quality maximum-intensity projection.
    ///
    /// A separate path rather than a [`RenderMode`]: depth test off and
    /// blend equation MAX, no transfer-function culling.
    pub fn render_high_quality_mip<G: GpuContext + ?Sized>(
        &mut self,
        ctx: &mut G,
        dataset: &dyn Dataset,
        view: &ViewState,
    ) -> EngineResult<FrameStats> {
        let program = self.shaders.get(ShaderVariant::Mip);
        let sample_rate = self.effective_sample_rate();
        self.slicer.set_sample_rate(sample_rate)?;
        self.restart.store(false, Ordering::Relaxed);

        let deadline = self.config.frame_deadline.map(|d| Instant::now() + d);
        let mut stats = FrameStats::default();
        let mut lod = choose_lod(dataset, view);

        loop {
            self.frame += 1;
            let visible = enumerate_visible(dataset, view, lod, self.config.timestep, None)?;
            stats.lod = lod;
            stats.culled_frustum = visible.culled_frustum;

            ctx.bind_render_target(Some(self.main_target));
            ctx.clear([0.0; 4], 1.0);
            ctx.bind_program(program);
            ctx.set_blend(BlendMode::Max);
            ctx.set_depth_test(false);
            self.set_pass_uniforms(ctx, dataset, view, lod, sample_rate);

            match self.draw_brick_pass(ctx, dataset, view, &visible.bricks, deadline)? {
                PassResult::Completed { drawn, deferred } => {
                    stats.bricks_drawn = drawn;
                    stats.deferred = deferred;
                }
                PassResult::OutOfBudget(err) => {
                    if lod + 1 < dataset.lod_count() {
                        lod += 1;
                        stats.restarts += 1;
                        continue;
                    }
                    return Err(err);
                }
                PassResult::Aborted { drawn } => {
                    self.interactive = true;
                    stats.bricks_drawn = drawn;
                    stats.completed = false;
                    return Ok(stats);
                }
            }
            self.interactive = false;
            stats.completed = true;
            return Ok(stats);
        }
    }

    fn effective_sample_rate(&self) -> f32 {
        if self.interactive {
            self.config.sample_rate / slicing::INTERACTIVE_DECIMATION
        } else {
            self.config.sample_rate
        }
    }

    fn set_pass_uniforms<G: GpuContext + ?Sized>(
        &self,
        ctx: &mut G,
        dataset: &dyn Dataset,
        view: &ViewState,
        lod: usize,
        sample_rate: f32,
    ) {
        ctx.set_uniform_mat4("projection", view.projection);
        ctx.set_uniform_mat4("modelview", view.view);

        let domain = dataset.domain_size().as_vec3();
        let domain_lod = dataset.domain_size_at_lod(lod).as_vec3();
        let ratio = (domain / domain_lod.max(Vec3::ONE)).max_element().max(1.0);
        ctx.set_uniform_f32(
            "step_scale",
            slicing::OBLIQUE_SCALE / sample_rate * ratio,
        );

        let scale = dataset.scale().max(Vec3::splat(f32::EPSILON));
        ctx.set_uniform_vec3("domain_scale", Vec3::ONE / scale);
        ctx.set_uniform_f32("iso_value", self.config.iso_value);
        if self.config.lighting {
            ctx.set_uniform_vec3("light_diffuse", self.config.light_diffuse);
        }
    }

    fn draw_brick_pass<G: GpuContext + ?Sized>(
        &mut self,
        ctx: &mut G,
        dataset: &dyn Dataset,
        view: &ViewState,
        bricks: &[BrickKey],
        deadline: Option<Instant>,
    ) -> EngineResult<PassResult> {
        let mut drawn = 0;
        let mut intra: u64 = 0;
        for (i, key) in bricks.iter().enumerate() {
            if self.restart.swap(false, Ordering::Relaxed) {
                return Ok(PassResult::Aborted { drawn });
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    log::debug!(
                        "frame {}: deadline reached, deferring {} bricks",
                        self.frame,
                        bricks.len() - i
                    );
                    return Ok(PassResult::Completed {
                        drawn,
                        deferred: bricks.len() - i,
                    });
                }
            }

            let texture = match self.cache.acquire(ctx, dataset, *key, self.frame, intra) {
                Ok(texture) => texture,
                Err(err @ EngineError::OutOfBudget { .. })
                | Err(err @ EngineError::GpuResourceExhausted { .. }) => {
                    return Ok(PassResult::OutOfBudget(err))
                }
                Err(err @ EngineError::BrickNotFound { .. })
                | Err(err @ EngineError::WrongType { .. }) => {
                    log::warn!("skipping brick {}: {}", key, err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            intra += 1;

            let md = dataset.brick_metadata(key)?;
            ctx.bind_texture(texture, 0);
            ctx.set_uniform_vec3(
                "voxel_stepsize",
                Vec3::ONE / md.n_voxels.as_vec3().max(Vec3::ONE),
            );

            let slices = self.slicer.slices_for_brick(&md, &view.world, &view.view);
            for bin in slices.ordered() {
                if !bin.is_empty() {
                    ctx.draw_triangles(bin)?;
                }
            }
            drawn += 1;
        }
        Ok(PassResult::Completed { drawn, deferred: 0 })
    }

    fn compose_isosurface<G: GpuContext + ?Sized>(&mut self, ctx: &mut G) -> EngineResult<()> {
        ctx.bind_render_target(Some(self.main_target));
        ctx.bind_program(self.shaders.get(ShaderVariant::Compose));
        ctx.set_blend(BlendMode::Disabled);
        ctx.set_depth_test(false);
        ctx.bind_target_color(self.iso_target, 2);
        ctx.set_uniform_f32("iso_value", self.config.iso_value);
        ctx.draw_fullscreen()
    }

}
