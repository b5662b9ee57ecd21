//! Frame orchestration.
//!
//! One call to [`Solver::frame`] advances the simulation by one displayed
//! frame:
//!
//! 1. Rasterize obstacles (velocity field, occupancy mask, edge mask)
//! 2. Upload the per-frame uniform
//! 3. Inject pointer forces
//! 4. Enforce obstacle boundary
//! 5. Diffuse (N Jacobi steps)
//! 6. Project (divergence, M pressure steps, gradient subtraction)
//! 7. Advect
//! 8. Enforce obstacle boundary
//! 9. Project
//! 10. Display
//!
//! The solver holds exactly two fields between frames: current velocity and
//! current pressure. Every other field is acquired from the pool for the
//! duration of one pass (or one frame, for the obstacle fields).

use glam::Vec2;

use crate::backend::{ClearValue, FieldBackend};
use crate::config::SolverConfig;
use crate::field::{FieldError, FieldFormat, FieldResource, GridSize};
use crate::obstacle::{ObstacleRect, ObstacleRegistry};
use crate::params::{SimParams, SplatInstance};
use crate::pool::{FieldHandle, FieldPool, PoolError, PoolStats};

/// Handles kept across frames: velocity and pressure.
const HELD_FIELDS: usize = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SolverState {
    /// Waiting for a usable size after creation, resize or reset.
    NotReady,
    Running,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameStage {
    RasterizeObstacles,
    SetParams,
    InjectForces,
    EnforceBoundary,
    Diffuse,
    Project,
    Advect,
    Display,
}

impl FrameStage {
    pub const SEQUENCE: [FrameStage; 10] = [
        FrameStage::RasterizeObstacles,
        FrameStage::SetParams,
        FrameStage::InjectForces,
        FrameStage::EnforceBoundary,
        FrameStage::Diffuse,
        FrameStage::Project,
        FrameStage::Advect,
        FrameStage::EnforceBoundary,
        FrameStage::Project,
        FrameStage::Display,
    ];
}

/// Pointer state in normalized canvas coordinates (origin top-left).
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PointerInput {
    pub down: bool,
    pub position: Vec2,
}

/// Everything the host reports for one frame.
#[derive(Clone, Debug, Default)]
pub struct FrameInput<'a> {
    /// Seconds since the previous frame.
    pub dt: f32,
    /// Obstacle rectangles in canvas device pixels.
    pub obstacles: &'a [ObstacleRect],
    pub pointer: PointerInput,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Canvas has zero area; nothing was recorded.
    Skipped,
    Stepped { size: GridSize, rebuilt: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    Field(FieldError),
    Pool(PoolError),
}

impl std::fmt::Display for SolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverError::Field(e) => write!(f, "kernel error: {e}"),
            SolverError::Pool(e) => write!(f, "pool error: {e}"),
        }
    }
}

impl std::error::Error for SolverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SolverError::Field(e) => Some(e),
            SolverError::Pool(e) => Some(e),
        }
    }
}

impl From<FieldError> for SolverError {
    fn from(e: FieldError) -> Self {
        SolverError::Field(e)
    }
}

impl From<PoolError> for SolverError {
    fn from(e: PoolError) -> Self {
        SolverError::Pool(e)
    }
}

struct HeldFields<F> {
    velocity: FieldHandle<F>,
    pressure: FieldHandle<F>,
}

struct ObstacleFields<F> {
    velocity: FieldHandle<F>,
    occupancy: FieldHandle<F>,
    edges: FieldHandle<F>,
}

pub struct Solver<F> {
    config: SolverConfig,
    pool: FieldPool<F>,
    state: SolverState,
    canvas: (u32, u32),
    held: Option<HeldFields<F>>,
    obstacles: ObstacleRegistry,
    pointer_previous: Option<Vec2>,
    /// Unit direction of the last pointer motion during the current press.
    pointer_heading: Option<Vec2>,
    frame_count: u64,
}

impl<F: FieldResource> Solver<F> {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            pool: FieldPool::new(GridSize::new(0, 0)),
            state: SolverState::NotReady,
            canvas: (0, 0),
            held: None,
            obstacles: ObstacleRegistry::new(),
            pointer_previous: None,
            pointer_heading: None,
            frame_count: 0,
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Replace the configuration. Takes effect from the next frame; a change
    /// of resolution settings triggers a rebuild.
    pub fn set_config(&mut self, config: SolverConfig) {
        if config.resolution_scale != self.config.resolution_scale || config.max_texels != self.config.max_texels {
            self.state = SolverState::NotReady;
        }
        self.config = config;
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    /// Current simulation resolution (0x0 before the first rebuild).
    pub fn grid_size(&self) -> GridSize {
        self.pool.size()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn obstacles(&self) -> &ObstacleRegistry {
        &self.obstacles
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn velocity(&self) -> Option<&F> {
        self.held.as_ref().map(|h| h.velocity.field())
    }

    pub fn pressure(&self) -> Option<&F> {
        self.held.as_ref().map(|h| h.pressure.field())
    }

    /// Canvas resized (device pixels). Fields are rebuilt on the next frame.
    pub fn resize(&mut self, canvas_width: u32, canvas_height: u32) {
        if (canvas_width, canvas_height) == self.canvas && self.state == SolverState::Running {
            return;
        }
        log::info!("canvas resized to {}x{}", canvas_width, canvas_height);
        self.canvas = (canvas_width, canvas_height);
        self.state = SolverState::NotReady;
    }

    /// Zero the flow. Fields are rebuilt on the next frame.
    pub fn reset(&mut self) {
        self.state = SolverState::NotReady;
    }

    /// Release every held field and verify nothing else is outstanding.
    pub fn shutdown(&mut self) -> Result<(), PoolError> {
        if let Some(held) = self.held.take() {
            self.pool.release(held.velocity);
            self.pool.release(held.pressure);
        }
        self.state = SolverState::NotReady;
        self.pool.check_balance()
    }

    /// Advance one frame.
    pub fn frame<B>(&mut self, backend: &mut B, input: &FrameInput<'_>) -> Result<FrameOutcome, SolverError>
    where
        B: FieldBackend<Field = F>,
    {
        let rebuild = self.state == SolverState::NotReady;
        let size = if rebuild {
            let (w, h) = self.canvas;
            GridSize::from_canvas(w, h, self.config.resolution_scale, self.config.max_texels)
        } else {
            self.pool.size()
        };
        if size.is_empty() {
            return Ok(FrameOutcome::Skipped);
        }

        backend.begin_frame(size)?;
        if rebuild {
            if let Err(err) = self.rebuild(backend, size) {
                backend.end_frame();
                return Err(err);
            }
        }

        let Some(mut held) = self.held.take() else {
            backend.end_frame();
            return Err(SolverError::Pool(PoolError::NoResolution));
        };

        let mut obstacle_fields = None;
        let result = self.run_stages(backend, input, size, &mut held, &mut obstacle_fields);

        if let Some(fields) = obstacle_fields {
            self.release_obstacle_fields(fields);
        }
        self.held = Some(held);
        backend.end_frame();

        if let Err(err) = self.pool.check_balance_with(HELD_FIELDS) {
            log::error!("frame {}: {}", self.frame_count, err);
        }

        result?;
        self.frame_count += 1;
        Ok(FrameOutcome::Stepped { size, rebuilt: rebuild })
    }

    fn rebuild<B>(&mut self, backend: &mut B, size: GridSize) -> Result<(), SolverError>
    where
        B: FieldBackend<Field = F>,
    {
        if let Some(held) = self.held.take() {
            self.pool.release(held.velocity);
            self.pool.release(held.pressure);
        }
        self.pool.resize(size);

        let velocity = self.pool.acquire(backend, FieldFormat::Vector)?;
        let pressure = self.pool.acquire(backend, FieldFormat::Scalar)?;
        let cleared = backend
            .clear(velocity.field(), ClearValue::Zero)
            .and_then(|_| backend.clear(pressure.field(), ClearValue::Zero));
        self.held = Some(HeldFields { velocity, pressure });
        cleared?;

        // Normalized positions change meaning with the canvas; start at rest.
        self.obstacles.clear();
        self.pointer_previous = None;
        self.pointer_heading = None;
        self.state = SolverState::Running;
        log::info!("solver running at {}", size);
        Ok(())
    }

    fn run_stages<B>(
        &mut self,
        backend: &mut B,
        input: &FrameInput<'_>,
        size: GridSize,
        held: &mut HeldFields<F>,
        obstacle_fields: &mut Option<ObstacleFields<F>>,
    ) -> Result<(), SolverError>
    where
        B: FieldBackend<Field = F>,
    {
        let dt = if input.dt.is_finite() { input.dt.max(0.0) } else { 0.0 };

        for stage in FrameStage::SEQUENCE {
            log::trace!("frame {}: {:?}", self.frame_count, stage);
            match stage {
                FrameStage::RasterizeObstacles => {
                    *obstacle_fields = Some(self.rasterize_obstacles(backend, input.obstacles, dt, size)?);
                }
                FrameStage::SetParams => {
                    backend.set_params(&SimParams::new(size, dt, &self.config))?;
                }
                FrameStage::InjectForces => {
                    let splats = self.pointer_splats(input.pointer, size);
                    backend.inject_forces(held.velocity.field(), &splats)?;
                }
                FrameStage::EnforceBoundary => {
                    if let Some(o) = obstacle_fields.as_ref() {
                        self.replace(backend, &mut held.velocity, |b, v, dst| {
                            b.enforce_boundary(v, o.velocity.field(), o.occupancy.field(), o.edges.field(), dst)
                        })?;
                    }
                }
                FrameStage::Diffuse => {
                    for _ in 0..self.config.diffusion_iterations {
                        self.replace(backend, &mut held.velocity, |b, v, dst| b.diffuse(v, dst))?;
                    }
                }
                FrameStage::Project => self.project(backend, held)?,
                FrameStage::Advect => {
                    self.replace(backend, &mut held.velocity, |b, v, dst| b.advect(v, dst))?;
                }
                FrameStage::Display => {
                    backend.display(held.velocity.field(), self.config.display_scale)?;
                }
            }
        }
        Ok(())
    }

    /// Run a pass reading `current` into a fresh field of the same format, then
    /// make the fresh field current and release the old one.
    fn replace<B, K>(&mut self, backend: &mut B, current: &mut FieldHandle<F>, kernel: K) -> Result<(), SolverError>
    where
        B: FieldBackend<Field = F>,
        K: FnOnce(&mut B, &F, &F) -> Result<(), FieldError>,
    {
        let next = self.pool.acquire(backend, current.format())?;
        if let Err(err) = kernel(backend, current.field(), next.field()) {
            self.pool.release(next);
            return Err(err.into());
        }
        let old = std::mem::replace(current, next);
        self.pool.release(old);
        Ok(())
    }

    fn project<B>(&mut self, backend: &mut B, held: &mut HeldFields<F>) -> Result<(), SolverError>
    where
        B: FieldBackend<Field = F>,
    {
        if !self.config.warm_start_pressure {
            backend.clear(held.pressure.field(), ClearValue::Zero)?;
        }

        let divergence = self.pool.acquire(backend, FieldFormat::Scalar)?;
        let result = self.project_with(backend, held, divergence.field());
        self.pool.release(divergence);
        result
    }

    fn project_with<B>(&mut self, backend: &mut B, held: &mut HeldFields<F>, divergence: &F) -> Result<(), SolverError>
    where
        B: FieldBackend<Field = F>,
    {
        backend.divergence(held.velocity.field(), divergence)?;

        for _ in 0..self.config.pressure_iterations {
            self.replace(backend, &mut held.pressure, |b, p, dst| b.pressure_step(p, divergence, dst))?;
        }

        let pressure = held.pressure.field();
        self.replace(backend, &mut held.velocity, |b, v, dst| b.subtract_gradient(v, pressure, dst))
    }

    fn rasterize_obstacles<B>(
        &mut self,
        backend: &mut B,
        rects: &[ObstacleRect],
        dt: f32,
        size: GridSize,
    ) -> Result<ObstacleFields<F>, SolverError>
    where
        B: FieldBackend<Field = F>,
    {
        let (w, h) = self.canvas;
        self.obstacles.sync(rects, w, h);
        let instances = self.obstacles.instances(dt, self.config.max_obstacle_speed, size);

        let fields = ObstacleFields {
            velocity: self.pool.acquire(backend, FieldFormat::Vector)?,
            occupancy: self.pool.acquire(backend, FieldFormat::Mask)?,
            edges: self.pool.acquire(backend, FieldFormat::Mask)?,
        };

        let result = backend
            .rasterize_obstacles(&instances, fields.velocity.field(), fields.occupancy.field())
            .and_then(|_| backend.classify_edges(fields.occupancy.field(), fields.edges.field()));

        match result {
            Ok(()) => Ok(fields),
            Err(err) => {
                self.release_obstacle_fields(fields);
                Err(err.into())
            }
        }
    }

    fn release_obstacle_fields(&mut self, fields: ObstacleFields<F>) {
        self.pool.release(fields.velocity);
        self.pool.release(fields.occupancy);
        self.pool.release(fields.edges);
    }

    /// Force at the texel under the pointer, every frame while it is down.
    ///
    /// Directed along the latest pointer motion of this press; a press that
    /// has not moved yet pushes along `pointer_direction`.
    fn pointer_splats(&mut self, pointer: PointerInput, size: GridSize) -> Vec<SplatInstance> {
        if !pointer.down {
            self.pointer_previous = None;
            self.pointer_heading = None;
            return Vec::new();
        }

        let dims = Vec2::new(size.width as f32, size.height as f32);
        if let Some(previous) = self.pointer_previous.replace(pointer.position) {
            if let Some(heading) = ((pointer.position - previous) * dims).try_normalize() {
                self.pointer_heading = Some(heading);
            }
        }

        let inside = (0.0..=1.0).contains(&pointer.position.x) && (0.0..=1.0).contains(&pointer.position.y);
        let heading = self
            .pointer_heading
            .or_else(|| self.config.pointer_direction.try_normalize());
        let (true, Some(heading)) = (inside, heading) else {
            return Vec::new();
        };

        let texel = (pointer.position * dims).floor().min(dims - 1.0);
        let force = heading * self.config.pointer_force;
        vec![SplatInstance {
            texel: (texel + 0.5).to_array(),
            force: force.to_array(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{CpuBackend, CpuField};

    fn solver(canvas: (u32, u32)) -> Solver<CpuField> {
        let config = SolverConfig {
            resolution_scale: 1.0,
            diffusion_iterations: 2,
            pressure_iterations: 4,
            ..Default::default()
        };
        let mut solver = Solver::new(config);
        solver.resize(canvas.0, canvas.1);
        solver
    }

    #[test]
    fn test_zero_canvas_skips_frame() {
        let mut backend = CpuBackend::new();
        let mut solver = solver((0, 0));
        let outcome = solver.frame(&mut backend, &FrameInput::default()).unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped);
        assert_eq!(solver.state(), SolverState::NotReady);
        assert_eq!(backend.allocations(), 0);
    }

    #[test]
    fn test_first_frame_rebuilds_then_runs() {
        let mut backend = CpuBackend::new();
        let mut solver = solver((16, 8));
        let input = FrameInput { dt: 1.0 / 60.0, ..Default::default() };

        let first = solver.frame(&mut backend, &input).unwrap();
        assert_eq!(first, FrameOutcome::Stepped { size: GridSize::new(16, 8), rebuilt: true });
        assert_eq!(solver.state(), SolverState::Running);

        let second = solver.frame(&mut backend, &input).unwrap();
        assert_eq!(second, FrameOutcome::Stepped { size: GridSize::new(16, 8), rebuilt: false });
        assert_eq!(solver.pool_stats().outstanding, HELD_FIELDS);
    }

    #[test]
    fn test_second_frame_allocates_nothing() {
        let mut backend = CpuBackend::new();
        let mut solver = solver((8, 8));
        let input = FrameInput { dt: 1.0 / 60.0, ..Default::default() };
        solver.frame(&mut backend, &input).unwrap();
        solver.frame(&mut backend, &input).unwrap();
        let warm = backend.allocations();
        solver.frame(&mut backend, &input).unwrap();
        assert_eq!(backend.allocations(), warm);
    }

    #[test]
    fn test_held_pointer_keeps_stirring() {
        let mut backend = CpuBackend::new();
        let mut solver = solver((64, 64));
        let pointer = PointerInput { down: true, position: Vec2::new(0.5, 0.5) };
        let input = FrameInput { dt: 1.0 / 60.0, pointer, ..Default::default() };
        let mut energy = Vec::new();
        for _ in 0..5 {
            solver.frame(&mut backend, &input).unwrap();
            let v = solver.velocity().unwrap().read_vector().unwrap();
            energy.push(v.iter().map(|t| t.length_squared()).sum::<f32>());
        }
        assert!(energy[0] > 0.0, "first frame of a press should inject");
        assert!(energy[4] > energy[0], "held pointer should keep injecting: {energy:?}");
    }

    #[test]
    fn test_press_without_motion_uses_configured_direction() {
        let mut backend = CpuBackend::new();
        let mut solver = solver((32, 32));
        let mut config = solver.config().clone();
        config.pointer_direction = Vec2::new(2.0, 0.0);
        solver.set_config(config);

        let pointer = PointerInput { down: true, position: Vec2::new(0.5, 0.5) };
        solver.frame(&mut backend, &FrameInput { dt: 1.0 / 60.0, pointer, ..Default::default() }).unwrap();

        let v = solver.velocity().unwrap().read_vector().unwrap();
        let net: Vec2 = v.iter().copied().sum();
        assert!(net.x > 0.0, "expected a push along +x, got {net:?}");
        assert!(net.y.abs() < 0.01 * net.x, "expected no net vertical push, got {net:?}");
    }

    #[test]
    fn test_pointer_outside_canvas_adds_no_force() {
        let mut backend = CpuBackend::new();
        let mut solver = solver((8, 8));
        let pointer = PointerInput { down: true, position: Vec2::new(1.5, 0.5) };
        let input = FrameInput { dt: 1.0 / 60.0, pointer, ..Default::default() };
        for _ in 0..3 {
            solver.frame(&mut backend, &input).unwrap();
        }
        let v = solver.velocity().unwrap().read_vector().unwrap();
        assert!(v.iter().all(|t| *t == Vec2::ZERO));
    }

    #[test]
    fn test_pointer_drag_moves_fluid_along_motion() {
        let mut backend = CpuBackend::new();
        let mut solver = solver((32, 32));
        let mut input = FrameInput { dt: 1.0 / 60.0, ..Default::default() };

        input.pointer = PointerInput { down: true, position: Vec2::new(0.4, 0.5) };
        solver.frame(&mut backend, &input).unwrap();
        input.pointer.position = Vec2::new(0.5, 0.5);
        solver.frame(&mut backend, &input).unwrap();

        let v = solver.velocity().unwrap().read_vector().unwrap();
        let net: Vec2 = v.iter().copied().sum();
        assert!(net.x > 0.0, "drag to the right should push fluid right, got {net:?}");
    }

    #[test]
    fn test_resolution_change_rebuilds_on_next_frame() {
        let mut backend = CpuBackend::new();
        let mut solver = solver((16, 16));
        let input = FrameInput { dt: 1.0 / 60.0, ..Default::default() };
        solver.frame(&mut backend, &input).unwrap();

        let mut config = solver.config().clone();
        config.viscosity = 0.5;
        solver.set_config(config.clone());
        assert_eq!(solver.state(), SolverState::Running);
        let outcome = solver.frame(&mut backend, &input).unwrap();
        assert_eq!(outcome, FrameOutcome::Stepped { size: GridSize::new(16, 16), rebuilt: false });

        config.resolution_scale = 0.5;
        solver.set_config(config);
        assert_eq!(solver.state(), SolverState::NotReady);
        let outcome = solver.frame(&mut backend, &input).unwrap();
        assert_eq!(outcome, FrameOutcome::Stepped { size: GridSize::new(8, 8), rebuilt: true });
        assert_eq!(solver.pool_stats().outstanding, HELD_FIELDS);
    }

    #[test]
    fn test_shutdown_balances_pool() {
        let mut backend = CpuBackend::new();
        let mut solver = solver((8, 8));
        solver.frame(&mut backend, &FrameInput { dt: 0.01, ..Default::default() }).unwrap();
        assert!(solver.shutdown().is_ok());
        assert!(solver.velocity().is_none());
    }
}
