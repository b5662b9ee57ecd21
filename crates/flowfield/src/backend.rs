//! Kernel library seam.
//!
//! The orchestrator is written once against [`FieldBackend`]; the wgpu backend
//! records one render/compute pass per call, the CPU backend runs the
//! reference kernels in [`crate::kernels`] immediately.
//!
//! Every pass reads from input fields and writes a *different* output field.
//! The only exception is [`FieldBackend::inject_forces`], which blends
//! additively into the field it is given and reads nothing from it.

use crate::field::{FieldError, GridSize};
use crate::params::{ObstacleInstance, SimParams, SplatInstance};
use crate::pool::FieldAllocator;

/// Values a field can be cleared to.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ClearValue {
    Zero,
    Vector([f32; 2]),
}

pub trait FieldBackend: FieldAllocator {
    /// Start recording a frame at `size`. Every field bound until
    /// [`end_frame`](Self::end_frame) must have this size.
    fn begin_frame(&mut self, size: GridSize) -> Result<(), FieldError>;

    /// Upload the per-frame uniform. Fixed for the rest of the frame.
    fn set_params(&mut self, params: &SimParams) -> Result<(), FieldError>;

    fn clear(&mut self, dst: &Self::Field, value: ClearValue) -> Result<(), FieldError>;

    /// Additive `v += dt · force` at each splat's texel.
    fn inject_forces(&mut self, velocity: &Self::Field, splats: &[SplatInstance]) -> Result<(), FieldError>;

    fn diffuse(&mut self, src: &Self::Field, dst: &Self::Field) -> Result<(), FieldError>;

    fn divergence(&mut self, velocity: &Self::Field, dst: &Self::Field) -> Result<(), FieldError>;

    fn pressure_step(
        &mut self,
        pressure: &Self::Field,
        divergence: &Self::Field,
        dst: &Self::Field,
    ) -> Result<(), FieldError>;

    fn subtract_gradient(
        &mut self,
        velocity: &Self::Field,
        pressure: &Self::Field,
        dst: &Self::Field,
    ) -> Result<(), FieldError>;

    /// Self-advection. The source is bound for filtered sampling.
    fn advect(&mut self, velocity: &Self::Field, dst: &Self::Field) -> Result<(), FieldError>;

    fn rasterize_obstacles(
        &mut self,
        instances: &[ObstacleInstance],
        velocity_dst: &Self::Field,
        occupancy_dst: &Self::Field,
    ) -> Result<(), FieldError>;

    fn classify_edges(&mut self, occupancy: &Self::Field, dst: &Self::Field) -> Result<(), FieldError>;

    fn enforce_boundary(
        &mut self,
        velocity: &Self::Field,
        obstacle_velocity: &Self::Field,
        occupancy: &Self::Field,
        edges: &Self::Field,
        dst: &Self::Field,
    ) -> Result<(), FieldError>;

    /// Present the velocity field. Cosmetic; must not affect the solver.
    fn display(&mut self, velocity: &Self::Field, scale: f32) -> Result<(), FieldError>;

    /// Finish the frame (submit recorded work).
    fn end_frame(&mut self);
}
