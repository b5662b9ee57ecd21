//! `#[repr(C)]` structs shared with the WGSL kernels.
//!
//! Layouts must match the shader declarations byte for byte; every struct is
//! padded to a multiple of 16 bytes for uniform buffer rules.

use bytemuck::{Pod, Zeroable};

use crate::config::{BoundaryPolicy, SolverConfig};
use crate::field::GridSize;

/// Value the obstacle velocity field is cleared to where no obstacle is drawn.
///
/// Kernels never branch on it (they read the occupancy mask); it only keeps
/// "no obstacle" visually and numerically distinct from "obstacle at rest".
pub const OBSTACLE_SENTINEL: f32 = 9999.0;

/// Edge classification values written to the edge mask.
pub const CELL_FLUID: u32 = 0;
pub const CELL_EDGE: u32 = 1;
pub const CELL_INTERIOR: u32 = 2;

// =============================================================================
// Per-frame uniform
// =============================================================================

/// Per-frame simulation parameters (32 bytes).
///
/// Matches `struct SimParams` in `common.wgsl`:
/// struct SimParams {
///     width: u32,
///     height: u32,
///     dt: f32,
///     viscosity: f32,
///     omega: f32,
///     advect_scale: f32,
///     boundary_policy: u32,
///     _pad: u32,
/// }
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SimParams {
    pub width: u32,
    pub height: u32,
    pub dt: f32,
    pub viscosity: f32,
    pub omega: f32,
    pub advect_scale: f32,
    pub boundary_policy: u32,
    pub _pad: u32,
}

impl SimParams {
    pub fn new(size: GridSize, dt: f32, config: &SolverConfig) -> Self {
        Self {
            width: size.width,
            height: size.height,
            dt,
            viscosity: config.viscosity,
            omega: config.over_relaxation,
            advect_scale: config.advection_scale,
            boundary_policy: match config.boundary_policy {
                BoundaryPolicy::Overwrite => 0,
                BoundaryPolicy::EdgeDriven => 1,
            },
            _pad: 0,
        }
    }

    pub fn size(&self) -> GridSize {
        GridSize::new(self.width, self.height)
    }

    pub fn boundary_policy(&self) -> BoundaryPolicy {
        if self.boundary_policy == 1 {
            BoundaryPolicy::EdgeDriven
        } else {
            BoundaryPolicy::Overwrite
        }
    }
}

// =============================================================================
// Instance data
// =============================================================================

/// One obstacle rectangle for instanced rasterization (32 bytes).
///
/// `rect` is `[u, v, w, h]` in normalized canvas coordinates (origin top-left),
/// `velocity` is in texels per second.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct ObstacleInstance {
    pub rect: [f32; 4],
    pub velocity: [f32; 2],
    pub _pad: [f32; 2],
}

impl ObstacleInstance {
    pub fn new(rect: [f32; 4], velocity: [f32; 2]) -> Self {
        Self {
            rect,
            velocity,
            _pad: [0.0; 2],
        }
    }

    /// Texel-center coverage rule shared with the GPU rasterizer.
    pub fn covers(&self, size: GridSize, x: u32, y: u32) -> bool {
        let u = (x as f32 + 0.5) / size.width as f32;
        let v = (y as f32 + 0.5) / size.height as f32;
        let [left, top, w, h] = self.rect;
        u >= left && u < left + w && v >= top && v < top + h
    }
}

/// A force splat: `force` (texels/s²) added at `texel` for one frame (16 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct SplatInstance {
    pub texel: [f32; 2],
    pub force: [f32; 2],
}

/// Display pass parameters (16 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct DisplayParams {
    pub target_width: f32,
    pub target_height: f32,
    pub scale: f32,
    pub _pad: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes_are_16_byte_multiples() {
        assert_eq!(std::mem::size_of::<SimParams>(), 32);
        assert_eq!(std::mem::size_of::<ObstacleInstance>(), 32);
        assert_eq!(std::mem::size_of::<SplatInstance>(), 16);
        assert_eq!(std::mem::size_of::<DisplayParams>(), 16);
    }

    #[test]
    fn test_coverage_uses_texel_centers() {
        let size = GridSize::new(64, 64);
        let inst = ObstacleInstance::new([10.0 / 64.0, 10.0 / 64.0, 11.0 / 64.0, 11.0 / 64.0], [0.0; 2]);
        assert!(inst.covers(size, 10, 10));
        assert!(inst.covers(size, 20, 20));
        assert!(!inst.covers(size, 9, 15));
        assert!(!inst.covers(size, 21, 15));
    }
}
