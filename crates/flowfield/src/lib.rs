//! Backend-agnostic core of the fluid backdrop.
//!
//! Holds the field model and pool, the kernel seam ([`FieldBackend`]), the
//! frame orchestrator ([`Solver`]) and a CPU reference backend. The wgpu
//! backend lives in the `backdrop` crate.

pub mod backend;
pub mod config;
pub mod cpu;
pub mod diagnostics;
pub mod field;
pub mod kernels;
pub mod obstacle;
pub mod params;
pub mod pool;
pub mod solver;

pub use backend::{ClearValue, FieldBackend};
pub use config::{BoundaryPolicy, SolverConfig};
pub use cpu::{CpuBackend, CpuField};
pub use diagnostics::FieldStats;
pub use field::{FieldError, FieldFormat, FieldResource, GridSize};
pub use obstacle::{Obstacle, ObstacleRect, ObstacleRegistry};
pub use params::{DisplayParams, ObstacleInstance, SimParams, SplatInstance, OBSTACLE_SENTINEL};
pub use pool::{FieldAllocator, FieldHandle, FieldPool, PoolError, PoolStats};
pub use solver::{FrameInput, FrameOutcome, FrameStage, PointerInput, Solver, SolverError, SolverState};

// Re-export glam so hosts use the same version
pub use glam;
