use glam::Vec2;
use serde::{Deserialize, Serialize};

/// How covered texels are written during boundary enforcement.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoundaryPolicy {
    /// Every covered texel takes the obstacle's velocity.
    #[default]
    Overwrite,
    /// Edge texels take the obstacle's velocity; interior texels are zeroed.
    EdgeDriven,
}

/// Solver tunables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Simulation texels per canvas pixel.
    pub resolution_scale: f32,
    /// Upper bound on `width × height`; both axes shrink uniformly to fit.
    pub max_texels: u32,

    /// Kinematic viscosity in texels²/s.
    pub viscosity: f32,
    /// Jacobi sweeps for velocity diffusion per frame.
    pub diffusion_iterations: u32,
    /// Over-relaxation factor ω for diffusion (1.0 = plain Jacobi).
    pub over_relaxation: f32,

    /// Jacobi sweeps for each pressure solve.
    pub pressure_iterations: u32,
    /// Reuse last frame's pressure as the initial guess.
    pub warm_start_pressure: bool,

    /// Empirical amplification of the advection backtrace.
    pub advection_scale: f32,

    /// Obstacle speed (canvas lengths per second, per axis) above which the
    /// motion is treated as a teleport and ignored for that frame.
    pub max_obstacle_speed: f32,
    pub boundary_policy: BoundaryPolicy,

    /// Pointer force magnitude in texels/s².
    pub pointer_force: f32,
    /// Force direction for a press that has not moved yet (y points down).
    pub pointer_direction: Vec2,

    /// Color gain applied to |velocity| by the display stage.
    pub display_scale: f32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            resolution_scale: 0.25,
            max_texels: 512 * 512,
            viscosity: 0.2,
            diffusion_iterations: 8,
            over_relaxation: 1.0,
            pressure_iterations: 24,
            warm_start_pressure: true,
            advection_scale: 1.0,
            max_obstacle_speed: 4.0,
            boundary_policy: BoundaryPolicy::Overwrite,
            pointer_force: 6000.0,
            pointer_direction: Vec2::new(0.0, -1.0),
            display_scale: 0.02,
        }
    }
}

impl SolverConfig {
    /// Save configuration to JSON file
    pub fn save_json(&self, path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn load_json(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }
}
