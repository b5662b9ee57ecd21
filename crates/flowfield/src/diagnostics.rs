//! Velocity field statistics, computed on a CPU copy of the field.

use glam::Vec2;

use crate::field::GridSize;
use crate::kernels;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FieldStats {
    /// `0.5 · Σ|v|²` over all texels.
    pub energy: f64,
    pub max_speed: f32,
    /// Signed sum of the discrete divergence. Zero for any periodic field.
    pub divergence_sum: f64,
    /// `Σ|div|`, the useful incompressibility measure.
    pub divergence_abs_sum: f64,
    pub divergence_max: f32,
    /// Texels holding NaN or infinity.
    pub non_finite: usize,
}

impl FieldStats {
    pub fn from_velocity(size: GridSize, velocity: &[Vec2]) -> Self {
        let mut stats = FieldStats::default();
        if size.is_empty() || velocity.len() != size.texel_count() {
            return stats;
        }

        for v in velocity {
            if !v.is_finite() {
                stats.non_finite += 1;
                continue;
            }
            stats.energy += 0.5 * v.length_squared() as f64;
            stats.max_speed = stats.max_speed.max(v.length());
        }

        let mut div = vec![0.0; size.texel_count()];
        kernels::divergence(size, velocity, &mut div);
        for d in div.into_iter().filter(|d| d.is_finite()) {
            stats.divergence_sum += d as f64;
            stats.divergence_abs_sum += d.abs() as f64;
            stats.divergence_max = stats.divergence_max.max(d.abs());
        }

        stats
    }

    pub fn log(&self, label: &str) {
        log::info!(
            "{label}: energy={:.4e} max|v|={:.3} Σ|div|={:.4e} max|div|={:.4e}{}",
            self.energy,
            self.max_speed,
            self.divergence_abs_sum,
            self.divergence_max,
            if self.non_finite > 0 {
                format!(" NON-FINITE={}", self.non_finite)
            } else {
                String::new()
            }
        );
    }
}
