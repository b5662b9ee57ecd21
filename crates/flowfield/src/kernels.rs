//! CPU reference kernels.
//!
//! Each function mirrors one WGSL kernel in `backdrop/src/gpu/shaders` and
//! uses exactly the same stencil, wrap rule and sampling convention, so the
//! CPU backend and the GPU tests can compare results texel by texel.
//!
//! Grid spacing is 1 texel and neighbor reads wrap toroidally. `d` and `u`
//! name the `y - 1` and `y + 1` neighbors.

use glam::Vec2;

use crate::config::BoundaryPolicy;
use crate::field::GridSize;
use crate::params::{ObstacleInstance, SplatInstance, CELL_EDGE, CELL_FLUID, CELL_INTERIOR, OBSTACLE_SENTINEL};

#[inline]
fn neighbors<T: Copy>(size: GridSize, field: &[T], x: i32, y: i32) -> [T; 4] {
    [
        field[size.wrap_index(x - 1, y)],
        field[size.wrap_index(x + 1, y)],
        field[size.wrap_index(x, y - 1)],
        field[size.wrap_index(x, y + 1)],
    ]
}

fn for_each_texel(size: GridSize, mut f: impl FnMut(i32, i32, usize)) {
    for y in 0..size.height {
        for x in 0..size.width {
            f(x as i32, y as i32, size.index(x, y));
        }
    }
}

/// One Jacobi relaxation step of implicit diffusion, with over-relaxation.
///
/// `v1 = (v0 + a·Σn) / (1 + 4a)`, `a = viscosity·dt`, then `v0 + ω·(v1 − v0)`.
pub fn diffuse_step(size: GridSize, src: &[Vec2], dst: &mut [Vec2], viscosity: f32, dt: f32, omega: f32) {
    let a = viscosity * dt;
    for_each_texel(size, |x, y, i| {
        let [l, r, d, u] = neighbors(size, src, x, y);
        let v0 = src[i];
        let v1 = (v0 + a * (l + r + d + u)) / (1.0 + 4.0 * a);
        dst[i] = v0 + omega * (v1 - v0);
    });
}

/// `div = −0.5·((R.x − L.x) + (U.y − D.y))`.
pub fn divergence(size: GridSize, velocity: &[Vec2], dst: &mut [f32]) {
    for_each_texel(size, |x, y, i| {
        let [l, r, d, u] = neighbors(size, velocity, x, y);
        dst[i] = -0.5 * ((r.x - l.x) + (u.y - d.y));
    });
}

/// One Jacobi step of the pressure Poisson equation.
pub fn pressure_step(size: GridSize, pressure: &[f32], divergence: &[f32], dst: &mut [f32]) {
    for_each_texel(size, |x, y, i| {
        let [l, r, d, u] = neighbors(size, pressure, x, y);
        dst[i] = 0.25 * (divergence[i] + l + r + d + u);
    });
}

/// `v' = v − 0.5·(pR − pL, pU − pD)`.
pub fn subtract_gradient(size: GridSize, velocity: &[Vec2], pressure: &[f32], dst: &mut [Vec2]) {
    for_each_texel(size, |x, y, i| {
        let [l, r, d, u] = neighbors(size, pressure, x, y);
        dst[i] = velocity[i] - 0.5 * Vec2::new(r - l, u - d);
    });
}

/// Bilinear sample at normalized `uv` with repeat addressing.
///
/// Same convention as a linear sampler: texel centers sit at `(i + 0.5) / n`.
pub fn sample_bilinear(size: GridSize, field: &[Vec2], uv: Vec2) -> Vec2 {
    // Reduced into one period before the integer cast so far-off samples stay in range.
    let tx = (uv.x * size.width as f32 - 0.5).rem_euclid(size.width as f32);
    let ty = (uv.y * size.height as f32 - 0.5).rem_euclid(size.height as f32);
    let x0 = tx.floor();
    let y0 = ty.floor();
    let fx = tx - x0;
    let fy = ty - y0;
    let (x0, y0) = (x0 as i32, y0 as i32);

    let a = field[size.wrap_index(x0, y0)];
    let b = field[size.wrap_index(x0 + 1, y0)];
    let c = field[size.wrap_index(x0, y0 + 1)];
    let d = field[size.wrap_index(x0 + 1, y0 + 1)];

    a.lerp(b, fx).lerp(c.lerp(d, fx), fy)
}

/// Semi-Lagrangian advection of the velocity field by itself.
pub fn advect(size: GridSize, velocity: &[Vec2], dst: &mut [Vec2], dt: f32, scale: f32) {
    let dims = Vec2::new(size.width as f32, size.height as f32);
    for_each_texel(size, |x, y, i| {
        let uv = (Vec2::new(x as f32, y as f32) + 0.5) / dims;
        let source = uv - velocity[i] * dt * scale / dims;
        dst[i] = sample_bilinear(size, velocity, source);
    });
}

/// Rasterize obstacle rectangles: velocity where covered, sentinel elsewhere.
/// Later instances overwrite earlier ones, like draw order on the GPU.
pub fn rasterize_obstacles(
    size: GridSize,
    instances: &[ObstacleInstance],
    velocity: &mut [Vec2],
    occupancy: &mut [u32],
) {
    velocity.fill(Vec2::splat(OBSTACLE_SENTINEL));
    occupancy.fill(0);

    for inst in instances {
        for_each_texel(size, |x, y, i| {
            if inst.covers(size, x as u32, y as u32) {
                velocity[i] = Vec2::from_array(inst.velocity);
                occupancy[i] = 1;
            }
        });
    }
}

/// Classify texels as fluid, obstacle edge, or obstacle interior.
pub fn classify_edges(size: GridSize, occupancy: &[u32], dst: &mut [u32]) {
    for_each_texel(size, |x, y, i| {
        dst[i] = if occupancy[i] == 0 {
            CELL_FLUID
        } else if neighbors(size, occupancy, x, y).iter().all(|&n| n != 0) {
            CELL_INTERIOR
        } else {
            CELL_EDGE
        };
    });
}

/// Overwrite velocity at covered texels; leave the fluid untouched elsewhere.
pub fn enforce_boundary(
    size: GridSize,
    velocity: &[Vec2],
    obstacle_velocity: &[Vec2],
    occupancy: &[u32],
    edges: &[u32],
    policy: BoundaryPolicy,
    dst: &mut [Vec2],
) {
    for_each_texel(size, |_, _, i| {
        dst[i] = if occupancy[i] == 0 {
            velocity[i]
        } else if policy == BoundaryPolicy::EdgeDriven && edges[i] == CELL_INTERIOR {
            Vec2::ZERO
        } else {
            obstacle_velocity[i]
        };
    });
}

/// Additive force injection: `v += dt · force` at the splat's texel.
pub fn inject_splat(size: GridSize, velocity: &mut [Vec2], splat: &SplatInstance, dt: f32) {
    let x = splat.texel[0].floor() as i32;
    let y = splat.texel[1].floor() as i32;
    if x < 0 || y < 0 || x >= size.width as i32 || y >= size.height as i32 {
        return;
    }
    velocity[size.index(x as u32, y as u32)] += dt * Vec2::from_array(splat.force);
}

/// Display mapping: `(|vx|, |vy|, 0, 1) · scale`, clamped.
pub fn velocity_color(v: Vec2, scale: f32) -> [u8; 4] {
    let to_byte = |c: f32| ((c * scale).clamp(0.0, 1.0) * 255.0).round() as u8;
    [to_byte(v.x.abs()), to_byte(v.y.abs()), 0, 255]
}
