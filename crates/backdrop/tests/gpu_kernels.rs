//! GPU kernels against the CPU reference backend.
//!
//! Every test creates a headless device and prints SKIP when no adapter (or
//! no adapter with the required capabilities) is available.
//!
//! Covers:
//! - Diffusion, divergence, pressure and gradient subtraction (within 1e-4)
//! - Advection by whole-texel displacements
//! - Obstacle rasterization, edge classification, boundary enforcement
//! - Additive force injection and vector clears
//! - Aliased bindings and full solver frames on the GPU
//! - Display targets left over by skipped frames

use backdrop::gpu::{headless_device, readback};
use backdrop::{GpuBackend, GpuField};
use flowfield::glam::Vec2;
use flowfield::{
    BoundaryPolicy, ClearValue, CpuBackend, CpuField, FieldAllocator, FieldBackend, FieldError, FieldFormat,
    FieldStats, FrameInput, FrameOutcome, GridSize, ObstacleInstance, ObstacleRect, PointerInput, SimParams, Solver, SolverConfig,
    SplatInstance,
};

const DT: f32 = 1.0 / 60.0;
const TOLERANCE: f32 = 1e-4;

fn init_gpu() -> Option<GpuBackend> {
    match headless_device() {
        Ok((device, queue)) => Some(GpuBackend::new(device, queue, None)),
        Err(e) => {
            println!("SKIP: {e}");
            None
        }
    }
}

fn swirl(size: GridSize) -> Vec<Vec2> {
    let mut data = Vec::with_capacity(size.texel_count());
    for y in 0..size.height {
        for x in 0..size.width {
            let (fx, fy) = (x as f32, y as f32);
            data.push(Vec2::new((0.7 * fx + 0.3 * fy).sin(), (0.4 * fx - 0.9 * fy).cos()) * 3.0);
        }
    }
    data
}

fn ripple(size: GridSize) -> Vec<f32> {
    (0..size.texel_count()).map(|i| ((i as f32) * 0.37).sin()).collect()
}

fn begin_both(gpu: &mut GpuBackend, cpu: &mut CpuBackend, size: GridSize, dt: f32, config: &SolverConfig) {
    let params = SimParams::new(size, dt, config);
    gpu.begin_frame(size).unwrap();
    gpu.set_params(&params).unwrap();
    cpu.begin_frame(size).unwrap();
    cpu.set_params(&params).unwrap();
}

fn vector_pair(gpu: &mut GpuBackend, cpu: &mut CpuBackend, size: GridSize, data: &[Vec2]) -> (GpuField, CpuField) {
    let g = gpu.allocate(FieldFormat::Vector, size);
    assert!(readback::write_field(gpu.queue(), &g, data));
    let c = cpu.allocate(FieldFormat::Vector, size);
    assert!(c.write_vector(data));
    (g, c)
}

fn scalar_pair(gpu: &mut GpuBackend, cpu: &mut CpuBackend, size: GridSize, data: &[f32]) -> (GpuField, CpuField) {
    let g = gpu.allocate(FieldFormat::Scalar, size);
    assert!(readback::write_field(gpu.queue(), &g, data));
    let c = cpu.allocate(FieldFormat::Scalar, size);
    assert!(c.write_scalar(data));
    (g, c)
}

fn read_vector(gpu: &GpuBackend, field: &GpuField) -> Vec<Vec2> {
    readback::read_vector_field(gpu.device(), gpu.queue(), field).unwrap()
}

fn read_scalar(gpu: &GpuBackend, field: &GpuField) -> Vec<f32> {
    readback::read_scalar_field(gpu.device(), gpu.queue(), field).unwrap()
}

fn read_mask(gpu: &GpuBackend, field: &GpuField) -> Vec<u32> {
    readback::read_mask_field(gpu.device(), gpu.queue(), field).unwrap()
}

fn assert_vectors_close(label: &str, gpu: &[Vec2], cpu: &[Vec2], tolerance: f32) {
    assert_eq!(gpu.len(), cpu.len());
    let worst = gpu
        .iter()
        .zip(cpu)
        .map(|(a, b)| (*a - *b).abs().max_element())
        .fold(0.0_f32, f32::max);
    println!("{label}: max |gpu - cpu| = {worst:e}");
    assert!(worst <= tolerance, "{label}: max deviation {worst} exceeds {tolerance}");
}

fn assert_scalars_close(label: &str, gpu: &[f32], cpu: &[f32]) {
    assert_eq!(gpu.len(), cpu.len());
    let worst = gpu.iter().zip(cpu).map(|(a, b)| (a - b).abs()).fold(0.0_f32, f32::max);
    println!("{label}: max |gpu - cpu| = {worst:e}");
    assert!(worst <= TOLERANCE, "{label}: max deviation {worst} exceeds {TOLERANCE}");
}

#[test]
fn test_diffuse_matches_reference() {
    let Some(mut gpu) = init_gpu() else { return };
    let mut cpu = CpuBackend::new();
    let size = GridSize::new(20, 12);
    let config = SolverConfig {
        viscosity: 3.0,
        over_relaxation: 1.3,
        ..Default::default()
    };

    begin_both(&mut gpu, &mut cpu, size, DT, &config);
    let (g_src, c_src) = vector_pair(&mut gpu, &mut cpu, size, &swirl(size));
    let g_dst = gpu.allocate(FieldFormat::Vector, size);
    let c_dst = cpu.allocate(FieldFormat::Vector, size);
    gpu.diffuse(&g_src, &g_dst).unwrap();
    cpu.diffuse(&c_src, &c_dst).unwrap();
    gpu.end_frame();

    assert_vectors_close("diffuse", &read_vector(&gpu, &g_dst), &c_dst.read_vector().unwrap(), TOLERANCE);
}

#[test]
fn test_projection_kernels_match_reference() {
    let Some(mut gpu) = init_gpu() else { return };
    let mut cpu = CpuBackend::new();
    let size = GridSize::new(20, 12);
    let config = SolverConfig::default();

    begin_both(&mut gpu, &mut cpu, size, DT, &config);
    let (g_v, c_v) = vector_pair(&mut gpu, &mut cpu, size, &swirl(size));
    let (g_p, c_p) = scalar_pair(&mut gpu, &mut cpu, size, &ripple(size));

    let g_div = gpu.allocate(FieldFormat::Scalar, size);
    let c_div = cpu.allocate(FieldFormat::Scalar, size);
    gpu.divergence(&g_v, &g_div).unwrap();
    cpu.divergence(&c_v, &c_div).unwrap();

    let g_next = gpu.allocate(FieldFormat::Scalar, size);
    let c_next = cpu.allocate(FieldFormat::Scalar, size);
    gpu.pressure_step(&g_p, &g_div, &g_next).unwrap();
    cpu.pressure_step(&c_p, &c_div, &c_next).unwrap();

    let g_out = gpu.allocate(FieldFormat::Vector, size);
    let c_out = cpu.allocate(FieldFormat::Vector, size);
    gpu.subtract_gradient(&g_v, &g_next, &g_out).unwrap();
    cpu.subtract_gradient(&c_v, &c_next, &c_out).unwrap();
    gpu.end_frame();

    assert_scalars_close("divergence", &read_scalar(&gpu, &g_div), &c_div.read_scalar().unwrap());
    assert_scalars_close("pressure", &read_scalar(&gpu, &g_next), &c_next.read_scalar().unwrap());
    assert_vectors_close(
        "subtract_gradient",
        &read_vector(&gpu, &g_out),
        &c_out.read_vector().unwrap(),
        TOLERANCE,
    );
}

#[test]
fn test_advect_whole_texel_shift() {
    let Some(mut gpu) = init_gpu() else { return };
    let mut cpu = CpuBackend::new();
    // Power-of-two sides keep texel centers exact in normalized coordinates.
    let size = GridSize::new(32, 16);
    let dt = 0.5;
    let config = SolverConfig::default();

    // Every texel moves one texel in +x; every other texel also one in +y,
    // so all departure points land on texel centers.
    let mut data = Vec::with_capacity(size.texel_count());
    for y in 0..size.height {
        for x in 0..size.width {
            data.push(Vec2::new(2.0, if (x + 2 * y) % 3 == 0 { 2.0 } else { 0.0 }));
        }
    }

    begin_both(&mut gpu, &mut cpu, size, dt, &config);
    let (g_src, c_src) = vector_pair(&mut gpu, &mut cpu, size, &data);
    let g_dst = gpu.allocate(FieldFormat::Vector, size);
    let c_dst = cpu.allocate(FieldFormat::Vector, size);
    gpu.advect(&g_src, &g_dst).unwrap();
    cpu.advect(&c_src, &c_dst).unwrap();
    gpu.end_frame();

    let gpu_out = read_vector(&gpu, &g_dst);
    let cpu_out = c_dst.read_vector().unwrap();
    assert_vectors_close("advect", &gpu_out, &cpu_out, TOLERANCE);

    // Spot check against the departure texel directly.
    let (x, y) = (5u32, 3u32);
    let shift_y = if (x + 2 * y) % 3 == 0 { 1 } else { 0 };
    let expected = data[size.wrap_index(x as i32 - 1, y as i32 - shift_y)];
    assert!((gpu_out[size.index(x, y)] - expected).abs().max_element() <= TOLERANCE);
}

#[test]
fn test_obstacle_passes_match_reference() {
    let Some(mut gpu) = init_gpu() else { return };
    let mut cpu = CpuBackend::new();
    let size = GridSize::new(20, 12);
    let w = size.width as f32;
    let h = size.height as f32;

    // Rectangle edges on texel boundaries; the second overlaps the first.
    let instances = [
        ObstacleInstance::new([4.0 / w, 2.0 / h, 6.0 / w, 5.0 / h], [5.0, -1.0]),
        ObstacleInstance::new([8.0 / w, 4.0 / h, 5.0 / w, 6.0 / h], [-2.0, 3.0]),
    ];

    for policy in [BoundaryPolicy::Overwrite, BoundaryPolicy::EdgeDriven] {
        let config = SolverConfig {
            boundary_policy: policy,
            ..Default::default()
        };
        begin_both(&mut gpu, &mut cpu, size, DT, &config);

        let g_obs = gpu.allocate(FieldFormat::Vector, size);
        let g_occ = gpu.allocate(FieldFormat::Mask, size);
        let g_edges = gpu.allocate(FieldFormat::Mask, size);
        let c_obs = cpu.allocate(FieldFormat::Vector, size);
        let c_occ = cpu.allocate(FieldFormat::Mask, size);
        let c_edges = cpu.allocate(FieldFormat::Mask, size);
        gpu.rasterize_obstacles(&instances, &g_obs, &g_occ).unwrap();
        cpu.rasterize_obstacles(&instances, &c_obs, &c_occ).unwrap();
        gpu.classify_edges(&g_occ, &g_edges).unwrap();
        cpu.classify_edges(&c_occ, &c_edges).unwrap();

        let (g_v, c_v) = vector_pair(&mut gpu, &mut cpu, size, &swirl(size));
        let g_out = gpu.allocate(FieldFormat::Vector, size);
        let c_out = cpu.allocate(FieldFormat::Vector, size);
        gpu.enforce_boundary(&g_v, &g_obs, &g_occ, &g_edges, &g_out).unwrap();
        cpu.enforce_boundary(&c_v, &c_obs, &c_occ, &c_edges, &c_out).unwrap();
        gpu.end_frame();

        assert_eq!(read_mask(&gpu, &g_occ), c_occ.read_mask().unwrap(), "occupancy ({policy:?})");
        assert_eq!(read_mask(&gpu, &g_edges), c_edges.read_mask().unwrap(), "edges ({policy:?})");
        assert_eq!(read_vector(&gpu, &g_obs), c_obs.read_vector().unwrap(), "obstacle velocity ({policy:?})");
        assert_eq!(read_vector(&gpu, &g_out), c_out.read_vector().unwrap(), "enforced ({policy:?})");
    }
}

#[test]
fn test_rasterize_without_obstacles_clears() {
    let Some(mut gpu) = init_gpu() else { return };
    let size = GridSize::new(9, 7);
    gpu.begin_frame(size).unwrap();
    gpu.set_params(&SimParams::new(size, DT, &SolverConfig::default())).unwrap();

    let obs = gpu.allocate(FieldFormat::Vector, size);
    let occ = gpu.allocate(FieldFormat::Mask, size);
    gpu.rasterize_obstacles(&[], &obs, &occ).unwrap();
    gpu.end_frame();

    assert!(read_mask(&gpu, &occ).iter().all(|&m| m == 0));
    assert!(read_vector(&gpu, &obs)
        .iter()
        .all(|&v| v == Vec2::splat(flowfield::OBSTACLE_SENTINEL)));
}

#[test]
fn test_obstacle_buffer_grows() {
    let Some(mut gpu) = init_gpu() else { return };
    let size = GridSize::new(16, 16);
    let initial = gpu.obstacle_capacity();
    let instances: Vec<ObstacleInstance> = (0..initial + 5)
        .map(|i| ObstacleInstance::new([(i % 16) as f32 / 16.0, 0.0, 1.0 / 16.0, 1.0 / 16.0], [1.0, 0.0]))
        .collect();

    gpu.begin_frame(size).unwrap();
    gpu.set_params(&SimParams::new(size, DT, &SolverConfig::default())).unwrap();
    let obs = gpu.allocate(FieldFormat::Vector, size);
    let occ = gpu.allocate(FieldFormat::Mask, size);
    gpu.rasterize_obstacles(&instances, &obs, &occ).unwrap();
    gpu.end_frame();

    assert!(gpu.obstacle_capacity() >= instances.len());
    let occupancy = read_mask(&gpu, &occ);
    assert_eq!(occupancy[..16].iter().filter(|&&m| m == 1).count(), 16);
}

#[test]
fn test_inject_forces_is_additive() {
    let Some(mut gpu) = init_gpu() else { return };
    let mut cpu = CpuBackend::new();
    let size = GridSize::new(20, 12);
    let config = SolverConfig::default();

    let splats = [
        SplatInstance {
            texel: [3.4, 5.7],
            force: [600.0, -300.0],
        },
        SplatInstance {
            texel: [3.9, 5.1],
            force: [60.0, 60.0],
        },
        SplatInstance {
            texel: [19.5, 0.0],
            force: [-120.0, 0.0],
        },
    ];

    begin_both(&mut gpu, &mut cpu, size, DT, &config);
    let (g_v, c_v) = vector_pair(&mut gpu, &mut cpu, size, &swirl(size));
    gpu.inject_forces(&g_v, &splats).unwrap();
    cpu.inject_forces(&c_v, &splats).unwrap();
    gpu.end_frame();

    let gpu_out = read_vector(&gpu, &g_v);
    assert_vectors_close("inject_forces", &gpu_out, &c_v.read_vector().unwrap(), TOLERANCE);

    let i = size.index(3, 5);
    let expected = swirl(size)[i] + DT * Vec2::new(660.0, -240.0);
    assert!((gpu_out[i] - expected).abs().max_element() <= TOLERANCE);
}

#[test]
fn test_clear_vector_value() {
    let Some(mut gpu) = init_gpu() else { return };
    let size = GridSize::new(5, 3);
    gpu.begin_frame(size).unwrap();
    let v = gpu.allocate(FieldFormat::Vector, size);
    let p = gpu.allocate(FieldFormat::Scalar, size);
    gpu.clear(&v, ClearValue::Vector([1.5, -2.0])).unwrap();
    assert!(matches!(
        gpu.clear(&p, ClearValue::Vector([1.0, 1.0])),
        Err(FieldError::FormatMismatch { .. })
    ));
    gpu.end_frame();

    assert!(read_vector(&gpu, &v).iter().all(|&x| x == Vec2::new(1.5, -2.0)));
}

#[test]
fn test_gpu_rejects_aliased_and_mismatched_bindings() {
    let Some(mut gpu) = init_gpu() else { return };
    let size = GridSize::new(8, 8);
    gpu.begin_frame(size).unwrap();
    gpu.set_params(&SimParams::new(size, DT, &SolverConfig::default())).unwrap();

    let v = gpu.allocate(FieldFormat::Vector, size);
    let p = gpu.allocate(FieldFormat::Scalar, size);
    let small = gpu.allocate(FieldFormat::Vector, GridSize::new(4, 4));

    assert!(matches!(gpu.diffuse(&v, &v), Err(FieldError::Aliased { .. })));
    assert!(matches!(gpu.pressure_step(&p, &p, &p), Err(FieldError::Aliased { .. })));
    assert!(matches!(gpu.advect(&v, &p), Err(FieldError::FormatMismatch { .. })));
    assert!(matches!(gpu.advect(&v, &small), Err(FieldError::SizeMismatch { .. })));
    assert!(matches!(
        gpu.set_params(&SimParams::new(GridSize::new(4, 4), DT, &SolverConfig::default())),
        Err(FieldError::SizeMismatch { .. })
    ));
    gpu.end_frame();
}

#[test]
fn test_readback_rejects_wrong_length_upload() {
    let Some(mut gpu) = init_gpu() else { return };
    let size = GridSize::new(4, 4);
    let v = gpu.allocate(FieldFormat::Vector, size);
    assert!(!readback::write_field(gpu.queue(), &v, &[Vec2::ZERO; 3]));
    assert!(!readback::write_field(gpu.queue(), &v, &[0.0_f32; 16]));
}

#[test]
fn test_solver_frames_on_gpu() {
    let Some(mut gpu) = init_gpu() else { return };
    let mut solver: Solver<GpuField> = Solver::new(SolverConfig::default());
    solver.resize(160, 96);

    for i in 0..6 {
        let cards = vec![ObstacleRect {
            id: "card".into(),
            left: 40.0 + 4.0 * i as f32,
            top: 20.0,
            width: 50.0,
            height: 30.0,
        }];
        let input = FrameInput {
            dt: DT,
            obstacles: &cards,
            pointer: PointerInput {
                down: true,
                position: Vec2::new(0.2 + 0.02 * i as f32, 0.7),
            },
        };
        solver.frame(&mut gpu, &input).unwrap();
    }

    let size = solver.grid_size();
    let velocity = solver.velocity().unwrap();
    let data = read_vector(&gpu, velocity);
    let stats = FieldStats::from_velocity(size, &data);
    stats.log("gpu solver");

    assert_eq!(stats.non_finite, 0);
    assert!(stats.energy > 0.0, "pointer and moving card should stir the fluid");
    assert_eq!(solver.pool_stats().outstanding, 2);
    solver.shutdown().unwrap();
}

#[test]
fn test_skipped_frame_leaves_display_target_to_clear() {
    let Some(mut gpu) = init_gpu() else { return };
    let target = gpu.device().create_texture(&wgpu::TextureDescriptor {
        label: Some("Test Display Target"),
        size: wgpu::Extent3d {
            width: 32,
            height: 16,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = || target.create_view(&wgpu::TextureViewDescriptor::default());
    let input = FrameInput { dt: DT, ..Default::default() };

    let mut solver: Solver<GpuField> = Solver::new(SolverConfig::default());
    gpu.set_display_target(view(), 32, 16);
    assert_eq!(solver.frame(&mut gpu, &input).unwrap(), FrameOutcome::Skipped);
    assert!(gpu.clear_display_target(), "skipped frame should leave the target pending");
    assert!(!gpu.clear_display_target());

    solver.resize(64, 32);
    gpu.set_display_target(view(), 32, 16);
    solver.frame(&mut gpu, &input).unwrap();
    assert!(!gpu.clear_display_target(), "display stage should consume the target");
    solver.shutdown().unwrap();
}
