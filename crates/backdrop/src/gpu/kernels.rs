//! Pipelines and bind group layouts for the field kernels.
//!
//! Group 0 is always the per-frame [`SimParams`] uniform. Group 1 holds the
//! pass inputs. Fields are bound *loaded* (`textureLoad`, unfilterable) in
//! every pass except advection, which binds the same texture *sampled*
//! through a filtering layout with a linear repeat sampler.

use flowfield::{ObstacleInstance, SimParams, SplatInstance};

const COMMON_WGSL: &str = include_str!("shaders/common.wgsl");

fn shader_module(device: &wgpu::Device, label: &str, body: &str) -> wgpu::ShaderModule {
    let source = [COMMON_WGSL, body].concat();
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}

fn texture_entry(binding: u32, sample_type: wgpu::TextureSampleType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT | wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

const LOADED: wgpu::TextureSampleType = wgpu::TextureSampleType::Float { filterable: false };
const SAMPLED: wgpu::TextureSampleType = wgpu::TextureSampleType::Float { filterable: true };
const MASK: wgpu::TextureSampleType = wgpu::TextureSampleType::Uint;

fn layout(device: &wgpu::Device, label: &str, entries: &[wgpu::BindGroupLayoutEntry]) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries,
    })
}

struct PipelineSpec<'a> {
    label: &'a str,
    module: &'a wgpu::ShaderModule,
    vertex_entry: &'a str,
    fragment_entry: &'a str,
    vertex_buffers: &'a [wgpu::VertexBufferLayout<'a>],
    targets: &'a [Option<wgpu::ColorTargetState>],
}

fn render_pipeline(
    device: &wgpu::Device,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
    spec: PipelineSpec<'_>,
) -> wgpu::RenderPipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(spec.label),
        bind_group_layouts,
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(spec.label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: spec.module,
            entry_point: Some(spec.vertex_entry),
            buffers: spec.vertex_buffers,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: spec.module,
            entry_point: Some(spec.fragment_entry),
            targets: spec.targets,
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn target(format: wgpu::TextureFormat) -> Option<wgpu::ColorTargetState> {
    Some(wgpu::ColorTargetState {
        format,
        blend: None,
        write_mask: wgpu::ColorWrites::ALL,
    })
}

const ADDITIVE: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

const SPLAT_ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];
const OBSTACLE_ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x4, 1 => Float32x2];

pub struct Kernels {
    pub params_layout: wgpu::BindGroupLayout,
    pub load1_layout: wgpu::BindGroupLayout,
    pub load2_layout: wgpu::BindGroupLayout,
    pub sampled_layout: wgpu::BindGroupLayout,
    pub enforce_layout: wgpu::BindGroupLayout,
    pub classify_layout: wgpu::BindGroupLayout,
    pub display_layout: wgpu::BindGroupLayout,
    pub sampler: wgpu::Sampler,

    pub diffuse: wgpu::RenderPipeline,
    pub divergence: wgpu::RenderPipeline,
    pub pressure: wgpu::RenderPipeline,
    pub subtract: wgpu::RenderPipeline,
    pub advect: wgpu::RenderPipeline,
    pub enforce: wgpu::RenderPipeline,
    pub splat: wgpu::RenderPipeline,
    pub obstacles: wgpu::RenderPipeline,
    pub classify: wgpu::ComputePipeline,
    /// Present only when a display format was given.
    pub display: Option<wgpu::RenderPipeline>,
}

impl Kernels {
    pub fn new(device: &wgpu::Device, display_format: Option<wgpu::TextureFormat>) -> Self {
        let all_stages = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT | wgpu::ShaderStages::COMPUTE;
        let params_layout = layout(device, "Sim Params Layout", &[uniform_entry(0, all_stages)]);
        let load1_layout = layout(device, "Load1 Layout", &[texture_entry(0, LOADED)]);
        let load2_layout = layout(device, "Load2 Layout", &[texture_entry(0, LOADED), texture_entry(1, LOADED)]);
        let sampled_layout = layout(
            device,
            "Sampled Layout",
            &[
                texture_entry(0, SAMPLED),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        );
        let enforce_layout = layout(
            device,
            "Enforce Layout",
            &[
                texture_entry(0, LOADED),
                texture_entry(1, LOADED),
                texture_entry(2, MASK),
                texture_entry(3, MASK),
            ],
        );
        let classify_layout = layout(
            device,
            "Classify Layout",
            &[
                texture_entry(0, MASK),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::R32Uint,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        );
        let display_layout = layout(
            device,
            "Display Layout",
            &[texture_entry(0, LOADED), uniform_entry(1, wgpu::ShaderStages::FRAGMENT)],
        );

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Advect Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let scalar = wgpu::TextureFormat::R32Float;
        let vector = wgpu::TextureFormat::Rg32Float;
        let mask = wgpu::TextureFormat::R32Uint;

        let fullscreen = |label: &str, wgsl: &str, entry: &str, inputs: &wgpu::BindGroupLayout, out| {
            let module = shader_module(device, label, wgsl);
            render_pipeline(
                device,
                &[&params_layout, inputs],
                PipelineSpec {
                    label,
                    module: &module,
                    vertex_entry: "vs_fullscreen",
                    fragment_entry: entry,
                    vertex_buffers: &[],
                    targets: &[target(out)],
                },
            )
        };

        let diffuse = fullscreen(
            "Diffuse Pipeline",
            include_str!("shaders/diffuse.wgsl"),
            "fs_diffuse",
            &load1_layout,
            vector,
        );
        let divergence = fullscreen(
            "Divergence Pipeline",
            include_str!("shaders/divergence.wgsl"),
            "fs_divergence",
            &load1_layout,
            scalar,
        );
        let pressure = fullscreen(
            "Pressure Pipeline",
            include_str!("shaders/pressure.wgsl"),
            "fs_pressure",
            &load2_layout,
            scalar,
        );
        let subtract = fullscreen(
            "Subtract Gradient Pipeline",
            include_str!("shaders/subtract.wgsl"),
            "fs_subtract",
            &load2_layout,
            vector,
        );
        let advect = fullscreen(
            "Advect Pipeline",
            include_str!("shaders/advect.wgsl"),
            "fs_advect",
            &sampled_layout,
            vector,
        );
        let enforce = fullscreen(
            "Enforce Boundary Pipeline",
            include_str!("shaders/enforce.wgsl"),
            "fs_enforce",
            &enforce_layout,
            vector,
        );
        let display = display_format.map(|format| {
            fullscreen(
                "Display Pipeline",
                include_str!("shaders/display.wgsl"),
                "fs_display",
                &display_layout,
                format,
            )
        });

        let splat_module = shader_module(device, "Splat Shader", include_str!("shaders/splat.wgsl"));
        let splat = render_pipeline(
            device,
            &[&params_layout],
            PipelineSpec {
                label: "Splat Pipeline",
                module: &splat_module,
                vertex_entry: "vs_splat",
                fragment_entry: "fs_splat",
                vertex_buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<SplatInstance>() as u64,
                    step_mode: wgpu::VertexStepMode::Instance,
                    attributes: &SPLAT_ATTRIBUTES,
                }],
                targets: &[Some(wgpu::ColorTargetState {
                    format: vector,
                    blend: Some(ADDITIVE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            },
        );

        let obstacle_module = shader_module(device, "Obstacle Shader", include_str!("shaders/obstacles.wgsl"));
        let obstacles = render_pipeline(
            device,
            &[&params_layout],
            PipelineSpec {
                label: "Obstacle Pipeline",
                module: &obstacle_module,
                vertex_entry: "vs_obstacle",
                fragment_entry: "fs_obstacle",
                vertex_buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<ObstacleInstance>() as u64,
                    step_mode: wgpu::VertexStepMode::Instance,
                    attributes: &OBSTACLE_ATTRIBUTES,
                }],
                targets: &[target(vector), target(mask)],
            },
        );

        let classify_module = shader_module(device, "Classify Edges Shader", include_str!("shaders/classify_edges.wgsl"));
        let classify_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Classify Edges Pipeline Layout"),
            bind_group_layouts: &[&params_layout, &classify_layout],
            push_constant_ranges: &[],
        });
        let classify = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Classify Edges Pipeline"),
            layout: Some(&classify_pipeline_layout),
            module: &classify_module,
            entry_point: Some("cs_classify"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            params_layout,
            load1_layout,
            load2_layout,
            sampled_layout,
            enforce_layout,
            classify_layout,
            display_layout,
            sampler,
            diffuse,
            divergence,
            pressure,
            subtract,
            advect,
            enforce,
            splat,
            obstacles,
            classify,
            display,
        }
    }
}

/// Size of the [`SimParams`] uniform buffer.
pub const SIM_PARAMS_SIZE: u64 = std::mem::size_of::<SimParams>() as u64;
