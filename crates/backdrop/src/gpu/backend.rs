//! wgpu implementation of [`FieldBackend`].
//!
//! All passes of a frame are recorded into one command encoder, opened by
//! `begin_frame` and submitted by `end_frame`. Fields are textures; every
//! full-screen kernel is a render pass that draws a 4-vertex strip into a
//! fresh output field.

use std::sync::Arc;

use flowfield::backend::{ClearValue, FieldBackend};
use flowfield::field::expect_field;
use flowfield::{
    DisplayParams, FieldAllocator, FieldError, FieldFormat, FieldResource, GridSize, ObstacleInstance, SimParams,
    SplatInstance,
    OBSTACLE_SENTINEL,
};

use super::field::GpuField;
use super::kernels::{Kernels, SIM_PARAMS_SIZE};

const INITIAL_OBSTACLE_CAPACITY: usize = 64;
const INITIAL_SPLAT_CAPACITY: usize = 16;

/// Instance buffer that doubles when an upload does not fit.
struct InstanceBuffer {
    label: &'static str,
    buffer: wgpu::Buffer,
    capacity: usize,
    stride: usize,
}

impl InstanceBuffer {
    fn new(device: &wgpu::Device, label: &'static str, stride: usize, capacity: usize) -> Self {
        Self {
            label,
            buffer: Self::create(device, label, stride, capacity),
            capacity,
            stride,
        }
    }

    fn create(device: &wgpu::Device, label: &str, stride: usize, capacity: usize) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (stride * capacity) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, bytes: &[u8]) {
        let count = bytes.len() / self.stride;
        if count > self.capacity {
            let mut capacity = self.capacity.max(1);
            while capacity < count {
                capacity *= 2;
            }
            log::warn!(
                "{}: {} instances exceed capacity {}, growing to {}",
                self.label,
                count,
                self.capacity,
                capacity
            );
            self.buffer = Self::create(device, self.label, self.stride, capacity);
            self.capacity = capacity;
        }
        if !bytes.is_empty() {
            queue.write_buffer(&self.buffer, 0, bytes);
        }
    }

    fn slice(&self, count: usize) -> wgpu::BufferSlice<'_> {
        self.buffer.slice(..(count * self.stride) as u64)
    }
}

struct DisplayTarget {
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

pub struct GpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    kernels: Kernels,

    params_buffer: wgpu::Buffer,
    params_bind_group: wgpu::BindGroup,
    display_buffer: wgpu::Buffer,
    obstacle_instances: InstanceBuffer,
    splat_instances: InstanceBuffer,

    encoder: Option<wgpu::CommandEncoder>,
    size: GridSize,
    display_target: Option<DisplayTarget>,
    allocations: usize,
}

impl GpuBackend {
    /// `display_format` is the format of the presentation target; `None`
    /// disables the display pass.
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        display_format: Option<wgpu::TextureFormat>,
    ) -> Self {
        let kernels = Kernels::new(&device, display_format);

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Sim Params"),
            size: SIM_PARAMS_SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Sim Params Bind Group"),
            layout: &kernels.params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            }],
        });
        let display_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Display Params"),
            size: std::mem::size_of::<DisplayParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let obstacle_instances = InstanceBuffer::new(
            &device,
            "Obstacle Instances",
            std::mem::size_of::<ObstacleInstance>(),
            INITIAL_OBSTACLE_CAPACITY,
        );
        let splat_instances = InstanceBuffer::new(
            &device,
            "Splat Instances",
            std::mem::size_of::<SplatInstance>(),
            INITIAL_SPLAT_CAPACITY,
        );

        Self {
            device,
            queue,
            kernels,
            params_buffer,
            params_bind_group,
            display_buffer,
            obstacle_instances,
            splat_instances,
            encoder: None,
            size: GridSize::new(0, 0),
            display_target: None,
            allocations: 0,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Number of textures this backend has created.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    pub fn obstacle_capacity(&self) -> usize {
        self.obstacle_instances.capacity
    }

    /// Where the next `display` pass draws. Consumed by that pass.
    pub fn set_display_target(&mut self, view: wgpu::TextureView, width: u32, height: u32) {
        self.display_target = Some(DisplayTarget { view, width, height });
    }

    /// Drop a target no `display` pass consumed. Returns whether one was pending.
    pub fn clear_display_target(&mut self) -> bool {
        self.display_target.take().is_some()
    }

    fn validate(&self, kernel: &'static str, fields: &[(&GpuField, FieldFormat)]) -> Result<(), FieldError> {
        for (field, format) in fields {
            expect_field(kernel, *field, *format, self.size)?;
        }
        Ok(())
    }
}

/// Reject a pass whose output is also one of its inputs.
fn distinct(kernel: &'static str, reads: &[&GpuField], write: &GpuField) -> Result<(), FieldError> {
    if reads.iter().any(|r| r.id() == write.id()) {
        return Err(FieldError::Aliased { kernel });
    }
    Ok(())
}

fn new_encoder(device: &wgpu::Device) -> wgpu::CommandEncoder {
    device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Backdrop Frame Encoder"),
    })
}

fn bind_views(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    fields: &[&GpuField],
) -> wgpu::BindGroup {
    let entries: Vec<wgpu::BindGroupEntry> = fields
        .iter()
        .enumerate()
        .map(|(i, field)| wgpu::BindGroupEntry {
            binding: i as u32,
            resource: wgpu::BindingResource::TextureView(&field.view),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    })
}

fn color_attachment(view: &wgpu::TextureView, load: wgpu::LoadOp<wgpu::Color>) -> Option<wgpu::RenderPassColorAttachment<'_>> {
    Some(wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load,
            store: wgpu::StoreOp::Store,
        },
    })
}

fn fullscreen_pass(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::RenderPipeline,
    params: &wgpu::BindGroup,
    inputs: &wgpu::BindGroup,
    output: &wgpu::TextureView,
) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[color_attachment(output, wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT))],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, params, &[]);
    pass.set_bind_group(1, inputs, &[]);
    pass.draw(0..4, 0..1);
}

impl FieldAllocator for GpuBackend {
    type Field = GpuField;

    fn allocate(&mut self, format: FieldFormat, size: GridSize) -> GpuField {
        self.allocations += 1;
        log::trace!("creating {} texture {}", format.label(), size);
        GpuField::new(&self.device, format, size)
    }
}

impl FieldBackend for GpuBackend {
    fn begin_frame(&mut self, size: GridSize) -> Result<(), FieldError> {
        self.size = size;
        if self.encoder.is_none() {
            self.encoder = Some(new_encoder(&self.device));
        }
        Ok(())
    }

    fn set_params(&mut self, params: &SimParams) -> Result<(), FieldError> {
        if params.size() != self.size {
            return Err(FieldError::SizeMismatch {
                kernel: "set_params",
                expected: self.size,
                found: params.size(),
            });
        }
        self.queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(params));
        Ok(())
    }

    fn clear(&mut self, dst: &GpuField, value: ClearValue) -> Result<(), FieldError> {
        let color = match (dst.format(), value) {
            (_, ClearValue::Zero) => wgpu::Color::TRANSPARENT,
            (FieldFormat::Vector, ClearValue::Vector([x, y])) => wgpu::Color {
                r: x as f64,
                g: y as f64,
                b: 0.0,
                a: 0.0,
            },
            (found, ClearValue::Vector(_)) => {
                return Err(FieldError::FormatMismatch {
                    kernel: "clear",
                    expected: FieldFormat::Vector,
                    found,
                })
            }
        };

        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| new_encoder(device));
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Pass"),
            color_attachments: &[color_attachment(&dst.view, wgpu::LoadOp::Clear(color))],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        Ok(())
    }

    fn inject_forces(&mut self, velocity: &GpuField, splats: &[SplatInstance]) -> Result<(), FieldError> {
        self.validate("inject_forces", &[(velocity, FieldFormat::Vector)])?;
        if splats.is_empty() {
            return Ok(());
        }
        self.splat_instances
            .upload(&self.device, &self.queue, bytemuck::cast_slice(splats));

        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| new_encoder(device));
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Inject Forces Pass"),
            color_attachments: &[color_attachment(&velocity.view, wgpu::LoadOp::Load)],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.kernels.splat);
        pass.set_bind_group(0, &self.params_bind_group, &[]);
        pass.set_vertex_buffer(0, self.splat_instances.slice(splats.len()));
        pass.draw(0..4, 0..splats.len() as u32);
        Ok(())
    }

    fn diffuse(&mut self, src: &GpuField, dst: &GpuField) -> Result<(), FieldError> {
        const KERNEL: &str = "diffuse";
        self.validate(KERNEL, &[(src, FieldFormat::Vector), (dst, FieldFormat::Vector)])?;
        distinct(KERNEL, &[src], dst)?;

        let inputs = bind_views(&self.device, "Diffuse Inputs", &self.kernels.load1_layout, &[src]);
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| new_encoder(device));
        fullscreen_pass(encoder, "Diffuse Pass", &self.kernels.diffuse, &self.params_bind_group, &inputs, &dst.view);
        Ok(())
    }

    fn divergence(&mut self, velocity: &GpuField, dst: &GpuField) -> Result<(), FieldError> {
        const KERNEL: &str = "divergence";
        self.validate(KERNEL, &[(velocity, FieldFormat::Vector), (dst, FieldFormat::Scalar)])?;
        distinct(KERNEL, &[velocity], dst)?;

        let inputs = bind_views(&self.device, "Divergence Inputs", &self.kernels.load1_layout, &[velocity]);
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| new_encoder(device));
        fullscreen_pass(
            encoder,
            "Divergence Pass",
            &self.kernels.divergence,
            &self.params_bind_group,
            &inputs,
            &dst.view,
        );
        Ok(())
    }

    fn pressure_step(&mut self, pressure: &GpuField, divergence: &GpuField, dst: &GpuField) -> Result<(), FieldError> {
        const KERNEL: &str = "pressure";
        self.validate(
            KERNEL,
            &[
                (pressure, FieldFormat::Scalar),
                (divergence, FieldFormat::Scalar),
                (dst, FieldFormat::Scalar),
            ],
        )?;
        distinct(KERNEL, &[pressure, divergence], dst)?;

        let inputs = bind_views(
            &self.device,
            "Pressure Inputs",
            &self.kernels.load2_layout,
            &[pressure, divergence],
        );
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| new_encoder(device));
        fullscreen_pass(encoder, "Pressure Pass", &self.kernels.pressure, &self.params_bind_group, &inputs, &dst.view);
        Ok(())
    }

    fn subtract_gradient(&mut self, velocity: &GpuField, pressure: &GpuField, dst: &GpuField) -> Result<(), FieldError> {
        const KERNEL: &str = "subtract_gradient";
        self.validate(
            KERNEL,
            &[
                (velocity, FieldFormat::Vector),
                (pressure, FieldFormat::Scalar),
                (dst, FieldFormat::Vector),
            ],
        )?;
        distinct(KERNEL, &[velocity, pressure], dst)?;

        let inputs = bind_views(
            &self.device,
            "Subtract Gradient Inputs",
            &self.kernels.load2_layout,
            &[velocity, pressure],
        );
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| new_encoder(device));
        fullscreen_pass(
            encoder,
            "Subtract Gradient Pass",
            &self.kernels.subtract,
            &self.params_bind_group,
            &inputs,
            &dst.view,
        );
        Ok(())
    }

    fn advect(&mut self, velocity: &GpuField, dst: &GpuField) -> Result<(), FieldError> {
        const KERNEL: &str = "advect";
        self.validate(KERNEL, &[(velocity, FieldFormat::Vector), (dst, FieldFormat::Vector)])?;
        distinct(KERNEL, &[velocity], dst)?;

        let inputs = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Advect Inputs"),
            layout: &self.kernels.sampled_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&velocity.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.kernels.sampler),
                },
            ],
        });
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| new_encoder(device));
        fullscreen_pass(encoder, "Advect Pass", &self.kernels.advect, &self.params_bind_group, &inputs, &dst.view);
        Ok(())
    }

    fn rasterize_obstacles(
        &mut self,
        instances: &[ObstacleInstance],
        velocity_dst: &GpuField,
        occupancy_dst: &GpuField,
    ) -> Result<(), FieldError> {
        const KERNEL: &str = "rasterize_obstacles";
        self.validate(
            KERNEL,
            &[(velocity_dst, FieldFormat::Vector), (occupancy_dst, FieldFormat::Mask)],
        )?;

        self.obstacle_instances
            .upload(&self.device, &self.queue, bytemuck::cast_slice(instances));

        let sentinel = OBSTACLE_SENTINEL as f64;
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| new_encoder(device));
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Rasterize Obstacles Pass"),
            color_attachments: &[
                color_attachment(
                    &velocity_dst.view,
                    wgpu::LoadOp::Clear(wgpu::Color {
                        r: sentinel,
                        g: sentinel,
                        b: 0.0,
                        a: 0.0,
                    }),
                ),
                color_attachment(&occupancy_dst.view, wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)),
            ],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        if !instances.is_empty() {
            pass.set_pipeline(&self.kernels.obstacles);
            pass.set_bind_group(0, &self.params_bind_group, &[]);
            pass.set_vertex_buffer(0, self.obstacle_instances.slice(instances.len()));
            pass.draw(0..4, 0..instances.len() as u32);
        }
        Ok(())
    }

    fn classify_edges(&mut self, occupancy: &GpuField, dst: &GpuField) -> Result<(), FieldError> {
        const KERNEL: &str = "classify_edges";
        self.validate(KERNEL, &[(occupancy, FieldFormat::Mask), (dst, FieldFormat::Mask)])?;
        distinct(KERNEL, &[occupancy], dst)?;

        let inputs = bind_views(
            &self.device,
            "Classify Edges Inputs",
            &self.kernels.classify_layout,
            &[occupancy, dst],
        );
        let (width, height) = (self.size.width, self.size.height);
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| new_encoder(device));
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Classify Edges Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.kernels.classify);
        pass.set_bind_group(0, &self.params_bind_group, &[]);
        pass.set_bind_group(1, &inputs, &[]);
        pass.dispatch_workgroups((width + 7) / 8, (height + 7) / 8, 1);
        Ok(())
    }

    fn enforce_boundary(
        &mut self,
        velocity: &GpuField,
        obstacle_velocity: &GpuField,
        occupancy: &GpuField,
        edges: &GpuField,
        dst: &GpuField,
    ) -> Result<(), FieldError> {
        const KERNEL: &str = "enforce_boundary";
        self.validate(
            KERNEL,
            &[
                (velocity, FieldFormat::Vector),
                (obstacle_velocity, FieldFormat::Vector),
                (occupancy, FieldFormat::Mask),
                (edges, FieldFormat::Mask),
                (dst, FieldFormat::Vector),
            ],
        )?;
        distinct(KERNEL, &[velocity, obstacle_velocity, occupancy, edges], dst)?;

        let inputs = bind_views(
            &self.device,
            "Enforce Boundary Inputs",
            &self.kernels.enforce_layout,
            &[velocity, obstacle_velocity, occupancy, edges],
        );
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| new_encoder(device));
        fullscreen_pass(
            encoder,
            "Enforce Boundary Pass",
            &self.kernels.enforce,
            &self.params_bind_group,
            &inputs,
            &dst.view,
        );
        Ok(())
    }

    fn display(&mut self, velocity: &GpuField, scale: f32) -> Result<(), FieldError> {
        self.validate("display", &[(velocity, FieldFormat::Vector)])?;
        let (Some(pipeline), Some(target)) = (self.kernels.display.as_ref(), self.display_target.take()) else {
            return Ok(());
        };

        let params = DisplayParams {
            target_width: target.width as f32,
            target_height: target.height as f32,
            scale,
            _pad: 0.0,
        };
        self.queue.write_buffer(&self.display_buffer, 0, bytemuck::bytes_of(&params));

        let inputs = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Display Inputs"),
            layout: &self.kernels.display_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&velocity.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.display_buffer.as_entire_binding(),
                },
            ],
        });
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| new_encoder(device));
        fullscreen_pass(encoder, "Display Pass", pipeline, &self.params_bind_group, &inputs, &target.view);
        Ok(())
    }

    fn end_frame(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }
}
