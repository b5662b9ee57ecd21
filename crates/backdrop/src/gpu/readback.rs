//! Copy fields between textures and host memory.
//!
//! Used by the kernel tests and by the periodic field statistics; never on
//! the per-frame path.

use flowfield::glam::Vec2;
use flowfield::{FieldFormat, FieldResource};

use super::{await_buffer_map, GpuError, GpuField};

/// Row pitch of a texture copy, padded to the copy alignment.
fn padded_bytes_per_row(field: &GpuField) -> u32 {
    let unpadded = field.size().width * field.format().bytes_per_texel();
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

fn extent(field: &GpuField) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: field.size().width,
        height: field.size().height,
        depth_or_array_layers: 1,
    }
}

/// Read the raw texel bytes of a field, rows tightly packed.
pub fn read_field_bytes(device: &wgpu::Device, queue: &wgpu::Queue, field: &GpuField) -> Result<Vec<u8>, GpuError> {
    let size = field.size();
    let row_bytes = (size.width * field.format().bytes_per_texel()) as usize;
    let padded = padded_bytes_per_row(field);

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Field Readback Staging"),
        size: padded as u64 * size.height as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Field Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture: &field.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(size.height),
            },
        },
        extent(field),
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    await_buffer_map(rx)?;

    let data = slice.get_mapped_range();
    let mut bytes = Vec::with_capacity(row_bytes * size.height as usize);
    for row in data.chunks(padded as usize) {
        bytes.extend_from_slice(&row[..row_bytes]);
    }
    drop(data);
    staging.unmap();
    Ok(bytes)
}

pub fn read_vector_field(device: &wgpu::Device, queue: &wgpu::Queue, field: &GpuField) -> Result<Vec<Vec2>, GpuError> {
    debug_assert_eq!(field.format(), FieldFormat::Vector);
    let bytes = read_field_bytes(device, queue, field)?;
    let raw: &[[f32; 2]] = bytemuck::cast_slice(&bytes);
    Ok(raw.iter().map(|&v| Vec2::from(v)).collect())
}

pub fn read_scalar_field(device: &wgpu::Device, queue: &wgpu::Queue, field: &GpuField) -> Result<Vec<f32>, GpuError> {
    debug_assert_eq!(field.format(), FieldFormat::Scalar);
    let bytes = read_field_bytes(device, queue, field)?;
    Ok(bytemuck::cast_slice(&bytes).to_vec())
}

pub fn read_mask_field(device: &wgpu::Device, queue: &wgpu::Queue, field: &GpuField) -> Result<Vec<u32>, GpuError> {
    debug_assert_eq!(field.format(), FieldFormat::Mask);
    let bytes = read_field_bytes(device, queue, field)?;
    Ok(bytemuck::cast_slice(&bytes).to_vec())
}

/// Upload host data into a field. `texels` must hold exactly one value per
/// texel; returns false otherwise.
pub fn write_field<T: bytemuck::Pod>(queue: &wgpu::Queue, field: &GpuField, texels: &[T]) -> bool {
    let size = field.size();
    if texels.len() != size.texel_count()
        || std::mem::size_of::<T>() as u32 != field.format().bytes_per_texel()
    {
        return false;
    }
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &field.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(texels),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(size.width * field.format().bytes_per_texel()),
            rows_per_image: Some(size.height),
        },
        extent(field),
    );
    true
}
