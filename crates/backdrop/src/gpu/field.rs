//! Texture-backed fields.

use std::sync::atomic::{AtomicU64, Ordering};

use flowfield::{FieldFormat, FieldResource, GridSize};

static NEXT_FIELD_ID: AtomicU64 = AtomicU64::new(1);

pub fn texture_format(format: FieldFormat) -> wgpu::TextureFormat {
    match format {
        FieldFormat::Scalar => wgpu::TextureFormat::R32Float,
        FieldFormat::Vector => wgpu::TextureFormat::Rg32Float,
        FieldFormat::Mask => wgpu::TextureFormat::R32Uint,
    }
}

/// One simulation field in a 2D texture.
///
/// Every field is a render target and can be bound for load, copied in and
/// out; masks are also storage textures (edge classification is a compute
/// pass).
#[derive(Debug)]
pub struct GpuField {
    id: u64,
    format: FieldFormat,
    size: GridSize,
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl GpuField {
    pub fn new(device: &wgpu::Device, format: FieldFormat, size: GridSize) -> Self {
        let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST;
        if format == FieldFormat::Mask {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(match format {
                FieldFormat::Scalar => "Scalar Field",
                FieldFormat::Vector => "Vector Field",
                FieldFormat::Mask => "Mask Field",
            }),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(format),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            id: NEXT_FIELD_ID.fetch_add(1, Ordering::Relaxed),
            format,
            size,
            texture,
            view,
        }
    }

    /// Process-unique identity, used to reject aliased bindings.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl FieldResource for GpuField {
    fn format(&self) -> FieldFormat {
        self.format
    }

    fn size(&self) -> GridSize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_field_format_gets_its_own_texture_format() {
        let formats: std::collections::HashSet<_> = FieldFormat::ALL.into_iter().map(texture_format).collect();
        assert_eq!(formats.len(), FieldFormat::ALL.len());
    }

    #[test]
    fn test_bytes_per_texel_match_texture_format() {
        for format in FieldFormat::ALL {
            assert_eq!(
                texture_format(format).block_copy_size(None),
                Some(format.bytes_per_texel())
            );
        }
    }
}
