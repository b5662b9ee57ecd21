//! Field model shared by every backend.
//!
//! A field is a `width × height` grid of texels living on the backend (GPU
//! texture or CPU grid). The solver only ever talks about fields through their
//! [`FieldFormat`] and [`GridSize`]; the storage itself is opaque.

use serde::{Deserialize, Serialize};

/// Element format of a field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldFormat {
    /// One f32 per texel (pressure, divergence).
    Scalar,
    /// Two f32 per texel (velocity, obstacle velocity).
    Vector,
    /// One u32 per texel (occupancy, edge classification).
    Mask,
}

impl FieldFormat {
    pub const ALL: [FieldFormat; 3] = [FieldFormat::Scalar, FieldFormat::Vector, FieldFormat::Mask];

    pub fn components(self) -> u32 {
        match self {
            FieldFormat::Scalar | FieldFormat::Mask => 1,
            FieldFormat::Vector => 2,
        }
    }

    pub fn bytes_per_texel(self) -> u32 {
        self.components() * 4
    }

    pub fn label(self) -> &'static str {
        match self {
            FieldFormat::Scalar => "scalar",
            FieldFormat::Vector => "vector",
            FieldFormat::Mask => "mask",
        }
    }
}

/// Simulation grid resolution in texels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridSize {
    pub width: u32,
    pub height: u32,
}

impl GridSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn texel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Derive the simulation size from a canvas size in device pixels.
    ///
    /// `floor(canvas × scale)` per axis, then both axes are scaled down by the
    /// same factor until `width × height <= max_texels`. A non-empty canvas
    /// never yields an empty grid.
    pub fn from_canvas(canvas_width: u32, canvas_height: u32, scale: f32, max_texels: u32) -> Self {
        if canvas_width == 0 || canvas_height == 0 {
            return Self::new(0, 0);
        }

        let mut width = ((canvas_width as f32 * scale).floor() as u32).max(1);
        let mut height = ((canvas_height as f32 * scale).floor() as u32).max(1);

        let budget = max_texels.max(1) as f64;
        let texels = width as f64 * height as f64;
        if texels > budget {
            let shrink = (budget / texels).sqrt();
            width = ((width as f64 * shrink).floor() as u32).max(1);
            height = ((height as f64 * shrink).floor() as u32).max(1);
        }

        Self::new(width, height)
    }

    /// Row-major texel index with toroidal wrap-around.
    #[inline]
    pub fn wrap_index(self, x: i32, y: i32) -> usize {
        let w = self.width as i32;
        let h = self.height as i32;
        let xi = x.rem_euclid(w) as usize;
        let yi = y.rem_euclid(h) as usize;
        yi * self.width as usize + xi
    }

    #[inline]
    pub fn index(self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

impl std::fmt::Display for GridSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Anything the pool can hand out: it must report what it is.
pub trait FieldResource {
    fn format(&self) -> FieldFormat;
    fn size(&self) -> GridSize;
}

/// Errors raised when a kernel is handed fields that break its contract.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldError {
    FormatMismatch {
        kernel: &'static str,
        expected: FieldFormat,
        found: FieldFormat,
    },
    SizeMismatch {
        kernel: &'static str,
        expected: GridSize,
        found: GridSize,
    },
    /// The same field was bound for reading and writing in one pass.
    Aliased { kernel: &'static str },
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldError::FormatMismatch { kernel, expected, found } => write!(
                f,
                "{kernel}: expected {} field, got {}",
                expected.label(),
                found.label()
            ),
            FieldError::SizeMismatch { kernel, expected, found } => {
                write!(f, "{kernel}: expected {expected} field, got {found}")
            }
            FieldError::Aliased { kernel } => {
                write!(f, "{kernel}: field bound for read and write in the same pass")
            }
        }
    }
}

impl std::error::Error for FieldError {}

/// Check that `field` has the format and size a kernel expects.
pub fn expect_field<F: FieldResource>(
    kernel: &'static str,
    field: &F,
    format: FieldFormat,
    size: GridSize,
) -> Result<(), FieldError> {
    if field.format() != format {
        return Err(FieldError::FormatMismatch {
            kernel,
            expected: format,
            found: field.format(),
        });
    }
    if field.size() != size {
        return Err(FieldError::SizeMismatch {
            kernel,
            expected: size,
            found: field.size(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_canvas_applies_scale() {
        let size = GridSize::from_canvas(800, 600, 0.25, 512 * 512);
        assert_eq!(size, GridSize::new(200, 150));
    }

    #[test]
    fn test_from_canvas_respects_budget_uniformly() {
        let size = GridSize::from_canvas(4000, 2000, 1.0, 512 * 512);
        assert!(size.texel_count() <= 512 * 512);
        // Aspect ratio survives the downscale
        let aspect = size.width as f32 / size.height as f32;
        assert!((aspect - 2.0).abs() < 0.02, "aspect drifted to {}", aspect);
    }

    #[test]
    fn test_from_canvas_never_empty_for_real_canvas() {
        let size = GridSize::from_canvas(3, 1, 0.1, 512 * 512);
        assert_eq!(size, GridSize::new(1, 1));
        assert!(GridSize::from_canvas(0, 100, 1.0, 100).is_empty());
    }

    #[test]
    fn test_wrap_index_is_toroidal() {
        let size = GridSize::new(4, 3);
        assert_eq!(size.wrap_index(-1, 0), 3);
        assert_eq!(size.wrap_index(4, 0), 0);
        assert_eq!(size.wrap_index(0, -1), 8);
        assert_eq!(size.wrap_index(1, 3), 1);
    }
}
