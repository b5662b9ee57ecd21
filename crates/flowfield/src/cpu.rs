//! CPU reference backend.
//!
//! Runs the kernels in [`crate::kernels`] eagerly. Used by the test suite and
//! for headless runs; it is also the ground truth the GPU backend is checked
//! against.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use glam::Vec2;

use crate::backend::{ClearValue, FieldBackend};
use crate::field::{expect_field, FieldError, FieldFormat, FieldResource, GridSize};
use crate::kernels;
use crate::params::{ObstacleInstance, SimParams, SplatInstance};
use crate::pool::FieldAllocator;

#[derive(Debug)]
pub enum FieldData {
    Scalar(Vec<f32>),
    Vector(Vec<Vec2>),
    Mask(Vec<u32>),
}

impl FieldData {
    fn new(format: FieldFormat, texels: usize) -> Self {
        match format {
            FieldFormat::Scalar => FieldData::Scalar(vec![0.0; texels]),
            FieldFormat::Vector => FieldData::Vector(vec![Vec2::ZERO; texels]),
            FieldFormat::Mask => FieldData::Mask(vec![0; texels]),
        }
    }
}

/// Shared handle to CPU texel storage. Cloning shares the storage, like a
/// GPU texture handle.
#[derive(Clone, Debug)]
pub struct CpuField {
    format: FieldFormat,
    size: GridSize,
    data: Rc<RefCell<FieldData>>,
}

impl FieldResource for CpuField {
    fn format(&self) -> FieldFormat {
        self.format
    }

    fn size(&self) -> GridSize {
        self.size
    }
}

impl CpuField {
    pub fn new(format: FieldFormat, size: GridSize) -> Self {
        Self {
            format,
            size,
            data: Rc::new(RefCell::new(FieldData::new(format, size.texel_count()))),
        }
    }

    pub fn read_vector(&self) -> Option<Vec<Vec2>> {
        match &*self.data.borrow() {
            FieldData::Vector(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn read_scalar(&self) -> Option<Vec<f32>> {
        match &*self.data.borrow() {
            FieldData::Scalar(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn read_mask(&self) -> Option<Vec<u32>> {
        match &*self.data.borrow() {
            FieldData::Mask(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Overwrite a vector field. Returns false on format or length mismatch.
    pub fn write_vector(&self, values: &[Vec2]) -> bool {
        match &mut *self.data.borrow_mut() {
            FieldData::Vector(v) if v.len() == values.len() => {
                v.copy_from_slice(values);
                true
            }
            _ => false,
        }
    }

    pub fn write_scalar(&self, values: &[f32]) -> bool {
        match &mut *self.data.borrow_mut() {
            FieldData::Scalar(v) if v.len() == values.len() => {
                v.copy_from_slice(values);
                true
            }
            _ => false,
        }
    }
}

fn borrow<'a>(kernel: &'static str, field: &'a CpuField) -> Result<Ref<'a, FieldData>, FieldError> {
    field.data.try_borrow().map_err(|_| FieldError::Aliased { kernel })
}

fn borrow_mut<'a>(kernel: &'static str, field: &'a CpuField) -> Result<RefMut<'a, FieldData>, FieldError> {
    field.data.try_borrow_mut().map_err(|_| FieldError::Aliased { kernel })
}

fn mismatch(kernel: &'static str, expected: FieldFormat, data: &FieldData) -> FieldError {
    let found = match data {
        FieldData::Scalar(_) => FieldFormat::Scalar,
        FieldData::Vector(_) => FieldFormat::Vector,
        FieldData::Mask(_) => FieldFormat::Mask,
    };
    FieldError::FormatMismatch { kernel, expected, found }
}

fn vectors<'a>(kernel: &'static str, data: &'a FieldData) -> Result<&'a [Vec2], FieldError> {
    match data {
        FieldData::Vector(v) => Ok(v),
        other => Err(mismatch(kernel, FieldFormat::Vector, other)),
    }
}

fn vectors_mut<'a>(kernel: &'static str, data: &'a mut FieldData) -> Result<&'a mut [Vec2], FieldError> {
    match data {
        FieldData::Vector(v) => Ok(v),
        other => Err(mismatch(kernel, FieldFormat::Vector, other)),
    }
}

fn scalars<'a>(kernel: &'static str, data: &'a FieldData) -> Result<&'a [f32], FieldError> {
    match data {
        FieldData::Scalar(v) => Ok(v),
        other => Err(mismatch(kernel, FieldFormat::Scalar, other)),
    }
}

fn scalars_mut<'a>(kernel: &'static str, data: &'a mut FieldData) -> Result<&'a mut [f32], FieldError> {
    match data {
        FieldData::Scalar(v) => Ok(v),
        other => Err(mismatch(kernel, FieldFormat::Scalar, other)),
    }
}

fn masks<'a>(kernel: &'static str, data: &'a FieldData) -> Result<&'a [u32], FieldError> {
    match data {
        FieldData::Mask(v) => Ok(v),
        other => Err(mismatch(kernel, FieldFormat::Mask, other)),
    }
}

fn masks_mut<'a>(kernel: &'static str, data: &'a mut FieldData) -> Result<&'a mut [u32], FieldError> {
    match data {
        FieldData::Mask(v) => Ok(v),
        other => Err(mismatch(kernel, FieldFormat::Mask, other)),
    }
}

#[derive(Default)]
pub struct CpuBackend {
    size: GridSize,
    params: SimParams,
    allocations: usize,
    passes: Vec<&'static str>,
    image: Vec<[u8; 4]>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields this backend has ever allocated.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// Pass names recorded since the last `begin_frame`, in execution order.
    pub fn passes(&self) -> &[&'static str] {
        &self.passes
    }

    /// RGBA8 output of the last `display` call, at simulation resolution.
    pub fn image(&self) -> &[[u8; 4]] {
        &self.image
    }

    fn size(&self) -> GridSize {
        self.size
    }
}

impl FieldAllocator for CpuBackend {
    type Field = CpuField;

    fn allocate(&mut self, format: FieldFormat, size: GridSize) -> CpuField {
        self.allocations += 1;
        CpuField::new(format, size)
    }
}

impl FieldBackend for CpuBackend {
    fn begin_frame(&mut self, size: GridSize) -> Result<(), FieldError> {
        self.size = size;
        self.passes.clear();
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
        self.params = *params;
        self.passes.push("set_params");
        Ok(())
    }

    fn clear(&mut self, dst: &CpuField, value: ClearValue) -> Result<(), FieldError> {
        const KERNEL: &str = "clear";
        let mut data = borrow_mut(KERNEL, dst)?;
        match (&mut *data, value) {
            (FieldData::Scalar(v), ClearValue::Zero) => v.fill(0.0),
            (FieldData::Mask(v), ClearValue::Zero) => v.fill(0),
            (FieldData::Vector(v), ClearValue::Zero) => v.fill(Vec2::ZERO),
            (FieldData::Vector(v), ClearValue::Vector(c)) => v.fill(Vec2::from_array(c)),
            (other, ClearValue::Vector(_)) => return Err(mismatch(KERNEL, FieldFormat::Vector, other)),
        }
        self.passes.push(KERNEL);
        Ok(())
    }

    fn inject_forces(&mut self, velocity: &CpuField, splats: &[SplatInstance]) -> Result<(), FieldError> {
        const KERNEL: &str = "inject_forces";
        let size = self.size();
        expect_field(KERNEL, velocity, FieldFormat::Vector, size)?;
        let mut data = borrow_mut(KERNEL, velocity)?;
        let v = vectors_mut(KERNEL, &mut data)?;
        for splat in splats {
            kernels::inject_splat(size, v, splat, self.params.dt);
        }
        self.passes.push(KERNEL);
        Ok(())
    }

    fn diffuse(&mut self, src: &CpuField, dst: &CpuField) -> Result<(), FieldError> {
        const KERNEL: &str = "diffuse";
        let size = self.size();
        expect_field(KERNEL, src, FieldFormat::Vector, size)?;
        expect_field(KERNEL, dst, FieldFormat::Vector, size)?;
        let src = borrow(KERNEL, src)?;
        let mut dst = borrow_mut(KERNEL, dst)?;
        let p = self.params;
        kernels::diffuse_step(
            size,
            vectors(KERNEL, &src)?,
            vectors_mut(KERNEL, &mut dst)?,
            p.viscosity,
            p.dt,
            p.omega,
        );
        self.passes.push(KERNEL);
        Ok(())
    }

    fn divergence(&mut self, velocity: &CpuField, dst: &CpuField) -> Result<(), FieldError> {
        const KERNEL: &str = "divergence";
        let size = self.size();
        expect_field(KERNEL, velocity, FieldFormat::Vector, size)?;
        expect_field(KERNEL, dst, FieldFormat::Scalar, size)?;
        let v = borrow(KERNEL, velocity)?;
        let mut out = borrow_mut(KERNEL, dst)?;
        kernels::divergence(size, vectors(KERNEL, &v)?, scalars_mut(KERNEL, &mut out)?);
        self.passes.push(KERNEL);
        Ok(())
    }

    fn pressure_step(&mut self, pressure: &CpuField, divergence: &CpuField, dst: &CpuField) -> Result<(), FieldError> {
        const KERNEL: &str = "pressure";
        let size = self.size();
        expect_field(KERNEL, pressure, FieldFormat::Scalar, size)?;
        expect_field(KERNEL, divergence, FieldFormat::Scalar, size)?;
        expect_field(KERNEL, dst, FieldFormat::Scalar, size)?;
        let p = borrow(KERNEL, pressure)?;
        let div = borrow(KERNEL, divergence)?;
        let mut out = borrow_mut(KERNEL, dst)?;
        kernels::pressure_step(size, scalars(KERNEL, &p)?, scalars(KERNEL, &div)?, scalars_mut(KERNEL, &mut out)?);
        self.passes.push(KERNEL);
        Ok(())
    }

    fn subtract_gradient(&mut self, velocity: &CpuField, pressure: &CpuField, dst: &CpuField) -> Result<(), FieldError> {
        const KERNEL: &str = "subtract_gradient";
        let size = self.size();
        expect_field(KERNEL, velocity, FieldFormat::Vector, size)?;
        expect_field(KERNEL, pressure, FieldFormat::Scalar, size)?;
        expect_field(KERNEL, dst, FieldFormat::Vector, size)?;
        let v = borrow(KERNEL, velocity)?;
        let p = borrow(KERNEL, pressure)?;
        let mut out = borrow_mut(KERNEL, dst)?;
        kernels::subtract_gradient(size, vectors(KERNEL, &v)?, scalars(KERNEL, &p)?, vectors_mut(KERNEL, &mut out)?);
        self.passes.push(KERNEL);
        Ok(())
    }

    fn advect(&mut self, velocity: &CpuField, dst: &CpuField) -> Result<(), FieldError> {
        const KERNEL: &str = "advect";
        let size = self.size();
        expect_field(KERNEL, velocity, FieldFormat::Vector, size)?;
        expect_field(KERNEL, dst, FieldFormat::Vector, size)?;
        let v = borrow(KERNEL, velocity)?;
        let mut out = borrow_mut(KERNEL, dst)?;
        kernels::advect(
            size,
            vectors(KERNEL, &v)?,
            vectors_mut(KERNEL, &mut out)?,
            self.params.dt,
            self.params.advect_scale,
        );
        self.passes.push(KERNEL);
        Ok(())
    }

    fn rasterize_obstacles(
        &mut self,
        instances: &[ObstacleInstance],
        velocity_dst: &CpuField,
        occupancy_dst: &CpuField,
    ) -> Result<(), FieldError> {
        const KERNEL: &str = "rasterize_obstacles";
        let size = self.size();
        expect_field(KERNEL, velocity_dst, FieldFormat::Vector, size)?;
        expect_field(KERNEL, occupancy_dst, FieldFormat::Mask, size)?;
        let mut v = borrow_mut(KERNEL, velocity_dst)?;
        let mut occ = borrow_mut(KERNEL, occupancy_dst)?;
        kernels::rasterize_obstacles(size, instances, vectors_mut(KERNEL, &mut v)?, masks_mut(KERNEL, &mut occ)?);
        self.passes.push(KERNEL);
        Ok(())
    }

    fn classify_edges(&mut self, occupancy: &CpuField, dst: &CpuField) -> Result<(), FieldError> {
        const KERNEL: &str = "classify_edges";
        let size = self.size();
        expect_field(KERNEL, occupancy, FieldFormat::Mask, size)?;
        expect_field(KERNEL, dst, FieldFormat::Mask, size)?;
        let occ = borrow(KERNEL, occupancy)?;
        let mut out = borrow_mut(KERNEL, dst)?;
        kernels::classify_edges(size, masks(KERNEL, &occ)?, masks_mut(KERNEL, &mut out)?);
        self.passes.push(KERNEL);
        Ok(())
    }

    fn enforce_boundary(
        &mut self,
        velocity: &CpuField,
        obstacle_velocity: &CpuField,
        occupancy: &CpuField,
        edges: &CpuField,
        dst: &CpuField,
    ) -> Result<(), FieldError> {
        const KERNEL: &str = "enforce_boundary";
        let size = self.size();
        expect_field(KERNEL, velocity, FieldFormat::Vector, size)?;
        expect_field(KERNEL, obstacle_velocity, FieldFormat::Vector, size)?;
        expect_field(KERNEL, occupancy, FieldFormat::Mask, size)?;
        expect_field(KERNEL, edges, FieldFormat::Mask, size)?;
        expect_field(KERNEL, dst, FieldFormat::Vector, size)?;
        let v = borrow(KERNEL, velocity)?;
        let ov = borrow(KERNEL, obstacle_velocity)?;
        let occ = borrow(KERNEL, occupancy)?;
        let edge = borrow(KERNEL, edges)?;
        let mut out = borrow_mut(KERNEL, dst)?;
        kernels::enforce_boundary(
            size,
            vectors(KERNEL, &v)?,
            vectors(KERNEL, &ov)?,
            masks(KERNEL, &occ)?,
            masks(KERNEL, &edge)?,
            self.params.boundary_policy(),
            vectors_mut(KERNEL, &mut out)?,
        );
        self.passes.push(KERNEL);
        Ok(())
    }

    fn display(&mut self, velocity: &CpuField, scale: f32) -> Result<(), FieldError> {
        const KERNEL: &str = "display";
        expect_field(KERNEL, velocity, FieldFormat::Vector, self.size())?;
        let v = borrow(KERNEL, velocity)?;
        self.image = vectors(KERNEL, &v)?
            .iter()
            .map(|&t| kernels::velocity_color(t, scale))
            .collect();
        self.passes.push(KERNEL);
        Ok(())
    }

    fn end_frame(&mut self) {}
}
