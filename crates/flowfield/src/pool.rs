//! Format-keyed free-list of fields.
//!
//! Iterative kernels need a fresh output field for every pass. Allocating GPU
//! textures per pass is far too slow, so released fields go back into an idle
//! list per [`FieldFormat`] and the next `acquire` of that format reuses the
//! most recently released one. After warm-up a frame performs no allocations.

use std::collections::HashMap;

use crate::field::{FieldFormat, FieldResource, GridSize};

/// Creates backend storage for the pool.
pub trait FieldAllocator {
    type Field: FieldResource;

    fn allocate(&mut self, format: FieldFormat, size: GridSize) -> Self::Field;
}

/// Exclusive ownership of one pooled field.
///
/// Not `Clone`: a handle is given back with [`FieldPool::release`], which
/// consumes it, so it can only be returned once.
#[derive(Debug)]
pub struct FieldHandle<F> {
    field: F,
    format: FieldFormat,
    generation: u32,
}

impl<F> FieldHandle<F> {
    pub fn field(&self) -> &F {
        &self.field
    }

    pub fn format(&self) -> FieldFormat {
        self.format
    }
}

/// Pool counters, logged on resize and exposed for diagnostics.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocations: u64,
    pub reuses: u64,
    pub stale_drops: u64,
    pub idle: usize,
    pub outstanding: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Outstanding handle count differs from what the caller still holds.
    Imbalance { outstanding: usize, expected: usize },
    /// `acquire` was called before the pool was given a resolution.
    NoResolution,
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::Imbalance { outstanding, expected } => write!(
                f,
                "field pool imbalance: {outstanding} handles outstanding, expected {expected}"
            ),
            PoolError::NoResolution => write!(f, "field pool has no resolution yet"),
        }
    }
}

impl std::error::Error for PoolError {}

pub struct FieldPool<F> {
    size: GridSize,
    generation: u32,
    idle: HashMap<FieldFormat, Vec<F>>,
    stats: PoolStats,
}

impl<F: FieldResource> FieldPool<F> {
    pub fn new(size: GridSize) -> Self {
        Self {
            size,
            generation: 0,
            idle: HashMap::new(),
            stats: PoolStats::default(),
        }
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle.values().map(Vec::len).sum(),
            ..self.stats
        }
    }

    pub fn outstanding(&self) -> usize {
        self.stats.outstanding
    }

    pub fn idle_count(&self, format: FieldFormat) -> usize {
        self.idle.get(&format).map_or(0, Vec::len)
    }

    /// Hand out a field of `format` at the current resolution.
    ///
    /// Contents are undefined; the caller must write before reading.
    pub fn acquire<A>(&mut self, allocator: &mut A, format: FieldFormat) -> Result<FieldHandle<F>, PoolError>
    where
        A: FieldAllocator<Field = F>,
    {
        if self.size.is_empty() {
            return Err(PoolError::NoResolution);
        }

        let field = match self.idle.get_mut(&format).and_then(Vec::pop) {
            Some(field) => {
                self.stats.reuses += 1;
                field
            }
            None => {
                self.stats.allocations += 1;
                log::trace!("pool: allocating {} field at {}", format.label(), self.size);
                allocator.allocate(format, self.size)
            }
        };

        self.stats.outstanding += 1;
        Ok(FieldHandle {
            field,
            format,
            generation: self.generation,
        })
    }

    /// Return a field to the idle set of its format.
    ///
    /// Handles acquired before the last [`resize`](Self::resize) are dropped.
    pub fn release(&mut self, handle: FieldHandle<F>) {
        self.stats.outstanding = self.stats.outstanding.saturating_sub(1);

        if handle.generation != self.generation || handle.field.size() != self.size {
            self.stats.stale_drops += 1;
            return;
        }

        self.idle.entry(handle.format).or_default().push(handle.field);
    }

    /// Switch resolution. Every idle field is dropped and outstanding handles
    /// become stale; no content migrates across resolutions.
    pub fn resize(&mut self, size: GridSize) {
        if size == self.size {
            return;
        }

        let stats = self.stats();
        log::debug!(
            "pool: resize {} -> {} (allocations={}, reuses={}, idle dropped={}, outstanding={})",
            self.size,
            size,
            stats.allocations,
            stats.reuses,
            stats.idle,
            stats.outstanding
        );

        self.idle.clear();
        self.size = size;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Happy path: no handles outstanding.
    pub fn check_balance(&self) -> Result<(), PoolError> {
        self.check_balance_with(0)
    }

    /// Verify that exactly `expected` handles are still held by the caller.
    pub fn check_balance_with(&self, expected: usize) -> Result<(), PoolError> {
        if self.stats.outstanding == expected {
            Ok(())
        } else {
            Err(PoolError::Imbalance {
                outstanding: self.stats.outstanding,
                expected,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Dummy {
        id: u32,
        format: FieldFormat,
        size: GridSize,
    }

    impl FieldResource for Dummy {
        fn format(&self) -> FieldFormat {
            self.format
        }
        fn size(&self) -> GridSize {
            self.size
        }
    }

    #[derive(Default)]
    struct Counter {
        next: u32,
    }

    impl FieldAllocator for Counter {
        type Field = Dummy;
        fn allocate(&mut self, format: FieldFormat, size: GridSize) -> Dummy {
            self.next += 1;
            Dummy { id: self.next, format, size }
        }
    }

    #[test]
    fn test_reuses_most_recently_released() {
        let mut alloc = Counter::default();
        let mut pool = FieldPool::new(GridSize::new(8, 8));

        let a = pool.acquire(&mut alloc, FieldFormat::Vector).unwrap();
        let b = pool.acquire(&mut alloc, FieldFormat::Vector).unwrap();
        let b_id = b.field().id;
        pool.release(a);
        pool.release(b);

        let c = pool.acquire(&mut alloc, FieldFormat::Vector).unwrap();
        assert_eq!(c.field().id, b_id);
        assert_eq!(alloc.next, 2, "no new allocation expected");
        pool.release(c);
        assert!(pool.check_balance().is_ok());
    }

    #[test]
    fn test_formats_do_not_mix() {
        let mut alloc = Counter::default();
        let mut pool = FieldPool::new(GridSize::new(4, 4));

        let s = pool.acquire(&mut alloc, FieldFormat::Scalar).unwrap();
        pool.release(s);
        let v = pool.acquire(&mut alloc, FieldFormat::Vector).unwrap();
        assert_eq!(v.field().format, FieldFormat::Vector);
        assert_eq!(pool.idle_count(FieldFormat::Scalar), 1);
        pool.release(v);
    }

    #[test]
    fn test_imbalance_reported() {
        let mut alloc = Counter::default();
        let mut pool = FieldPool::new(GridSize::new(4, 4));
        let held = pool.acquire(&mut alloc, FieldFormat::Mask).unwrap();

        assert_eq!(
            pool.check_balance(),
            Err(PoolError::Imbalance { outstanding: 1, expected: 0 })
        );
        assert!(pool.check_balance_with(1).is_ok());
        pool.release(held);
        assert!(pool.check_balance().is_ok());
    }

    #[test]
    fn test_stale_handle_dropped_after_resize() {
        let mut alloc = Counter::default();
        let mut pool = FieldPool::new(GridSize::new(4, 4));
        let old = pool.acquire(&mut alloc, FieldFormat::Scalar).unwrap();

        pool.resize(GridSize::new(8, 2));
        pool.release(old);

        assert_eq!(pool.idle_count(FieldFormat::Scalar), 0);
        assert_eq!(pool.stats().stale_drops, 1);
        assert!(pool.check_balance().is_ok());

        let fresh = pool.acquire(&mut alloc, FieldFormat::Scalar).unwrap();
        assert_eq!(fresh.field().size, GridSize::new(8, 2));
        pool.release(fresh);
    }

    #[test]
    fn test_acquire_without_resolution_fails() {
        let mut alloc = Counter::default();
        let mut pool: FieldPool<Dummy> = FieldPool::new(GridSize::new(0, 0));
        assert_eq!(
            pool.acquire(&mut alloc, FieldFormat::Vector).unwrap_err(),
            PoolError::NoResolution
        );
    }
}
