//! Fixed-width pool allocator.
//!
//! A pool hands out units of one width. It grows one segment at a time and
//! never gives segments back; freed units go onto a LIFO free list threaded
//! through the unit bodies.
//!
//! ```text
//!   segments[0]                      segments[1]
//!   ┌──────┬──────┬──────┬──────┐    ┌──────┬──────┬──────┬──────┐
//!   │ live │ free │ live │ free │    │ free │ live │ live │ free │
//!   └──────┴──┬───┴──────┴──▲───┘    └──▲───┴──────┴──────┴──┬───┘
//!             │             │           │                    │
//!  free_head ─┘             └───────────┼────────────────────┘
//!                                       └─── ... ◀───────────
//! ```
//!
//! Units are addressed by a dense `u32` index: `segment * units + offset`.

pub mod size_class;

pub use size_class::{Buffer, BufferKind, BufferRef, SizeClasses};

use crate::node::NodeHeader;
use thiserror::Error;

/// Shape of a pool: unit width in bytes and units per segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSpec {
    /// Width of one unit in bytes.
    pub wide: usize,
    /// Units allocated per segment.
    pub units: usize,
}

impl PoolSpec {
    /// Create a pool spec.
    #[inline]
    pub const fn new(wide: usize, units: usize) -> Self {
        Self { wide, units }
    }

    /// Bytes requested from the system for one segment.
    #[inline]
    pub const fn segment_bytes(&self) -> usize {
        self.wide * self.units
    }
}

/// Segment growth failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    /// Growing would exceed the configured memory limit.
    #[error("pool `{pool}` cannot grow by {bytes} bytes: memory limit of {limit} bytes reached")]
    LimitReached {
        /// Pool that tried to grow.
        pool: &'static str,
        /// Size of the segment requested.
        bytes: usize,
        /// Configured limit.
        limit: usize,
    },
    /// The system allocator refused the segment.
    #[error("pool `{pool}` cannot grow by {bytes} bytes: out of memory")]
    OutOfMemory {
        /// Pool that tried to grow.
        pool: &'static str,
        /// Size of the segment requested.
        bytes: usize,
    },
}

/// Segment bytes reserved across every pool, checked against a limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentBudget {
    limit: usize,
    reserved: usize,
}

impl SegmentBudget {
    /// Create a budget. A limit of 0 means unlimited.
    pub fn new(limit: usize) -> Self {
        Self { limit, reserved: 0 }
    }

    /// Total segment bytes handed out so far.
    #[inline]
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Configured limit, 0 for unlimited.
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    fn reserve(&mut self, pool: &'static str, bytes: usize) -> Result<(), PoolError> {
        if self.limit != 0 && self.reserved.saturating_add(bytes) > self.limit {
            return Err(PoolError::LimitReached {
                pool,
                bytes,
                limit: self.limit,
            });
        }
        self.reserved += bytes;
        Ok(())
    }
}

/// Body of a unit: either a free-list link or a live value.
#[derive(Debug)]
enum Body<T> {
    Free { next: Option<u32> },
    Live(T),
}

/// One fixed-width unit.
#[derive(Debug)]
pub struct Unit<T> {
    header: NodeHeader,
    body: Body<T>,
}

impl<T> Unit<T> {
    /// The node header.
    #[inline]
    pub fn header(&self) -> NodeHeader {
        self.header
    }

    /// The live value, if any.
    #[inline]
    pub fn value(&self) -> Option<&T> {
        match &self.body {
            Body::Live(value) => Some(value),
            Body::Free { .. } => None,
        }
    }
}

/// Snapshot of a pool's occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Pool name.
    pub name: &'static str,
    /// Unit width in bytes.
    pub wide: usize,
    /// Units per segment.
    pub units: usize,
    /// Segments allocated.
    pub segments: usize,
    /// Total units across all segments.
    pub has: usize,
    /// Units on the free list.
    pub free: usize,
}

impl PoolStats {
    /// Units currently allocated.
    #[inline]
    pub fn used(&self) -> usize {
        self.has - self.free
    }
}

/// A fixed-width free-list allocator.
pub struct Pool<T> {
    name: &'static str,
    spec: PoolSpec,
    segments: Vec<Box<[Unit<T>]>>,
    free_head: Option<u32>,
    free: usize,
}

impl<T> Pool<T> {
    /// Create an empty pool. No segment is allocated until first use.
    pub fn new(name: &'static str, spec: PoolSpec) -> Self {
        debug_assert!(spec.units > 0, "pool `{name}` has zero units per segment");
        Self {
            name,
            spec,
            segments: Vec::new(),
            free_head: None,
            free: 0,
        }
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Make sure at least one unit is free, growing by a segment if needed.
    pub fn reserve(&mut self, budget: &mut SegmentBudget) -> Result<(), PoolError> {
        self.reserve_bytes(budget, self.spec.segment_bytes())
    }

    /// Like [`reserve`](Self::reserve), charging `bytes` against the budget
    /// instead of the nominal segment size.
    pub fn reserve_bytes(
        &mut self,
        budget: &mut SegmentBudget,
        bytes: usize,
    ) -> Result<(), PoolError> {
        if self.free_head.is_some() {
            return Ok(());
        }
        self.grow(budget, bytes)
    }

    fn grow(&mut self, budget: &mut SegmentBudget, bytes: usize) -> Result<(), PoolError> {
        let count = self.spec.units;
        let mut units: Vec<Unit<T>> = Vec::new();
        units
            .try_reserve_exact(count)
            .map_err(|_| PoolError::OutOfMemory {
                pool: self.name,
                bytes,
            })?;
        budget.reserve(self.name, bytes)?;

        let base = self.has() as u32;
        for offset in 0..count as u32 {
            let next = if (offset as usize) + 1 < count {
                Some(base + offset + 1)
            } else {
                self.free_head
            };
            units.push(Unit {
                header: NodeHeader::FREE,
                body: Body::Free { next },
            });
        }

        self.segments.push(units.into_boxed_slice());
        self.free_head = Some(base);
        self.free += count;

        tracing::trace!(
            pool = self.name,
            segments = self.segments.len(),
            units = count,
            bytes,
            "pool grew by one segment"
        );
        Ok(())
    }

    /// Take a unit off the free list, growing the pool if it is exhausted.
    pub fn alloc_node(
        &mut self,
        header: NodeHeader,
        value: T,
        budget: &mut SegmentBudget,
    ) -> Result<u32, PoolError> {
        self.reserve(budget)?;
        Ok(self.alloc_reserved(header, value))
    }

    /// Take a unit off the free list. The caller must have reserved one.
    pub(crate) fn alloc_reserved(&mut self, header: NodeHeader, value: T) -> u32 {
        debug_assert!(header.is_valid());
        let name = self.name;
        let Some(index) = self.free_head else {
            crate::gc_panic!("pool `{}` allocated without a reserved unit", name);
        };
        let unit = self.unit_mut(index);
        let next = match unit.body {
            Body::Free { next } => next,
            Body::Live(_) => {
                crate::gc_panic!("pool `{}` free list reaches live unit {}", name, index)
            }
        };
        unit.header = header;
        unit.body = Body::Live(value);
        self.free_head = next;
        self.free -= 1;
        index
    }

    /// Return a unit to the free list, zeroing its header.
    ///
    /// Returns the value that lived there, or `None` if the unit was
    /// already free.
    pub fn free_node(&mut self, index: u32) -> Option<T> {
        let head = self.free_head;
        let units = self.spec.units;
        let unit = self
            .segments
            .get_mut(index as usize / units)?
            .get_mut(index as usize % units)?;
        if unit.header.is_free() {
            return None;
        }
        unit.header = NodeHeader::FREE;
        let body = std::mem::replace(&mut unit.body, Body::Free { next: head });
        self.free_head = Some(index);
        self.free += 1;
        match body {
            Body::Live(value) => Some(value),
            Body::Free { .. } => None,
        }
    }

    /// Free every managed unit that is not marked and clear the mark on
    /// the rest. With `shutdown` set, marked units are freed too.
    ///
    /// Unmanaged units are left alone. Returns the freed values with their
    /// indices, in pool order.
    pub fn sweep(&mut self, shutdown: bool) -> Vec<(u32, T)> {
        let units = self.spec.units;
        let mut freed = Vec::new();
        for (s, segment) in self.segments.iter_mut().enumerate() {
            for (o, unit) in segment.iter_mut().enumerate() {
                let index = (s * units + o) as u32;
                let header = unit.header;
                if header.is_free() {
                    continue;
                }
                if !header.is_managed() {
                    if cfg!(debug_assertions) && header.is_marked() {
                        crate::gc_panic!("unmanaged unit {} in pool `{}` is marked", index, self.name);
                    }
                    continue;
                }
                if header.is_marked() && !shutdown {
                    unit.header.unmark();
                    continue;
                }
                unit.header = NodeHeader::FREE;
                let body = std::mem::replace(&mut unit.body, Body::Free { next: self.free_head });
                self.free_head = Some(index);
                self.free += 1;
                if let Body::Live(value) = body {
                    freed.push((index, value));
                }
            }
        }
        freed
    }

    // =========================================================================
    // Access
    // =========================================================================

    fn unit_mut(&mut self, index: u32) -> &mut Unit<T> {
        let units = self.spec.units;
        &mut self.segments[index as usize / units][index as usize % units]
    }

    /// Look up a unit by index.
    #[inline]
    pub fn unit(&self, index: u32) -> Option<&Unit<T>> {
        let units = self.spec.units;
        self.segments
            .get(index as usize / units)
            .and_then(|segment| segment.get(index as usize % units))
    }

    /// Header of a unit. Out-of-range indices read as free.
    #[inline]
    pub fn header(&self, index: u32) -> NodeHeader {
        self.unit(index).map_or(NodeHeader::FREE, |unit| unit.header)
    }

    /// Mutable header of a live unit.
    #[inline]
    pub fn header_mut(&mut self, index: u32) -> Option<&mut NodeHeader> {
        let units = self.spec.units;
        let unit = self
            .segments
            .get_mut(index as usize / units)?
            .get_mut(index as usize % units)?;
        (!unit.header.is_free()).then_some(&mut unit.header)
    }

    /// The live value at `index`.
    #[inline]
    pub fn get(&self, index: u32) -> Option<&T> {
        self.unit(index).and_then(Unit::value)
    }

    /// The live value at `index`, mutably.
    #[inline]
    pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        let units = self.spec.units;
        match &mut self
            .segments
            .get_mut(index as usize / units)?
            .get_mut(index as usize % units)?
            .body
        {
            Body::Live(value) => Some(value),
            Body::Free { .. } => None,
        }
    }

    /// Iterate over live units as `(index, header, value)`.
    pub fn iter_live(&self) -> impl Iterator<Item = (u32, NodeHeader, &T)> + '_ {
        let units = self.spec.units;
        self.segments.iter().enumerate().flat_map(move |(s, segment)| {
            segment.iter().enumerate().filter_map(move |(o, unit)| {
                unit.value()
                    .map(|value| ((s * units + o) as u32, unit.header, value))
            })
        })
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Pool name, used in diagnostics.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Pool shape.
    #[inline]
    pub fn spec(&self) -> PoolSpec {
        self.spec
    }

    /// Total units across all segments.
    #[inline]
    pub fn has(&self) -> usize {
        self.segments.len() * self.spec.units
    }

    /// Units on the free list.
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free
    }

    /// Units currently allocated.
    #[inline]
    pub fn used(&self) -> usize {
        self.has() - self.free
    }

    /// Occupancy snapshot.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.name,
            wide: self.spec.wide,
            units: self.spec.units,
            segments: self.segments.len(),
            has: self.has(),
            free: self.free,
        }
    }
}

impl<T> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("spec", &self.spec)
            .field("segments", &self.segments.len())
            .field("free", &self.free)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(units: usize) -> Pool<u64> {
        Pool::new("test", PoolSpec::new(8, units))
    }

    #[test]
    fn test_pool_starts_empty() {
        let pool = pool(4);
        assert_eq!(pool.has(), 0);
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn test_alloc_grows_one_segment() {
        let mut pool = pool(4);
        let mut budget = SegmentBudget::default();

        let index = pool.alloc_node(NodeHeader::SERIES, 7, &mut budget).unwrap();
        assert_eq!(index, 0);
        assert_eq!(pool.has(), 4);
        assert_eq!(pool.free_count(), 3);
        assert_eq!(pool.get(index), Some(&7));
        assert_eq!(budget.reserved(), 32);
    }

    #[test]
    fn test_free_list_is_lifo() {
        let mut pool = pool(4);
        let mut budget = SegmentBudget::default();

        let a = pool.alloc_node(NodeHeader::SERIES, 1, &mut budget).unwrap();
        let b = pool.alloc_node(NodeHeader::SERIES, 2, &mut budget).unwrap();
        assert_eq!(pool.free_node(a), Some(1));
        assert_eq!(pool.free_node(b), Some(2));

        assert_eq!(pool.alloc_node(NodeHeader::SERIES, 3, &mut budget).unwrap(), b);
        assert_eq!(pool.alloc_node(NodeHeader::SERIES, 4, &mut budget).unwrap(), a);
    }

    #[test]
    fn test_free_zeroes_header() {
        let mut pool = pool(2);
        let mut budget = SegmentBudget::default();

        let index = pool.alloc_node(NodeHeader::SERIES, 1, &mut budget).unwrap();
        pool.free_node(index);
        assert!(pool.header(index).is_free());
        assert!(pool.get(index).is_none());
        assert!(pool.header_mut(index).is_none());
        assert_eq!(pool.free_node(index), None);
    }

    #[test]
    fn test_second_segment_indices_continue() {
        let mut pool = pool(2);
        let mut budget = SegmentBudget::default();

        let ids: Vec<u32> = (0..5)
            .map(|n| pool.alloc_node(NodeHeader::SERIES, n, &mut budget).unwrap())
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(pool.stats().segments, 3);
        assert_eq!(pool.used(), 5);
        assert_eq!(pool.iter_live().count(), 5);
    }

    #[test]
    fn test_sweep_frees_unmarked_managed_units() {
        use crate::node::NodeFlags;

        let mut pool = pool(4);
        let mut budget = SegmentBudget::default();
        let managed = NodeHeader::new(NodeFlags::MANAGED);

        let loose = pool.alloc_node(NodeHeader::SERIES, 1, &mut budget).unwrap();
        let garbage = pool.alloc_node(managed, 2, &mut budget).unwrap();
        let live = pool.alloc_node(managed, 3, &mut budget).unwrap();
        pool.header_mut(live).unwrap().mark();

        assert_eq!(pool.sweep(false), vec![(garbage, 2)]);
        assert!(!pool.header(live).is_marked());
        assert_eq!(pool.get(loose), Some(&1));

        assert_eq!(pool.sweep(true), vec![(live, 3)]);
        assert_eq!(pool.used(), 1);
    }

    #[test]
    fn test_memory_limit_blocks_growth() {
        let mut pool = pool(4);
        let mut budget = SegmentBudget::new(40);

        for n in 0..4 {
            pool.alloc_node(NodeHeader::SERIES, n, &mut budget).unwrap();
        }
        let err = pool.alloc_node(NodeHeader::SERIES, 5, &mut budget).unwrap_err();
        assert!(matches!(err, PoolError::LimitReached { limit: 40, .. }));
        assert_eq!(pool.has(), 4);
    }
}
