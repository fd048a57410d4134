//! Size-class pools for out-of-line series content.
//!
//! Dynamic series draw their buffers from the smallest class wide enough
//! to hold the requested capacity. Anything bigger than the largest class
//! comes from the SYSTEM pool, one unit per request.

use super::{Pool, PoolError, PoolSpec, PoolStats, SegmentBudget};
use crate::foreign::StructField;
use crate::gob::GobId;
use crate::node::NodeHeader;
use crate::value::Cell;

/// Width of one value cell; the unit the small classes are measured in.
pub const CELL_WIDTH: usize = std::mem::size_of::<Cell>();

/// Base unit of the big classes.
pub const BIG_WIDTH: usize = 1024;

/// Default size-class table.
pub fn default_size_classes() -> Vec<PoolSpec> {
    let mut specs = vec![PoolSpec::new(8, 256)];

    const SMALL: [(usize, usize); 16] = [
        (1, 256),
        (2, 512),
        (3, 1024),
        (4, 512),
        (5, 256),
        (6, 128),
        (7, 128),
        (8, 64),
        (9, 64),
        (10, 64),
        (11, 32),
        (12, 32),
        (13, 32),
        (14, 32),
        (15, 32),
        (16, 64),
    ];
    const MID: [(usize, usize); 4] = [(20, 32), (24, 16), (28, 16), (32, 8)];
    const BIG: [(usize, usize); 4] = [(1, 16), (2, 8), (3, 4), (4, 4)];

    let cells = SMALL
        .iter()
        .chain(MID.iter())
        .map(|&(cells, units)| PoolSpec::new(cells * CELL_WIDTH, units));
    let big = BIG
        .iter()
        .map(|&(k, units)| PoolSpec::new(k * BIG_WIDTH, units));

    // Widths must strictly increase. A big class that coincides with a
    // cell class merges into it, keeping the larger segment.
    for spec in cells.chain(big) {
        match specs.last_mut() {
            Some(last) if spec.wide == last.wide => last.units = last.units.max(spec.units),
            Some(last) if spec.wide < last.wide => {}
            _ => specs.push(spec),
        }
    }
    specs
}

/// Element type of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Bytes,
    Cells,
    Fields,
    Gobs,
}

impl BufferKind {
    /// Bytes per element.
    #[inline]
    pub const fn width(self) -> usize {
        match self {
            BufferKind::Bytes => 1,
            BufferKind::Cells => CELL_WIDTH,
            BufferKind::Fields => std::mem::size_of::<StructField>(),
            BufferKind::Gobs => std::mem::size_of::<GobId>(),
        }
    }
}

/// Out-of-line series content.
#[derive(Debug, Clone)]
pub enum Buffer {
    Bytes(Vec<u8>),
    Cells(Vec<Cell>),
    Fields(Vec<StructField>),
    Gobs(Vec<GobId>),
}

impl Buffer {
    /// An empty buffer able to hold `capacity` elements without growing.
    pub fn with_capacity(kind: BufferKind, capacity: usize) -> Self {
        match kind {
            BufferKind::Bytes => Buffer::Bytes(Vec::with_capacity(capacity)),
            BufferKind::Cells => Buffer::Cells(Vec::with_capacity(capacity)),
            BufferKind::Fields => Buffer::Fields(Vec::with_capacity(capacity)),
            BufferKind::Gobs => Buffer::Gobs(Vec::with_capacity(capacity)),
        }
    }

    pub fn kind(&self) -> BufferKind {
        match self {
            Buffer::Bytes(_) => BufferKind::Bytes,
            Buffer::Cells(_) => BufferKind::Cells,
            Buffer::Fields(_) => BufferKind::Fields,
            Buffer::Gobs(_) => BufferKind::Gobs,
        }
    }

    /// Elements in use.
    pub fn len(&self) -> usize {
        match self {
            Buffer::Bytes(v) => v.len(),
            Buffer::Cells(v) => v.len(),
            Buffer::Fields(v) => v.len(),
            Buffer::Gobs(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Buffer::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_cells(&self) -> Option<&[Cell]> {
        match self {
            Buffer::Cells(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_fields(&self) -> Option<&[StructField]> {
        match self {
            Buffer::Fields(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_gobs(&self) -> Option<&[GobId]> {
        match self {
            Buffer::Gobs(v) => Some(v),
            _ => None,
        }
    }

    /// Move every element of `self` onto the end of `into`.
    fn drain_into(&mut self, into: &mut Buffer) -> bool {
        match (self, into) {
            (Buffer::Bytes(from), Buffer::Bytes(to)) => to.append(from),
            (Buffer::Cells(from), Buffer::Cells(to)) => to.append(from),
            (Buffer::Fields(from), Buffer::Fields(to)) => to.append(from),
            (Buffer::Gobs(from), Buffer::Gobs(to)) => to.append(from),
            _ => return false,
        }
        true
    }
}

/// Handle to a buffer in a size-class pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRef {
    class: u8,
    index: u32,
}

impl BufferRef {
    const SYSTEM: u8 = u8::MAX;

    /// True if the buffer came from the SYSTEM pool.
    #[inline]
    pub fn is_system(self) -> bool {
        self.class == Self::SYSTEM
    }
}

/// A freshly allocated buffer and its accounted size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocated {
    pub buffer: BufferRef,
    /// Element capacity.
    pub rest: u32,
    /// Bytes charged for it.
    pub bytes: usize,
}

/// All size-class pools plus the SYSTEM pool.
#[derive(Debug)]
pub struct SizeClasses {
    classes: Vec<Pool<Buffer>>,
    system: Pool<Buffer>,
}

impl SizeClasses {
    /// Build one pool per spec. Specs must be sorted by width.
    pub fn new(specs: &[PoolSpec]) -> Self {
        Self {
            classes: specs
                .iter()
                .map(|&spec| Pool::new("size-class", spec))
                .collect(),
            system: Pool::new("system", PoolSpec::new(0, 1)),
        }
    }

    /// Index of the smallest class at least `bytes` wide.
    pub fn class_for(&self, bytes: usize) -> Option<usize> {
        self.classes.iter().position(|pool| pool.spec().wide >= bytes)
    }

    /// Allocate an empty buffer for at least `capacity` elements.
    pub fn alloc(
        &mut self,
        kind: BufferKind,
        capacity: usize,
        budget: &mut SegmentBudget,
    ) -> Result<Allocated, PoolError> {
        let width = kind.width();
        let bytes = capacity.max(1) * width;
        match self.class_for(bytes) {
            Some(class) => {
                let pool = &mut self.classes[class];
                pool.reserve(budget)?;
                let wide = pool.spec().wide;
                let rest = wide / width;
                let index = pool.alloc_reserved(
                    NodeHeader::SERIES,
                    Buffer::with_capacity(kind, rest),
                );
                Ok(Allocated {
                    buffer: BufferRef {
                        class: class as u8,
                        index,
                    },
                    rest: rest as u32,
                    bytes: wide,
                })
            }
            None => {
                self.system.reserve_bytes(budget, bytes)?;
                let rest = capacity.max(1);
                let index = self
                    .system
                    .alloc_reserved(NodeHeader::SERIES, Buffer::with_capacity(kind, rest));
                Ok(Allocated {
                    buffer: BufferRef {
                        class: BufferRef::SYSTEM,
                        index,
                    },
                    rest: rest as u32,
                    bytes,
                })
            }
        }
    }

    fn pool(&self, buffer: BufferRef) -> Option<&Pool<Buffer>> {
        if buffer.is_system() {
            Some(&self.system)
        } else {
            self.classes.get(buffer.class as usize)
        }
    }

    fn pool_mut(&mut self, buffer: BufferRef) -> Option<&mut Pool<Buffer>> {
        if buffer.is_system() {
            Some(&mut self.system)
        } else {
            self.classes.get_mut(buffer.class as usize)
        }
    }

    /// The buffer behind a handle.
    pub fn get(&self, buffer: BufferRef) -> &Buffer {
        match self.pool(buffer).and_then(|pool| pool.get(buffer.index)) {
            Some(content) => content,
            None => crate::gc_panic!("stale buffer handle {:?}", buffer),
        }
    }

    /// The buffer behind a handle, mutably.
    pub fn get_mut(&mut self, buffer: BufferRef) -> &mut Buffer {
        match self
            .pool_mut(buffer)
            .and_then(|pool| pool.get_mut(buffer.index))
        {
            Some(content) => content,
            None => crate::gc_panic!("stale buffer handle {:?}", buffer),
        }
    }

    /// Move the contents of `from` onto the end of `to`.
    pub fn transfer(&mut self, from: BufferRef, to: BufferRef) {
        let mut moved = std::mem::replace(
            self.get_mut(from),
            Buffer::with_capacity(BufferKind::Bytes, 0),
        );
        if !moved.drain_into(self.get_mut(to)) {
            crate::gc_panic!("buffer transfer between mismatched kinds");
        }
    }

    /// Return a buffer to its pool. Yields the bytes it was charged.
    pub fn free(&mut self, buffer: BufferRef) -> usize {
        let Some(pool) = self.pool_mut(buffer) else {
            crate::gc_panic!("stale buffer handle {:?}", buffer);
        };
        let wide = pool.spec().wide;
        match pool.free_node(buffer.index) {
            Some(freed) if buffer.is_system() => freed.capacity_bytes(),
            Some(_) => wide,
            None => crate::gc_panic!("buffer {:?} freed twice", buffer),
        }
    }

    /// Occupancy of every class, SYSTEM last.
    pub fn stats(&self) -> Vec<PoolStats> {
        self.classes
            .iter()
            .chain(std::iter::once(&self.system))
            .map(Pool::stats)
            .collect()
    }

    /// Buffers currently handed out across all classes.
    pub fn used(&self) -> usize {
        self.classes.iter().map(Pool::used).sum::<usize>() + self.system.used()
    }
}

impl Buffer {
    fn capacity_bytes(&self) -> usize {
        let capacity = match self {
            Buffer::Bytes(v) => v.capacity(),
            Buffer::Cells(v) => v.capacity(),
            Buffer::Fields(v) => v.capacity(),
            Buffer::Gobs(v) => v.capacity(),
        };
        capacity * self.kind().width()
    }
}
