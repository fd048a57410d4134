//! Series creation, access and growth.

use super::{Content, Link, Misc, Series, SeriesFlags, SeriesId};
use crate::heap::Heap;
use crate::node::NodeHeader;
use crate::pool::{Buffer, BufferKind};
use crate::value::{Cell, Value};

impl Heap {
    // =========================================================================
    // Creation
    // =========================================================================

    /// Allocate an unmanaged series with an out-of-line buffer of at least
    /// `capacity` elements.
    pub fn make_series_of(
        &mut self,
        kind: BufferKind,
        flags: SeriesFlags,
        capacity: usize,
    ) -> SeriesId {
        let allocated = self.alloc_buffer(kind, capacity);
        let series = Series::new(
            flags,
            Content::Dynamic {
                buffer: allocated.buffer,
                rest: allocated.rest,
            },
        );
        self.alloc_series_node(NodeHeader::SERIES, series)
    }

    /// Allocate an unmanaged array. Capacities of 0 or 1 use the singular
    /// layout and need no buffer.
    pub fn make_array(&mut self, capacity: usize) -> SeriesId {
        self.make_array_with(SeriesFlags::empty(), capacity)
    }

    pub(crate) fn make_array_with(&mut self, flags: SeriesFlags, capacity: usize) -> SeriesId {
        let flags = flags | SeriesFlags::ARRAY;
        if capacity <= 1 {
            let series = Series::new(flags, Content::Singular(None));
            self.alloc_series_node(NodeHeader::SERIES, series)
        } else {
            self.make_series_of(BufferKind::Cells, flags, capacity)
        }
    }

    /// Allocate an unmanaged byte series holding `bytes`.
    pub fn make_binary(&mut self, bytes: &[u8]) -> SeriesId {
        let series = self.make_series_of(BufferKind::Bytes, SeriesFlags::empty(), bytes.len());
        self.append_bytes(series, bytes);
        series
    }

    /// Allocate an unmanaged UTF-8 series holding `text`.
    pub fn make_string(&mut self, text: &str) -> SeriesId {
        let series = self.make_series_of(BufferKind::Bytes, SeriesFlags::UTF8, text.len());
        self.append_bytes(series, text.as_bytes());
        series
    }

    // =========================================================================
    // Access
    // =========================================================================

    /// A live series node.
    pub fn series(&self, id: SeriesId) -> &Series {
        match self.series.get(id.index()) {
            Some(series) => series,
            None => crate::gc_panic!("{} used after free", id),
        }
    }

    pub(crate) fn series_mut(&mut self, id: SeriesId) -> &mut Series {
        match self.series.get_mut(id.index()) {
            Some(series) => series,
            None => crate::gc_panic!("{} used after free", id),
        }
    }

    /// True while the series node has not been freed.
    #[inline]
    pub fn is_series_live(&self, id: SeriesId) -> bool {
        self.series.get(id.index()).is_some()
    }

    /// The out-of-line buffer of a dynamic series.
    pub fn buffer_of(&self, id: SeriesId) -> Option<&Buffer> {
        self.series(id)
            .buffer()
            .map(|buffer| self.buffers.get(buffer))
    }

    /// Run `f` on the out-of-line buffer of a dynamic series.
    pub fn with_buffer_mut<R>(
        &mut self,
        id: SeriesId,
        f: impl FnOnce(&mut Buffer) -> R,
    ) -> Option<R> {
        let buffer = self.series(id).buffer()?;
        Some(f(self.buffers.get_mut(buffer)))
    }

    /// Elements in use.
    pub fn series_len(&self, id: SeriesId) -> usize {
        match self.series(id).content {
            Content::Singular(None) => 0,
            Content::Singular(Some(_)) => 1,
            Content::Pairing(_) => 2,
            Content::Dynamic { buffer, .. } => self.buffers.get(buffer).len(),
        }
    }

    /// Capacity in elements.
    pub fn series_rest(&self, id: SeriesId) -> usize {
        match self.series(id).content {
            Content::Singular(_) => 1,
            Content::Pairing(_) => 2,
            Content::Dynamic { rest, .. } => rest as usize,
        }
    }

    /// Cells in use of an array.
    pub fn array_len(&self, id: SeriesId) -> usize {
        if !self.series(id).is_array() {
            crate::gc_panic!("{} is not an array", id);
        }
        self.series_len(id)
    }

    /// The cell at `index`, if in range.
    pub fn cell(&self, id: SeriesId, index: usize) -> Option<Cell> {
        match self.series(id).content {
            Content::Singular(cell) => cell.filter(|_| index == 0),
            Content::Pairing(cells) => cells.get(index).copied(),
            Content::Dynamic { buffer, .. } => self
                .buffers
                .get(buffer)
                .as_cells()
                .and_then(|cells| cells.get(index))
                .copied(),
        }
    }

    /// Copy out every cell of an array.
    pub fn array_cells(&self, id: SeriesId) -> Vec<Cell> {
        (0..self.array_len(id))
            .filter_map(|index| self.cell(id, index))
            .collect()
    }

    /// Copy out every value of an array.
    pub fn array_values(&self, id: SeriesId) -> Vec<Value> {
        self.array_cells(id)
            .iter()
            .map(|cell| *cell.value())
            .collect()
    }

    /// Content of a byte series. Empty for anything else.
    pub fn bytes(&self, id: SeriesId) -> &[u8] {
        self.buffer_of(id)
            .and_then(Buffer::as_bytes)
            .unwrap_or(&[])
    }

    // =========================================================================
    // Growth and mutation
    // =========================================================================

    /// Make room for `extra` more elements.
    ///
    /// A singular array becomes dynamic; a dynamic series moves to a wider
    /// size class. Either way the node's content is replaced in one step,
    /// after the new buffer holds everything.
    pub fn reserve_tail(&mut self, id: SeriesId, extra: usize) {
        let series = *self.series(id);
        let len = self.series_len(id);
        let needed = len + extra;

        let (kind, old) = match series.content {
            Content::Singular(_) if needed <= 1 => return,
            Content::Dynamic { rest, .. } if needed <= rest as usize => return,
            Content::Singular(_) => (BufferKind::Cells, None),
            Content::Dynamic { buffer, .. } => (self.buffers.get(buffer).kind(), Some(buffer)),
            Content::Pairing(_) => crate::gc_panic!("pairing {} cannot grow", id),
        };
        if series.flags.contains(SeriesFlags::FIXED_SIZE) {
            crate::gc_panic!("fixed-size {} cannot grow to {} elements", id, needed);
        }

        let allocated = self.alloc_buffer(kind, needed.max(len * 2));
        match (series.content, old) {
            (Content::Singular(Some(cell)), _) => {
                if let Buffer::Cells(cells) = self.buffers.get_mut(allocated.buffer) {
                    cells.push(cell);
                }
            }
            (_, Some(old)) => {
                self.buffers.transfer(old, allocated.buffer);
                let freed = self.buffers.free(old);
                self.credit(freed);
            }
            _ => {}
        }

        self.series_mut(id).content = Content::Dynamic {
            buffer: allocated.buffer,
            rest: allocated.rest,
        };
    }

    /// Append a cell to an array.
    pub fn append_cell(&mut self, id: SeriesId, cell: Cell) {
        if !self.series(id).is_array() {
            crate::gc_panic!("appending a cell to non-array {}", id);
        }
        self.reserve_tail(id, 1);
        match &mut self.series_mut(id).content {
            Content::Singular(slot) => *slot = Some(cell),
            Content::Pairing(_) => crate::gc_panic!("appending to pairing {}", id),
            Content::Dynamic { .. } => {
                self.with_buffer_mut(id, |buffer| match buffer {
                    Buffer::Cells(cells) => cells.push(cell),
                    _ => crate::gc_panic!("array {} has a non-cell buffer", id),
                });
            }
        }
    }

    /// Append a value to an array.
    #[inline]
    pub fn append_value(&mut self, id: SeriesId, value: Value) {
        self.append_cell(id, Cell::new(value));
    }

    /// Overwrite the cell at `index`, which must be in range.
    pub fn set_value(&mut self, id: SeriesId, index: usize, value: Value) {
        let len = self.series_len(id);
        if index >= len {
            crate::gc_panic!("index {} out of range for {} of length {}", index, id, len);
        }
        match &mut self.series_mut(id).content {
            Content::Singular(Some(cell)) => cell.set(value),
            Content::Singular(None) => {}
            Content::Pairing(cells) => cells[index].set(value),
            Content::Dynamic { .. } => {
                self.with_buffer_mut(id, |buffer| match buffer {
                    Buffer::Cells(cells) => cells[index].set(value),
                    _ => crate::gc_panic!("setting a cell in non-array {}", id),
                });
            }
        }
    }

    /// Append raw bytes to a byte series.
    pub fn append_bytes(&mut self, id: SeriesId, bytes: &[u8]) {
        self.reserve_tail(id, bytes.len());
        let appended = self.with_buffer_mut(id, |buffer| match buffer {
            Buffer::Bytes(content) => {
                content.extend_from_slice(bytes);
                true
            }
            _ => false,
        });
        if appended != Some(true) {
            crate::gc_panic!("appending bytes to non-byte {}", id);
        }
    }

    /// Point an interned spelling at its canon form.
    pub fn set_canon(&mut self, id: SeriesId, canon: SeriesId) {
        self.series_mut(id).misc = Misc::Canon(canon);
    }

    /// Set the link slot.
    pub fn set_link(&mut self, id: SeriesId, link: Link) {
        self.series_mut(id).link = link;
    }

    /// Set the misc slot.
    pub fn set_misc(&mut self, id: SeriesId, misc: Misc) {
        self.series_mut(id).misc = misc;
    }

    // =========================================================================
    // Lifetime
    // =========================================================================

    /// Hand a series to the collector. It must not already be managed, and
    /// the caller must keep it guarded until something reachable refers to it.
    pub fn manage(&mut self, id: SeriesId) {
        let Some(header) = self.series.header_mut(id.index()) else {
            crate::gc_panic!("managing freed {}", id);
        };
        if !header.set_managed() {
            crate::gc_panic!("{} is already managed", id);
        }
        self.manage_attached(id);
    }

    /// Like [`manage`](Self::manage), but a no-op if it already is.
    pub fn ensure_managed(&mut self, id: SeriesId) {
        let Some(header) = self.series.header_mut(id.index()) else {
            crate::gc_panic!("managing freed {}", id);
        };
        if header.set_managed() {
            self.manage_attached(id);
        }
    }

    // A map's hash index has no other owner.
    fn manage_attached(&mut self, id: SeriesId) {
        if let Link::Hashlist(hashlist) = self.series(id).link {
            self.ensure_managed(hashlist);
        }
    }

    #[inline]
    pub fn is_managed(&self, id: SeriesId) -> bool {
        self.series.header(id.index()).is_managed()
    }

    #[inline]
    pub fn is_marked(&self, id: SeriesId) -> bool {
        self.series.header(id.index()).is_marked()
    }

    /// Free an unmanaged series now, with its buffer.
    pub fn free_series(&mut self, id: SeriesId) {
        let header = self.series.header(id.index());
        if header.is_free() {
            crate::gc_panic!("{} freed twice", id);
        }
        if header.is_managed() {
            crate::gc_panic!("freeing managed {} by hand", id);
        }
        let bytes = self.release_series(id.index());
        self.credit(bytes);
    }

    /// Return a series node and its buffer to their pools. Yields the bytes
    /// given back.
    pub(crate) fn release_series(&mut self, index: u32) -> usize {
        match self.series.free_node(index) {
            Some(series) => self.release_content(&series),
            None => 0,
        }
    }

    pub(crate) fn release_content(&mut self, series: &Series) -> usize {
        let buffer_bytes = series.buffer().map_or(0, |buffer| self.buffers.free(buffer));
        self.series.spec().wide + buffer_bytes
    }
}
