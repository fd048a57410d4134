//! Allocation entry points shared by every node kind.
//!
//! Pool growth failures get one immediate extra collection and a retry.
//! A second failure is fatal.

use super::Heap;
use crate::node::NodeHeader;
use crate::pool::size_class::Allocated;
use crate::pool::{BufferKind, PoolError};
use crate::series::{Series, SeriesId};

impl Heap {
    /// Run `attempt`, collecting once and retrying if the pools cannot grow.
    pub(crate) fn with_retry<T>(
        &mut self,
        mut attempt: impl FnMut(&mut Heap) -> Result<T, PoolError>,
    ) -> T {
        let error = match attempt(self) {
            Ok(value) => return value,
            Err(error) => error,
        };
        if !self.collector.can_collect() {
            crate::gc_panic!("out of memory: {}", error);
        }

        tracing::debug!(%error, "pool growth failed, collecting before retry");
        self.recycle(false);
        match attempt(self) {
            Ok(value) => value,
            Err(error) => crate::gc_panic!("out of memory after collecting: {}", error),
        }
    }

    /// Debit the ballast for a fresh allocation.
    pub(crate) fn charge(&mut self, bytes: usize) {
        self.stats.record_allocation(bytes);
        if self.collector.ballast_mut().debit(bytes) {
            self.collector.request();
        }
    }

    /// Give freed bytes back to the ballast.
    #[inline]
    pub(crate) fn credit(&mut self, bytes: usize) {
        self.collector.ballast_mut().credit(bytes);
    }

    /// Allocate a series node.
    pub(crate) fn alloc_series_node(&mut self, header: NodeHeader, series: Series) -> SeriesId {
        let index = self.with_retry(|heap| heap.series.alloc_node(header, series, &mut heap.budget));
        self.charge(self.series.spec().wide);
        SeriesId::from_index(index)
    }

    /// Allocate a buffer from the size-class pools.
    pub(crate) fn alloc_buffer(&mut self, kind: BufferKind, capacity: usize) -> Allocated {
        let allocated =
            self.with_retry(|heap| heap.buffers.alloc(kind, capacity, &mut heap.budget));
        self.charge(allocated.bytes);
        allocated
    }
}
