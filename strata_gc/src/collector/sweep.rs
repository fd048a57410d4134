//! Sweep phase.
//!
//! Each pool is walked once. Managed units that were not marked go back to
//! their free list; marked ones have the bit cleared for the next cycle.

use crate::heap::Heap;
use crate::series::Series;
use std::ops::AddAssign;

/// What a sweep gave back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Swept {
    /// Nodes freed.
    pub nodes: usize,
    /// Bytes credited to the ballast.
    pub bytes: usize,
}

impl AddAssign for Swept {
    fn add_assign(&mut self, other: Self) {
        self.nodes += other.nodes;
        self.bytes += other.bytes;
    }
}

impl Heap {
    /// Release routines first: the host reads their argument-type series.
    pub(crate) fn sweep_routines(&mut self, shutdown: bool) -> Swept {
        let freed = self.routines.sweep(shutdown);
        for (_, routine) in &freed {
            let arg_types = self
                .series
                .get(routine.arg_types.index())
                .and_then(Series::buffer)
                .and_then(|buffer| self.buffers.get(buffer).as_bytes())
                .unwrap_or(&[]);
            self.host.release_routine(routine, arg_types);
        }
        let swept = Swept {
            nodes: freed.len(),
            bytes: freed.len() * self.routines.spec().wide,
        };
        self.credit(swept.bytes);
        swept
    }

    pub(crate) fn sweep_series(&mut self, shutdown: bool) -> Swept {
        let freed = self.series.sweep(shutdown);
        let mut swept = Swept::default();
        for (_, series) in &freed {
            swept.nodes += 1;
            swept.bytes += self.release_content(series);
        }
        self.credit(swept.bytes);
        swept
    }

    pub(crate) fn sweep_gobs(&mut self, shutdown: bool) -> Swept {
        let freed = self.gobs.sweep(shutdown).len();
        let swept = Swept {
            nodes: freed,
            bytes: freed * self.gobs.spec().wide,
        };
        self.credit(swept.bytes);
        swept
    }

    /// Libraries last; a library still open is closed through the host.
    pub(crate) fn sweep_libraries(&mut self, shutdown: bool) -> Swept {
        let freed = self.libraries.sweep(shutdown);
        for (index, library) in &freed {
            if !library.is_closed() {
                tracing::trace!(library = index, handle = library.handle, "closing swept library");
                self.host.close_library(library.handle);
            }
        }
        let swept = Swept {
            nodes: freed.len(),
            bytes: freed.len() * self.libraries.spec().wide,
        };
        self.credit(swept.bytes);
        swept
    }
}
