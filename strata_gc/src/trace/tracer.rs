//! Tracer interface for object graph traversal.

use crate::device::RequestId;
use crate::foreign::{LibraryId, RoutineId, StructValue};
use crate::gob::GobId;
use crate::series::{ContextRef, SeriesId};

/// Visitor handed to [`Trace`](super::Trace) implementations.
///
/// The marker implements this by setting mark bits and pushing arrays onto
/// its worklist; nothing here recurses into array contents.
///
/// # Example
///
/// ```ignore
/// impl Trace for Widget {
///     fn trace(&self, tracer: &mut dyn Tracer) {
///         tracer.queue_array(self.children);
///         if let Some(owner) = self.owner {
///             tracer.queue_context(owner);
///         }
///     }
/// }
/// ```
pub trait Tracer {
    /// Mark an array and queue its cells for tracing.
    fn queue_array(&mut self, array: SeriesId);

    /// Mark a context's keylist and varlist together and queue them.
    fn queue_context(&mut self, context: ContextRef);

    /// Dispatch on the series kind: varlists as contexts, arrays deeply,
    /// anything else shallowly.
    fn queue_series(&mut self, series: SeriesId);

    /// Mark a series whose content holds no references.
    fn mark_series(&mut self, series: SeriesId);

    /// Mark a GUI object tree.
    fn mark_gob(&mut self, gob: GobId);

    /// Mark a loaded library.
    fn mark_library(&mut self, library: LibraryId);

    /// Mark a foreign-function descriptor and everything it holds.
    fn mark_routine(&mut self, routine: RoutineId);

    /// Mark a struct value and its field descriptors.
    fn mark_struct(&mut self, value: StructValue);

    /// Mark the port of an in-flight device request.
    fn mark_request(&mut self, request: RequestId);

    /// Label the edges reported from here on, for memory dumps.
    fn set_edge(&mut self, _edge: &'static str) {}
}

/// A tracer that does nothing (for testing).
pub struct NullTracer;

impl Tracer for NullTracer {
    fn queue_array(&mut self, _array: SeriesId) {}
    fn queue_context(&mut self, _context: ContextRef) {}
    fn queue_series(&mut self, _series: SeriesId) {}
    fn mark_series(&mut self, _series: SeriesId) {}
    fn mark_gob(&mut self, _gob: GobId) {}
    fn mark_library(&mut self, _library: LibraryId) {}
    fn mark_routine(&mut self, _routine: RoutineId) {}
    fn mark_struct(&mut self, _value: StructValue) {}
    fn mark_request(&mut self, _request: RequestId) {}
}

/// A counting tracer for debugging and statistics.
#[derive(Debug, Default)]
pub struct CountingTracer {
    pub arrays: usize,
    pub contexts: usize,
    pub series: usize,
    pub gobs: usize,
    pub libraries: usize,
    pub routines: usize,
    pub structs: usize,
    pub requests: usize,
}

impl CountingTracer {
    /// Create a new counting tracer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get total number of references traced.
    pub fn total(&self) -> usize {
        self.arrays
            + self.contexts
            + self.series
            + self.gobs
            + self.libraries
            + self.routines
            + self.structs
            + self.requests
    }
}

impl Tracer for CountingTracer {
    fn queue_array(&mut self, _array: SeriesId) {
        self.arrays += 1;
    }

    fn queue_context(&mut self, _context: ContextRef) {
        self.contexts += 1;
    }

    fn queue_series(&mut self, _series: SeriesId) {
        self.series += 1;
    }

    fn mark_series(&mut self, _series: SeriesId) {
        self.series += 1;
    }

    fn mark_gob(&mut self, _gob: GobId) {
        self.gobs += 1;
    }

    fn mark_library(&mut self, _library: LibraryId) {
        self.libraries += 1;
    }

    fn mark_routine(&mut self, _routine: RoutineId) {
        self.routines += 1;
    }

    fn mark_struct(&mut self, _value: StructValue) {
        self.structs += 1;
    }

    fn mark_request(&mut self, _request: RequestId) {
        self.requests += 1;
    }
}
