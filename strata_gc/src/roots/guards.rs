//! Guard stacks: scoped protection for values not yet reachable otherwise.
//!
//! Code that builds something across an allocating call pushes it here
//! first and pops it afterwards, in strict reverse order. The closure
//! helper [`Heap::guarded`](crate::Heap::guarded) releases everything
//! pushed inside it on every exit path.

use super::RootProvider;
use crate::series::SeriesId;
use crate::trace::{Trace, Tracer};
use crate::value::{Cell, Value};

/// Depth of both stacks at some moment, used to release back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardScope {
    series: usize,
    values: usize,
}

/// The series guard and value guard stacks.
#[derive(Debug)]
pub struct GuardStacks {
    series: Vec<SeriesId>,
    values: Vec<Cell>,
}

impl GuardStacks {
    /// Create both stacks with room for `capacity` entries each.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            series: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push_series(&mut self, series: SeriesId) {
        self.series.push(series);
    }

    /// Pop the top series guard, which must be `series`.
    pub fn pop_series(&mut self, series: SeriesId) {
        match self.series.pop() {
            Some(top) if top == series => {}
            Some(top) => crate::gc_panic!(
                "series guard released out of order: expected {}, top is {}",
                series,
                top
            ),
            None => crate::gc_panic!("series guard released with empty stack: {}", series),
        }
    }

    #[inline]
    pub fn push_value(&mut self, value: Value) {
        self.values.push(Cell::new(value));
    }

    /// Pop the top value guard.
    pub fn pop_value(&mut self) -> Value {
        match self.values.pop() {
            Some(cell) => *cell.value(),
            None => crate::gc_panic!("value guard released with empty stack"),
        }
    }

    /// Current depth of both stacks.
    #[inline]
    pub fn scope(&self) -> GuardScope {
        GuardScope {
            series: self.series.len(),
            values: self.values.len(),
        }
    }

    /// Drop everything pushed since `scope` was taken.
    pub fn release(&mut self, scope: GuardScope) {
        if self.series.len() < scope.series || self.values.len() < scope.values {
            crate::gc_panic!(
                "guard scope released below its starting depth ({:?}, now {:?})",
                scope,
                self.scope()
            );
        }
        self.series.truncate(scope.series);
        self.values.truncate(scope.values);
    }

    /// Entries on the series guard stack.
    #[inline]
    pub fn series_depth(&self) -> usize {
        self.series.len()
    }

    /// Entries on the value guard stack.
    #[inline]
    pub fn value_depth(&self) -> usize {
        self.values.len()
    }

    /// Guards still outstanding on either stack.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.series.len() + self.values.len()
    }

    /// Report the series guard stack.
    pub fn trace_series(&self, tracer: &mut dyn Tracer) {
        for &series in &self.series {
            tracer.queue_series(series);
        }
    }

    /// Report the value guard stack.
    pub fn trace_values(&self, tracer: &mut dyn Tracer) {
        self.values.trace(tracer);
    }
}

impl RootProvider for GuardStacks {
    fn trace_roots(&self, tracer: &mut dyn Tracer) {
        self.trace_series(tracer);
        self.trace_values(tracer);
    }
}
