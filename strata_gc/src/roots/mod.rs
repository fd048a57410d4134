//! Root tracking.
//!
//! GC roots are the starting points for marking:
//! - The series and value guard stacks
//! - Pairings flagged as roots
//! - Distinguished globals (root context, task context, callback error)
//! - A host-supplied mark hook
//! - Ports of in-flight device requests
//! - The call-frame chain

mod guards;

pub use guards::{GuardScope, GuardStacks};

use crate::heap::Heap;
use crate::series::{ContextRef, SeriesId};
use crate::trace::{Trace, Tracer};
use crate::value::{Cell, Value};

/// Host callback run during the mark phase to report external roots.
pub type MarkHook = Box<dyn FnMut(&mut dyn Tracer)>;

/// Distinguished global roots.
#[derive(Default)]
pub struct RootSet {
    root_context: Option<ContextRef>,
    task_context: Option<ContextRef>,
    callback_error: Option<Cell>,
    globals: Vec<Cell>,
    pub(crate) mark_hook: Option<MarkHook>,
}

impl RootSet {
    /// Create a new empty root set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of global roots.
    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    /// True if a host mark hook is installed.
    pub fn has_mark_hook(&self) -> bool {
        self.mark_hook.is_some()
    }

    /// Run the host mark hook, if any.
    pub(crate) fn run_mark_hook(&mut self, tracer: &mut dyn Tracer) -> bool {
        match self.mark_hook.as_mut() {
            Some(hook) => {
                hook(tracer);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for RootSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootSet")
            .field("root_context", &self.root_context)
            .field("task_context", &self.task_context)
            .field("callback_error", &self.callback_error)
            .field("globals", &self.globals.len())
            .field("mark_hook", &self.mark_hook.is_some())
            .finish()
    }
}

/// Trait for types that can provide roots to the GC.
pub trait RootProvider {
    /// Trace all roots held by this provider.
    fn trace_roots(&self, tracer: &mut dyn Tracer);
}

impl RootProvider for RootSet {
    fn trace_roots(&self, tracer: &mut dyn Tracer) {
        if let Some(context) = self.root_context {
            tracer.set_edge("<root-context>");
            tracer.queue_context(context);
        }
        if let Some(context) = self.task_context {
            tracer.set_edge("<task-context>");
            tracer.queue_context(context);
        }
        tracer.set_edge("<callback-error>");
        self.callback_error.trace(tracer);
        tracer.set_edge("<global>");
        self.globals.trace(tracer);
    }
}

// =============================================================================
// Heap operations
// =============================================================================

impl Heap {
    /// Protect a managed series until the matching [`unguard_series`].
    ///
    /// [`unguard_series`]: Heap::unguard_series
    pub fn guard_series(&mut self, series: SeriesId) {
        if !self.is_managed(series) {
            crate::gc_panic!("guarding unmanaged {}", series);
        }
        self.guards.push_series(series);
    }

    /// Release the most recent series guard, which must be `series`.
    pub fn unguard_series(&mut self, series: SeriesId) {
        self.guards.pop_series(series);
    }

    /// Protect a value until the matching [`unguard_value`].
    ///
    /// [`unguard_value`]: Heap::unguard_value
    pub fn guard_value(&mut self, value: Value) {
        self.guards.push_value(value);
    }

    /// Release the most recent value guard.
    pub fn unguard_value(&mut self) -> Value {
        self.guards.pop_value()
    }

    /// The guard stacks.
    pub fn guards(&self) -> &GuardStacks {
        &self.guards
    }

    /// Run `f`, then drop every guard it pushed, however it returns.
    ///
    /// ```ignore
    /// let total = heap.guarded(|heap| {
    ///     heap.guard_series(block);
    ///     build_more(heap)?;
    ///     Ok(count(heap, block))
    /// })?;
    /// ```
    pub fn guarded<R>(&mut self, f: impl FnOnce(&mut Heap) -> R) -> R {
        let scope = self.guards.scope();
        let result = f(self);
        self.guards.release(scope);
        result
    }

    /// Set the root context.
    pub fn set_root_context(&mut self, context: Option<ContextRef>) {
        self.roots.root_context = context;
    }

    /// Set the task context.
    pub fn set_task_context(&mut self, context: Option<ContextRef>) {
        self.roots.task_context = context;
    }

    /// Set the error reported back from a failed callback.
    pub fn set_callback_error(&mut self, error: Option<Value>) {
        self.roots.callback_error = error.map(Cell::new);
    }

    /// Add a global root.
    pub fn add_global(&mut self, value: Value) {
        self.roots.globals.push(Cell::new(value));
    }

    /// Clear all globals.
    pub fn clear_globals(&mut self) {
        self.roots.globals.clear();
    }

    /// Install the host mark hook, replacing any previous one.
    pub fn set_mark_hook(&mut self, hook: impl FnMut(&mut dyn Tracer) + 'static) {
        self.roots.mark_hook = Some(Box::new(hook));
    }

    /// Remove the host mark hook.
    pub fn clear_mark_hook(&mut self) {
        self.roots.mark_hook = None;
    }

    /// The distinguished roots.
    pub fn roots(&self) -> &RootSet {
        &self.roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::tracer::CountingTracer;

    #[test]
    fn test_root_set_creation() {
        let roots = RootSet::new();
        assert_eq!(roots.global_count(), 0);
        assert!(!roots.has_mark_hook());
    }

    #[test]
    fn test_global_roots() {
        let mut heap = Heap::with_defaults();
        let block = heap.make_array(0);
        heap.add_global(Value::Integer(42));
        heap.add_global(Value::block(block));
        heap.set_callback_error(Some(Value::Logic(true)));

        let mut tracer = CountingTracer::new();
        heap.roots().trace_roots(&mut tracer);
        assert_eq!(heap.roots().global_count(), 2);
        assert_eq!(tracer.arrays, 1);

        heap.clear_globals();
        assert_eq!(heap.roots().global_count(), 0);
    }

    #[test]
    fn test_mark_hook_runs() {
        let mut roots = RootSet::new();
        roots.mark_hook = Some(Box::new(|tracer: &mut dyn Tracer| {
            tracer.queue_array(SeriesId::from_index(0));
        }));

        let mut tracer = CountingTracer::new();
        assert!(roots.run_mark_hook(&mut tracer));
        assert_eq!(tracer.arrays, 1);
    }

    #[test]
    fn test_guarded_releases_on_early_return() {
        let mut heap = Heap::with_defaults();
        let block = heap.make_array(0);
        heap.manage(block);

        let result: Result<(), &str> = heap.guarded(|heap| {
            heap.guard_series(block);
            heap.guard_value(Value::Integer(1));
            if heap.guards().outstanding() == 2 {
                return Err("bail");
            }
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(heap.guards().outstanding(), 0);
    }

    #[test]
    #[should_panic(expected = "guarding unmanaged")]
    fn test_guarding_unmanaged_series_panics() {
        let mut heap = Heap::with_defaults();
        let block = heap.make_array(0);
        heap.guard_series(block);
    }
}
