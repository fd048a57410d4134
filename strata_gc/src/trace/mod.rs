//! Per-kind tracing rules.
//!
//! [`Trace`] answers "what does this reference" for every value kind and
//! for the node payloads that hold handles. Implementations only report
//! edges to the [`Tracer`]; marking, deduplication and the worklist belong
//! to the collector.

pub mod tracer;

pub use tracer::{CountingTracer, NullTracer, Tracer};

use crate::device::Request;
use crate::foreign::{FieldKind, Routine, StructField};
use crate::gob::{Gob, GobContent, GobData};
use crate::series::{Link, Misc};
use crate::value::{
    Binding, Cell, EventModel, EventValue, FuncBody, FunctionValue, Value, VarargsSource,
    VarargsValue,
};

/// Something that can report the nodes it references.
///
/// Implementations must report every handle they hold. A missed edge lets
/// the sweeper reuse a node that is still in use.
///
/// # Example
///
/// ```ignore
/// use strata_gc::{Trace, Tracer};
///
/// struct Pending {
///     block: SeriesId,
///     port: Option<ContextRef>,
/// }
///
/// impl Trace for Pending {
///     fn trace(&self, tracer: &mut dyn Tracer) {
///         tracer.queue_array(self.block);
///         if let Some(port) = self.port {
///             tracer.queue_context(port);
///         }
///     }
/// }
/// ```
pub trait Trace {
    /// Report every node this value references.
    fn trace(&self, tracer: &mut dyn Tracer);
}

// =============================================================================
// Containers
// =============================================================================

impl<T: Trace> Trace for Option<T> {
    fn trace(&self, tracer: &mut dyn Tracer) {
        if let Some(inner) = self {
            inner.trace(tracer);
        }
    }
}

impl<T: Trace> Trace for [T] {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for item in self {
            item.trace(tracer);
        }
    }
}

impl<T: Trace> Trace for Vec<T> {
    fn trace(&self, tracer: &mut dyn Tracer) {
        self.as_slice().trace(tracer);
    }
}

// =============================================================================
// Cells and values
// =============================================================================

impl Trace for Cell {
    #[inline]
    fn trace(&self, tracer: &mut dyn Tracer) {
        // End cells are unwritten slots.
        if !self.is_end() {
            self.value().trace(tracer);
        }
    }
}

impl Trace for Value {
    fn trace(&self, tracer: &mut dyn Tracer) {
        match *self {
            Value::Unset
            | Value::Blank
            | Value::Logic(_)
            | Value::Integer(_)
            | Value::Decimal(_)
            | Value::Char(_)
            | Value::Time(_)
            | Value::Handle(_)
            | Value::Typeset { .. } => {}

            Value::Datatype { spec, .. } => {
                if let Some(spec) = spec {
                    tracer.queue_array(spec);
                }
            }
            Value::Series { series, .. } => tracer.mark_series(series),
            Value::Array { array, .. } => tracer.queue_array(array),
            Value::Context { context, spec, .. } => {
                tracer.queue_context(context);
                if let Some(spec) = spec {
                    tracer.queue_context(spec);
                }
            }
            Value::Word { binding, .. } => binding.trace(tracer),
            Value::Function(ref func) => func.trace(tracer),
            Value::Varargs(ref varargs) => varargs.trace(tracer),
            Value::Map { pairlist } => tracer.queue_array(pairlist),
            Value::Pairing(pairing) => tracer.queue_array(pairing),
            Value::Library { library, spec } => {
                tracer.mark_library(library);
                if let Some(spec) = spec {
                    tracer.queue_array(spec);
                }
            }
            Value::Struct(value) => tracer.mark_struct(value),
            Value::Gob(gob) => tracer.mark_gob(gob),
            Value::Event(ref event) => event.trace(tracer),
        }
    }
}

impl Trace for Binding {
    #[inline]
    fn trace(&self, tracer: &mut dyn Tracer) {
        match *self {
            Binding::Unbound => {}
            Binding::Relative(paramlist) => tracer.queue_array(paramlist),
            Binding::Specific(context) => tracer.queue_context(context),
        }
    }
}

impl Trace for FunctionValue {
    fn trace(&self, tracer: &mut dyn Tracer) {
        tracer.queue_array(self.paramlist);
        if let Some(spec) = self.spec {
            tracer.queue_array(spec);
        }
        match self.body {
            FuncBody::Native(_) | FuncBody::Action(_) => {}
            FuncBody::User(body) | FuncBody::Command(body) => tracer.queue_array(body),
            FuncBody::Routine(routine) | FuncBody::Callback(routine) => {
                tracer.mark_routine(routine)
            }
            FuncBody::Specialized(exemplar) => tracer.queue_context(exemplar),
        }
    }
}

impl Trace for VarargsValue {
    fn trace(&self, tracer: &mut dyn Tracer) {
        match self.source {
            VarargsSource::Array { array, .. } => tracer.queue_array(array),
            VarargsSource::Frame(context) => tracer.queue_context(context),
        }
        // A subfeed may be a frame's varlist.
        if let Some(subfeed) = self.subfeed {
            tracer.queue_series(subfeed);
        }
    }
}

impl Trace for EventValue {
    fn trace(&self, tracer: &mut dyn Tracer) {
        match self.model {
            EventModel::None => {}
            EventModel::Port(context) | EventModel::Object(context) => {
                tracer.queue_context(context)
            }
            EventModel::Gob(gob) => tracer.mark_gob(gob),
            EventModel::Device(request) => tracer.mark_request(request),
        }
    }
}

// =============================================================================
// Series slots
// =============================================================================

impl Trace for Link {
    fn trace(&self, tracer: &mut dyn Tracer) {
        match *self {
            // Keylists are marked together with their varlist.
            Link::None | Link::Keylist(_) => {}
            Link::Hashlist(hashlist) => tracer.mark_series(hashlist),
            Link::Meta(meta) => tracer.queue_context(meta),
        }
    }
}

impl Trace for Misc {
    fn trace(&self, tracer: &mut dyn Tracer) {
        match *self {
            Misc::None | Misc::Size(_) | Misc::Dispatcher(_) => {}
            Misc::Canon(canon) => tracer.mark_series(canon),
            Misc::Underlying(paramlist) => tracer.queue_array(paramlist),
        }
    }
}

// =============================================================================
// Node payloads
// =============================================================================

impl Trace for Routine {
    fn trace(&self, tracer: &mut dyn Tracer) {
        if let Some(spec) = self.spec {
            tracer.queue_array(spec);
        }
        tracer.mark_series(self.arg_types);
        if let Some(structs) = self.arg_structs {
            tracer.queue_array(structs);
        }
        if let Some(extra) = self.extra_mem {
            tracer.mark_series(extra);
        }
        self.callback.trace(tracer);
        if let Some(fixed) = self.fixed_args {
            tracer.queue_array(fixed);
        }
        if let Some(all) = self.all_args {
            tracer.queue_array(all);
        }
        if let Some(library) = self.library {
            tracer.mark_library(library);
        }
    }
}

impl Trace for StructField {
    /// Reports the spec block and nested field series. Walking into nested
    /// fields is left to the collector, which guards against cycles.
    fn trace(&self, tracer: &mut dyn Tracer) {
        if let Some(spec) = self.spec {
            tracer.queue_array(spec);
        }
        if let (FieldKind::Struct, Some(fields)) = (self.kind, self.fields) {
            tracer.mark_series(fields);
        }
    }
}

impl Trace for Gob {
    /// Reports the pane, content and data. Parent and children are walked
    /// by the collector's gob-tree traversal.
    fn trace(&self, tracer: &mut dyn Tracer) {
        if let Some(pane) = self.pane {
            tracer.mark_series(pane);
        }
        match self.content {
            GobContent::None => {}
            GobContent::Text(series) | GobContent::Image(series) => tracer.mark_series(series),
            GobContent::Draw(array) | GobContent::Effect(array) => tracer.queue_array(array),
        }
        match self.data {
            GobData::None | GobData::Integer(_) => {}
            GobData::Object(context) => tracer.queue_context(context),
            GobData::Block(array) => tracer.queue_array(array),
            GobData::String(series) | GobData::Binary(series) => tracer.mark_series(series),
        }
    }
}

impl Trace for Request {
    fn trace(&self, tracer: &mut dyn Tracer) {
        if let Some(port) = self.port {
            tracer.queue_context(port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreign::{LibraryId, RoutineId};
    use crate::series::{ContextRef, SeriesId};
    use crate::value::{ArrayKind, ContextKind};

    fn id(n: u32) -> SeriesId {
        SeriesId::from_index(n)
    }

    #[test]
    fn test_scalars_report_nothing() {
        let mut tracer = CountingTracer::new();
        for value in [
            Value::Unset,
            Value::Integer(1),
            Value::Decimal(2.5),
            Value::Char('x'),
            Value::Typeset {
                bits: 7,
                symbol: None,
            },
        ] {
            value.trace(&mut tracer);
        }
        assert_eq!(tracer.total(), 0);
    }

    #[test]
    fn test_end_cells_are_skipped() {
        let mut tracer = CountingTracer::new();
        Cell::END.trace(&mut tracer);
        Cell::new(Value::block(id(1))).trace(&mut tracer);
        assert_eq!(tracer.arrays, 1);
    }

    #[test]
    fn test_varargs_subfeed_dispatches_on_kind() {
        let mut tracer = CountingTracer::new();
        VarargsValue {
            source: VarargsSource::Array {
                array: id(1),
                index: 0,
            },
            subfeed: Some(id(2)),
        }
        .trace(&mut tracer);
        assert_eq!(tracer.arrays, 1);
        assert_eq!(tracer.series, 1);
    }

    #[test]
    fn test_context_reports_spec_too() {
        let mut tracer = CountingTracer::new();
        Value::Context {
            kind: ContextKind::Port,
            context: ContextRef::from_varlist(id(1)),
            spec: Some(ContextRef::from_varlist(id(2))),
        }
        .trace(&mut tracer);
        assert_eq!(tracer.contexts, 2);
    }

    #[test]
    fn test_function_reports_paramlist_spec_and_body() {
        let mut tracer = CountingTracer::new();
        FunctionValue {
            paramlist: id(1),
            spec: Some(id(2)),
            body: FuncBody::User(id(3)),
        }
        .trace(&mut tracer);
        assert_eq!(tracer.arrays, 3);

        let mut tracer = CountingTracer::new();
        FunctionValue {
            paramlist: id(1),
            spec: None,
            body: FuncBody::Routine(RoutineId(0)),
        }
        .trace(&mut tracer);
        assert_eq!((tracer.arrays, tracer.routines), (1, 1));
    }

    #[test]
    fn test_relative_and_specific_bindings() {
        let mut tracer = CountingTracer::new();
        Binding::Relative(id(1)).trace(&mut tracer);
        Binding::Specific(ContextRef::from_varlist(id(2))).trace(&mut tracer);
        Binding::Unbound.trace(&mut tracer);
        assert_eq!((tracer.arrays, tracer.contexts), (1, 1));
    }

    #[test]
    fn test_keylist_link_is_not_reported() {
        let mut tracer = CountingTracer::new();
        Link::Keylist(id(1)).trace(&mut tracer);
        assert_eq!(tracer.total(), 0);

        Link::Hashlist(id(2)).trace(&mut tracer);
        Misc::Canon(id(3)).trace(&mut tracer);
        assert_eq!(tracer.series, 2);
    }

    #[test]
    fn test_routine_reports_every_part() {
        let mut routine = Routine::new(0, id(1));
        routine.spec = Some(id(2));
        routine.arg_structs = Some(id(3));
        routine.extra_mem = Some(id(4));
        routine.fixed_args = Some(id(5));
        routine.all_args = Some(id(6));
        routine.library = Some(LibraryId(0));
        routine.callback = Some(FunctionValue {
            paramlist: id(7),
            spec: None,
            body: FuncBody::Native(1),
        });

        let mut tracer = CountingTracer::new();
        routine.trace(&mut tracer);
        assert_eq!(tracer.arrays, 5);
        assert_eq!(tracer.series, 2);
        assert_eq!(tracer.libraries, 1);
    }

    #[test]
    fn test_values_in_vec() {
        let values = vec![
            Value::Array {
                kind: ArrayKind::Path,
                array: id(1),
                index: 0,
            },
            Value::Blank,
            Value::Map { pairlist: id(2) },
        ];
        let mut tracer = CountingTracer::new();
        values.trace(&mut tracer);
        assert_eq!(tracer.arrays, 2);
    }
}
