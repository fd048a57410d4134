//! Mark phase.
//!
//! Reaching an array sets its mark bit and pushes it on the worklist
//! instead of recursing into its cells:
//!
//! ```text
//!   root ──▶ queue_array(A)          worklist: [A]
//!            propagate: pop A
//!              cell → queue_array(B)  worklist: [B]
//!              cell → mark_series(S)  (no content to trace)
//!            propagate: pop B ...
//! ```
//!
//! Contexts always go on the worklist as a keylist/varlist pair. Gob trees
//! and struct field trees use a local stack, with the mark bit guarding
//! against cycles.

use crate::device::{DeviceTable, RequestId};
use crate::dump::{describe, DumpEntry, DumpSink, NodeAddr};
use crate::foreign::{FieldKind, Library, LibraryId, Routine, RoutineId, StructValue};
use crate::frame::{Feed, FrameMode, FrameStack};
use crate::gob::{Gob, GobId};
use crate::pool::{Pool, SizeClasses};
use crate::series::{Content, ContextRef, Series, SeriesId};
use crate::trace::{Trace, Tracer};
use crate::value::{Cell, SymbolTable, Value};
use smallvec::SmallVec;

/// A marked array whose cells still need tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MarkEntry {
    pub(crate) array: SeriesId,
    /// Set when `array` is a varlist.
    pub(crate) keylist: Option<SeriesId>,
}

/// Set the mark bit of a managed node. Returns `true` on the first mark.
fn mark_unit<T>(pool: &mut Pool<T>, index: u32) -> bool {
    let name = pool.name();
    let Some(header) = pool.header_mut(index) else {
        crate::gc_panic!("{}:{} reached by GC after being freed", name, index);
    };
    if !header.is_managed() {
        crate::gc_panic!("link to non-managed node reached by GC: {}:{}", name, index);
    }
    header.mark()
}

/// The mark-phase [`Tracer`].
pub(crate) struct Marker<'a, 'd> {
    series: &'a mut Pool<Series>,
    buffers: &'a SizeClasses,
    gobs: &'a mut Pool<Gob>,
    libraries: &'a mut Pool<Library>,
    routines: &'a mut Pool<Routine>,
    devices: &'a DeviceTable,
    symbols: &'a SymbolTable,
    stack: &'a mut Vec<MarkEntry>,
    dump: Option<&'d mut dyn DumpSink>,
    parent: Option<NodeAddr>,
    edge: Option<&'static str>,
    name: Option<&'a str>,
    marked: usize,
}

impl<'a, 'd> Marker<'a, 'd> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        series: &'a mut Pool<Series>,
        buffers: &'a SizeClasses,
        gobs: &'a mut Pool<Gob>,
        libraries: &'a mut Pool<Library>,
        routines: &'a mut Pool<Routine>,
        devices: &'a DeviceTable,
        symbols: &'a SymbolTable,
        stack: &'a mut Vec<MarkEntry>,
        dump: Option<&'d mut dyn DumpSink>,
    ) -> Self {
        debug_assert!(stack.is_empty(), "mark stack not drained by previous cycle");
        Self {
            series,
            buffers,
            gobs,
            libraries,
            routines,
            devices,
            symbols,
            stack,
            dump,
            parent: None,
            edge: None,
            name: None,
            marked: 0,
        }
    }

    /// Start a new group of roots.
    pub(crate) fn section(&mut self, edge: &'static str) {
        self.parent = None;
        self.name = None;
        self.edge = Some(edge);
        if let Some(dump) = self.dump.as_mut() {
            dump.comment(edge);
        }
    }

    /// Nodes marked so far.
    pub(crate) fn finish(self) -> usize {
        debug_assert!(self.stack.is_empty());
        self.marked
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn series_at(&self, id: SeriesId) -> Series {
        match self.series.get(id.index()) {
            Some(series) => *series,
            None => crate::gc_panic!("{} reached by GC after being freed", id),
        }
    }

    fn mark_series_node(&mut self, id: SeriesId) -> bool {
        let fresh = mark_unit(self.series, id.index());
        self.marked += usize::from(fresh);
        fresh
    }

    fn len_of(&self, series: &Series) -> usize {
        match series.content {
            Content::Singular(cell) => usize::from(cell.is_some()),
            Content::Pairing(_) => 2,
            Content::Dynamic { buffer, .. } => self.buffers.get(buffer).len(),
        }
    }

    /// Spelling of a context key, for dumps.
    fn key_name(&self, keylist: SeriesId, n: usize) -> Option<&'a str> {
        let buffers = self.buffers;
        let symbols = self.symbols;
        let value = match self.series.get(keylist.index())?.content {
            Content::Singular(Some(cell)) if n == 0 => *cell.value(),
            Content::Dynamic { buffer, .. } => *buffers.get(buffer).as_cells()?.get(n)?.value(),
            _ => return None,
        };
        match value {
            Value::Typeset {
                symbol: Some(symbol),
                ..
            } => symbols.name(symbol),
            _ => None,
        }
    }

    fn emit(&mut self, addr: NodeAddr, kind: &'static str, size: usize) {
        let Some(dump) = self.dump.as_mut() else {
            return;
        };
        if Some(addr) == self.parent {
            return;
        }
        dump.entry(&DumpEntry {
            addr,
            parent: self.parent,
            kind,
            size,
            edge: self.edge,
            name: self.name,
        });
    }

    fn emit_series(&mut self, id: SeriesId, series: &Series) {
        if self.dump.is_some() {
            let size = self.len_of(series);
            self.emit(NodeAddr::Series(id), describe(series), size);
        }
    }

    // =========================================================================
    // Propagation
    // =========================================================================

    /// Trace queued arrays until the worklist is empty.
    pub(crate) fn propagate(&mut self) {
        let saved = (self.parent, self.edge, self.name);
        while let Some(entry) = self.stack.pop() {
            let series = self.series_at(entry.array);

            if let Some(keylist) = entry.keylist {
                if !self.series.header(keylist.index()).is_marked() {
                    crate::gc_panic!(
                        "context pairing violated: keylist {} of {} is not marked",
                        keylist,
                        entry.array
                    );
                }
                let keys = self.series_at(keylist);
                if self.len_of(&series) > self.len_of(&keys) {
                    crate::gc_panic!("varlist {} is longer than its keylist {}", entry.array, keylist);
                }
            }

            self.parent = Some(NodeAddr::Series(entry.array));
            self.name = None;
            self.edge = Some("<link>");
            series.link.trace(self);
            self.edge = Some("<misc>");
            series.misc.trace(self);
            self.edge = None;

            let buffers = self.buffers;
            match &series.content {
                Content::Singular(cell) => cell.trace(self),
                Content::Pairing(cells) => cells[..].trace(self),
                Content::Dynamic { buffer, .. } => {
                    let Some(cells) = buffers.get(*buffer).as_cells() else {
                        crate::gc_panic!("array {} holds a non-cell buffer", entry.array);
                    };
                    for (n, cell) in cells.iter().enumerate() {
                        if self.dump.is_some() {
                            self.name = entry.keylist.and_then(|keys| self.key_name(keys, n));
                        }
                        cell.trace(self);
                    }
                }
            }
        }
        (self.parent, self.edge, self.name) = saved;
    }

    // =========================================================================
    // Root groups
    // =========================================================================

    /// Queue every managed pairing whose header carries ROOT.
    pub(crate) fn mark_root_pairings(&mut self) {
        let roots: Vec<SeriesId> = self
            .series
            .iter_live()
            .filter(|(_, header, _)| header.is_root() && header.is_managed())
            .map(|(index, _, _)| SeriesId::from_index(index))
            .collect();
        for pairing in roots {
            self.queue_array(pairing);
        }
    }

    /// Trace a frame slot unless it refers to an unmanaged node. The
    /// evaluator parks scratch values it still owns in these slots.
    fn trace_if_managed(&mut self, cell: Option<Cell>) {
        let Some(cell) = cell else {
            return;
        };
        let mut scan = UnmanagedScan {
            series: &*self.series,
            found: false,
        };
        cell.trace(&mut scan);
        if !scan.found {
            cell.trace(self);
        }
    }

    /// Mark everything the frame chain holds, top frame first.
    pub(crate) fn mark_frames(&mut self, frames: &FrameStack) {
        for frame in frames.iter() {
            match frame.feed {
                Feed::Array { array, .. } => {
                    self.edge = Some("<feed>");
                    self.queue_array(array);
                }
                Feed::End => {}
                Feed::Variadic(_) => crate::gc_panic!("variadic feed reached the mark phase"),
            }
            self.edge = Some("<value>");
            self.trace_if_managed(frame.value);

            if frame.mode == FrameMode::GuardArrayOnly {
                continue;
            }

            self.edge = Some("<func>");
            frame.func.trace(self);
            self.edge = Some("<out>");
            frame.out.trace(self);

            if let Some(context) = frame.context {
                self.edge = Some("<context>");
                let varlist = context.varlist();
                if self.series.header(varlist.index()).is_managed() {
                    self.queue_context(context);
                } else if let Some(keylist) = self.series_at(varlist).keylist() {
                    // The args below cover the unmanaged varlist's content.
                    self.queue_array(keylist);
                }
            }

            self.edge = Some("<arg>");
            frame.args[..].trace(self);
            self.edge = Some("<param>");
            self.trace_if_managed(frame.param);
            self.edge = Some("<refine>");
            self.trace_if_managed(frame.refine);
        }
    }
}

/// Looks for directly referenced series that are not managed.
struct UnmanagedScan<'p> {
    series: &'p Pool<Series>,
    found: bool,
}

impl UnmanagedScan<'_> {
    fn check(&mut self, id: SeriesId) {
        self.found |= !self.series.header(id.index()).is_managed();
    }
}

impl Tracer for UnmanagedScan<'_> {
    fn queue_array(&mut self, array: SeriesId) {
        self.check(array);
    }

    fn queue_context(&mut self, context: ContextRef) {
        self.check(context.varlist());
    }

    fn queue_series(&mut self, series: SeriesId) {
        self.check(series);
    }

    fn mark_series(&mut self, series: SeriesId) {
        self.check(series);
    }

    // Gobs, libraries and routines are managed from birth.
    fn mark_gob(&mut self, _gob: GobId) {}
    fn mark_library(&mut self, _library: LibraryId) {}
    fn mark_routine(&mut self, _routine: RoutineId) {}

    fn mark_struct(&mut self, value: StructValue) {
        self.check(value.data);
    }

    fn mark_request(&mut self, _request: RequestId) {}
}

impl Tracer for Marker<'_, '_> {
    fn queue_array(&mut self, array: SeriesId) {
        let series = self.series_at(array);
        if !series.is_array() {
            crate::gc_panic!("{} queued as an array but holds no cells", array);
        }
        if series.is_varlist() {
            crate::gc_panic!("varlist {} queued without its keylist", array);
        }
        self.emit_series(array, &series);
        if self.mark_series_node(array) {
            self.stack.push(MarkEntry {
                array,
                keylist: None,
            });
        }
    }

    fn queue_context(&mut self, context: ContextRef) {
        let varlist = context.varlist();
        let series = self.series_at(varlist);
        if !series.is_varlist() {
            crate::gc_panic!("{} marked as a context but is not a varlist", varlist);
        }
        let Some(keylist) = series.keylist() else {
            crate::gc_panic!("varlist {} has no keylist", varlist);
        };

        let saved = (self.parent, self.edge);
        self.parent = Some(NodeAddr::Series(varlist));
        self.edge = Some("<keylist>");
        let keys = self.series_at(keylist);
        self.emit_series(keylist, &keys);
        (self.parent, self.edge) = saved;
        if self.mark_series_node(keylist) {
            self.stack.push(MarkEntry {
                array: keylist,
                keylist: None,
            });
        }

        self.emit_series(varlist, &series);
        if self.mark_series_node(varlist) {
            self.stack.push(MarkEntry {
                array: varlist,
                keylist: Some(keylist),
            });
        }
    }

    fn queue_series(&mut self, series: SeriesId) {
        let node = self.series_at(series);
        if node.is_varlist() {
            self.queue_context(ContextRef::from_varlist(series));
        } else if node.is_array() {
            self.queue_array(series);
        } else {
            self.mark_series(series);
        }
    }

    fn mark_series(&mut self, id: SeriesId) {
        let series = self.series_at(id);
        if series.is_array() {
            self.queue_series(id);
            return;
        }
        self.emit_series(id, &series);
        if self.mark_series_node(id) {
            let saved = (self.parent, self.edge, self.name);
            self.parent = Some(NodeAddr::Series(id));
            self.name = None;
            self.edge = Some("<link>");
            series.link.trace(self);
            self.edge = Some("<misc>");
            series.misc.trace(self);
            (self.parent, self.edge, self.name) = saved;
        }
    }

    fn mark_gob(&mut self, gob: GobId) {
        let saved = (self.parent, self.edge);
        let mut pending: SmallVec<[GobId; 16]> = SmallVec::new();
        pending.push(gob);

        while let Some(id) = pending.pop() {
            self.emit(NodeAddr::Gob(id), "gob", 1);
            if !mark_unit(self.gobs, id.0) {
                continue;
            }
            self.marked += 1;
            let Some(&node) = self.gobs.get(id.0) else {
                continue;
            };

            self.parent = Some(NodeAddr::Gob(id));
            self.edge = Some("<parent>");
            if let Some(parent) = node.parent {
                pending.push(parent);
            }
            self.edge = Some("<pane>");
            let buffers = self.buffers;
            let children = node
                .pane
                .and_then(|pane| self.series.get(pane.index()))
                .and_then(Series::buffer)
                .and_then(|buffer| buffers.get(buffer).as_gobs());
            if let Some(children) = children {
                pending.extend(children.iter().copied());
            }
            node.trace(self);
        }
        (self.parent, self.edge) = saved;
    }

    fn mark_library(&mut self, library: LibraryId) {
        self.emit(NodeAddr::Library(library), "library", 1);
        if mark_unit(self.libraries, library.0) {
            self.marked += 1;
        }
    }

    fn mark_routine(&mut self, routine: RoutineId) {
        self.emit(NodeAddr::Routine(routine), "routine", 1);
        if !mark_unit(self.routines, routine.0) {
            return;
        }
        self.marked += 1;
        let Some(&node) = self.routines.get(routine.0) else {
            return;
        };
        let saved = (self.parent, self.edge);
        self.parent = Some(NodeAddr::Routine(routine));
        self.edge = None;
        node.trace(self);
        (self.parent, self.edge) = saved;
    }

    fn mark_struct(&mut self, value: StructValue) {
        let data = self.series_at(value.data);
        self.emit_series(value.data, &data);
        if !self.mark_series_node(value.data) {
            // Data is shared by every struct view; its fields are done.
            return;
        }
        self.queue_array(value.spec);

        let buffers = self.buffers;
        let mut pending: SmallVec<[SeriesId; 8]> = SmallVec::new();
        pending.push(value.fields);
        while let Some(fields) = pending.pop() {
            let series = self.series_at(fields);
            self.emit_series(fields, &series);
            if !self.mark_series_node(fields) {
                continue;
            }
            let Some(descriptors) = series
                .buffer()
                .and_then(|buffer| buffers.get(buffer).as_fields())
            else {
                continue;
            };
            for field in descriptors {
                if let Some(spec) = field.spec {
                    self.queue_array(spec);
                }
                if let (FieldKind::Struct, Some(nested)) = (field.kind, field.fields) {
                    pending.push(nested);
                }
            }
        }
    }

    fn mark_request(&mut self, request: RequestId) {
        let devices = self.devices;
        if let Some(request) = devices.request(request) {
            request.trace(self);
        }
    }

    fn set_edge(&mut self, edge: &'static str) {
        self.edge = Some(edge);
    }
}

#[cfg(test)]
mod tests {
    use crate::heap::Heap;
    use crate::value::{ContextKind, Value};

    #[test]
    #[should_panic(expected = "non-managed")]
    fn test_unmanaged_reached_from_managed_panics() {
        let mut heap = Heap::with_defaults();
        let inner = heap.make_array(0);
        let outer = heap.make_array(1);
        heap.append_value(outer, Value::block(inner));
        heap.manage(outer);
        heap.add_global(Value::block(outer));
        heap.recycle(false);
    }

    #[test]
    #[should_panic(expected = "without its keylist")]
    fn test_varlist_as_plain_array_panics() {
        let mut heap = Heap::with_defaults();
        let ctx = heap.make_context(ContextKind::Object, &[]);
        heap.manage_context(ctx);
        heap.add_global(Value::block(ctx.varlist()));
        heap.recycle(false);
    }

    #[test]
    fn test_cyclic_gob_tree_terminates() {
        let mut heap = Heap::with_defaults();
        let a = heap.make_gob();
        let b = heap.make_gob();
        heap.gob_insert(a, b);
        // Point the root back at its child.
        heap.gob_mut(a).parent = Some(b);
        heap.add_global(Value::Gob(b));

        assert_eq!(heap.recycle(false), 0);
        assert!(heap.is_gob_live(a));
        assert!(heap.is_gob_live(b));
    }

    #[test]
    fn test_context_keeps_keylist() {
        let mut heap = Heap::with_defaults();
        let x = heap.intern("x");
        let ctx = heap.make_context(ContextKind::Object, &[x]);
        let keylist = heap.context_keylist(ctx);
        heap.manage_context(ctx);
        heap.add_global(Value::object(ctx));

        assert_eq!(heap.recycle(false), 0);
        assert!(heap.is_series_live(keylist));
        assert_eq!(heap.stats().objects_marked(), 2);
    }
}
