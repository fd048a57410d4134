//! Foreign-function interface nodes.
//!
//! Loaded libraries live in the LIBRARY pool and routine descriptors in
//! the ROUTINE pool. Both are handed to the collector at birth. Struct
//! values are described by a field-descriptor series plus a data binary,
//! and field descriptors may nest further struct descriptors.
//!
//! Releasing a routine may need to read its argument-type series, so the
//! ROUTINE pool is always swept before the SERIES pool.

use crate::heap::Heap;
use crate::node::{NodeFlags, NodeHeader};
use crate::pool::BufferKind;
use crate::series::{SeriesFlags, SeriesId};
use crate::value::{FunctionValue, Symbol};

/// Handle to a node in the LIBRARY pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LibraryId(pub(crate) u32);

/// Handle to a node in the ROUTINE pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutineId(pub(crate) u32);

/// A dynamically loaded library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Library {
    /// Host handle returned by the loader.
    pub handle: usize,
    closed: bool,
}

impl Library {
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

bitflags::bitflags! {
    /// Routine descriptor flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RoutineFlags: u8 {
        /// Native entry point that dispatches to a user function.
        const CALLBACK = 1 << 0;
        /// Takes a variable argument list after the fixed ones.
        const VARIADIC = 1 << 1;
    }
}

/// Foreign-function descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Routine {
    pub flags: RoutineFlags,
    /// Calling convention code.
    pub abi: u8,
    /// Native entry address.
    pub entry: usize,
    pub spec: Option<SeriesId>,
    /// One type code byte per argument, return type first.
    pub arg_types: SeriesId,
    /// STRUCT! values describing struct-typed arguments.
    pub arg_structs: Option<SeriesId>,
    /// Scratch memory kept alive for the lifetime of the routine.
    pub extra_mem: Option<SeriesId>,
    /// User function a callback dispatches to.
    pub callback: Option<FunctionValue>,
    /// Fixed arguments of a variadic routine.
    pub fixed_args: Option<SeriesId>,
    /// All arguments of the last variadic call.
    pub all_args: Option<SeriesId>,
    pub library: Option<LibraryId>,
}

impl Routine {
    /// A plain routine with only argument types set.
    pub fn new(entry: usize, arg_types: SeriesId) -> Self {
        Self {
            flags: RoutineFlags::empty(),
            abi: 0,
            entry,
            spec: None,
            arg_types,
            arg_structs: None,
            extra_mem: None,
            callback: None,
            fixed_args: None,
            all_args: None,
            library: None,
        }
    }

    #[inline]
    pub fn is_callback(&self) -> bool {
        self.flags.contains(RoutineFlags::CALLBACK)
    }
}

/// What a struct field stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Native scalar with the given type code.
    Primitive(u8),
    /// Nested struct described by the field's own field series.
    Struct,
}

/// Field descriptor inside a struct's field series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructField {
    /// Spec block the field was built from.
    pub spec: Option<SeriesId>,
    /// Nested field descriptors, for [`FieldKind::Struct`].
    pub fields: Option<SeriesId>,
    pub name: Option<Symbol>,
    pub kind: FieldKind,
    pub offset: u32,
    pub dimension: u32,
    pub size: u32,
}

impl StructField {
    /// A scalar field.
    pub fn primitive(name: Option<Symbol>, type_code: u8, offset: u32, size: u32) -> Self {
        Self {
            spec: None,
            fields: None,
            name,
            kind: FieldKind::Primitive(type_code),
            offset,
            dimension: 1,
            size,
        }
    }

    /// A field holding a nested struct.
    pub fn nested(name: Option<Symbol>, fields: SeriesId, offset: u32, size: u32) -> Self {
        Self {
            spec: None,
            fields: Some(fields),
            name,
            kind: FieldKind::Struct,
            offset,
            dimension: 1,
            size,
        }
    }
}

/// A STRUCT! value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructValue {
    /// Spec block.
    pub spec: SeriesId,
    /// Field descriptors.
    pub fields: SeriesId,
    /// Backing bytes.
    pub data: SeriesId,
}

/// Host side of the foreign-function layer, consulted when the sweeper
/// frees libraries and routines.
pub trait ForeignHost {
    /// Unload a library.
    fn close_library(&mut self, handle: usize);

    /// Release native resources of a routine (closures, cif structures).
    /// `arg_types` is the content of the routine's argument-type series.
    fn release_routine(&mut self, routine: &Routine, arg_types: &[u8]);
}

/// Host that owns no native resources.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopForeignHost;

impl ForeignHost for NoopForeignHost {
    fn close_library(&mut self, _handle: usize) {}

    fn release_routine(&mut self, _routine: &Routine, _arg_types: &[u8]) {}
}

// =============================================================================
// Heap operations
// =============================================================================

impl Heap {
    /// Register a loaded library. The node is managed from birth.
    pub fn make_library(&mut self, handle: usize) -> LibraryId {
        let library = Library {
            handle,
            closed: false,
        };
        let header = NodeHeader::new(NodeFlags::MANAGED);
        let index = self.with_retry(|heap| {
            heap.libraries
                .alloc_node(header, library, &mut heap.budget)
        });
        self.charge(self.libraries.spec().wide);
        LibraryId(index)
    }

    /// A live library.
    pub fn library(&self, id: LibraryId) -> &Library {
        match self.libraries.get(id.0) {
            Some(library) => library,
            None => crate::gc_panic!("library {} used after free", id.0),
        }
    }

    /// True while the library node has not been swept.
    pub fn is_library_live(&self, id: LibraryId) -> bool {
        self.libraries.get(id.0).is_some()
    }

    /// Unload a library now instead of waiting for the sweep.
    pub fn close_library(&mut self, id: LibraryId) {
        let Some(library) = self.libraries.get_mut(id.0) else {
            crate::gc_panic!("library {} used after free", id.0);
        };
        if !library.closed {
            library.closed = true;
            let handle = library.handle;
            self.host.close_library(handle);
        }
    }

    /// Register a routine descriptor. The node is managed from birth, so
    /// every series it names must already be managed.
    pub fn make_routine(&mut self, routine: Routine) -> RoutineId {
        let header = NodeHeader::new(NodeFlags::MANAGED);
        let index = self.with_retry(|heap| {
            heap.routines
                .alloc_node(header, routine, &mut heap.budget)
        });
        self.charge(self.routines.spec().wide);
        RoutineId(index)
    }

    /// A live routine.
    pub fn routine(&self, id: RoutineId) -> &Routine {
        match self.routines.get(id.0) {
            Some(routine) => routine,
            None => crate::gc_panic!("routine {} used after free", id.0),
        }
    }

    /// True while the routine node has not been swept.
    pub fn is_routine_live(&self, id: RoutineId) -> bool {
        self.routines.get(id.0).is_some()
    }

    /// Build a managed field-descriptor series.
    pub fn make_field_series(&mut self, fields: &[StructField]) -> SeriesId {
        let series = self.make_series_of(
            BufferKind::Fields,
            SeriesFlags::STRUCT_FIELDS,
            fields.len(),
        );
        self.with_buffer_mut(series, |buffer| {
            if let crate::pool::Buffer::Fields(v) = buffer {
                v.extend_from_slice(fields);
            }
        });
        self.manage(series);
        series
    }

    /// Field descriptors of a field series.
    pub fn struct_fields(&self, fields: SeriesId) -> &[StructField] {
        self.buffer_of(fields)
            .and_then(|buffer| buffer.as_fields())
            .unwrap_or(&[])
    }

    /// Build a struct value with zeroed data. `spec` must be managed; the
    /// field series and data binary are created managed.
    pub fn make_struct(
        &mut self,
        spec: SeriesId,
        fields: &[StructField],
        data_size: usize,
    ) -> StructValue {
        let fields = self.make_field_series(fields);
        let data = self.make_binary(&vec![0u8; data_size]);
        self.manage(data);
        StructValue { spec, fields, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct RecordingHost {
        closed: Rc<RefCell<Vec<usize>>>,
    }

    impl ForeignHost for RecordingHost {
        fn close_library(&mut self, handle: usize) {
            self.closed.borrow_mut().push(handle);
        }

        fn release_routine(&mut self, _routine: &Routine, _arg_types: &[u8]) {}
    }

    #[test]
    fn test_library_is_managed_from_birth() {
        let mut heap = Heap::with_defaults();
        let lib = heap.make_library(0xdead);
        assert!(heap.libraries.header(lib.0).is_managed());
        assert!(!heap.library(lib).is_closed());
    }

    #[test]
    fn test_close_library_calls_host_once() {
        let closed = Rc::new(RefCell::new(Vec::new()));
        let mut heap = Heap::with_defaults();
        heap.set_foreign_host(Box::new(RecordingHost {
            closed: closed.clone(),
        }));

        let lib = heap.make_library(7);
        heap.close_library(lib);
        heap.close_library(lib);
        assert_eq!(*closed.borrow(), vec![7]);
    }

    #[test]
    fn test_make_struct_builds_managed_parts() {
        let mut heap = Heap::with_defaults();
        let spec = heap.make_array(0);
        heap.manage(spec);

        let value = heap.make_struct(
            spec,
            &[StructField::primitive(None, 3, 0, 4)],
            4,
        );
        assert!(heap.is_managed(value.fields));
        assert!(heap.is_managed(value.data));
        assert_eq!(heap.struct_fields(value.fields).len(), 1);
        assert_eq!(heap.bytes(value.data), &[0, 0, 0, 0]);
    }
}
