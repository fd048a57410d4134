//! Value cells.
//!
//! A [`Cell`] is a node header plus a [`Value`]. Every kind of value the
//! runtime knows about is one variant of `Value`; variants that reference
//! heap nodes carry typed handles, never raw pointers.

mod symbol;

pub use symbol::{Symbol, SymbolTable};

use crate::device::RequestId;
use crate::foreign::{LibraryId, RoutineId, StructValue};
use crate::gob::GobId;
use crate::node::NodeHeader;
use crate::series::{ContextRef, SeriesId};

/// A value slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    header: NodeHeader,
    value: Value,
}

impl Cell {
    /// End marker. Also used for output slots nothing has written yet.
    pub const END: Cell = Cell {
        header: NodeHeader::END_CELL,
        value: Value::Unset,
    };

    /// A writable cell holding `value`.
    #[inline]
    pub const fn new(value: Value) -> Self {
        Self {
            header: NodeHeader::CELL,
            value,
        }
    }

    #[inline]
    pub fn header(&self) -> NodeHeader {
        self.header
    }

    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        self.header.is_end()
    }

    /// Overwrite the cell, clearing any end flag.
    #[inline]
    pub fn set(&mut self, value: Value) {
        *self = Cell::new(value);
    }
}

impl Default for Cell {
    fn default() -> Self {
        Cell::new(Value::Unset)
    }
}

impl From<Value> for Cell {
    #[inline]
    fn from(value: Value) -> Self {
        Cell::new(value)
    }
}

// =============================================================================
// Kinds
// =============================================================================

/// Byte-oriented series kinds. Traced shallowly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesKind {
    String,
    Binary,
    File,
    Email,
    Url,
    Tag,
    Bitset,
    Image,
    Vector,
}

/// Array kinds. Traced deeply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    Block,
    Group,
    Path,
    SetPath,
    GetPath,
    LitPath,
}

/// Context kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Object,
    Module,
    Port,
    Frame,
    Error,
}

/// Word kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WordKind {
    Word,
    SetWord,
    GetWord,
    LitWord,
    Refinement,
    Issue,
}

/// What a word is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Binding {
    /// Not bound.
    #[default]
    Unbound,
    /// Bound to a function's paramlist; resolved through the running frame.
    Relative(SeriesId),
    /// Bound directly to a context.
    Specific(ContextRef),
}

/// Implementation behind a function value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncBody {
    /// Built-in native, identified by dispatcher index.
    Native(u32),
    /// Datatype action, identified by action number.
    Action(u32),
    /// Interpreted body block.
    User(SeriesId),
    /// Extension command whose body block carries the call spec.
    Command(SeriesId),
    /// Call into a loaded library.
    Routine(RoutineId),
    /// Native entry point that calls back into a user function.
    Callback(RoutineId),
    /// Another function with some arguments pre-filled in an exemplar frame.
    Specialized(ContextRef),
}

/// A function value. The paramlist's first cell holds a copy of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionValue {
    /// Parameter descriptors, headed by the function itself.
    pub paramlist: SeriesId,
    /// Help/spec block.
    pub spec: Option<SeriesId>,
    /// What runs.
    pub body: FuncBody,
}

/// Where a VARARGS! value pulls its values from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarargsSource {
    /// A block made with MAKE VARARGS!.
    Array {
        /// The block.
        array: SeriesId,
        /// Next position.
        index: u32,
    },
    /// A frame's remaining arguments.
    Frame(ContextRef),
}

/// A VARARGS! value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarargsValue {
    pub source: VarargsSource,
    /// Values already pulled ahead from the source.
    pub subfeed: Option<SeriesId>,
}

/// What an event refers back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventModel {
    #[default]
    None,
    Port(ContextRef),
    Object(ContextRef),
    Gob(GobId),
    /// An in-flight device request.
    Device(RequestId),
}

/// An EVENT! value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventValue {
    /// Event type code.
    pub kind: u8,
    pub model: EventModel,
}

// =============================================================================
// Value
// =============================================================================

/// Payload of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    // Scalars: hold no references.
    #[default]
    Unset,
    Blank,
    Logic(bool),
    Integer(i64),
    Decimal(f64),
    Char(char),
    Time(i64),
    /// Opaque host pointer.
    Handle(usize),
    /// Key or parameter descriptor.
    Typeset {
        bits: u64,
        symbol: Option<Symbol>,
    },

    Datatype {
        type_id: u8,
        spec: Option<SeriesId>,
    },
    Series {
        kind: SeriesKind,
        series: SeriesId,
        index: u32,
    },
    Array {
        kind: ArrayKind,
        array: SeriesId,
        index: u32,
    },
    Context {
        kind: ContextKind,
        context: ContextRef,
        spec: Option<ContextRef>,
    },
    Word {
        kind: WordKind,
        symbol: Symbol,
        binding: Binding,
    },
    Function(FunctionValue),
    Varargs(VarargsValue),
    Map {
        pairlist: SeriesId,
    },
    /// Lightweight key/value handle.
    Pairing(SeriesId),
    Library {
        library: LibraryId,
        spec: Option<SeriesId>,
    },
    Struct(StructValue),
    Gob(GobId),
    Event(EventValue),
}

impl Value {
    /// A BLOCK! at its head.
    #[inline]
    pub fn block(array: SeriesId) -> Self {
        Value::Array {
            kind: ArrayKind::Block,
            array,
            index: 0,
        }
    }

    /// A STRING! at its head.
    #[inline]
    pub fn string(series: SeriesId) -> Self {
        Value::Series {
            kind: SeriesKind::String,
            series,
            index: 0,
        }
    }

    /// An OBJECT! with no spec.
    #[inline]
    pub fn object(context: ContextRef) -> Self {
        Value::Context {
            kind: ContextKind::Object,
            context,
            spec: None,
        }
    }

    /// A plain word with the given binding.
    #[inline]
    pub fn word(symbol: Symbol, binding: Binding) -> Self {
        Value::Word {
            kind: WordKind::Word,
            symbol,
            binding,
        }
    }

    /// True for values that can never reference a node.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Unset
                | Value::Blank
                | Value::Logic(_)
                | Value::Integer(_)
                | Value::Decimal(_)
                | Value::Char(_)
                | Value::Time(_)
                | Value::Handle(_)
                | Value::Typeset { .. }
        )
    }

    /// Short kind name used in diagnostics and memory dumps.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Unset => "unset",
            Value::Blank => "blank",
            Value::Logic(_) => "logic",
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::Char(_) => "char",
            Value::Time(_) => "time",
            Value::Handle(_) => "handle",
            Value::Typeset { .. } => "typeset",
            Value::Datatype { .. } => "datatype",
            Value::Series { kind, .. } => match kind {
                SeriesKind::String => "string",
                SeriesKind::Binary => "binary",
                SeriesKind::File => "file",
                SeriesKind::Email => "email",
                SeriesKind::Url => "url",
                SeriesKind::Tag => "tag",
                SeriesKind::Bitset => "bitset",
                SeriesKind::Image => "image",
                SeriesKind::Vector => "vector",
            },
            Value::Array { kind, .. } => match kind {
                ArrayKind::Block => "block",
                ArrayKind::Group => "group",
                ArrayKind::Path => "path",
                ArrayKind::SetPath => "set-path",
                ArrayKind::GetPath => "get-path",
                ArrayKind::LitPath => "lit-path",
            },
            Value::Context { kind, .. } => match kind {
                ContextKind::Object => "object",
                ContextKind::Module => "module",
                ContextKind::Port => "port",
                ContextKind::Frame => "frame",
                ContextKind::Error => "error",
            },
            Value::Word { kind, .. } => match kind {
                WordKind::Word => "word",
                WordKind::SetWord => "set-word",
                WordKind::GetWord => "get-word",
                WordKind::LitWord => "lit-word",
                WordKind::Refinement => "refinement",
                WordKind::Issue => "issue",
            },
            Value::Function(_) => "function",
            Value::Varargs(_) => "varargs",
            Value::Map { .. } => "map",
            Value::Pairing(_) => "pairing",
            Value::Library { .. } => "library",
            Value::Struct(_) => "struct",
            Value::Gob(_) => "gob",
            Value::Event(_) => "event",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_cell() {
        assert!(Cell::END.is_end());
        assert!(!Cell::new(Value::Blank).is_end());

        let mut cell = Cell::END;
        cell.set(Value::Integer(3));
        assert!(!cell.is_end());
        assert_eq!(cell.value(), &Value::Integer(3));
    }

    #[test]
    fn test_scalar_classification() {
        assert!(Value::Integer(1).is_scalar());
        assert!(Value::Typeset {
            bits: 0,
            symbol: None
        }
        .is_scalar());
        assert!(!Value::block(SeriesId::from_index(0)).is_scalar());
        assert_eq!(Value::block(SeriesId::from_index(0)).kind_name(), "block");
    }
}
