//! Series: the resizable container built on a node.
//!
//! A series node lives in the SERIES pool. Its content is one of the three
//! [`NodeLayout`]s:
//!
//! ```text
//!   Singular   ┌────────┬────────────┐ ┌ ─ ─ ─ ─ ─┐
//!              │ header │ cell (0/1) │   terminator     implicit end
//!              └────────┴────────────┘ └ ─ ─ ─ ─ ─┘
//!
//!   Dynamic    ┌────────┬─────────────────┐      ┌───────────────────────┐
//!              │ header │ buffer, rest    │ ───▶ │ size-class pool unit  │
//!              └────────┴─────────────────┘      └───────────────────────┘
//!
//!   Pairing    ┌────────┬──────────┬──────────┐
//!              │ header │ key cell │ val cell │
//!              └────────┴──────────┴──────────┘
//! ```
//!
//! The two auxiliary slots, [`Link`] and [`Misc`], are tagged by what they
//! hold instead of being reinterpreted according to series flags.

mod context;
mod ops;

use crate::node::NodeLayout;
use crate::pool::BufferRef;
use crate::value::Cell;

/// Handle to a node in the SERIES pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesId(u32);

impl SeriesId {
    #[inline]
    pub(crate) const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Index of the node in its pool.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SeriesId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "series:{}", self.0)
    }
}

/// A context, identified by its varlist. The keylist is found through the
/// varlist's [`Link::Keylist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextRef(SeriesId);

impl ContextRef {
    #[inline]
    pub(crate) const fn from_varlist(varlist: SeriesId) -> Self {
        Self(varlist)
    }

    /// The value array.
    #[inline]
    pub fn varlist(self) -> SeriesId {
        self.0
    }
}

bitflags::bitflags! {
    /// Kind and state flags of a series.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SeriesFlags: u16 {
        /// Holds cells; traced deeply.
        const ARRAY = 1 << 0;
        /// May not be resized.
        const FIXED_SIZE = 1 << 1;
        /// Byte content is UTF-8 text.
        const UTF8 = 1 << 2;
        /// Values of a context. Link is the keylist.
        const VARLIST = 1 << 3;
        /// Keys of a context.
        const KEYLIST = 1 << 4;
        /// Parameters of a function, headed by the function value.
        const PARAMLIST = 1 << 5;
        /// Alternating keys and values of a map.
        const PAIRLIST = 1 << 6;
        /// Hash index of a map's pairlist.
        const HASHLIST = 1 << 7;
        /// Field descriptors of a foreign struct.
        const STRUCT_FIELDS = 1 << 8;
        /// Children of a GUI object.
        const GOB_PANE = 1 << 9;
        /// Two-cell key/value node.
        const PAIRING = 1 << 10;
    }
}

/// Where the series content lives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Content {
    /// At most one cell, stored in the node. `None` reads as empty.
    Singular(Option<Cell>),
    /// Out-of-line buffer with `rest` element capacity.
    Dynamic { buffer: BufferRef, rest: u32 },
    /// Key cell and value cell.
    Pairing([Cell; 2]),
}

/// The series' link slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Link {
    #[default]
    None,
    /// Varlist → keylist.
    Keylist(SeriesId),
    /// Map pairlist → hash index.
    Hashlist(SeriesId),
    /// Keylist or paramlist → meta-information object.
    Meta(ContextRef),
}

/// The series' misc slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Misc {
    #[default]
    None,
    /// Interned spelling → canon spelling.
    Canon(SeriesId),
    /// Byte size of an image or vector element.
    Size(u32),
    /// Paramlist of a specialization → underlying function's paramlist.
    Underlying(SeriesId),
    /// Native dispatcher index.
    Dispatcher(u32),
}

/// A series node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Series {
    pub(crate) flags: SeriesFlags,
    pub(crate) content: Content,
    pub(crate) link: Link,
    pub(crate) misc: Misc,
}

impl Series {
    pub(crate) fn new(flags: SeriesFlags, content: Content) -> Self {
        Self {
            flags,
            content,
            link: Link::None,
            misc: Misc::None,
        }
    }

    #[inline]
    pub fn flags(&self) -> SeriesFlags {
        self.flags
    }

    #[inline]
    pub fn link(&self) -> Link {
        self.link
    }

    #[inline]
    pub fn misc(&self) -> Misc {
        self.misc
    }

    #[inline]
    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Physical layout, derived from the content variant.
    pub fn layout(&self) -> NodeLayout {
        match self.content {
            Content::Singular(_) => NodeLayout::Singular,
            Content::Dynamic { .. } => NodeLayout::Dynamic,
            Content::Pairing(_) => NodeLayout::Pairing,
        }
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        self.flags.contains(SeriesFlags::ARRAY)
    }

    #[inline]
    pub fn is_varlist(&self) -> bool {
        self.flags.contains(SeriesFlags::VARLIST)
    }

    #[inline]
    pub fn is_pairing(&self) -> bool {
        self.flags.contains(SeriesFlags::PAIRING)
    }

    /// The keylist, if this is a varlist.
    #[inline]
    pub fn keylist(&self) -> Option<SeriesId> {
        match self.link {
            Link::Keylist(keylist) => Some(keylist),
            _ => None,
        }
    }

    /// Out-of-line buffer, if the series has one.
    #[inline]
    pub fn buffer(&self) -> Option<BufferRef> {
        match self.content {
            Content::Dynamic { buffer, .. } => Some(buffer),
            _ => None,
        }
    }
}
