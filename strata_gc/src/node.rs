//! Universal node header.
//!
//! Every unit handed out by a [`Pool`](crate::pool::Pool) starts with a
//! one-byte header. Reading that byte alone answers whether the unit is
//! free, a value cell, an end marker, or a series node, and it never
//! collides with the first byte of UTF-8 text:
//!
//! ```text
//!   bit:   7       6      5     4      3         2        1      0
//!        ┌───────┬──────┬─────┬──────┬─────────┬────────┬──────┬──────┐
//!        │ VALID │  0   │ END │ CELL │ MANAGED │ MARKED │ ROOT │  -   │
//!        └───────┴──────┴─────┴──────┴─────────┴────────┴──────┴──────┘
//!
//!   0x00         free unit (next-free link lives in the unit body)
//!   0x80..=0xBF  live node: a UTF-8 continuation byte, never a lead byte
//!   otherwise    text
//! ```

use std::fmt;

bitflags::bitflags! {
    /// Raw header bits shared by every node-shaped unit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u8 {
        /// Set on every allocated unit. A zero header means free.
        const VALID = 1 << 7;
        /// Terminates an implicit sequence.
        const END = 1 << 5;
        /// The unit holds a full value cell rather than bookkeeping only.
        const CELL = 1 << 4;
        /// Lifetime has been handed to the collector.
        const MANAGED = 1 << 3;
        /// Reached during the current mark phase.
        const MARKED = 1 << 2;
        /// The node is itself a collection root.
        const ROOT = 1 << 1;
    }
}

/// Header byte at the front of every node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeHeader(NodeFlags);

impl NodeHeader {
    /// Header of a unit sitting on a free list.
    pub const FREE: NodeHeader = NodeHeader(NodeFlags::empty());

    /// Header of a freshly allocated, unmanaged series node.
    pub const SERIES: NodeHeader = NodeHeader(NodeFlags::VALID);

    /// Header of a writable value cell.
    pub const CELL: NodeHeader = NodeHeader(NodeFlags::VALID.union(NodeFlags::CELL));

    /// Header of a full cell that marks the end of a sequence.
    pub const END_CELL: NodeHeader = NodeHeader(
        NodeFlags::VALID
            .union(NodeFlags::CELL)
            .union(NodeFlags::END),
    );

    /// Header-only end marker. Readable as an end, never writable as a cell.
    pub const TERMINATOR: NodeHeader = NodeHeader(NodeFlags::VALID.union(NodeFlags::END));

    /// Build a header from raw flags, forcing VALID.
    #[inline]
    pub const fn new(flags: NodeFlags) -> Self {
        Self(flags.union(NodeFlags::VALID))
    }

    /// Decode a header byte. Returns `None` for bytes that cannot be a header.
    pub fn from_byte(byte: u8) -> Option<Self> {
        if byte == 0 {
            return Some(Self::FREE);
        }
        let flags = NodeFlags::from_bits(byte)?;
        flags.contains(NodeFlags::VALID).then_some(Self(flags))
    }

    /// The raw header byte.
    #[inline]
    pub const fn to_byte(self) -> u8 {
        self.0.bits()
    }

    /// The raw flags.
    #[inline]
    pub const fn flags(self) -> NodeFlags {
        self.0
    }

    #[inline]
    pub fn is_free(self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0.contains(NodeFlags::VALID)
    }

    #[inline]
    pub fn is_end(self) -> bool {
        self.0.contains(NodeFlags::END)
    }

    #[inline]
    pub fn is_cell(self) -> bool {
        self.0.contains(NodeFlags::CELL)
    }

    #[inline]
    pub fn is_managed(self) -> bool {
        self.0.contains(NodeFlags::MANAGED)
    }

    #[inline]
    pub fn is_marked(self) -> bool {
        self.0.contains(NodeFlags::MARKED)
    }

    #[inline]
    pub fn is_root(self) -> bool {
        self.0.contains(NodeFlags::ROOT)
    }

    /// Hand the node to the collector. Returns `false` if it already was.
    #[inline]
    pub fn set_managed(&mut self) -> bool {
        let fresh = !self.is_managed();
        self.0.insert(NodeFlags::MANAGED);
        fresh
    }

    /// Set the reachable bit. Returns `true` if the node was not yet marked.
    #[inline]
    pub fn mark(&mut self) -> bool {
        let fresh = !self.is_marked();
        self.0.insert(NodeFlags::MARKED);
        fresh
    }

    #[inline]
    pub fn unmark(&mut self) {
        self.0.remove(NodeFlags::MARKED);
    }

    #[inline]
    pub fn set_root(&mut self, root: bool) {
        self.0.set(NodeFlags::ROOT, root);
    }

    /// Classify this header the same way [`Detected::from_prefix`] would.
    pub fn detect(self) -> Detected {
        Detected::from_prefix(&[self.to_byte()])
    }
}

impl fmt::Debug for NodeHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHeader({:#04x} {:?})", self.to_byte(), self.0)
    }
}

/// What a pointer-sized prefix of memory turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detected {
    /// A free unit, or empty text: a single zero byte can't tell them apart.
    Free,
    /// A writable value cell.
    Cell,
    /// A full cell carrying the end flag.
    EndCell,
    /// A header-only end marker (the slot after a singular array's cell).
    Terminator,
    /// A series node.
    Series,
    /// Anything else is text.
    Utf8,
}

impl Detected {
    /// Classify memory by inspecting only its first byte.
    pub fn from_prefix(prefix: &[u8]) -> Detected {
        let Some(&byte) = prefix.first() else {
            return Detected::Free;
        };
        if byte == 0 {
            return Detected::Free;
        }
        // Valid headers are exactly the UTF-8 continuation bytes.
        if byte & 0xC0 != 0x80 {
            return Detected::Utf8;
        }
        let flags = NodeFlags::from_bits_truncate(byte);
        match (
            flags.contains(NodeFlags::CELL),
            flags.contains(NodeFlags::END),
        ) {
            (true, true) => Detected::EndCell,
            (true, false) => Detected::Cell,
            (false, true) => Detected::Terminator,
            (false, false) => Detected::Series,
        }
    }

    /// True for anything that is a node rather than text.
    #[inline]
    pub fn is_node(self) -> bool {
        !matches!(self, Detected::Utf8)
    }
}

/// Physical layout of a series node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLayout {
    /// Bookkeeping in the node, content in an out-of-line buffer drawn from
    /// a size-class pool.
    Dynamic,
    /// Zero or one cell embedded in the node. The slot after it reads as a
    /// [`Detected::Terminator`].
    Singular,
    /// Two adjacent cells and no series bookkeeping.
    Pairing,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_headers() -> impl Iterator<Item = NodeHeader> {
        (0u8..64).map(|bits| {
            let mut flags = NodeFlags::empty();
            for (i, flag) in [
                NodeFlags::END,
                NodeFlags::CELL,
                NodeFlags::MANAGED,
                NodeFlags::MARKED,
                NodeFlags::ROOT,
            ]
            .into_iter()
            .enumerate()
            {
                if bits & (1 << i) != 0 {
                    flags |= flag;
                }
            }
            NodeHeader::new(flags)
        })
    }

    #[test]
    fn test_free_header_is_zero() {
        assert_eq!(NodeHeader::FREE.to_byte(), 0);
        assert!(NodeHeader::FREE.is_free());
        assert_eq!(NodeHeader::FREE.detect(), Detected::Free);
    }

    #[test]
    fn test_valid_headers_are_continuation_bytes() {
        for header in all_headers() {
            let byte = header.to_byte();
            assert!((0x80..=0xBF).contains(&byte), "{header:?}");
            assert!(std::str::from_utf8(&[byte]).is_err());
            assert!(header.detect().is_node());
        }
    }

    #[test]
    fn test_text_is_never_a_node() {
        for text in ["hello", "é", "日本語", "🦀", "\u{7f}", " "] {
            assert_eq!(Detected::from_prefix(text.as_bytes()), Detected::Utf8);
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(NodeHeader::CELL.detect(), Detected::Cell);
        assert_eq!(NodeHeader::END_CELL.detect(), Detected::EndCell);
        assert_eq!(NodeHeader::TERMINATOR.detect(), Detected::Terminator);
        assert_eq!(NodeHeader::SERIES.detect(), Detected::Series);
    }

    #[test]
    fn test_mark_and_manage_transitions() {
        let mut header = NodeHeader::SERIES;
        assert!(!header.is_managed());
        assert!(header.set_managed());
        assert!(!header.set_managed());

        assert!(header.mark());
        assert!(!header.mark());
        assert!(header.is_marked());
        header.unmark();
        assert!(!header.is_marked());
        assert!(header.is_managed());
    }

    #[test]
    fn test_from_byte_rejects_reserved_bit() {
        assert!(NodeHeader::from_byte(0xC0).is_none());
        assert!(NodeHeader::from_byte(0x10).is_none());
        assert_eq!(NodeHeader::from_byte(0x80), Some(NodeHeader::SERIES));
    }
}
