//! Memory-usage dump.
//!
//! A dump is written during a normal mark phase, one CSV line per edge the
//! marker follows:
//!
//! ```text
//! # addr,parent,kind,size,edge,name
//! #globals
//! series:4,(nil),array,2,<global>,(null)
//! series:2,series:4,string,11,(null),(null)
//! ```
//!
//! Lines starting with `#` are comments naming the root group that follows.

use crate::foreign::{LibraryId, RoutineId};
use crate::gob::GobId;
use crate::series::{Series, SeriesFlags, SeriesId};
use std::fmt;
use std::io::{self, Write};

/// Address of a node, rendered as `<pool>:<index>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeAddr {
    Series(SeriesId),
    Gob(GobId),
    Library(LibraryId),
    Routine(RoutineId),
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeAddr::Series(id) => write!(f, "{id}"),
            NodeAddr::Gob(id) => write!(f, "gob:{}", id.0),
            NodeAddr::Library(id) => write!(f, "library:{}", id.0),
            NodeAddr::Routine(id) => write!(f, "routine:{}", id.0),
        }
    }
}

/// One edge of the reachability graph.
#[derive(Debug, Clone, Copy)]
pub struct DumpEntry<'a> {
    pub addr: NodeAddr,
    /// The node the edge starts from; `None` for roots.
    pub parent: Option<NodeAddr>,
    pub kind: &'static str,
    /// Length in elements.
    pub size: usize,
    pub edge: Option<&'a str>,
    /// Key the edge was found under, for context slots.
    pub name: Option<&'a str>,
}

/// Receiver of dump output.
pub trait DumpSink {
    fn entry(&mut self, entry: &DumpEntry<'_>);
    fn comment(&mut self, text: &str);
}

/// CSV dump into any writer.
///
/// I/O errors are latched: the first one stops output and is returned by
/// [`finish`](MemDump::finish).
pub struct MemDump<W: Write> {
    out: W,
    lines: usize,
    error: Option<io::Error>,
}

impl<W: Write> MemDump<W> {
    /// Start a dump, writing the column header.
    pub fn new(mut out: W) -> io::Result<Self> {
        writeln!(out, "# addr,parent,kind,size,edge,name")?;
        Ok(Self {
            out,
            lines: 0,
            error: None,
        })
    }

    /// Flush and return the number of entry lines written.
    pub fn finish(mut self) -> io::Result<usize> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        self.out.flush()?;
        Ok(self.lines)
    }

    fn write(&mut self, args: fmt::Arguments<'_>) -> bool {
        if self.error.is_some() {
            return false;
        }
        match self.out.write_fmt(args) {
            Ok(()) => true,
            Err(error) => {
                self.error = Some(error);
                false
            }
        }
    }
}

impl<W: Write> DumpSink for MemDump<W> {
    fn entry(&mut self, entry: &DumpEntry<'_>) {
        let parent = entry
            .parent
            .map_or_else(|| "(nil)".to_string(), |parent| parent.to_string());
        let written = self.write(format_args!(
            "{},{},{},{},{},{}\n",
            entry.addr,
            parent,
            entry.kind,
            entry.size,
            entry.edge.unwrap_or("(null)"),
            entry.name.unwrap_or("(null)"),
        ));
        self.lines += usize::from(written);
    }

    fn comment(&mut self, text: &str) {
        self.write(format_args!("#{text}\n"));
    }
}

impl<W: Write> fmt::Debug for MemDump<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemDump")
            .field("lines", &self.lines)
            .field("error", &self.error)
            .finish()
    }
}

/// Kind name of a series node.
pub(crate) fn describe(series: &Series) -> &'static str {
    let flags = series.flags();
    if flags.contains(SeriesFlags::VARLIST) {
        "varlist"
    } else if flags.contains(SeriesFlags::KEYLIST) {
        "keylist"
    } else if flags.contains(SeriesFlags::PARAMLIST) {
        "paramlist"
    } else if flags.contains(SeriesFlags::PAIRLIST) {
        "pairlist"
    } else if flags.contains(SeriesFlags::PAIRING) {
        "pairing"
    } else if flags.contains(SeriesFlags::ARRAY) {
        "array"
    } else if flags.contains(SeriesFlags::HASHLIST) {
        "hashlist"
    } else if flags.contains(SeriesFlags::STRUCT_FIELDS) {
        "fields"
    } else if flags.contains(SeriesFlags::GOB_PANE) {
        "pane"
    } else if flags.contains(SeriesFlags::UTF8) {
        "string"
    } else {
        "series"
    }
}
