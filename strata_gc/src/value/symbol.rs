//! Interned word spellings.

use rustc_hash::FxHashMap;

/// An interned spelling. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    /// Raw table index.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Spelling table shared by every word in a heap.
#[derive(Debug, Default)]
pub struct SymbolTable {
    names: Vec<Box<str>>,
    lookup: FxHashMap<Box<str>, Symbol>,
}

impl SymbolTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning the existing symbol if it was seen before.
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(&symbol) = self.lookup.get(name) {
            return symbol;
        }
        let symbol = Symbol(self.names.len() as u32);
        self.names.push(name.into());
        self.lookup.insert(name.into(), symbol);
        symbol
    }

    /// Spelling of a symbol.
    #[inline]
    pub fn name(&self, symbol: Symbol) -> Option<&str> {
        self.names.get(symbol.0 as usize).map(|name| &**name)
    }

    /// Number of distinct spellings.
    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when nothing has been interned.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
