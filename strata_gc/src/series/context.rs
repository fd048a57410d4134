//! Contexts, paramlists, maps and pairings.
//!
//! A context is two parallel arrays:
//!
//! ```text
//!   varlist  [ <context value> | v1 | v2 | ... ]   link ──▶ keylist
//!   keylist  [ <blank>         | k1 | k2 | ... ]
//! ```
//!
//! Slot 0 of the varlist holds the context's own value, so a varlist alone
//! is enough to rebuild it. A paramlist works the same way with the
//! function value in slot 0; a frame context uses its function's paramlist
//! as its keylist.

use super::{Content, ContextRef, Link, Misc, Series, SeriesFlags, SeriesId};
use crate::heap::Heap;
use crate::node::{NodeFlags, NodeHeader};
use crate::pool::{Buffer, BufferKind};
use crate::value::{Cell, ContextKind, FuncBody, FunctionValue, Symbol, Value};

/// Typeset bits of a key that accepts any value.
const ANY_TYPE: u64 = u64::MAX;

fn key_cell(symbol: Symbol) -> Value {
    Value::Typeset {
        bits: ANY_TYPE,
        symbol: Some(symbol),
    }
}

impl Heap {
    // =========================================================================
    // Contexts
    // =========================================================================

    /// Build an unmanaged context with the given keys, all values unset.
    pub fn make_context(&mut self, kind: ContextKind, keys: &[Symbol]) -> ContextRef {
        let keylist = self.make_array_with(SeriesFlags::KEYLIST, keys.len() + 1);
        self.append_value(keylist, Value::Blank);
        for &key in keys {
            self.append_value(keylist, key_cell(key));
        }

        let varlist = self.make_array_with(SeriesFlags::VARLIST, keys.len() + 1);
        self.set_link(varlist, Link::Keylist(keylist));
        let context = ContextRef::from_varlist(varlist);
        self.append_value(
            varlist,
            Value::Context {
                kind,
                context,
                spec: None,
            },
        );
        for _ in keys {
            self.append_value(varlist, Value::Unset);
        }
        context
    }

    /// An unmanaged FRAME! context whose keylist is `func`'s paramlist.
    pub fn make_frame_context(&mut self, func: FunctionValue) -> ContextRef {
        let len = self.array_len(func.paramlist);
        let varlist = self.make_array_with(SeriesFlags::VARLIST, len);
        self.set_link(varlist, Link::Keylist(func.paramlist));
        let context = ContextRef::from_varlist(varlist);
        self.append_value(
            varlist,
            Value::Context {
                kind: ContextKind::Frame,
                context,
                spec: None,
            },
        );
        for _ in 1..len {
            self.append_value(varlist, Value::Unset);
        }
        context
    }

    /// Number of variables, not counting slot 0.
    pub fn context_len(&self, context: ContextRef) -> usize {
        self.array_len(context.varlist()).saturating_sub(1)
    }

    /// The keylist of a context.
    pub fn context_keylist(&self, context: ContextRef) -> SeriesId {
        match self.series(context.varlist()).keylist() {
            Some(keylist) => keylist,
            None => crate::gc_panic!("{} is not a varlist", context.varlist()),
        }
    }

    /// The context's own value, from slot 0.
    pub fn context_value(&self, context: ContextRef) -> Value {
        match self.cell(context.varlist(), 0) {
            Some(cell) => *cell.value(),
            None => crate::gc_panic!("varlist {} has no slot 0", context.varlist()),
        }
    }

    /// Variable `n`, counting from 1.
    pub fn context_get(&self, context: ContextRef, n: usize) -> Option<Value> {
        if n == 0 {
            return None;
        }
        self.cell(context.varlist(), n).map(|cell| *cell.value())
    }

    /// Overwrite variable `n`, counting from 1.
    pub fn context_set(&mut self, context: ContextRef, n: usize, value: Value) {
        if n == 0 {
            crate::gc_panic!("slot 0 of {} holds the context itself", context.varlist());
        }
        self.set_value(context.varlist(), n, value);
    }

    /// Key `n`, counting from 1.
    pub fn context_key(&self, context: ContextRef, n: usize) -> Option<Symbol> {
        if n == 0 {
            return None;
        }
        match self.cell(self.context_keylist(context), n)?.value() {
            Value::Typeset { symbol, .. } => *symbol,
            _ => None,
        }
    }

    /// Find a variable by key.
    pub fn context_find(&self, context: ContextRef, key: Symbol) -> Option<usize> {
        (1..=self.context_len(context)).find(|&n| self.context_key(context, n) == Some(key))
    }

    /// Add a variable to the end of a context.
    pub fn append_context_key(&mut self, context: ContextRef, key: Symbol, value: Value) -> usize {
        let keylist = self.context_keylist(context);
        if self.series(keylist).flags().contains(SeriesFlags::PARAMLIST) {
            crate::gc_panic!("frame context {} cannot gain keys", context.varlist());
        }
        self.append_value(keylist, key_cell(key));
        self.append_value(context.varlist(), value);
        self.context_len(context)
    }

    /// Hand both arrays of a context to the collector. The keylist may
    /// already be managed when it is shared.
    pub fn manage_context(&mut self, context: ContextRef) {
        let keylist = self.context_keylist(context);
        self.ensure_managed(keylist);
        self.manage(context.varlist());
    }

    /// Attach a meta-information object to a keylist or paramlist.
    pub fn set_meta(&mut self, list: SeriesId, meta: ContextRef) {
        self.set_link(list, Link::Meta(meta));
    }

    // =========================================================================
    // Functions
    // =========================================================================

    /// Build an unmanaged paramlist for a function with the given
    /// parameters. Slot 0 holds the function value returned.
    pub fn make_function(
        &mut self,
        body: FuncBody,
        spec: Option<SeriesId>,
        params: &[Symbol],
    ) -> FunctionValue {
        let paramlist = self.make_array_with(SeriesFlags::PARAMLIST, params.len() + 1);
        let func = FunctionValue {
            paramlist,
            spec,
            body,
        };
        self.append_value(paramlist, Value::Function(func));
        for &param in params {
            self.append_value(paramlist, key_cell(param));
        }
        if let FuncBody::Native(dispatcher) = body {
            self.set_misc(paramlist, Misc::Dispatcher(dispatcher));
        }
        func
    }

    /// Recover a function from its paramlist.
    pub fn function_from_paramlist(&self, paramlist: SeriesId) -> FunctionValue {
        match self.cell(paramlist, 0).map(|cell| *cell.value()) {
            Some(Value::Function(func)) => func,
            _ => crate::gc_panic!("{} is not a paramlist", paramlist),
        }
    }

    // =========================================================================
    // Maps
    // =========================================================================

    /// Build an unmanaged map pairlist. A hashed map also gets a hash
    /// index, managed together with the pairlist.
    pub fn make_map(&mut self, capacity: usize, hashed: bool) -> SeriesId {
        let pairlist = self.make_array_with(SeriesFlags::PAIRLIST, capacity * 2);
        if hashed {
            let hashlist = self.make_series_of(
                BufferKind::Bytes,
                SeriesFlags::HASHLIST,
                capacity * std::mem::size_of::<u32>(),
            );
            self.set_link(pairlist, Link::Hashlist(hashlist));
        }
        pairlist
    }

    /// Add a key/value pair.
    pub fn map_put(&mut self, pairlist: SeriesId, key: Value, value: Value) {
        let position = self.array_len(pairlist) as u32;
        self.append_value(pairlist, key);
        self.append_value(pairlist, value);
        if let Link::Hashlist(hashlist) = self.series(pairlist).link() {
            self.append_bytes(hashlist, &position.to_le_bytes());
        }
    }

    /// Look a key up by value equality.
    pub fn map_get(&self, pairlist: SeriesId, key: &Value) -> Option<Value> {
        let len = self.array_len(pairlist);
        (0..len)
            .step_by(2)
            .find(|&n| self.cell(pairlist, n).map(|cell| cell.value() == key) == Some(true))
            .and_then(|n| self.cell(pairlist, n + 1))
            .map(|cell| *cell.value())
    }

    // =========================================================================
    // Pairings
    // =========================================================================

    /// Allocate an unmanaged key/value pairing.
    pub fn make_pairing(&mut self, key: Value, value: Value) -> SeriesId {
        self.alloc_pairing(NodeHeader::new(NodeFlags::CELL), key, value)
    }

    /// Allocate a managed pairing that is itself a root: its value stays
    /// reachable until [`free_pairing`](Self::free_pairing).
    pub fn make_root_pairing(&mut self, value: Value) -> SeriesId {
        let header = NodeHeader::new(NodeFlags::CELL | NodeFlags::MANAGED | NodeFlags::ROOT);
        self.alloc_pairing(header, Value::Blank, value)
    }

    fn alloc_pairing(&mut self, header: NodeHeader, key: Value, value: Value) -> SeriesId {
        let series = Series::new(
            SeriesFlags::ARRAY | SeriesFlags::PAIRING,
            Content::Pairing([Cell::new(key), Cell::new(value)]),
        );
        self.alloc_series_node(header, series)
    }

    fn pairing_cells(&self, pairing: SeriesId) -> [Cell; 2] {
        match self.series(pairing).content {
            Content::Pairing(cells) => cells,
            _ => crate::gc_panic!("{} is not a pairing", pairing),
        }
    }

    pub fn pairing_key(&self, pairing: SeriesId) -> Value {
        *self.pairing_cells(pairing)[0].value()
    }

    pub fn pairing_value(&self, pairing: SeriesId) -> Value {
        *self.pairing_cells(pairing)[1].value()
    }

    pub fn set_pairing_value(&mut self, pairing: SeriesId, value: Value) {
        match &mut self.series_mut(pairing).content {
            Content::Pairing(cells) => cells[1].set(value),
            _ => crate::gc_panic!("{} is not a pairing", pairing),
        }
    }

    /// Free an unmanaged pairing, or release a root pairing.
    pub fn free_pairing(&mut self, pairing: SeriesId) {
        let header = self.series.header(pairing.index());
        if !self.series(pairing).is_pairing() {
            crate::gc_panic!("{} is not a pairing", pairing);
        }
        if header.is_managed() && !header.is_root() {
            crate::gc_panic!("freeing managed pairing {} by hand", pairing);
        }
        let bytes = self.release_series(pairing.index());
        self.credit(bytes);
    }

    /// Pair positions recorded in a map's hash index.
    pub fn hashlist_positions(&self, pairlist: SeriesId) -> Vec<u32> {
        let Link::Hashlist(hashlist) = self.series(pairlist).link() else {
            return Vec::new();
        };
        self.buffer_of(hashlist)
            .and_then(Buffer::as_bytes)
            .map(|bytes| {
                bytes
                    .chunks_exact(4)
                    .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_layout() {
        let mut heap = Heap::with_defaults();
        let a = heap.intern("a");
        let b = heap.intern("b");
        let ctx = heap.make_context(ContextKind::Object, &[a, b]);

        assert_eq!(heap.context_len(ctx), 2);
        assert_eq!(heap.array_len(heap.context_keylist(ctx)), 3);
        assert_eq!(heap.context_value(ctx), Value::object(ctx));
        assert_eq!(heap.context_key(ctx, 2), Some(b));
        assert_eq!(heap.context_find(ctx, a), Some(1));

        heap.context_set(ctx, 2, Value::Integer(10));
        assert_eq!(heap.context_get(ctx, 2), Some(Value::Integer(10)));
        assert_eq!(heap.context_get(ctx, 0), None);
    }

    #[test]
    fn test_append_context_key() {
        let mut heap = Heap::with_defaults();
        let ctx = heap.make_context(ContextKind::Object, &[]);
        let c = heap.intern("c");
        assert_eq!(heap.append_context_key(ctx, c, Value::Char('c')), 1);
        assert_eq!(heap.context_get(ctx, 1), Some(Value::Char('c')));
    }

    #[test]
    fn test_manage_context_manages_both_lists() {
        let mut heap = Heap::with_defaults();
        let ctx = heap.make_context(ContextKind::Module, &[]);
        heap.manage_context(ctx);
        assert!(heap.is_managed(ctx.varlist()));
        assert!(heap.is_managed(heap.context_keylist(ctx)));
    }

    #[test]
    fn test_paramlist_recovers_function() {
        let mut heap = Heap::with_defaults();
        let x = heap.intern("x");
        let func = heap.make_function(FuncBody::Native(4), None, &[x]);
        assert_eq!(heap.function_from_paramlist(func.paramlist), func);
        assert_eq!(heap.series(func.paramlist).misc(), Misc::Dispatcher(4));
    }

    #[test]
    fn test_hashed_map() {
        let mut heap = Heap::with_defaults();
        let map = heap.make_map(4, true);
        heap.map_put(map, Value::Integer(1), Value::Char('a'));
        heap.map_put(map, Value::Integer(2), Value::Char('b'));
        assert_eq!(heap.map_get(map, &Value::Integer(2)), Some(Value::Char('b')));
        assert_eq!(heap.map_get(map, &Value::Integer(3)), None);
        assert_eq!(heap.hashlist_positions(map), vec![0, 2]);

        heap.manage(map);
        let Link::Hashlist(hashlist) = heap.series(map).link() else {
            panic!("hashed map without a hashlist");
        };
        assert!(heap.is_managed(hashlist));
    }

    #[test]
    fn test_pairings() {
        let mut heap = Heap::with_defaults();
        let pairing = heap.make_pairing(Value::Integer(1), Value::Integer(2));
        assert_eq!(heap.pairing_key(pairing), Value::Integer(1));
        heap.set_pairing_value(pairing, Value::Blank);
        assert_eq!(heap.pairing_value(pairing), Value::Blank);
        assert_eq!(heap.array_len(pairing), 2);
        heap.free_pairing(pairing);
        assert!(!heap.is_series_live(pairing));

        let root = heap.make_root_pairing(Value::Logic(true));
        assert!(heap.is_managed(root));
        heap.free_pairing(root);
        assert!(!heap.is_series_live(root));
    }
}
