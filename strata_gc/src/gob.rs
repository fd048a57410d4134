//! GUI object nodes.
//!
//! Gobs live in their own pool and form trees: a gob's pane is a series
//! of child gob handles and every child points back at its parent. The
//! collector walks these trees with an explicit stack, so arbitrarily
//! deep or back-linked trees are fine.

use crate::heap::Heap;
use crate::node::{NodeFlags, NodeHeader};
use crate::pool::{Buffer, BufferKind};
use crate::series::{ContextRef, SeriesFlags, SeriesId};

/// Handle to a node in the GOB pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GobId(pub(crate) u32);

/// What a gob draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GobContent {
    #[default]
    None,
    Text(SeriesId),
    Image(SeriesId),
    Draw(SeriesId),
    Effect(SeriesId),
}

/// User data attached to a gob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GobData {
    #[default]
    None,
    Object(ContextRef),
    Block(SeriesId),
    String(SeriesId),
    Binary(SeriesId),
    Integer(i64),
}

/// A GUI object.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Gob {
    /// Child gobs.
    pub pane: Option<SeriesId>,
    pub parent: Option<GobId>,
    pub content: GobContent,
    pub data: GobData,
    pub offset: (f32, f32),
    pub size: (f32, f32),
}

impl Heap {
    /// Allocate an empty gob. The node is managed from birth.
    pub fn make_gob(&mut self) -> GobId {
        let header = NodeHeader::new(NodeFlags::MANAGED);
        let index = self.with_retry(|heap| {
            heap.gobs
                .alloc_node(header, Gob::default(), &mut heap.budget)
        });
        self.charge(self.gobs.spec().wide);
        GobId(index)
    }

    /// A live gob.
    pub fn gob(&self, id: GobId) -> &Gob {
        match self.gobs.get(id.0) {
            Some(gob) => gob,
            None => crate::gc_panic!("gob {} used after free", id.0),
        }
    }

    /// A live gob, mutably.
    pub fn gob_mut(&mut self, id: GobId) -> &mut Gob {
        match self.gobs.get_mut(id.0) {
            Some(gob) => gob,
            None => crate::gc_panic!("gob {} used after free", id.0),
        }
    }

    /// True while the gob has not been swept.
    pub fn is_gob_live(&self, id: GobId) -> bool {
        self.gobs.get(id.0).is_some()
    }

    /// Append `child` to `parent`'s pane, creating the pane on first use.
    pub fn gob_insert(&mut self, parent: GobId, child: GobId) {
        let pane = match self.gob(parent).pane {
            Some(pane) => pane,
            None => {
                let pane = self.make_series_of(BufferKind::Gobs, SeriesFlags::GOB_PANE, 4);
                self.manage(pane);
                self.gob_mut(parent).pane = Some(pane);
                pane
            }
        };
        self.reserve_tail(pane, 1);
        self.with_buffer_mut(pane, |buffer| {
            if let Buffer::Gobs(children) = buffer {
                children.push(child);
            }
        });
        self.gob_mut(child).parent = Some(parent);
    }

    /// Children of a gob, in pane order.
    pub fn gob_children(&self, id: GobId) -> Vec<GobId> {
        self.gob(id)
            .pane
            .and_then(|pane| self.buffer_of(pane))
            .and_then(Buffer::as_gobs)
            .map(<[GobId]>::to_vec)
            .unwrap_or_default()
    }
}
