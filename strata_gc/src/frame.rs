//! Call frames.
//!
//! The evaluator pushes a [`Frame`] for every call in progress. Frames form
//! a LIFO chain through `prior`; the collector walks that chain from the
//! top when marking roots.
//!
//! A frame fed by a host iterator instead of an array cannot be traced
//! (iteration can't be rewound), so such feeds are reified into arrays
//! before every mark phase.

use crate::heap::Heap;
use crate::series::{ContextRef, SeriesId};
use crate::value::{Cell, FunctionValue, Symbol, Value};
use smallvec::SmallVec;
use std::fmt;

/// Index of a frame in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

/// Host-supplied stream of values.
pub struct VariadicFeed(Box<dyn Iterator<Item = Value>>);

impl VariadicFeed {
    /// Wrap an iterator.
    pub fn new(values: impl Iterator<Item = Value> + 'static) -> Self {
        Self(Box::new(values))
    }
}

impl fmt::Debug for VariadicFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VariadicFeed(..)")
    }
}

/// Where a frame reads its next value from.
#[derive(Debug, Default)]
pub enum Feed {
    /// Evaluating an array at a position.
    Array { array: SeriesId, index: u32 },
    /// Nothing left to read.
    #[default]
    End,
    /// Pulling from a host iterator.
    Variadic(VariadicFeed),
}

/// How much of a frame the collector has to protect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameMode {
    /// Everything the frame references.
    #[default]
    Normal,
    /// Only the source array and current value; used by frames that are
    /// not running a function.
    GuardArrayOnly,
}

/// An evaluation in progress.
#[derive(Debug, Default)]
pub struct Frame {
    pub feed: Feed,
    /// Value being evaluated.
    pub value: Option<Cell>,
    /// Output slot. Starts out as an end marker.
    pub out: Cell,
    pub mode: FrameMode,
    /// Function being called.
    pub func: Option<FunctionValue>,
    /// Argument cells gathered so far.
    pub args: SmallVec<[Cell; 4]>,
    /// Context the frame was promoted to, if any.
    pub context: Option<ContextRef>,
    /// Parameter being fulfilled.
    pub param: Option<Cell>,
    /// Refinement currently active.
    pub refine: Option<Cell>,
    /// Name the function was invoked through.
    pub label: Option<Symbol>,
    prior: Option<FrameId>,
}

impl Frame {
    /// A frame evaluating `array` from `index`.
    pub fn over_array(array: SeriesId, index: u32) -> Self {
        Self {
            feed: Feed::Array { array, index },
            out: Cell::END,
            ..Self::default()
        }
    }

    /// A frame pulling from a host iterator.
    pub fn over_values(values: impl Iterator<Item = Value> + 'static) -> Self {
        Self {
            feed: Feed::Variadic(VariadicFeed::new(values)),
            out: Cell::END,
            ..Self::default()
        }
    }

    /// The frame below this one.
    #[inline]
    pub fn prior(&self) -> Option<FrameId> {
        self.prior
    }

    /// True if the feed still needs reifying.
    #[inline]
    pub fn is_variadic(&self) -> bool {
        matches!(self.feed, Feed::Variadic(_))
    }
}

/// The chain of frames, top last.
#[derive(Debug, Default)]
pub struct FrameStack {
    frames: Vec<Frame>,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame, linking it to the current top.
    pub fn push(&mut self, mut frame: Frame) -> FrameId {
        frame.prior = self.top();
        self.frames.push(frame);
        FrameId(self.frames.len() - 1)
    }

    /// Pop the top frame.
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// The top frame.
    #[inline]
    pub fn top(&self) -> Option<FrameId> {
        self.frames.len().checked_sub(1).map(FrameId)
    }

    #[inline]
    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.frames.get(id.0)
    }

    #[inline]
    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        self.frames.get_mut(id.0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Walk from the top frame down through `prior` links.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> + '_ {
        let mut cursor = self.top();
        std::iter::from_fn(move || {
            let frame = self.get(cursor?)?;
            cursor = frame.prior;
            Some(frame)
        })
    }
}

impl Heap {
    /// Push a call frame.
    pub fn push_frame(&mut self, frame: Frame) -> FrameId {
        self.frames.push(frame)
    }

    /// Pop the top call frame. A promoted context that never escaped
    /// (still unmanaged) is freed with it.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        let frame = self.frames.pop()?;
        if let Some(context) = frame.context {
            let varlist = context.varlist();
            if self.is_series_live(varlist) && !self.is_managed(varlist) {
                self.free_series(varlist);
            }
        }
        Some(frame)
    }

    pub fn frame(&self, id: FrameId) -> Option<&Frame> {
        self.frames.get(id)
    }

    pub fn frame_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        self.frames.get_mut(id)
    }

    /// The frame chain.
    pub fn frames(&self) -> &FrameStack {
        &self.frames
    }

    /// Give a frame a real context holding its arguments. The varlist is
    /// left unmanaged; its keylist is the function's paramlist.
    pub fn promote_frame(&mut self, id: FrameId) -> Option<ContextRef> {
        let frame = self.frames.get(id)?;
        if let Some(context) = frame.context {
            return Some(context);
        }
        let func = frame.func?;
        let args: SmallVec<[Cell; 4]> = frame.args.clone();

        let context = self.make_frame_context(func);
        for (n, arg) in args.iter().enumerate() {
            if !arg.is_end() {
                self.context_set(context, n + 1, *arg.value());
            }
        }
        if let Some(frame) = self.frames.get_mut(id) {
            frame.context = Some(context);
        }
        Some(context)
    }

    /// Replace every variadic feed with a managed array of its remaining
    /// values. Runs before each mark phase.
    pub(crate) fn reify_variadic_frames(&mut self) -> usize {
        let mut reified = 0;
        for index in 0..self.frames.len() {
            let id = FrameId(index);
            let Some(frame) = self.frames.get_mut(id).filter(|f| f.is_variadic()) else {
                continue;
            };
            let Feed::Variadic(VariadicFeed(values)) = std::mem::take(&mut frame.feed) else {
                continue;
            };
            let values: Vec<Value> = values.collect();

            let array = self.make_array(values.len());
            for value in values {
                self.append_value(array, value);
            }
            self.manage(array);

            if let Some(frame) = self.frames.get_mut(id) {
                frame.feed = Feed::Array { array, index: 0 };
            }
            reified += 1;
        }
        if reified > 0 {
            tracing::trace!(frames = reified, "reified variadic feeds");
        }
        reified
    }
}
