//! Mark-and-sweep collection.
//!
//! One cycle is stop-the-world and always runs to completion:
//!
//! ```text
//!   reify variadic feeds ─▶ mark from roots ─▶ sweep pools ─▶ adjust ballast
//!                           (worklist, no       routine → series
//!                            native recursion)  → gob → library
//! ```
//!
//! Collection is cooperative. Allocation only raises a signal when the
//! ballast runs out; the evaluator polls [`Heap::safe_point`] between
//! steps. A disable counter lets code that cannot tolerate a cycle hold
//! it off; a request made meanwhile is latched and honored afterwards.

pub mod ballast;
mod mark;
mod sweep;

pub use ballast::{AdaptiveBallast, Ballast, BallastAdjustment, BallastPolicy, FixedBallast};
pub use sweep::Swept;

pub(crate) use mark::MarkEntry;

use crate::config::GcConfig;
use crate::dump::{DumpSink, MemDump};
use crate::heap::Heap;
use crate::stats::GcTimer;
use mark::Marker;
use rustc_hash::FxHashSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Whether collection may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcState {
    /// Cycles run when requested.
    #[default]
    Active,
    /// Held off by `depth` nested disables.
    Disabled { depth: u32 },
    /// Held off, with a cycle requested in the meantime.
    PendingWhileDisabled { depth: u32 },
}

/// Collector bookkeeping.
#[derive(Debug)]
pub struct Collector {
    state: GcState,
    /// A cycle is running.
    in_progress: bool,
    /// The ballast ran out; collect at the next safe point.
    signal: bool,
    pub(crate) mark_stack: Vec<MarkEntry>,
    ballast: Ballast,
    cycles: u64,
}

impl Collector {
    pub(crate) fn new(config: &GcConfig) -> Self {
        Self {
            state: GcState::Active,
            in_progress: false,
            signal: false,
            mark_stack: Vec::with_capacity(config.mark_stack_capacity),
            ballast: Ballast::new(config.ballast, config.ballast_policy()),
            cycles: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> GcState {
        self.state
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        !matches!(self.state, GcState::Active)
    }

    /// A cycle could start right now.
    #[inline]
    pub fn can_collect(&self) -> bool {
        self.state == GcState::Active && !self.in_progress
    }

    /// A cycle has been asked for and not yet run.
    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.signal
    }

    /// Completed cycles.
    #[inline]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    #[inline]
    pub fn ballast(&self) -> &Ballast {
        &self.ballast
    }

    #[inline]
    pub(crate) fn ballast_mut(&mut self) -> &mut Ballast {
        &mut self.ballast
    }

    /// Ask for a cycle: signal it now, or latch it while disabled.
    pub(crate) fn request(&mut self) {
        match self.state {
            GcState::Active => self.signal = true,
            GcState::Disabled { depth } => self.state = GcState::PendingWhileDisabled { depth },
            GcState::PendingWhileDisabled { .. } => {}
        }
    }

    fn disable(&mut self) {
        self.state = match self.state {
            GcState::Active => GcState::Disabled { depth: 1 },
            GcState::Disabled { depth } => GcState::Disabled { depth: depth + 1 },
            GcState::PendingWhileDisabled { depth } => {
                GcState::PendingWhileDisabled { depth: depth + 1 }
            }
        };
    }

    fn enable(&mut self) {
        self.state = match self.state {
            GcState::Active => crate::gc_panic!("enable_gc without a matching disable_gc"),
            GcState::Disabled { depth: 1 } => GcState::Active,
            GcState::Disabled { depth } => GcState::Disabled { depth: depth - 1 },
            GcState::PendingWhileDisabled { depth: 1 } => {
                self.signal = true;
                GcState::Active
            }
            GcState::PendingWhileDisabled { depth } => {
                GcState::PendingWhileDisabled { depth: depth - 1 }
            }
        };
    }
}

// =============================================================================
// Heap operations
// =============================================================================

impl Heap {
    /// Run one full cycle and return the number of nodes freed.
    ///
    /// With `shutdown` set, marking is skipped and every managed node is
    /// freed. Otherwise, while collection is disabled, the request is
    /// latched and nothing is freed.
    pub fn recycle(&mut self, shutdown: bool) -> usize {
        self.recycle_with(shutdown, None)
    }

    fn recycle_with(&mut self, shutdown: bool, dump: Option<&mut dyn DumpSink>) -> usize {
        if self.collector.in_progress {
            crate::gc_panic!("recycle re-entered while a cycle is in progress");
        }
        if !shutdown && self.collector.is_disabled() {
            self.collector.request();
            return 0;
        }

        self.collector.in_progress = true;
        let timer = GcTimer::start("recycle");

        let marked = if shutdown {
            0
        } else {
            self.reify_variadic_frames();
            self.mark_phase(dump)
        };
        let swept = self.sweep_phase(shutdown);
        let adjustment = (!shutdown).then(|| self.collector.ballast.adjust());

        let elapsed = timer.stop();
        self.collector.cycles += 1;
        self.collector.signal = false;
        self.stats.record_recycle(swept.nodes, swept.bytes, marked, elapsed);

        let budget = adjustment.map_or(self.collector.ballast.budget(), |a| a.new_budget);
        if self.config().watch_recycle {
            tracing::info!(
                cycle = self.collector.cycles,
                shutdown,
                marked,
                freed = swept.nodes,
                bytes = swept.bytes,
                budget,
                ?elapsed,
                "recycle"
            );
        } else {
            tracing::debug!(
                cycle = self.collector.cycles,
                shutdown,
                marked,
                freed = swept.nodes,
                bytes = swept.bytes,
                budget,
                ?elapsed,
                "recycle"
            );
        }

        if !shutdown && self.config().verify_heap {
            self.verify_heap();
        }
        self.collector.in_progress = false;
        swept.nodes
    }

    fn mark_phase(&mut self, dump: Option<&mut dyn DumpSink>) -> usize {
        let Heap {
            series,
            buffers,
            gobs,
            libraries,
            routines,
            guards,
            frames,
            roots,
            devices,
            collector,
            symbols,
            ..
        } = self;
        let devices = devices.lock();
        let mut marker = Marker::new(
            series,
            buffers,
            gobs,
            libraries,
            routines,
            &*devices,
            symbols,
            &mut collector.mark_stack,
            dump,
        );

        marker.section("series-guard");
        guards.trace_series(&mut marker);
        marker.propagate();

        marker.section("value-guard");
        guards.trace_values(&mut marker);
        marker.propagate();

        marker.section("root-pairings");
        marker.mark_root_pairings();
        marker.propagate();

        marker.section("globals");
        crate::roots::RootProvider::trace_roots(&*roots, &mut marker);
        marker.propagate();

        marker.section("mark-hook");
        roots.run_mark_hook(&mut marker);
        marker.propagate();

        marker.section("devices");
        crate::roots::RootProvider::trace_roots(&*devices, &mut marker);
        marker.propagate();

        marker.section("frames");
        marker.mark_frames(frames);
        marker.propagate();

        marker.finish()
    }

    fn sweep_phase(&mut self, shutdown: bool) -> Swept {
        // Routines may read their argument-type series while being
        // released, so they go before series.
        let mut swept = self.sweep_routines(shutdown);
        swept += self.sweep_series(shutdown);
        swept += self.sweep_gobs(shutdown);
        swept += self.sweep_libraries(shutdown);
        swept
    }

    // =========================================================================
    // Trigger
    // =========================================================================

    /// Collect if a cycle has been requested and collection is enabled.
    /// The evaluator calls this between steps.
    pub fn safe_point(&mut self) -> Option<usize> {
        if self.collector.signal && self.collector.can_collect() {
            Some(self.recycle(false))
        } else {
            None
        }
    }

    /// Hold off collection until the matching [`enable_gc`](Self::enable_gc).
    pub fn disable_gc(&mut self) {
        self.collector.disable();
    }

    /// Undo one [`disable_gc`](Self::disable_gc). Leaving the outermost
    /// span with a latched request raises the signal.
    pub fn enable_gc(&mut self) {
        self.collector.enable();
    }

    /// Run `f` with collection disabled.
    pub fn without_gc<R>(&mut self, f: impl FnOnce(&mut Heap) -> R) -> R {
        self.disable_gc();
        let result = f(self);
        self.enable_gc();
        result
    }

    pub fn gc_state(&self) -> GcState {
        self.collector.state()
    }

    /// Collector bookkeeping.
    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Run a normal cycle and write one CSV line per marked edge to `out`.
    /// Returns the number of lines written.
    pub fn dump_memory_usage<W: Write>(&mut self, out: W) -> io::Result<usize> {
        let mut dump = MemDump::new(out)?;
        self.recycle_with(false, Some(&mut dump));
        dump.finish()
    }

    /// [`dump_memory_usage`](Self::dump_memory_usage) into a file.
    pub fn dump_memory_usage_to(&mut self, path: impl AsRef<Path>) -> io::Result<usize> {
        let file = File::create(path.as_ref())?;
        self.dump_memory_usage(BufWriter::new(file))
    }

    /// Check structural invariants of every live node. Returns the number
    /// of nodes checked.
    pub fn verify_heap(&self) -> usize {
        let mut buffers = FxHashSet::default();
        let mut checked = 0;

        for (index, header, series) in self.series.iter_live() {
            checked += 1;
            if header.is_marked() {
                crate::gc_panic!("series:{} still marked outside a cycle", index);
            }
            if let Some(buffer) = series.buffer() {
                if !buffers.insert(buffer) {
                    crate::gc_panic!("series:{} shares buffer {:?}", index, buffer);
                }
                let content = self.buffers.get(buffer);
                if series.is_array() && content.as_cells().is_none() {
                    crate::gc_panic!("array series:{} holds a non-cell buffer", index);
                }
            }
            if let Some(keylist) = series.keylist() {
                if !self.is_series_live(keylist) {
                    crate::gc_panic!("varlist series:{} outlived its keylist", index);
                }
                if header.is_managed() && !self.is_managed(keylist) {
                    crate::gc_panic!("managed varlist series:{} has an unmanaged keylist", index);
                }
            }
        }

        let marked = self
            .gobs
            .iter_live()
            .map(|(_, header, _)| header)
            .chain(self.libraries.iter_live().map(|(_, header, _)| header))
            .chain(self.routines.iter_live().map(|(_, header, _)| header))
            .inspect(|_| checked += 1)
            .filter(|header| header.is_marked())
            .count();
        if marked != 0 {
            crate::gc_panic!("{} nodes still marked outside a cycle", marked);
        }
        checked
    }
}
