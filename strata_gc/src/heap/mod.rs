//! The heap: one owning value for every piece of collector state.
//!
//! ```text
//!   Heap
//!   ├── series pool ──────────▶ size-class pools (buffers) + SYSTEM
//!   ├── gob / library / routine pools
//!   ├── guard stacks, frame stack, root set
//!   ├── device table (shared with the I/O layer)
//!   ├── collector (state machine, mark stack, ballast)
//!   └── stats
//! ```
//!
//! Nothing here is global, so several isolated heaps can coexist. Tear a
//! heap down with [`Heap::shutdown`], which frees every managed node.

mod alloc;

use crate::collector::{BallastPolicy, Collector};
use crate::config::{ConfigError, GcConfig};
use crate::device::DeviceHandle;
use crate::foreign::{ForeignHost, Library, NoopForeignHost, Routine};
use crate::frame::FrameStack;
use crate::gob::Gob;
use crate::pool::{Pool, PoolSpec, PoolStats, SegmentBudget, SizeClasses};
use crate::roots::{GuardStacks, RootSet};
use crate::series::Series;
use crate::stats::GcStats;
use crate::value::{Symbol, SymbolTable};
use std::mem::size_of;

/// Main heap structure owning all pools and roots.
pub struct Heap {
    /// Configuration parameters.
    config: GcConfig,

    /// Segment bytes reserved across all pools.
    pub(crate) budget: SegmentBudget,

    /// Series nodes.
    pub(crate) series: Pool<Series>,
    /// Out-of-line series content.
    pub(crate) buffers: SizeClasses,
    pub(crate) gobs: Pool<Gob>,
    pub(crate) libraries: Pool<Library>,
    pub(crate) routines: Pool<Routine>,

    pub(crate) guards: GuardStacks,
    pub(crate) frames: FrameStack,
    pub(crate) roots: RootSet,
    pub(crate) devices: DeviceHandle,

    pub(crate) collector: Collector,
    pub(crate) symbols: SymbolTable,
    pub(crate) host: Box<dyn ForeignHost>,

    /// GC statistics.
    pub(crate) stats: GcStats,
}

impl Heap {
    /// Create a heap with the given configuration.
    pub fn new(config: GcConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Create a heap with default configuration.
    pub fn with_defaults() -> Self {
        Self::build(GcConfig::default())
    }

    fn build(config: GcConfig) -> Self {
        fn pool<T>(name: &'static str, units: usize) -> Pool<T> {
            Pool::new(name, PoolSpec::new(size_of::<T>(), units))
        }
        let heap = Self {
            budget: SegmentBudget::new(config.memory_limit),
            series: pool("series", config.series_units),
            buffers: SizeClasses::new(&config.size_classes),
            gobs: pool("gob", config.gob_units),
            libraries: pool("library", config.library_units),
            routines: pool("routine", config.routine_units),
            guards: GuardStacks::with_capacity(config.guard_capacity),
            frames: FrameStack::new(),
            roots: RootSet::new(),
            devices: DeviceHandle::new(),
            collector: Collector::new(&config),
            symbols: SymbolTable::new(),
            host: Box::new(NoopForeignHost),
            stats: GcStats::new(),
            config,
        };
        tracing::debug!(
            ballast = heap.collector.ballast().budget(),
            policy = heap.collector.ballast().policy().name(),
            memory_limit = heap.config.memory_limit,
            "heap initialized"
        );
        heap
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Free every managed node. Returns the number freed.
    ///
    /// Outstanding guards are a caller bug and abort when
    /// [`GcConfig::check_guard_balance`] is set.
    pub fn shutdown(&mut self) -> usize {
        let outstanding = self.guards.outstanding();
        if outstanding != 0 && self.config.check_guard_balance {
            crate::gc_panic!(
                "guard stack imbalance at shutdown: {} series, {} values outstanding",
                self.guards.series_depth(),
                self.guards.value_depth()
            );
        }

        let freed = self.recycle(true);

        let survivors = self.series.iter_live().filter(|(_, h, _)| h.is_managed()).count()
            + self.gobs.used()
            + self.libraries.used()
            + self.routines.used();
        if survivors != 0 {
            crate::gc_panic!("{} managed nodes survived the shutdown sweep", survivors);
        }

        self.stats.log_summary();
        freed
    }

    // =========================================================================
    // Configuration and hooks
    // =========================================================================

    /// Replace the host consulted when libraries and routines are freed.
    pub fn set_foreign_host(&mut self, host: Box<dyn ForeignHost>) {
        self.host = host;
    }

    /// Replace the ballast policy.
    pub fn set_ballast_policy(&mut self, policy: Box<dyn BallastPolicy>) {
        self.collector.ballast_mut().set_policy(policy);
    }

    /// Handle to the device table, for the I/O layer.
    pub fn device_handle(&self) -> DeviceHandle {
        self.devices.clone()
    }

    /// Intern a word spelling.
    pub fn intern(&mut self, name: &str) -> Symbol {
        self.symbols.intern(name)
    }

    /// Spelling of an interned word.
    pub fn symbol_name(&self, symbol: Symbol) -> Option<&str> {
        self.symbols.name(symbol)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get the configuration.
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Get GC statistics.
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Occupancy of every pool: series, gob, library, routine, then the
    /// size classes and SYSTEM.
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        let mut stats = vec![
            self.series.stats(),
            self.gobs.stats(),
            self.libraries.stats(),
            self.routines.stats(),
        ];
        stats.extend(self.buffers.stats());
        stats
    }

    /// Live series nodes, managed or not.
    pub fn live_series(&self) -> usize {
        self.series.used()
    }

    /// Segment bytes reserved so far.
    pub fn reserved_bytes(&self) -> usize {
        self.budget.reserved()
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("series", &self.series)
            .field("gobs", &self.gobs)
            .field("libraries", &self.libraries)
            .field("routines", &self.routines)
            .field("guards", &self.guards)
            .field("frames", &self.frames.len())
            .field("state", &self.collector.state())
            .finish()
    }
}
