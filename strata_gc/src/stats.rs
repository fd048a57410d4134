//! GC statistics and metrics.
//!
//! Tracks allocation volume, cycle counts and pause times for monitoring
//! and tuning the ballast.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Statistics about garbage collection activity.
#[derive(Debug)]
pub struct GcStats {
    // =========================================================================
    // Allocation Statistics
    // =========================================================================
    /// Total bytes charged to the ballast since start.
    pub bytes_allocated: AtomicU64,
    /// Total nodes and buffers allocated since start.
    pub objects_allocated: AtomicU64,

    // =========================================================================
    // Collection Statistics
    // =========================================================================
    /// Completed cycles, shutdown included.
    pub recycles: AtomicU64,
    /// Nodes freed by all cycles.
    pub nodes_freed: AtomicU64,
    /// Bytes credited back by all cycles.
    pub bytes_freed: AtomicU64,
    /// Nodes marked by all cycles.
    pub objects_marked: AtomicU64,
    /// Total time spent in cycles (nanoseconds).
    pub gc_time_ns: AtomicU64,
    /// Nodes freed by the most recent cycle.
    pub last_freed: AtomicU64,
}

impl GcStats {
    /// Create new empty statistics.
    pub const fn new() -> Self {
        Self {
            bytes_allocated: AtomicU64::new(0),
            objects_allocated: AtomicU64::new(0),
            recycles: AtomicU64::new(0),
            nodes_freed: AtomicU64::new(0),
            bytes_freed: AtomicU64::new(0),
            objects_marked: AtomicU64::new(0),
            gc_time_ns: AtomicU64::new(0),
            last_freed: AtomicU64::new(0),
        }
    }

    /// Record an allocation.
    #[inline]
    pub fn record_allocation(&self, size: usize) {
        self.bytes_allocated
            .fetch_add(size as u64, Ordering::Relaxed);
        self.objects_allocated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished cycle.
    pub fn record_recycle(&self, freed: usize, bytes: usize, marked: usize, duration: Duration) {
        self.recycles.fetch_add(1, Ordering::Relaxed);
        self.nodes_freed.fetch_add(freed as u64, Ordering::Relaxed);
        self.bytes_freed.fetch_add(bytes as u64, Ordering::Relaxed);
        self.objects_marked
            .fetch_add(marked as u64, Ordering::Relaxed);
        self.gc_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        self.last_freed.store(freed as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn objects_allocated(&self) -> u64 {
        self.objects_allocated.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn recycles(&self) -> u64 {
        self.recycles.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn nodes_freed(&self) -> u64 {
        self.nodes_freed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bytes_freed(&self) -> u64 {
        self.bytes_freed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn objects_marked(&self) -> u64 {
        self.objects_marked.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn last_freed(&self) -> u64 {
        self.last_freed.load(Ordering::Relaxed)
    }

    /// Get total GC time.
    pub fn total_gc_time(&self) -> Duration {
        Duration::from_nanos(self.gc_time_ns.load(Ordering::Relaxed))
    }

    /// Get average pause time.
    pub fn avg_pause(&self) -> Duration {
        let count = self.recycles();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.gc_time_ns.load(Ordering::Relaxed) / count)
    }

    /// Reset all statistics.
    pub fn reset(&self) {
        self.bytes_allocated.store(0, Ordering::Relaxed);
        self.objects_allocated.store(0, Ordering::Relaxed);
        self.recycles.store(0, Ordering::Relaxed);
        self.nodes_freed.store(0, Ordering::Relaxed);
        self.bytes_freed.store(0, Ordering::Relaxed);
        self.objects_marked.store(0, Ordering::Relaxed);
        self.gc_time_ns.store(0, Ordering::Relaxed);
        self.last_freed.store(0, Ordering::Relaxed);
    }

    /// Log a summary of GC statistics.
    pub fn log_summary(&self) {
        tracing::info!(
            objects = self.objects_allocated(),
            bytes = %format_bytes(self.bytes_allocated()),
            recycles = self.recycles(),
            freed = self.nodes_freed(),
            freed_bytes = %format_bytes(self.bytes_freed()),
            marked = self.objects_marked(),
            total = ?self.total_gc_time(),
            avg_pause = ?self.avg_pause(),
            "gc statistics"
        );
    }
}

impl Default for GcStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Format bytes in human-readable form.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Timer for measuring GC phases.
pub struct GcTimer {
    start: Instant,
    label: &'static str,
}

impl GcTimer {
    /// Start a new timer with the given label.
    pub fn start(label: &'static str) -> Self {
        Self {
            start: Instant::now(),
            label,
        }
    }

    /// Stop the timer and return the elapsed duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        tracing::trace!(phase = self.label, ?elapsed, "gc phase finished");
        elapsed
    }
}
