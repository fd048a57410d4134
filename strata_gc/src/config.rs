//! GC configuration parameters.
//!
//! Pool shapes, the collection trigger and the debug checks are all
//! tunable. Defaults suit an interactive interpreter session.

use crate::collector::{AdaptiveBallast, BallastPolicy, FixedBallast};
use crate::pool::size_class::default_size_classes;
use crate::pool::PoolSpec;
use thiserror::Error;

/// Which [`BallastPolicy`] a heap starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BallastPolicyKind {
    /// Grow the budget under pressure, shrink it back toward the floor.
    #[default]
    Adaptive,
    /// Keep the budget constant.
    Fixed,
}

/// Configuration for the garbage collector.
///
/// # Example
///
/// ```ignore
/// use strata_gc::GcConfig;
///
/// // Collect often and check the heap after every cycle
/// let config = GcConfig {
///     ballast: 64 * 1024,
///     ballast_floor: 64 * 1024,
///     verify_heap: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct GcConfig {
    // =========================================================================
    // Trigger
    // =========================================================================
    /// Bytes that may be allocated before a cycle is requested.
    ///
    /// Default: 3,000,000
    pub ballast: u64,

    /// The adaptive policy never shrinks the budget below this.
    ///
    /// Default: 3,000,000
    pub ballast_floor: u64,

    /// How the budget is adjusted after each cycle.
    ///
    /// Default: adaptive
    pub ballast_policy: BallastPolicyKind,

    // =========================================================================
    // Pools
    // =========================================================================
    /// Size classes for series content, sorted by width.
    ///
    /// Default: [`default_size_classes`]
    pub size_classes: Vec<PoolSpec>,

    /// Units per SERIES pool segment.
    ///
    /// Default: 4096
    pub series_units: usize,

    /// Units per GOB pool segment.
    ///
    /// Default: 128
    pub gob_units: usize,

    /// Units per LIBRARY pool segment.
    ///
    /// Default: 32
    pub library_units: usize,

    /// Units per ROUTINE pool segment.
    ///
    /// Default: 128
    pub routine_units: usize,

    /// Cap on segment bytes reserved across every pool. Hitting it is
    /// handled like the system allocator failing.
    ///
    /// Default: 0 (unlimited)
    pub memory_limit: usize,

    // =========================================================================
    // Stacks
    // =========================================================================
    /// Initial capacity of each guard stack.
    ///
    /// Default: 15
    pub guard_capacity: usize,

    /// Initial capacity of the mark worklist.
    ///
    /// Default: 100
    pub mark_stack_capacity: usize,

    // =========================================================================
    // Debugging
    // =========================================================================
    /// Log every cycle at `info` instead of `debug`.
    ///
    /// Default: false
    pub watch_recycle: bool,

    /// Verify heap integrity after each collection.
    ///
    /// Default: false (enabled in debug builds)
    pub verify_heap: bool,

    /// Abort at shutdown when guards are still outstanding.
    ///
    /// Default: false (enabled in debug builds)
    pub check_guard_balance: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            // Trigger
            ballast: 3_000_000,
            ballast_floor: 3_000_000,
            ballast_policy: BallastPolicyKind::Adaptive,

            // Pools
            size_classes: default_size_classes(),
            series_units: 4096,
            gob_units: 128,
            library_units: 32,
            routine_units: 128,
            memory_limit: 0, // Unlimited

            // Stacks
            guard_capacity: 15,
            mark_stack_capacity: 100,

            // Debugging
            watch_recycle: false,
            verify_heap: cfg!(debug_assertions),
            check_guard_balance: cfg!(debug_assertions),
        }
    }
}

impl GcConfig {
    /// Create a configuration optimized for low memory usage.
    pub fn low_memory() -> Self {
        Self {
            ballast: 512 * 1024,
            ballast_floor: 512 * 1024,
            series_units: 512,
            gob_units: 32,
            library_units: 8,
            routine_units: 32,
            ..Default::default()
        }
    }

    /// Create a configuration optimized for high throughput.
    pub fn high_throughput() -> Self {
        Self {
            ballast: 32 * 1024 * 1024,
            ballast_floor: 32 * 1024 * 1024,
            series_units: 16 * 1024,
            mark_stack_capacity: 1024,
            verify_heap: false,
            ..Default::default()
        }
    }

    /// Collect after every few kilobytes and verify the heap each time.
    pub fn stress() -> Self {
        Self {
            ballast: 4 * 1024,
            ballast_floor: 4 * 1024,
            ballast_policy: BallastPolicyKind::Fixed,
            verify_heap: true,
            check_guard_balance: true,
            ..Default::default()
        }
    }

    /// The ballast policy this configuration selects.
    pub fn ballast_policy(&self) -> Box<dyn BallastPolicy> {
        match self.ballast_policy {
            BallastPolicyKind::Adaptive => Box::new(AdaptiveBallast::new(self.ballast_floor)),
            BallastPolicyKind::Fixed => Box::new(FixedBallast),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ballast == 0 {
            return Err(ConfigError::ZeroBallast);
        }
        let pools = [
            ("series", self.series_units),
            ("gob", self.gob_units),
            ("library", self.library_units),
            ("routine", self.routine_units),
        ];
        if let Some(&(pool, _)) = pools.iter().find(|(_, units)| *units == 0) {
            return Err(ConfigError::EmptyPool { pool });
        }
        if self.size_classes.is_empty() {
            return Err(ConfigError::NoSizeClasses);
        }
        if let Some(class) = self.size_classes.iter().position(|spec| spec.wide == 0) {
            return Err(ConfigError::ZeroWidthClass { class });
        }
        if let Some(class) = self.size_classes.iter().position(|spec| spec.units == 0) {
            return Err(ConfigError::EmptyClass { class });
        }
        if let Some(window) = self
            .size_classes
            .windows(2)
            .position(|pair| pair[0].wide >= pair[1].wide)
        {
            return Err(ConfigError::UnsortedClasses { class: window + 1 });
        }
        // Class indices are stored in a byte, with one value kept for SYSTEM.
        if self.size_classes.len() >= u8::MAX as usize {
            return Err(ConfigError::TooManyClasses {
                count: self.size_classes.len(),
            });
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ballast must be non-zero")]
    ZeroBallast,
    #[error("{pool} pool must have at least one unit per segment")]
    EmptyPool { pool: &'static str },
    #[error("at least one size class is required")]
    NoSizeClasses,
    #[error("size class {class} has zero width")]
    ZeroWidthClass { class: usize },
    #[error("size class {class} has no units per segment")]
    EmptyClass { class: usize },
    #[error("size class {class} is not wider than the one before it")]
    UnsortedClasses { class: usize },
    #[error("{count} size classes exceed the limit of 254")]
    TooManyClasses { count: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(GcConfig::default().validate().is_ok());
    }

    #[test]
    fn test_preset_configs_are_valid() {
        assert!(GcConfig::low_memory().validate().is_ok());
        assert!(GcConfig::high_throughput().validate().is_ok());
        assert!(GcConfig::stress().validate().is_ok());
    }

    #[test]
    fn test_empty_pool_is_named() {
        let config = GcConfig {
            gob_units: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyPool { pool: "gob" }));
    }

    #[test]
    fn test_unsorted_classes() {
        let config = GcConfig {
            size_classes: vec![PoolSpec::new(64, 4), PoolSpec::new(32, 4)],
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnsortedClasses { class: 1 })
        );
    }

    #[test]
    fn test_policy_selection() {
        assert_eq!(GcConfig::default().ballast_policy().name(), "adaptive");
        assert_eq!(GcConfig::stress().ballast_policy().name(), "fixed");
    }
}
