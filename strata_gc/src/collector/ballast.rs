//! Collection trigger.
//!
//! The ballast is a byte counter debited on allocation and credited when
//! the sweeper frees memory. When it runs out, a collection is requested.
//! After each cycle a [`BallastPolicy`] looks at how much of the budget is
//! still in use and may move the budget; the counter moves by the same
//! amount.
//!
//! The adaptive thresholds are tuned by observation, not derived. Treat
//! them as knobs.

use std::fmt;

/// Decides the next budget from the current one and the bytes in use.
pub trait BallastPolicy: fmt::Debug {
    /// Return the new budget.
    fn adjust(&self, budget: u64, used: u64) -> u64;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Grows the budget when a cycle frees too little and shrinks it, down to
/// a floor, when a cycle frees a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveBallast {
    /// Budget never shrinks below this.
    pub floor: u64,
}

impl AdaptiveBallast {
    /// Usage above `budget * GROW_AT.0 / GROW_AT.1` grows the budget.
    pub const GROW_AT: (u64, u64) = (9, 10);
    /// Usage below `budget * SHRINK_AT.0 / SHRINK_AT.1` shrinks it.
    pub const SHRINK_AT: (u64, u64) = (3, 4);
    /// New budget is `used * RESIZE_TO.0 / RESIZE_TO.1`.
    pub const RESIZE_TO: (u64, u64) = (5, 4);

    pub const fn new(floor: u64) -> Self {
        Self { floor }
    }
}

impl BallastPolicy for AdaptiveBallast {
    fn adjust(&self, budget: u64, used: u64) -> u64 {
        let resized = used.saturating_mul(Self::RESIZE_TO.0) / Self::RESIZE_TO.1;
        if used > budget.saturating_mul(Self::GROW_AT.0) / Self::GROW_AT.1 {
            resized
        } else if used < budget.saturating_mul(Self::SHRINK_AT.0) / Self::SHRINK_AT.1
            && budget > self.floor
        {
            resized.max(self.floor)
        } else {
            budget
        }
    }

    fn name(&self) -> &'static str {
        "adaptive"
    }
}

/// Keeps the budget where it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedBallast;

impl BallastPolicy for FixedBallast {
    fn adjust(&self, budget: u64, _used: u64) -> u64 {
        budget
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Outcome of a post-cycle budget adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BallastAdjustment {
    pub used: u64,
    pub old_budget: u64,
    pub new_budget: u64,
}

/// The allocation counter and its budget.
#[derive(Debug)]
pub struct Ballast {
    remaining: i64,
    budget: u64,
    policy: Box<dyn BallastPolicy>,
}

impl Ballast {
    /// Start with `budget` bytes before the first collection.
    pub fn new(budget: u64, policy: Box<dyn BallastPolicy>) -> Self {
        Self {
            remaining: budget as i64,
            budget,
            policy,
        }
    }

    /// Charge an allocation. Returns `true` once the ballast is used up.
    #[inline]
    pub fn debit(&mut self, bytes: usize) -> bool {
        self.remaining -= bytes as i64;
        self.remaining <= 0
    }

    /// Give back freed bytes.
    #[inline]
    pub fn credit(&mut self, bytes: usize) {
        self.remaining += bytes as i64;
    }

    /// Bytes left before a collection is requested. Negative once overdrawn.
    #[inline]
    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    #[inline]
    pub fn budget(&self) -> u64 {
        self.budget
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }

    pub fn policy(&self) -> &dyn BallastPolicy {
        &*self.policy
    }

    pub fn set_policy(&mut self, policy: Box<dyn BallastPolicy>) {
        self.policy = policy;
    }

    /// Let the policy move the budget after a cycle.
    pub fn adjust(&mut self) -> BallastAdjustment {
        let used = (self.budget as i64 - self.remaining).max(0) as u64;
        let old_budget = self.budget;
        let new_budget = self.policy.adjust(old_budget, used);
        self.remaining += new_budget as i64 - old_budget as i64;
        self.budget = new_budget;
        BallastAdjustment {
            used,
            old_budget,
            new_budget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOOR: u64 = 3_000_000;

    #[test]
    fn test_adaptive_grows_when_mostly_used() {
        let policy = AdaptiveBallast::new(FLOOR);
        assert_eq!(policy.adjust(4_000_000, 3_900_000), 4_875_000);
    }

    #[test]
    fn test_adaptive_shrinks_to_floor() {
        let policy = AdaptiveBallast::new(FLOOR);
        assert_eq!(policy.adjust(8_000_000, 4_000_000), 5_000_000);
        assert_eq!(policy.adjust(8_000_000, 100), FLOOR);
    }

    #[test]
    fn test_adaptive_keeps_budget_in_band() {
        let policy = AdaptiveBallast::new(FLOOR);
        assert_eq!(policy.adjust(8_000_000, 6_500_000), 8_000_000);
        // At the floor there is nothing to shrink.
        assert_eq!(policy.adjust(FLOOR, 0), FLOOR);
    }

    #[test]
    fn test_debit_and_credit() {
        let mut ballast = Ballast::new(100, Box::new(FixedBallast));
        assert!(!ballast.debit(60));
        assert!(ballast.debit(40));
        assert!(ballast.is_exhausted());
        ballast.credit(30);
        assert_eq!(ballast.remaining(), 30);
    }

    #[test]
    fn test_adjust_moves_remaining_with_budget() {
        let mut ballast = Ballast::new(FLOOR, Box::new(AdaptiveBallast::new(FLOOR)));
        ballast.debit(2_900_000);
        ballast.debit(100_000);
        ballast.credit(50_000);

        let adjustment = ballast.adjust();
        assert_eq!(adjustment.used, 2_950_000);
        assert_eq!(adjustment.new_budget, 3_687_500);
        assert_eq!(ballast.remaining(), 50_000 + 687_500);
    }

    #[test]
    fn test_fixed_policy_never_moves() {
        let mut ballast = Ballast::new(1000, Box::new(FixedBallast));
        ballast.debit(5000);
        let adjustment = ballast.adjust();
        assert_eq!(adjustment.new_budget, 1000);
        assert_eq!(ballast.remaining(), -4000);
    }
}
