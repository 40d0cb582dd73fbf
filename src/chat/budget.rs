//! Daily token ceiling for model calls, shared by every conversation.
//!
//! The counter resets when the UTC calendar day changes. Checks and records
//! are lock-free; a few calls racing past the limit at the boundary is
//! tolerated.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use chrono::{Datelike, Utc};

/// The daily token allowance is used up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("daily token limit reached: used {used} of {limit}")]
pub struct BudgetExhausted {
    /// Tokens consumed today.
    pub used: u64,
    /// Daily limit.
    pub limit: u64,
}

/// Token usage counter with a daily limit.
#[derive(Debug)]
pub struct DailyBudget {
    tokens: AtomicU64,
    day: AtomicI32,
    limit: u64,
}

impl DailyBudget {
    /// Create a budget allowing `limit` tokens per UTC day.
    pub fn new(limit: u64) -> Self {
        Self {
            tokens: AtomicU64::new(0),
            day: AtomicI32::new(current_day()),
            limit,
        }
    }

    /// Whether another call may be made today.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetExhausted`] once today's usage has reached the limit.
    pub fn check(&self) -> Result<(), BudgetExhausted> {
        self.roll_over(current_day());
        let used = self.tokens.load(Ordering::Relaxed);
        if used >= self.limit {
            return Err(BudgetExhausted {
                used,
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// Record tokens consumed by a completed call.
    pub fn record(&self, tokens: u64) {
        self.roll_over(current_day());
        let _ = self
            .tokens
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_add(tokens))
            });
    }

    /// Tokens consumed today.
    pub fn used(&self) -> u64 {
        self.roll_over(current_day());
        self.tokens.load(Ordering::Relaxed)
    }

    /// Configured daily limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Reset the counter if `today` differs from the stored day. The
    /// compare-exchange makes exactly one caller perform the reset.
    fn roll_over(&self, today: i32) {
        let stored = self.day.load(Ordering::Relaxed);
        if stored != today
            && self
                .day
                .compare_exchange(stored, today, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.tokens.store(0, Ordering::Relaxed);
        }
    }
}

/// Days since the common era, UTC.
fn current_day() -> i32 {
    Utc::now().num_days_from_ce()
}
