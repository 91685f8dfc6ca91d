//! One timeout budget spread over several waits.

use std::time::{Duration, Instant};

use servolink_errors::{Result, ServoError};

/// Stand-in for budgets too large to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 3600);

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    pub fn instant(&self) -> Instant {
        self.start
            .checked_add(self.budget)
            .unwrap_or_else(|| self.start + FAR_FUTURE)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.budget
    }

    /// Budget left, or `Timeout` once it is used up.
    pub fn remaining(&self) -> Result<Duration> {
        let left = self.budget.saturating_sub(self.elapsed());
        if left.is_zero() {
            return Err(ServoError::timeout(format!(
                "operation timed out after {} ms",
                self.budget.as_millis()
            )));
        }
        Ok(left)
    }
}
