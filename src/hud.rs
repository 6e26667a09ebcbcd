use serde::{Deserialize, Serialize};

use crate::util::{percent, round_tenths};

/// Running counters shown while playing. All of them only grow within a
/// session except `streak`, which drops to 0 on any mistake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HudCounters {
    pub tokens_total: u64,
    pub tokens_attempted: u64,
    pub tokens_first_try_correct: u64,
    pub rows_completed: u64,
    pub mistakes_total: u64,
    pub streak: u64,
    pub active_ms: u64,
}

impl HudCounters {
    pub fn with_total(tokens_total: u64) -> Self {
        Self {
            tokens_total,
            ..Self::default()
        }
    }

    pub fn accuracy_percent(&self) -> u32 {
        percent(self.tokens_first_try_correct, self.tokens_attempted)
    }

    /// Completed rows per minute of active time, to one decimal.
    pub fn rows_per_minute(&self) -> f64 {
        if self.active_ms == 0 {
            return 0.0;
        }
        round_tenths(self.rows_completed as f64 / (self.active_ms as f64 / 60_000.0))
    }
}
