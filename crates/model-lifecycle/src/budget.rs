//! Thread budget shared by the two inference capabilities

use serde::{Deserialize, Serialize};

/// Threads granted to the process and their split between capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadBudget {
    pub total: usize,
    pub vision: usize,
    pub speech: usize,
}

impl ThreadBudget {
    /// Compute the budget for a machine with `cores` logical cores.
    ///
    /// `total` is `requested`, or `cores - reserve` when nothing was
    /// requested, clamped to `[1, max(1, cores - 1)]`. Speech receives
    /// `speech_share` clamped to `[1, total - 1]` and vision the rest. With a
    /// single thread both capabilities get that one thread.
    pub fn compute(cores: usize, reserve: usize, requested: Option<usize>, speech_share: usize) -> Self {
        let ceiling = cores.saturating_sub(1).max(1);
        let total = requested
            .unwrap_or_else(|| cores.saturating_sub(reserve))
            .clamp(1, ceiling);

        if total == 1 {
            return Self {
                total,
                vision: 1,
                speech: 1,
            };
        }

        let speech = speech_share.clamp(1, total - 1);
        Self {
            total,
            vision: total - speech,
            speech,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_applied() {
        let budget = ThreadBudget::compute(16, 4, None, 4);
        assert_eq!(budget, ThreadBudget { total: 12, vision: 8, speech: 4 });
    }

    #[test]
    fn test_total_clamped_below_core_count() {
        let budget = ThreadBudget::compute(8, 0, None, 2);
        assert_eq!(budget.total, 7);
        let budget = ThreadBudget::compute(8, 2, Some(64), 2);
        assert_eq!(budget.total, 7);
    }

    #[test]
    fn test_small_machines() {
        assert_eq!(ThreadBudget::compute(1, 4, None, 4), ThreadBudget { total: 1, vision: 1, speech: 1 });
        assert_eq!(ThreadBudget::compute(2, 4, None, 4), ThreadBudget { total: 1, vision: 1, speech: 1 });
        assert_eq!(ThreadBudget::compute(4, 2, None, 4), ThreadBudget { total: 2, vision: 1, speech: 1 });
        assert_eq!(ThreadBudget::compute(0, 0, Some(0), 1).total, 1);
    }

    #[test]
    fn test_partition_never_exceeds_total() {
        for cores in 1..64 {
            for share in 0..8 {
                let budget = ThreadBudget::compute(cores, 2, None, share);
                assert!(budget.vision >= 1 && budget.speech >= 1);
                if budget.total > 1 {
                    assert_eq!(budget.vision + budget.speech, budget.total);
                }
                assert!(budget.total <= cores.saturating_sub(1).max(1));
            }
        }
    }
}
