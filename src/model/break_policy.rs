use serde::{Deserialize, Serialize};

use super::BreakPolicyId;

/// One row of a break table: shifts at least this long get these breaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakRule {
    pub min_shift_minutes: i64,
    pub breaks_minutes: Vec<i64>,
}

/// Break table keyed by shift length; attached to a position or a shop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakPolicy {
    pub id: BreakPolicyId,
    pub title: String,
    /// Kept sorted ascending by `min_shift_minutes`.
    pub rules: Vec<BreakRule>,
}

impl BreakPolicy {
    pub fn new(id: BreakPolicyId, title: &str, mut rules: Vec<BreakRule>) -> Self {
        rules.sort_by_key(|r| r.min_shift_minutes);
        Self {
            id,
            title: title.to_string(),
            rules,
        }
    }

    /// Total break minutes to deduct from a shift of the given gross length.
    /// The row with the greatest threshold not exceeding the length wins.
    pub fn break_minutes_for(&self, shift_minutes: i64) -> i64 {
        self.rules
            .iter()
            .rev()
            .find(|r| shift_minutes >= r.min_shift_minutes)
            .map(|r| r.breaks_minutes.iter().sum())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BreakPolicy {
        BreakPolicy::new(
            1,
            "retail",
            vec![
                BreakRule { min_shift_minutes: 0, breaks_minutes: vec![30] },
                BreakRule { min_shift_minutes: 360, breaks_minutes: vec![30, 30] },
                BreakRule { min_shift_minutes: 540, breaks_minutes: vec![30, 30, 15] },
            ],
        )
    }

    #[test]
    fn boundary_falls_into_the_longer_row() {
        let p = policy();
        assert_eq!(p.break_minutes_for(300), 30);
        assert_eq!(p.break_minutes_for(360), 60);
        assert_eq!(p.break_minutes_for(540), 75);
        assert_eq!(p.break_minutes_for(700), 75);
    }

    #[test]
    fn empty_policy_deducts_nothing() {
        let p = BreakPolicy::new(2, "none", vec![]);
        assert_eq!(p.break_minutes_for(480), 0);
    }
}
