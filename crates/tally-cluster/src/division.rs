//! Splitting a job into divisions

use serde::{Deserialize, Serialize};
use tally_engine::RowRange;

/// Position of one division among all divisions of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivisionContext {
    pub index: usize,
    pub count: usize,
}

impl DivisionContext {
    pub fn new(index: usize, count: usize) -> Self {
        Self { index, count }
    }

    /// The only division of a job run in one piece
    pub fn single() -> Self {
        Self::new(0, 1)
    }
}

/// Decides how many divisions a job is split into
pub trait JobDivisionManager: Send + Sync {
    /// Always at least one; never more than `expected_rows` when that is
    /// known and positive
    fn division_count(&self, total_workers: usize, expected_rows: Option<u64>) -> usize;
}

/// One division per worker, or a fixed number of divisions
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDivisionsCountJobDivisionManager {
    divisions: Option<usize>,
}

impl FixedDivisionsCountJobDivisionManager {
    pub fn per_worker() -> Self {
        Self { divisions: None }
    }

    pub fn new(divisions: usize) -> Self {
        Self {
            divisions: Some(divisions),
        }
    }
}

impl JobDivisionManager for FixedDivisionsCountJobDivisionManager {
    fn division_count(&self, total_workers: usize, expected_rows: Option<u64>) -> usize {
        let wanted = self.divisions.unwrap_or(total_workers).max(1);
        match expected_rows {
            Some(rows) if rows > 0 => wanted.min(usize::try_from(rows).unwrap_or(usize::MAX)),
            _ => wanted,
        }
    }
}

/// Contexts and row ranges of `count` divisions
///
/// Without a known row count there is a single division over all rows.
pub fn plan_divisions(count: usize, expected_rows: Option<u64>) -> Vec<(DivisionContext, Option<RowRange>)> {
    match expected_rows {
        Some(rows) => {
            let count = count.max(1);
            (0..count)
                .map(|i| (DivisionContext::new(i, count), Some(RowRange::for_division(i, count, rows))))
                .collect()
        },
        None => vec![(DivisionContext::single(), None)],
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_division_count_per_worker() {
        let manager = FixedDivisionsCountJobDivisionManager::per_worker();
        assert_eq!(manager.division_count(4, Some(1000)), 4);
        assert_eq!(manager.division_count(4, Some(3)), 3);
        assert_eq!(manager.division_count(0, Some(1000)), 1);
        assert_eq!(manager.division_count(4, None), 4);
    }

    #[test]
    fn test_fixed_division_count() {
        let manager = FixedDivisionsCountJobDivisionManager::new(6);
        assert_eq!(manager.division_count(2, Some(100)), 6);
        assert_eq!(manager.division_count(2, Some(0)), 6);
    }

    #[test]
    fn test_plan_divisions() {
        let plan = plan_divisions(2, Some(9));
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0], (DivisionContext::new(0, 2), Some(RowRange::new(1, Some(5)))));
        assert_eq!(plan[1], (DivisionContext::new(1, 2), Some(RowRange::new(6, None))));

        assert_eq!(plan_divisions(3, None), vec![(DivisionContext::single(), None)]);
    }
}
