use super::{
    AnalyzerResult, CrosstabResult, Number, NumberResult, ResultKind, ValueCount, ValueCountList,
    ValueDistributionResult,
};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReduceError {
    #[error("Nothing to reduce")]
    Empty,

    #[error("Cannot reduce a {found} result together with {expected} results")]
    MixedKinds {
        expected: ResultKind,
        found: ResultKind,
    },

    #[error("Results of kind {0} have no reducer")]
    NotReducible(ResultKind),
}

/// Merge partial results of one component, given in division dispatch order
///
/// A single partial is returned as is.
pub fn reduce(partials: &[AnalyzerResult]) -> Result<AnalyzerResult, ReduceError> {
    let first = partials.first().ok_or(ReduceError::Empty)?;
    let expected = first.kind();
    if let Some(other) = partials.iter().find(|p| p.kind() != expected) {
        return Err(ReduceError::MixedKinds {
            expected,
            found: other.kind(),
        });
    }
    if partials.len() == 1 {
        return Ok(first.clone());
    }

    match first {
        AnalyzerResult::Number(_) => Ok(AnalyzerResult::Number(reduce_numbers(
            partials.iter().filter_map(|p| match p {
                AnalyzerResult::Number(n) => Some(n),
                _ => None,
            }),
        ))),
        AnalyzerResult::ValueDistribution(_) => {
            let parts: Vec<&ValueDistributionResult> = partials
                .iter()
                .filter_map(|p| match p {
                    AnalyzerResult::ValueDistribution(v) => Some(v),
                    _ => None,
                })
                .collect();
            reduce_value_distributions(&parts).map(AnalyzerResult::ValueDistribution)
        },
        AnalyzerResult::Crosstab(_) => Ok(AnalyzerResult::Crosstab(reduce_crosstabs(
            partials.iter().filter_map(|p| match p {
                AnalyzerResult::Crosstab(c) => Some(c),
                _ => None,
            }),
        ))),
        AnalyzerResult::Text(_) => Err(ReduceError::NotReducible(ResultKind::Text)),
    }
}

/// Merge exactly two partials
pub fn reduce_pair(
    first: &AnalyzerResult,
    second: &AnalyzerResult,
) -> Result<AnalyzerResult, ReduceError> {
    reduce(&[first.clone(), second.clone()])
}

fn reduce_numbers<'a>(parts: impl Iterator<Item = &'a NumberResult>) -> NumberResult {
    NumberResult {
        value: parts.fold(Number::ZERO, |sum, part| sum.add(part.value)),
    }
}

fn reduce_value_distributions(
    parts: &[&ValueDistributionResult],
) -> Result<ValueDistributionResult, ReduceError> {
    let first = parts.first().ok_or(ReduceError::Empty)?;
    let top_values = ValueCountList::merge(parts.iter().map(|p| &p.top_values))
        .ok_or(ReduceError::Empty)?;
    let bottom_lists: Vec<&ValueCountList> =
        parts.iter().filter_map(|p| p.bottom_values.as_ref()).collect();

    let mut merged = ValueDistributionResult {
        column: first.column.clone(),
        total_count: parts.iter().map(|p| p.total_count).sum(),
        null_count: parts.iter().map(|p| p.null_count).sum(),
        distinct_count: 0,
        unique_count: 0,
        top_values,
        bottom_values: ValueCountList::merge(bottom_lists),
        value_counts: merge_value_counts(parts.iter().map(|p| p.value_counts.as_slice())),
    };
    merged.recount();
    Ok(merged)
}

/// Sum the counts of identical values, keeping first-seen order
fn merge_value_counts<'a>(parts: impl Iterator<Item = &'a [ValueCount]>) -> Vec<ValueCount> {
    let mut merged: Vec<ValueCount> = Vec::new();
    let mut index: HashMap<&'a str, usize> = HashMap::new();
    for entry in parts.flatten() {
        match index.get(entry.value.as_str()) {
            Some(&position) => merged[position].count += entry.count,
            None => {
                index.insert(entry.value.as_str(), merged.len());
                merged.push(entry.clone());
            },
        }
    }
    merged
}

fn reduce_crosstabs<'a>(mut parts: impl Iterator<Item = &'a CrosstabResult>) -> CrosstabResult {
    let mut merged = match parts.next() {
        Some(first) => first.clone(),
        None => return CrosstabResult::new("", ""),
    };
    for part in parts {
        for row in &part.rows {
            if !merged.rows.contains(row) {
                merged.rows.push(row.clone());
                merged.cells.push(vec![None; merged.columns.len()]);
            }
        }
        for column in &part.columns {
            if !merged.columns.contains(column) {
                merged.columns.push(column.clone());
                for cells in &mut merged.cells {
                    cells.push(None);
                }
            }
        }
        for (row, column, value) in part.entries() {
            merged.add(row, column, value);
        }
    }
    merged
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::result::TextResult;
    use proptest::prelude::*;

    fn number(n: i64) -> AnalyzerResult {
        AnalyzerResult::Number(NumberResult::new(n))
    }

    fn distribution(counts: &[(&str, u64)], k: usize) -> AnalyzerResult {
        let counts = counts.iter().map(|(v, c)| ValueCount::new(*v, *c)).collect();
        AnalyzerResult::ValueDistribution(ValueDistributionResult::from_value_counts("city", 0, counts, k, None))
    }

    fn crosstab(cells: &[(&str, &str, i64)]) -> CrosstabResult {
        let mut crosstab = CrosstabResult::new("year", "weekday");
        for (row, column, value) in cells {
            crosstab.add(row, column, Number::Integer(*value));
        }
        crosstab
    }

    #[test]
    fn test_number_sum() {
        assert_eq!(reduce(&[number(2), number(3)]).unwrap(), number(5));
    }

    #[test]
    fn test_top_k_scenario() {
        let a = distribution(&[("x", 5), ("y", 3), ("z", 2)], 3);
        let b = distribution(&[("x", 1), ("w", 4)], 3);

        let AnalyzerResult::ValueDistribution(merged) = reduce(&[a, b]).unwrap() else {
            panic!("expected a value distribution");
        };
        assert_eq!(
            merged.top_values.values,
            vec![ValueCount::new("x", 6), ValueCount::new("w", 4), ValueCount::new("y", 3)]
        );
        assert_eq!(merged.total_count, 15);
    }

    #[test]
    fn test_distinct_and_unique_counts_are_recomputed() {
        let a = distribution(&[("x", 5), ("y", 1), ("z", 1)], 2);
        let b = distribution(&[("y", 1), ("w", 1)], 2);

        let AnalyzerResult::ValueDistribution(merged) = reduce(&[a, b]).unwrap() else {
            panic!("expected a value distribution");
        };
        // y is unique in both divisions but not overall
        assert_eq!(merged.distinct_count, 4);
        assert_eq!(merged.unique_count, 2);
        assert_eq!(merged.total_count, 9);
        assert_eq!(
            merged.value_counts,
            vec![
                ValueCount::new("x", 5),
                ValueCount::new("y", 2),
                ValueCount::new("z", 1),
                ValueCount::new("w", 1)
            ]
        );

        let again = reduce(&[AnalyzerResult::ValueDistribution(merged), distribution(&[("w", 3)], 2)]).unwrap();
        let AnalyzerResult::ValueDistribution(again) = again else {
            panic!("expected a value distribution");
        };
        assert_eq!(again.distinct_count, 4);
        assert_eq!(again.unique_count, 1);
    }

    #[test]
    fn test_top_k_ties_follow_first_seen_order() {
        let a = distribution(&[("b", 2), ("a", 1)], 2);
        let b = distribution(&[("a", 1), ("c", 2)], 2);

        let AnalyzerResult::ValueDistribution(merged) = reduce(&[a, b]).unwrap() else {
            panic!("expected a value distribution");
        };
        // b, a and c all have 2; b and a were seen first
        assert_eq!(merged.top_values.values, vec![ValueCount::new("b", 2), ValueCount::new("a", 2)]);
    }

    #[test]
    fn test_crosstab_union_and_sum() {
        let a = crosstab(&[("2024", "Mon", 1), ("2024", "Tue", 2)]);
        let b = crosstab(&[("2025", "Mon", 3), ("2024", "Mon", 4)]);

        let AnalyzerResult::Crosstab(merged) =
            reduce(&[AnalyzerResult::Crosstab(a), AnalyzerResult::Crosstab(b)]).unwrap()
        else {
            panic!("expected a crosstab");
        };
        assert_eq!(merged.rows, vec!["2024", "2025"]);
        assert_eq!(merged.columns, vec!["Mon", "Tue"]);
        assert_eq!(merged.get("2024", "Mon"), Some(Number::Integer(5)));
        assert_eq!(merged.get("2024", "Tue"), Some(Number::Integer(2)));
        assert_eq!(merged.get("2025", "Mon"), Some(Number::Integer(3)));
        assert_eq!(merged.get("2025", "Tue"), None);
    }

    #[test]
    fn test_reduce_errors() {
        assert_eq!(reduce(&[]), Err(ReduceError::Empty));
        assert!(matches!(
            reduce(&[number(1), distribution(&[("x", 1)], 1)]),
            Err(ReduceError::MixedKinds { .. })
        ));
        let text = AnalyzerResult::Text(TextResult::new("a"));
        assert_eq!(
            reduce(&[text.clone(), text]),
            Err(ReduceError::NotReducible(ResultKind::Text))
        );
    }

    #[test]
    fn test_single_partial_is_identity() {
        let text = AnalyzerResult::Text(TextResult::new("only"));
        assert_eq!(reduce(std::slice::from_ref(&text)).unwrap(), text);
    }

    fn counts_strategy() -> impl Strategy<Value = Vec<(String, u64)>> {
        prop::collection::btree_map("[a-f]", 1_u64..50, 0..6)
            .prop_map(|m| m.into_iter().collect::<Vec<_>>())
    }

    fn cells_strategy() -> impl Strategy<Value = Vec<(String, String, i64)>> {
        prop::collection::vec(("[a-c]", "[x-z]", 0_i64..1000), 0..8)
    }

    fn crosstab_of(cells: &[(String, String, i64)]) -> AnalyzerResult {
        let mut crosstab = CrosstabResult::new("r", "c");
        for (row, column, value) in cells {
            crosstab.add(row, column, Number::Integer(*value));
        }
        AnalyzerResult::Crosstab(crosstab)
    }

    proptest! {
        #[test]
        fn prop_number_reduce_is_commutative(a in -1_000_000_i64..1_000_000, b in -1_000_000_i64..1_000_000) {
            prop_assert_eq!(reduce(&[number(a), number(b)]).unwrap(), reduce(&[number(b), number(a)]).unwrap());
            prop_assert_eq!(reduce(&[number(a), number(b)]).unwrap(), number(a + b));
        }

        #[test]
        fn prop_top_k_bounded_with_summed_counts(
            inputs in prop::collection::vec(counts_strategy(), 1..5),
            k in 1_usize..5,
        ) {
            // each input keeps every value so the per-value sum is exact
            let partials: Vec<AnalyzerResult> = inputs
                .iter()
                .map(|counts| {
                    let pairs: Vec<(&str, u64)> = counts.iter().map(|(v, c)| (v.as_str(), *c)).collect();
                    distribution(&pairs, 6)
                })
                .map(|p| match p {
                    AnalyzerResult::ValueDistribution(mut v) => {
                        v.top_values.capacity = k;
                        AnalyzerResult::ValueDistribution(v)
                    }
                    other => other,
                })
                .collect();

            let AnalyzerResult::ValueDistribution(merged) = reduce(&partials).unwrap() else {
                panic!("expected a value distribution");
            };
            prop_assert!(merged.top_values.len() <= k);
            for entry in &merged.top_values.values {
                let expected: u64 = inputs
                    .iter()
                    .flat_map(|counts| counts.iter())
                    .filter(|(v, _)| *v == entry.value)
                    .map(|(_, c)| c)
                    .sum();
                prop_assert_eq!(entry.count, expected);
            }
        }

        #[test]
        fn prop_crosstab_commutative_and_associative(
            a in cells_strategy(),
            b in cells_strategy(),
            c in cells_strategy(),
        ) {
            let (a, b, c) = (crosstab_of(&a), crosstab_of(&b), crosstab_of(&c));
            let all = reduce(&[a.clone(), b.clone(), c.clone()]).unwrap();

            let nested = reduce(&[reduce(&[a.clone(), b.clone()]).unwrap(), c.clone()]).unwrap();
            prop_assert_eq!(&all, &nested);

            let permuted = reduce(&[c.clone(), a.clone(), b.clone()]).unwrap();
            prop_assert_eq!(&all, &permuted);

            let right = reduce(&[a, reduce(&[b, c]).unwrap()]).unwrap();
            prop_assert_eq!(&all, &right);
        }
    }
}
