//! Analyzer results
//!
//! [`AnalyzerResult`] is a closed set of result kinds. Every kind except
//! [`TextResult`] has a reducer ([`reduce`]), which is what makes analyzers
//! producing it distributable.

mod reduce;

pub use reduce::{reduce, reduce_pair, ReduceError};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Number,
    ValueDistribution,
    Crosstab,
    Text,
}

impl ResultKind {
    pub fn has_reducer(self) -> bool {
        !matches!(self, ResultKind::Text)
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultKind::Number => f.write_str("number"),
            ResultKind::ValueDistribution => f.write_str("value_distribution"),
            ResultKind::Crosstab => f.write_str("crosstab"),
            ResultKind::Text => f.write_str("text"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalyzerResult {
    Number(NumberResult),
    ValueDistribution(ValueDistributionResult),
    Crosstab(CrosstabResult),
    Text(TextResult),
}

impl AnalyzerResult {
    pub fn kind(&self) -> ResultKind {
        match self {
            AnalyzerResult::Number(_) => ResultKind::Number,
            AnalyzerResult::ValueDistribution(_) => ResultKind::ValueDistribution,
            AnalyzerResult::Crosstab(_) => ResultKind::Crosstab,
            AnalyzerResult::Text(_) => ResultKind::Text,
        }
    }
}

/// A result together with the key of the component that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedAnalyzerResult {
    pub key: String,
    pub result: AnalyzerResult,
}

impl NamedAnalyzerResult {
    pub fn new(key: impl Into<String>, result: AnalyzerResult) -> Self {
        Self {
            key: key.into(),
            result,
        }
    }
}

/// Integer or floating point quantity
///
/// Sums stay integral until they overflow or meet a float.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    pub const ZERO: Number = Number::Integer(0);

    pub fn add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => a
                .checked_add(b)
                .map_or(Number::Float(a as f64 + b as f64), Number::Integer),
            (a, b) => Number::Float(a.as_f64() + b.as_f64()),
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Number::Integer(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

impl Default for Number {
    fn default() -> Self {
        Number::ZERO
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Integer(i) => write!(f, "{}", i),
            Number::Float(x) => write!(f, "{}", x),
        }
    }
}

impl From<i64> for Number {
    fn from(i: i64) -> Self {
        Number::Integer(i)
    }
}

impl From<f64> for Number {
    fn from(f: f64) -> Self {
        Number::Float(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumberResult {
    pub value: Number,
}

impl NumberResult {
    pub fn new(value: impl Into<Number>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

/// Direction of a ranked value list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RankOrder {
    /// Most frequent first
    #[default]
    Top,
    /// Least frequent first
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: u64,
}

impl ValueCount {
    pub fn new(value: impl Into<String>, count: u64) -> Self {
        Self {
            value: value.into(),
            count,
        }
    }
}

/// Ranked, bounded list of value counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCountList {
    pub order: RankOrder,
    /// Maximum number of entries kept
    pub capacity: usize,
    pub values: Vec<ValueCount>,
}

impl ValueCountList {
    pub fn new(order: RankOrder, capacity: usize) -> Self {
        Self {
            order,
            capacity,
            values: Vec::new(),
        }
    }

    /// Rank `counts` (kept in the given order among ties) and keep the
    /// first `capacity`
    pub fn from_counts<I, S>(order: RankOrder, capacity: usize, counts: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let mut list = Self::new(order, capacity);
        list.values = counts
            .into_iter()
            .map(|(value, count)| ValueCount::new(value, count))
            .collect();
        list.rank();
        list
    }

    /// Merge lists by summing identical values, then re-rank
    ///
    /// Values keep the order they are first seen in across the concatenated
    /// inputs, so ties resolve towards earlier lists. Order and capacity come
    /// from the first list.
    pub fn merge<'a, I>(lists: I) -> Option<ValueCountList>
    where
        I: IntoIterator<Item = &'a ValueCountList>,
    {
        let mut lists = lists.into_iter();
        let first = lists.next()?;
        let mut merged = ValueCountList::new(first.order, first.capacity);
        let mut index: HashMap<String, usize> = HashMap::new();

        for list in std::iter::once(first).chain(lists) {
            for entry in &list.values {
                match index.get(&entry.value) {
                    Some(&position) => merged.values[position].count += entry.count,
                    None => {
                        index.insert(entry.value.clone(), merged.values.len());
                        merged.values.push(entry.clone());
                    },
                }
            }
        }

        merged.rank();
        Some(merged)
    }

    fn rank(&mut self) {
        match self.order {
            RankOrder::Top => self.values.sort_by(|a, b| b.count.cmp(&a.count)),
            RankOrder::Bottom => self.values.sort_by(|a, b| a.count.cmp(&b.count)),
        }
        self.values.truncate(self.capacity);
    }

    pub fn get(&self, value: &str) -> Option<u64> {
        self.values.iter().find(|v| v.value == value).map(|v| v.count)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueDistributionResult {
    pub column: String,
    pub total_count: u64,
    pub null_count: u64,
    /// Different non-null values
    #[serde(default)]
    pub distinct_count: u64,
    /// Values that occurred exactly once
    #[serde(default)]
    pub unique_count: u64,
    pub top_values: ValueCountList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom_values: Option<ValueCountList>,
    /// Every non-null value with its count, in first-seen order
    #[serde(default)]
    pub value_counts: Vec<ValueCount>,
}

impl ValueDistributionResult {
    /// Derive the counts and ranked lists from the full value counts
    pub fn from_value_counts(
        column: impl Into<String>,
        null_count: u64,
        value_counts: Vec<ValueCount>,
        top: usize,
        bottom: Option<usize>,
    ) -> Self {
        let ranked = |order, capacity| {
            ValueCountList::from_counts(order, capacity, value_counts.iter().map(|v| (v.value.clone(), v.count)))
        };
        let top_values = ranked(RankOrder::Top, top);
        let bottom_values = bottom.map(|capacity| ranked(RankOrder::Bottom, capacity));

        let mut result = Self {
            column: column.into(),
            total_count: null_count + value_counts.iter().map(|v| v.count).sum::<u64>(),
            null_count,
            distinct_count: 0,
            unique_count: 0,
            top_values,
            bottom_values,
            value_counts,
        };
        result.recount();
        result
    }

    /// Recompute the distinct and unique counts from `value_counts`
    pub fn recount(&mut self) {
        self.distinct_count = self.value_counts.len() as u64;
        self.unique_count = self.value_counts.iter().filter(|v| v.count == 1).count() as u64;
    }
}

/// Two-dimensional table of numbers addressed by row and column labels
///
/// Equality compares cells by label, not by position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrosstabResult {
    pub row_dimension: String,
    pub column_dimension: String,
    pub rows: Vec<String>,
    pub columns: Vec<String>,
    /// `cells[row][column]`, `None` where nothing was recorded
    pub cells: Vec<Vec<Option<Number>>>,
}

impl CrosstabResult {
    pub fn new(row_dimension: impl Into<String>, column_dimension: impl Into<String>) -> Self {
        Self {
            row_dimension: row_dimension.into(),
            column_dimension: column_dimension.into(),
            rows: Vec::new(),
            columns: Vec::new(),
            cells: Vec::new(),
        }
    }

    pub fn get(&self, row: &str, column: &str) -> Option<Number> {
        let r = self.rows.iter().position(|l| l == row)?;
        let c = self.columns.iter().position(|l| l == column)?;
        self.cells.get(r).and_then(|cells| cells.get(c)).copied().flatten()
    }

    /// Add `value` to a cell, creating labels as needed
    pub fn add(&mut self, row: &str, column: &str, value: Number) {
        let r = match self.rows.iter().position(|l| l == row) {
            Some(r) => r,
            None => {
                self.rows.push(row.to_string());
                self.cells.push(vec![None; self.columns.len()]);
                self.rows.len() - 1
            },
        };
        let c = match self.columns.iter().position(|l| l == column) {
            Some(c) => c,
            None => {
                self.columns.push(column.to_string());
                for cells in &mut self.cells {
                    cells.push(None);
                }
                self.columns.len() - 1
            },
        };
        if let Some(cells) = self.cells.get_mut(r) {
            if cells.len() < self.columns.len() {
                cells.resize(self.columns.len(), None);
            }
            let cell = &mut cells[c];
            *cell = Some(cell.unwrap_or(Number::ZERO).add(value));
        }
    }

    /// Every recorded cell as `(row, column, value)`
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, Number)> {
        self.rows.iter().enumerate().flat_map(move |(r, row)| {
            self.columns.iter().enumerate().filter_map(move |(c, column)| {
                self.cells
                    .get(r)
                    .and_then(|cells| cells.get(c))
                    .copied()
                    .flatten()
                    .map(|value| (row.as_str(), column.as_str(), value))
            })
        })
    }
}

impl PartialEq for CrosstabResult {
    fn eq(&self, other: &Self) -> bool {
        let same_labels = |a: &[String], b: &[String]| {
            a.len() == b.len() && a.iter().all(|label| b.contains(label))
        };
        self.row_dimension == other.row_dimension
            && self.column_dimension == other.column_dimension
            && same_labels(&self.rows, &other.rows)
            && same_labels(&self.columns, &other.columns)
            && self.rows.iter().all(|row| {
                self.columns
                    .iter()
                    .all(|column| self.get(row, column) == other.get(row, column))
            })
    }
}

/// Free-form text; has no reducer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextResult {
    pub text: String,
}

impl TextResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}
