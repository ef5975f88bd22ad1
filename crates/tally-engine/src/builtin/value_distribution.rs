use super::string_property;
use crate::component::{Analyzer, Component, ResultOutput};
use crate::descriptor::{ComponentDescriptor, ComponentKind, Property};
use crate::result::{AnalyzerResult, ResultKind, ValueCount, ValueDistributionResult};
use crate::value::InputRow;
use anyhow::ensure;
use std::any::Any;
use std::collections::HashMap;

pub const DEFAULT_TOP: usize = 5;

/// Counts occurrences of each value of a column
///
/// Keeps the `top` most frequent values and, when `bottom` is set, the
/// `bottom` least frequent ones. Ties keep the order values were first seen.
#[derive(Debug)]
pub struct ValueDistribution {
    column: String,
    top: i64,
    bottom: Option<i64>,
    counts: Vec<(String, u64)>,
    index: HashMap<String, usize>,
    nulls: u64,
}

impl Default for ValueDistribution {
    fn default() -> Self {
        Self {
            column: String::new(),
            top: DEFAULT_TOP as i64,
            bottom: None,
            counts: Vec::new(),
            index: HashMap::new(),
            nulls: 0,
        }
    }
}

impl ValueDistribution {
    fn reset(&mut self) {
        self.counts.clear();
        self.index.clear();
        self.nulls = 0;
    }

}

fn capacity(limit: i64) -> usize {
    limit.max(0) as usize
}

impl Component for ValueDistribution {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn as_analyzer(&mut self) -> Option<&mut dyn Analyzer> {
        Some(self)
    }
}

impl Analyzer for ValueDistribution {
    fn run(&mut self, row: &InputRow) -> anyhow::Result<()> {
        let Some(label) = row.get(&self.column).and_then(|v| v.to_label()) else {
            self.nulls += 1;
            return Ok(());
        };
        match self.index.get(&label) {
            Some(&position) => self.counts[position].1 += 1,
            None => {
                self.index.insert(label.clone(), self.counts.len());
                self.counts.push((label, 1));
            },
        }
        Ok(())
    }

    fn result(&mut self) -> anyhow::Result<ResultOutput> {
        let counts = self.counts.iter().map(|(value, count)| ValueCount::new(value.clone(), *count)).collect();
        let result = ValueDistributionResult::from_value_counts(
            self.column.clone(),
            self.nulls,
            counts,
            capacity(self.top),
            self.bottom.map(capacity),
        );
        Ok(AnalyzerResult::ValueDistribution(result).into())
    }
}

pub(super) fn descriptor() -> ComponentDescriptor {
    ComponentDescriptor::builder::<ValueDistribution>("value-distribution", ComponentKind::Analyzer)
        .description("Most (and optionally least) frequent values of a column")
        .configured(
            Property::input_column("column").required(),
            |c: &mut ValueDistribution, value| {
                c.column = string_property(value).unwrap_or_default();
                Ok(())
            },
        )
        .configured(Property::integer("top"), |c: &mut ValueDistribution, value| {
            c.top = value.and_then(|v| v.as_i64()).unwrap_or(DEFAULT_TOP as i64);
            Ok(())
        })
        .configured(Property::integer("bottom"), |c: &mut ValueDistribution, value| {
            c.bottom = value.and_then(|v| v.as_i64());
            Ok(())
        })
        .validate("check_limits", |c: &mut ValueDistribution| {
            ensure!(c.top >= 1, "top must be at least 1, got {}", c.top);
            if let Some(bottom) = c.bottom {
                ensure!(bottom >= 1, "bottom must be at least 1, got {}", bottom);
            }
            Ok(())
        })
        .initialize("reset", |c: &mut ValueDistribution| {
            c.reset();
            Ok(())
        })
        .result_kind(ResultKind::ValueDistribution)
        .build()
}
