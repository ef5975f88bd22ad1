use super::string_property;
use crate::component::{Analyzer, Component, ResultOutput};
use crate::descriptor::{ComponentDescriptor, ComponentKind, Property};
use crate::result::{AnalyzerResult, ResultKind, TextResult};
use crate::value::InputRow;
use std::any::Any;

/// First non-null value of a column in row order
///
/// Depends on seeing rows in their global order, so it only runs on a
/// single node.
#[derive(Debug, Default)]
pub struct FirstValue {
    column: String,
    first: Option<String>,
}

impl Component for FirstValue {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn as_analyzer(&mut self) -> Option<&mut dyn Analyzer> {
        Some(self)
    }
}

impl Analyzer for FirstValue {
    fn run(&mut self, row: &InputRow) -> anyhow::Result<()> {
        if self.first.is_none() {
            self.first = row.get(&self.column).and_then(|v| v.to_label());
        }
        Ok(())
    }

    fn result(&mut self) -> anyhow::Result<ResultOutput> {
        let text = self.first.clone().unwrap_or_default();
        Ok(AnalyzerResult::Text(TextResult::new(text)).into())
    }
}

pub(super) fn descriptor() -> ComponentDescriptor {
    ComponentDescriptor::builder::<FirstValue>("first-value", ComponentKind::Analyzer)
        .description("First non-null value of a column")
        .configured(Property::input_column("column").required(), |c: &mut FirstValue, value| {
            c.column = string_property(value).unwrap_or_default();
            Ok(())
        })
        .result_kind(ResultKind::Text)
        .not_distributable()
        .build()
}
