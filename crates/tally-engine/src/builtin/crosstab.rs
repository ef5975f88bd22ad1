use super::string_property;
use crate::component::{Analyzer, Component, ResultOutput};
use crate::descriptor::{ComponentDescriptor, ComponentKind, Property};
use crate::result::{AnalyzerResult, CrosstabResult, Number, ResultKind};
use crate::value::InputRow;
use std::any::Any;

pub const NULL_LABEL: &str = "<null>";

/// Counts rows per combination of two column values
#[derive(Debug, Default)]
pub struct Crosstab {
    row_column: String,
    column_column: String,
    table: Option<CrosstabResult>,
}

impl Crosstab {
    fn label(row: &InputRow, column: &str) -> String {
        row.get(column)
            .and_then(|v| v.to_label())
            .unwrap_or_else(|| NULL_LABEL.to_string())
    }
}

impl Component for Crosstab {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn as_analyzer(&mut self) -> Option<&mut dyn Analyzer> {
        Some(self)
    }
}

impl Analyzer for Crosstab {
    fn run(&mut self, row: &InputRow) -> anyhow::Result<()> {
        let r = Self::label(row, &self.row_column);
        let c = Self::label(row, &self.column_column);
        let table = self
            .table
            .get_or_insert_with(|| CrosstabResult::new(&self.row_column, &self.column_column));
        table.add(&r, &c, Number::Integer(1));
        Ok(())
    }

    fn result(&mut self) -> anyhow::Result<ResultOutput> {
        let table = self
            .table
            .take()
            .unwrap_or_else(|| CrosstabResult::new(&self.row_column, &self.column_column));
        Ok(AnalyzerResult::Crosstab(table).into())
    }
}

pub(super) fn descriptor() -> ComponentDescriptor {
    ComponentDescriptor::builder::<Crosstab>("crosstab", ComponentKind::Analyzer)
        .description("Row counts by the values of two columns")
        .configured(Property::input_column("row_column").required(), |c: &mut Crosstab, value| {
            c.row_column = string_property(value).unwrap_or_default();
            Ok(())
        })
        .configured(
            Property::input_column("column_column").required(),
            |c: &mut Crosstab, value| {
                c.column_column = string_property(value).unwrap_or_default();
                Ok(())
            },
        )
        .result_kind(ResultKind::Crosstab)
        .build()
}
