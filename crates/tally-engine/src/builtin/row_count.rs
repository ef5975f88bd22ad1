use crate::component::{Analyzer, Component, ResultOutput};
use crate::descriptor::{ComponentDescriptor, ComponentKind};
use crate::result::{AnalyzerResult, NumberResult, ResultKind};
use crate::value::InputRow;
use std::any::Any;

#[derive(Debug, Default)]
pub struct RowCount {
    count: i64,
}

impl Component for RowCount {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn as_analyzer(&mut self) -> Option<&mut dyn Analyzer> {
        Some(self)
    }
}

impl Analyzer for RowCount {
    fn run(&mut self, _row: &InputRow) -> anyhow::Result<()> {
        self.count += 1;
        Ok(())
    }

    fn result(&mut self) -> anyhow::Result<ResultOutput> {
        Ok(AnalyzerResult::Number(NumberResult::new(self.count)).into())
    }
}

pub(super) fn descriptor() -> ComponentDescriptor {
    ComponentDescriptor::builder::<RowCount>("row-count", ComponentKind::Analyzer)
        .description("Counts the rows it receives")
        .result_kind(ResultKind::Number)
        .build()
}
