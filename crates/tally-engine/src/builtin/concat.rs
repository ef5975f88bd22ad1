use super::string_property;
use crate::component::{Component, Transformer};
use crate::descriptor::{ComponentDescriptor, ComponentKind, Property};
use crate::job::PropertyValue;
use crate::value::{InputRow, Value};
use std::any::Any;

/// Joins the values of several columns into one string column
#[derive(Debug, Default)]
pub struct Concat {
    columns: Vec<String>,
    separator: String,
}

impl Component for Concat {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn as_transformer(&mut self) -> Option<&mut dyn Transformer> {
        Some(self)
    }
}

impl Transformer for Concat {
    fn output_columns(&self) -> Vec<String> {
        vec!["concat".to_string()]
    }

    fn transform(&mut self, row: &InputRow) -> anyhow::Result<Vec<Value>> {
        let parts: Vec<String> = self
            .columns
            .iter()
            .filter_map(|column| row.get(column).and_then(Value::to_label))
            .collect();
        if parts.is_empty() {
            return Ok(vec![Value::Null]);
        }
        Ok(vec![Value::String(parts.join(&self.separator))])
    }
}

pub(super) fn descriptor() -> ComponentDescriptor {
    ComponentDescriptor::builder::<Concat>("concat", ComponentKind::Transformer)
        .description("Joins the values of several columns, skipping nulls")
        .configured(
            Property::input_column("columns").array().required(),
            |c: &mut Concat, value| {
                c.columns = value.map(PropertyValue::into_strings).unwrap_or_default();
                Ok(())
            },
        )
        .configured(Property::string("separator"), |c: &mut Concat, value| {
            c.separator = string_property(value).unwrap_or_default();
            Ok(())
        })
        .build()
}
