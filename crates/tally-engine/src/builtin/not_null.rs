use super::string_property;
use crate::component::{Component, Filter};
use crate::descriptor::{ComponentDescriptor, ComponentKind, Property};
use crate::value::InputRow;
use std::any::Any;

pub const VALID: &str = "VALID";
pub const INVALID: &str = "INVALID";

/// Categorizes rows by whether a column holds a non-null value
#[derive(Debug, Default)]
pub struct NotNull {
    column: String,
    /// Treat empty strings as null too
    considers_empty: bool,
}

impl Component for NotNull {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn as_filter(&mut self) -> Option<&mut dyn Filter> {
        Some(self)
    }
}

impl Filter for NotNull {
    fn categories(&self) -> Vec<String> {
        vec![VALID.to_string(), INVALID.to_string()]
    }

    fn categorize(&mut self, row: &InputRow) -> anyhow::Result<String> {
        let valid = match row.get(&self.column) {
            None => false,
            Some(value) if value.is_null() => false,
            Some(value) => !(self.considers_empty && value.as_str() == Some("")),
        };
        Ok(if valid { VALID } else { INVALID }.to_string())
    }
}

pub(super) fn descriptor() -> ComponentDescriptor {
    ComponentDescriptor::builder::<NotNull>("not-null", ComponentKind::Filter)
        .description("VALID when the column holds a value, INVALID otherwise")
        .configured(Property::input_column("column").required(), |c: &mut NotNull, value| {
            c.column = string_property(value).unwrap_or_default();
            Ok(())
        })
        .configured(Property::boolean("empty_is_null"), |c: &mut NotNull, value| {
            c.considers_empty = value.and_then(|v| v.as_bool()).unwrap_or(false);
            Ok(())
        })
        .build()
}
