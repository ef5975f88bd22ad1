use super::string_property;
use crate::component::{
    Component, HasOutputDataStreams, OutputDataStreamSpec, OutputRowCollector, Transformer,
};
use crate::descriptor::{ComponentDescriptor, ComponentKind, Property};
use crate::value::{InputRow, Value};
use std::any::Any;

pub const TOKENS_STREAM: &str = "tokens";

/// Splits a text column into tokens
///
/// Adds a `token_count` column and publishes every token as a row of the
/// `tokens` output data stream (single column `token`).
#[derive(Debug, Default)]
pub struct TokenStream {
    column: String,
    separator: Option<String>,
    tokens: Option<OutputRowCollector>,
}

impl Component for TokenStream {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn as_transformer(&mut self) -> Option<&mut dyn Transformer> {
        Some(self)
    }

    fn as_output_data_stream_producer(&mut self) -> Option<&mut dyn HasOutputDataStreams> {
        Some(self)
    }
}

impl Transformer for TokenStream {
    fn output_columns(&self) -> Vec<String> {
        vec!["token_count".to_string()]
    }

    fn transform(&mut self, row: &InputRow) -> anyhow::Result<Vec<Value>> {
        let Some(text) = row.get(&self.column).and_then(Value::to_label) else {
            return Ok(vec![Value::Integer(0)]);
        };
        let tokens: Vec<&str> = match self.separator.as_deref() {
            Some(separator) if !separator.is_empty() => {
                text.split(separator).filter(|t| !t.is_empty()).collect()
            },
            _ => text.split_whitespace().collect(),
        };
        if let Some(collector) = &self.tokens {
            for token in &tokens {
                collector.put_values(vec![Value::from(*token)]);
            }
        }
        Ok(vec![Value::Integer(tokens.len() as i64)])
    }
}

impl HasOutputDataStreams for TokenStream {
    fn output_data_streams(&self) -> Vec<OutputDataStreamSpec> {
        vec![OutputDataStreamSpec::new(TOKENS_STREAM, &["token"])]
    }

    fn initialize_output_data_stream(&mut self, stream: &str, collector: OutputRowCollector) {
        if stream == TOKENS_STREAM {
            self.tokens = Some(collector);
        }
    }
}

pub(super) fn descriptor() -> ComponentDescriptor {
    ComponentDescriptor::builder::<TokenStream>("token-stream", ComponentKind::Transformer)
        .description("Counts the tokens of a text column and streams each token")
        .configured(Property::input_column("column").required(), |c: &mut TokenStream, value| {
            c.column = string_property(value).unwrap_or_default();
            Ok(())
        })
        .configured(Property::string("separator"), |c: &mut TokenStream, value| {
            c.separator = string_property(value);
            Ok(())
        })
        .close("release_stream", |c: &mut TokenStream| {
            c.tokens = None;
            Ok(())
        })
        .build()
}
