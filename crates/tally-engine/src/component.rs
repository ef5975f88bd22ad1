//! Component instance traits
//!
//! Every component type implements [`Component`] plus exactly one role trait
//! ([`Transformer`], [`Filter`] or [`Analyzer`]) and exposes it through the
//! matching `as_*` accessor. Components that publish output data streams also
//! implement [`HasOutputDataStreams`].
//!
//! Instances are owned by a single pipeline consumer and are only ever called
//! from one thread at a time, so none of the methods need interior locking.

use crate::result::AnalyzerResult;
use crate::value::{InputRow, Value};
use std::any::Any;
use std::sync::mpsc;

pub trait Component: Any + Send {
    /// Concrete-type access used by descriptor setters and lifecycle methods
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn as_transformer(&mut self) -> Option<&mut dyn Transformer> {
        None
    }

    fn as_filter(&mut self) -> Option<&mut dyn Filter> {
        None
    }

    fn as_analyzer(&mut self) -> Option<&mut dyn Analyzer> {
        None
    }

    fn as_output_data_stream_producer(&mut self) -> Option<&mut dyn HasOutputDataStreams> {
        None
    }
}

/// Adds columns to a row
pub trait Transformer {
    /// Names of the produced columns, known once the component is configured
    fn output_columns(&self) -> Vec<String>;

    /// One value per output column
    fn transform(&mut self, row: &InputRow) -> anyhow::Result<Vec<Value>>;
}

/// Categorizes a row into one of a fixed set of outcomes
pub trait Filter {
    fn categories(&self) -> Vec<String>;

    fn categorize(&mut self, row: &InputRow) -> anyhow::Result<String>;
}

/// Accumulates state over rows and produces a single result
pub trait Analyzer {
    fn run(&mut self, row: &InputRow) -> anyhow::Result<()>;

    /// Called once, after the component has been closed
    fn result(&mut self) -> anyhow::Result<ResultOutput>;
}

/// An analyzer result, possibly still being computed
pub enum ResultOutput {
    Ready(AnalyzerResult),
    Deferred(mpsc::Receiver<anyhow::Result<AnalyzerResult>>),
}

impl ResultOutput {
    /// Block until the result is available
    pub fn resolve(self) -> anyhow::Result<AnalyzerResult> {
        match self {
            ResultOutput::Ready(result) => Ok(result),
            ResultOutput::Deferred(receiver) => receiver
                .recv()
                .map_err(|_| anyhow::anyhow!("deferred result was dropped before completion"))?,
        }
    }
}

impl From<AnalyzerResult> for ResultOutput {
    fn from(result: AnalyzerResult) -> Self {
        ResultOutput::Ready(result)
    }
}

/// A secondary stream of rows a component can publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDataStreamSpec {
    pub name: String,
    pub columns: Vec<String>,
}

impl OutputDataStreamSpec {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

pub trait HasOutputDataStreams {
    fn output_data_streams(&self) -> Vec<OutputDataStreamSpec>;

    /// Called after initialization for each stream that has consumers
    fn initialize_output_data_stream(&mut self, stream: &str, collector: OutputRowCollector);
}

/// Sink a producer writes output data stream rows into
///
/// Rows are buffered and fanned into the stream's consumers by the pipeline
/// right after the producing component returns from its current row.
#[derive(Debug, Clone)]
pub struct OutputRowCollector {
    stream: String,
    sender: mpsc::Sender<Vec<Value>>,
}

impl OutputRowCollector {
    pub(crate) fn new(stream: impl Into<String>, sender: mpsc::Sender<Vec<Value>>) -> Self {
        Self {
            stream: stream.into(),
            sender,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Values in the stream's column order
    pub fn put_values(&self, values: Vec<Value>) {
        if self.sender.send(values).is_err() {
            tracing::trace!(stream = %self.stream, "Output data stream closed; row dropped");
        }
    }
}
