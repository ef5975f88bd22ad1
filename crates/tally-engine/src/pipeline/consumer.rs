use super::ConsumeRowHandler;
use crate::component::Component;
use crate::descriptor::{ComponentDescriptor, ComponentKind};
use crate::error::{EngineError, Result};
use crate::job::ComponentRequirement;
use crate::lifecycle::LifecycleHelper;
use crate::result::NamedAnalyzerResult;
use crate::value::{InputRow, Value};
use std::collections::BTreeMap;
use std::sync::{mpsc, Arc};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Configured, validated and initialized
    Initialized,
    Processing,
    Closed,
}

/// One component instance wired into a pipeline
pub struct RowProcessingConsumer {
    pub(super) key: String,
    pub(super) descriptor: Arc<ComponentDescriptor>,
    pub(super) component: Box<dyn Component>,
    pub(super) input_columns: Vec<String>,
    pub(super) output_columns: Vec<String>,
    pub(super) requirement: Option<ComponentRequirement>,
    pub(super) streams: Vec<ActiveOutputDataStream>,
    pub(super) state: ConsumerState,
}

impl RowProcessingConsumer {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    pub fn kind(&self) -> ComponentKind {
        self.descriptor.kind()
    }

    pub fn input_columns(&self) -> &[String] {
        &self.input_columns
    }

    pub fn output_columns(&self) -> &[String] {
        &self.output_columns
    }

    /// Requirement with the filter key fully qualified
    pub fn requirement(&self) -> Option<&ComponentRequirement> {
        self.requirement.as_ref()
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn output_data_streams(&self) -> &[ActiveOutputDataStream] {
        &self.streams
    }

    pub(super) fn is_satisfied(&self, row: &InputRow, outcomes: &BTreeMap<String, String>) -> bool {
        let requirement_met = self
            .requirement
            .as_ref()
            .is_none_or(|r| outcomes.get(&r.component) == Some(&r.outcome));
        requirement_met && self.input_columns.iter().all(|c| row.has_column(c))
    }

    pub(super) fn consume(
        &mut self,
        row: InputRow,
        outcomes: &mut BTreeMap<String, String>,
    ) -> Result<InputRow> {
        self.state = ConsumerState::Processing;
        match self.process(row, outcomes) {
            Ok(row) => {
                for stream in &mut self.streams {
                    stream.pump()?;
                }
                Ok(row)
            },
            Err(e) => {
                for stream in &mut self.streams {
                    stream.discard();
                }
                Err(e)
            },
        }
    }

    fn process(&mut self, row: InputRow, outcomes: &mut BTreeMap<String, String>) -> Result<InputRow> {
        let row_id = row.id();
        let key = &self.key;

        let row = match self.descriptor.kind() {
            ComponentKind::Transformer => {
                let transformer = self
                    .component
                    .as_transformer()
                    .ok_or_else(|| missing_role(key, "transformer"))?;
                let values = transformer
                    .transform(&row)
                    .map_err(|e| row_error(key, row_id, e))?;
                if values.len() != self.output_columns.len() {
                    return Err(EngineError::RowProcessing {
                        component: key.clone(),
                        row_id,
                        message: format!(
                            "produced {} values for {} output columns",
                            values.len(),
                            self.output_columns.len()
                        ),
                    });
                }
                row.extend(&self.output_columns, values)
            },
            ComponentKind::Filter => {
                let filter = self
                    .component
                    .as_filter()
                    .ok_or_else(|| missing_role(key, "filter"))?;
                let outcome = filter.categorize(&row).map_err(|e| row_error(key, row_id, e))?;
                outcomes.insert(key.clone(), outcome);
                row
            },
            ComponentKind::Analyzer => {
                let analyzer = self
                    .component
                    .as_analyzer()
                    .ok_or_else(|| missing_role(key, "analyzer"))?;
                analyzer.run(&row).map_err(|e| row_error(key, row_id, e))?;
                row
            },
        };
        Ok(row)
    }

    /// Close the component, then flush and close its output data streams
    ///
    /// Rows the component publishes while closing are only run through the
    /// streams on success. Returns the errors those rows raised.
    pub(super) fn close(&mut self, lifecycle: &LifecycleHelper, success: bool) -> Vec<EngineError> {
        if self.state == ConsumerState::Closed {
            return Vec::new();
        }
        lifecycle.close(&self.descriptor, self.component.as_mut(), success);
        self.state = ConsumerState::Closed;

        let mut errors = Vec::new();
        for stream in &mut self.streams {
            let flushed = if success {
                stream.pump()
            } else {
                stream.discard();
                Ok(())
            };
            if let Err(e) = flushed {
                warn!(component = %self.key, stream = %stream.name, error = %e, "Failed to flush output data stream");
                errors.push(e);
            }
            let stream_success = success && errors.is_empty();
            errors.extend(stream.handler.close(stream_success));
        }
        errors
    }

    pub(super) fn collect_results(&mut self, results: &mut Vec<NamedAnalyzerResult>) -> Result<()> {
        if self.state != ConsumerState::Closed {
            return Err(EngineError::State(format!(
                "results of '{}' requested before it was closed",
                self.key
            )));
        }
        if self.descriptor.kind() == ComponentKind::Analyzer {
            let key = &self.key;
            let analyzer = self
                .component
                .as_analyzer()
                .ok_or_else(|| missing_role(key, "analyzer"))?;
            let result = analyzer
                .result()
                .and_then(|output| output.resolve())
                .map_err(|e| EngineError::ResultRetrieval {
                    component: key.clone(),
                    message: format!("{:#}", e),
                })?;
            results.push(NamedAnalyzerResult::new(key.clone(), result));
        }
        for stream in &mut self.streams {
            results.extend(stream.handler.collect_results()?);
        }
        Ok(())
    }
}

fn missing_role(key: &str, role: &str) -> EngineError {
    EngineError::State(format!("component '{}' does not implement {}", key, role))
}

fn row_error(key: &str, row_id: u64, error: anyhow::Error) -> EngineError {
    EngineError::RowProcessing {
        component: key.to_string(),
        row_id,
        message: format!("{:#}", error),
    }
}

/// An output data stream of a consumer and the pipeline consuming it
pub struct ActiveOutputDataStream {
    pub(super) name: String,
    pub(super) columns: Vec<String>,
    pub(super) receiver: mpsc::Receiver<Vec<Value>>,
    pub(super) handler: ConsumeRowHandler,
    pub(super) next_row_id: u64,
}

impl ActiveOutputDataStream {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn handler(&self) -> &ConsumeRowHandler {
        &self.handler
    }

    /// Feed rows buffered by the producer into the stream's pipeline
    fn pump(&mut self) -> Result<()> {
        while let Ok(values) = self.receiver.try_recv() {
            self.next_row_id += 1;
            let row = InputRow::from_pairs(self.next_row_id, self.columns.iter().cloned().zip(values));
            self.handler.consume_row(row)?;
        }
        Ok(())
    }

    /// Drop rows buffered by the producer without processing them
    fn discard(&mut self) {
        let dropped = self.receiver.try_iter().count();
        if dropped > 0 {
            debug!(stream = %self.name, dropped, "Discarded buffered output rows");
        }
    }
}
