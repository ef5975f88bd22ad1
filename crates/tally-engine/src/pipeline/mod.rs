//! Row processing pipeline
//!
//! [`ConsumeRowHandler::build`] turns an [`AnalysisJob`] into an ordered
//! chain of [`RowProcessingConsumer`]s. Rows are pushed through the chain one
//! at a time on the calling thread; rows a component publishes to an output
//! data stream are run through that stream's own handler before the next
//! consumer sees the parent row.

mod consumer;
mod sort;

pub use consumer::{ActiveOutputDataStream, ConsumerState, RowProcessingConsumer};

use crate::component::OutputRowCollector;
use crate::descriptor::{ComponentDescriptor, ComponentKind, DescriptorRegistry};
use crate::error::{EngineError, JobError, Result};
use crate::future::{AnalysisOutcome, AnalysisResult, JobStatus};
use crate::job::{stream_prefix, AnalysisJob, ComponentJob, ComponentRequirement};
use crate::lifecycle::LifecycleHelper;
use crate::result::NamedAnalyzerResult;
use crate::value::InputRow;
use std::collections::BTreeMap;
use std::sync::{mpsc, Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// False builds only transformers and filters
    pub include_analyzers: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            include_analyzers: true,
        }
    }
}

/// What a row turned into after passing the chain
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeRowResult {
    /// The row with every transformer's output columns
    pub row: InputRow,
    /// Filter outcomes by component key
    pub outcomes: BTreeMap<String, String>,
}

/// Result of running a handler over a row partition
#[derive(Debug, Clone)]
pub struct PartitionOutcome {
    pub status: JobStatus,
    pub results: Vec<NamedAnalyzerResult>,
    pub errors: Vec<JobError>,
    pub rows_processed: u64,
}

impl PartitionOutcome {
    pub fn failed(error: &EngineError) -> Self {
        Self {
            status: JobStatus::Failed,
            results: Vec::new(),
            errors: vec![JobError::from(error)],
            rows_processed: 0,
        }
    }

    pub fn into_outcome(self) -> AnalysisOutcome {
        match self.status {
            JobStatus::Succeeded => {
                AnalysisOutcome::succeeded(self.results.into_iter().collect::<AnalysisResult>())
            },
            JobStatus::Cancelled => AnalysisOutcome::cancelled(),
            JobStatus::Failed | JobStatus::Running => AnalysisOutcome::failed(self.errors),
        }
    }
}

pub struct ConsumeRowHandler {
    consumers: Vec<RowProcessingConsumer>,
    lifecycle: Arc<LifecycleHelper>,
    closed: bool,
    results_collected: bool,
}

impl ConsumeRowHandler {
    /// Validate the job, then create, initialize and order its consumers
    ///
    /// If any consumer fails to initialize, the ones already initialized are
    /// closed with `success = false` before the error is returned.
    pub fn build(
        job: &AnalysisJob,
        registry: &DescriptorRegistry,
        lifecycle: Arc<LifecycleHelper>,
        options: PipelineOptions,
    ) -> Result<Self> {
        job.validate(registry)?;
        let handler = Self::build_level(job, "", registry, lifecycle, options)?;
        info!(
            consumers = handler.consumers.len(),
            include_non_distributed = handler.lifecycle.include_non_distributed_tasks(),
            "Pipeline built"
        );
        Ok(handler)
    }

    fn build_level(
        job: &AnalysisJob,
        prefix: &str,
        registry: &DescriptorRegistry,
        lifecycle: Arc<LifecycleHelper>,
        options: PipelineOptions,
    ) -> Result<Self> {
        let mut consumers: Vec<RowProcessingConsumer> = Vec::with_capacity(job.components.len());

        for (index, component_job) in job.components.iter().enumerate() {
            let key = job.component_key(prefix, index);
            let created = registry.get(&component_job.descriptor).and_then(|descriptor| {
                if descriptor.kind() == ComponentKind::Analyzer && !options.include_analyzers {
                    return Ok(None);
                }
                Self::create_consumer(key, prefix, component_job, descriptor, registry, &lifecycle, options)
                    .map(Some)
            });
            match created {
                Ok(Some(consumer)) => consumers.push(consumer),
                Ok(None) => {},
                Err(e) => {
                    abort(&mut consumers, &lifecycle);
                    return Err(e);
                },
            }
        }

        if let Err(e) = sort::order_consumers(&mut consumers, &job.source_columns) {
            abort(&mut consumers, &lifecycle);
            return Err(e);
        }

        Ok(Self {
            consumers,
            lifecycle,
            closed: false,
            results_collected: false,
        })
    }

    fn create_consumer(
        key: String,
        prefix: &str,
        component_job: &ComponentJob,
        descriptor: Arc<ComponentDescriptor>,
        registry: &DescriptorRegistry,
        lifecycle: &Arc<LifecycleHelper>,
        options: PipelineOptions,
    ) -> Result<RowProcessingConsumer> {
        let mut component = descriptor.create();
        lifecycle
            .initialize_component(&descriptor, component.as_mut(), &component_job.properties)
            .map_err(|e| e.attributed_to(&key))?;
        debug!(component = %key, descriptor = descriptor.name(), "Component initialized");

        let input_columns = descriptor
            .configured_properties()
            .iter()
            .filter(|p| p.is_input_column())
            .filter_map(|p| component_job.properties.get(p.name()))
            .flat_map(|value| value.clone().into_strings())
            .collect();

        let requirement = component_job.requirement.as_ref().map(|r| ComponentRequirement {
            component: format!("{}{}", prefix, r.component),
            outcome: r.outcome.clone(),
        });

        let mut consumer = RowProcessingConsumer {
            key,
            descriptor,
            component,
            input_columns,
            output_columns: Vec::new(),
            requirement,
            streams: Vec::new(),
            state: ConsumerState::Initialized,
        };

        if let Err(e) = Self::prepare_outputs(&mut consumer, component_job, registry, lifecycle, options) {
            let _ = consumer.close(lifecycle, false);
            return Err(e);
        }
        Ok(consumer)
    }

    /// Resolve output columns and build the consumed output data streams
    fn prepare_outputs(
        consumer: &mut RowProcessingConsumer,
        component_job: &ComponentJob,
        registry: &DescriptorRegistry,
        lifecycle: &Arc<LifecycleHelper>,
        options: PipelineOptions,
    ) -> Result<()> {
        if let Some(transformer) = consumer.component.as_transformer() {
            let own = transformer.output_columns();
            consumer.output_columns = if component_job.output_columns.is_empty() {
                own
            } else if component_job.output_columns.len() == own.len() {
                component_job.output_columns.clone()
            } else {
                return Err(EngineError::configuration(
                    &consumer.key,
                    format!(
                        "{} output column names given for {} output columns",
                        component_job.output_columns.len(),
                        own.len()
                    ),
                ));
            };
        }

        for stream_job in &component_job.output_data_streams {
            let key = &consumer.key;
            let producer = consumer.component.as_output_data_stream_producer().ok_or_else(|| {
                EngineError::configuration(key, "component does not publish output data streams")
            })?;
            let spec = producer
                .output_data_streams()
                .into_iter()
                .find(|s| s.name == stream_job.name)
                .ok_or_else(|| {
                    EngineError::configuration(
                        key,
                        format!("unknown output data stream '{}'", stream_job.name),
                    )
                })?;

            let mut nested_job = stream_job.job.clone();
            if nested_job.source_columns.is_empty() {
                nested_job.source_columns = spec.columns.clone();
            }
            let handler = Self::build_level(
                &nested_job,
                &stream_prefix(key, &spec.name),
                registry,
                Arc::clone(lifecycle),
                options,
            )?;

            let (sender, receiver) = mpsc::channel();
            producer.initialize_output_data_stream(&spec.name, OutputRowCollector::new(&spec.name, sender));
            consumer.streams.push(ActiveOutputDataStream {
                name: spec.name,
                columns: spec.columns,
                receiver,
                handler,
                next_row_id: 0,
            });
        }
        Ok(())
    }

    pub fn consumers(&self) -> &[RowProcessingConsumer] {
        &self.consumers
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Push one row through every consumer whose requirement and input
    /// columns are satisfied
    pub fn consume_row(&mut self, row: InputRow) -> Result<ConsumeRowResult> {
        if self.closed {
            return Err(EngineError::State("row consumed after the pipeline was closed".into()));
        }
        let mut outcomes = BTreeMap::new();
        let mut row = row;
        for consumer in &mut self.consumers {
            if consumer.is_satisfied(&row, &outcomes) {
                row = consumer.consume(row, &mut outcomes)?;
            }
        }
        Ok(ConsumeRowResult { row, outcomes })
    }

    /// Close every consumer, nested ones included; later calls do nothing
    ///
    /// Returns the errors raised by rows components published while closing.
    /// Consumers later in the chain are closed with `success = false` once
    /// such an error has occurred.
    pub fn close(&mut self, success: bool) -> Vec<EngineError> {
        if self.closed {
            debug!("Pipeline already closed");
            return Vec::new();
        }
        self.closed = true;
        let mut errors = Vec::new();
        for consumer in &mut self.consumers {
            let consumer_success = success && errors.is_empty();
            errors.extend(consumer.close(&self.lifecycle, consumer_success));
        }
        errors
    }

    /// Results of every analyzer, nested ones included; only after close
    pub fn collect_results(&mut self) -> Result<Vec<NamedAnalyzerResult>> {
        if !self.closed {
            return Err(EngineError::State(
                "results requested before the pipeline was closed".into(),
            ));
        }
        if self.results_collected {
            return Err(EngineError::State("results were already collected".into()));
        }
        self.results_collected = true;

        let mut results = Vec::new();
        for consumer in &mut self.consumers {
            consumer.collect_results(&mut results)?;
        }
        Ok(results)
    }

    /// Consume rows until exhausted, failed or cancelled, then close and
    /// collect
    ///
    /// Components are closed with `success = true` only if every row was
    /// processed and no cancellation was requested. A row failing in an
    /// output data stream while components close fails the partition too.
    pub fn run_rows<I>(&mut self, rows: I, cancel: &CancellationToken) -> PartitionOutcome
    where
        I: IntoIterator<Item = Result<InputRow>>,
    {
        let mut rows_processed = 0_u64;
        let mut errors = Vec::new();

        for row in rows {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = row.and_then(|row| self.consume_row(row)) {
                error!(error = %e, rows_processed, "Row processing failed");
                errors.push(JobError::from(&e));
                break;
            }
            rows_processed += 1;
        }

        let cancelled = cancel.is_cancelled();
        let flush_errors = self.close(errors.is_empty() && !cancelled);
        for e in &flush_errors {
            error!(error = %e, "Output data stream failed while closing");
        }
        errors.extend(flush_errors.iter().map(JobError::from));

        if cancelled {
            info!(rows_processed, "Row processing cancelled");
            return PartitionOutcome {
                status: JobStatus::Cancelled,
                results: Vec::new(),
                errors: vec![JobError::cancelled()],
                rows_processed,
            };
        }
        if !errors.is_empty() {
            return PartitionOutcome {
                status: JobStatus::Failed,
                results: Vec::new(),
                errors,
                rows_processed,
            };
        }

        match self.collect_results() {
            Ok(results) => {
                info!(rows_processed, results = results.len(), "Row processing finished");
                PartitionOutcome {
                    status: JobStatus::Succeeded,
                    results,
                    errors,
                    rows_processed,
                }
            },
            Err(e) => PartitionOutcome {
                rows_processed,
                ..PartitionOutcome::failed(&e)
            },
        }
    }
}

fn abort(consumers: &mut [RowProcessingConsumer], lifecycle: &LifecycleHelper) {
    for consumer in consumers.iter_mut() {
        let _ = consumer.close(lifecycle, false);
    }
}
