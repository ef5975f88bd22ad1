//! Tally analysis engine
//!
//! Executes an [`AnalysisJob`](job::AnalysisJob), a graph of transformers,
//! filters and analyzers, against row-oriented data and produces keyed
//! analyzer results.
//!
//! # Layout
//!
//! - [`descriptor`] and [`component`]: metadata and traits that describe a
//!   component type and its instances
//! - [`lifecycle`]: property assignment, validation, initialization and close
//! - [`job`]: the serializable job model
//! - [`pipeline`]: the single-threaded row processing chain and output data
//!   streams
//! - [`result`]: analyzer result kinds and their reducers
//! - [`future`]: the asynchronous handle of a running analysis
//! - [`wire`]: the versioned payload exchanged with remote workers
//! - [`source`]: row sources (in memory and CSV)
//! - [`runner`]: runs a job, or one division of it, to completion
//! - [`builtin`]: small reference components

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod builtin;
pub mod component;
pub mod descriptor;
pub mod error;
pub mod future;
pub mod injection;
pub mod job;
pub mod lifecycle;
pub mod pipeline;
pub mod result;
pub mod runner;
pub mod source;
pub mod value;
pub mod wire;

pub use component::{Analyzer, Component, Filter, HasOutputDataStreams, Transformer};
pub use descriptor::{ComponentDescriptor, ComponentKind, DescriptorRegistry};
pub use error::{EngineError, ErrorKind, JobError, Result};
pub use future::{AnalysisOutcome, AnalysisResult, AnalysisResultFuture, JobStatus};
pub use job::{AnalysisJob, ComponentJob, RowRange};
pub use result::{AnalyzerResult, NamedAnalyzerResult};
pub use runner::{AnalysisEnvironment, LocalAnalysisRunner};
pub use value::{InputRow, Value};
