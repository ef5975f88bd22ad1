//! Tally Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging setup for the Tally workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`TallyError`] and the [`Result`] alias used for
//!   concerns shared by every crate (I/O, JSON, CSV, configuration)
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`], the one
//!   place where the global `tracing` subscriber is installed
//!
//! # Example
//!
//! ```no_run
//! use tally_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("worker starting");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{Result, TallyError};
