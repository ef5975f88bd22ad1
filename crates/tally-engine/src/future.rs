//! Handle of a running analysis
//!
//! An [`AnalysisResultFuture`] starts in [`JobStatus::Running`] and moves
//! exactly once to succeeded, failed or cancelled. The terminal
//! [`AnalysisOutcome`] lives in a `tokio::sync::watch` channel so any number
//! of clones can wait on it, and the first completion wins: a late result
//! after [`AnalysisResultFuture::cancel`] is ignored.

use crate::error::JobError;
use crate::result::{AnalyzerResult, NamedAnalyzerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Results by component key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub results: BTreeMap<String, AnalyzerResult>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn new(results: BTreeMap<String, AnalyzerResult>) -> Self {
        Self {
            results,
            created_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&AnalyzerResult> {
        self.results.get(key)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl FromIterator<NamedAnalyzerResult> for AnalysisResult {
    fn from_iter<I: IntoIterator<Item = NamedAnalyzerResult>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|r| (r.key, r.result)).collect())
    }
}

/// How one division of a distributed job ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivisionReport {
    pub index: usize,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub error_count: usize,
}

/// Terminal state of an analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub status: JobStatus,
    pub result: AnalysisResult,
    #[serde(default)]
    pub errors: Vec<JobError>,
    /// Per-division statuses; empty for single-node runs
    #[serde(default)]
    pub divisions: Vec<DivisionReport>,
}

impl AnalysisOutcome {
    pub fn succeeded(result: AnalysisResult) -> Self {
        Self {
            status: JobStatus::Succeeded,
            result,
            errors: Vec::new(),
            divisions: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<JobError>) -> Self {
        Self {
            status: JobStatus::Failed,
            result: AnalysisResult::empty(),
            errors,
            divisions: Vec::new(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: JobStatus::Cancelled,
            result: AnalysisResult::empty(),
            errors: vec![JobError::cancelled()],
            divisions: Vec::new(),
        }
    }

    pub fn with_divisions(mut self, divisions: Vec<DivisionReport>) -> Self {
        self.divisions = divisions;
        self
    }

    pub fn is_successful(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

type Slot = watch::Sender<Option<Arc<AnalysisOutcome>>>;

/// Producer side of an [`AnalysisResultFuture`]
///
/// Dropping it without completing fails the future, so a panicking producer
/// cannot leave waiters hanging.
pub struct OutcomeSender {
    slot: Arc<Slot>,
}

impl OutcomeSender {
    /// Publish the terminal outcome; returns false if one was already set
    pub fn complete(&self, outcome: AnalysisOutcome) -> bool {
        complete(&self.slot, outcome)
    }

    pub fn is_completed(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

impl Drop for OutcomeSender {
    fn drop(&mut self) {
        complete(
            &self.slot,
            AnalysisOutcome::failed(vec![JobError::new(
                crate::error::ErrorKind::Internal,
                "analysis ended without producing an outcome",
            )]),
        );
    }
}

fn complete(slot: &Slot, outcome: AnalysisOutcome) -> bool {
    let mut outcome = Some(outcome);
    slot.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = outcome.take().map(Arc::new);
        true
    })
}

/// Shared, cancellable handle to the eventual [`AnalysisOutcome`]
#[derive(Clone)]
pub struct AnalysisResultFuture {
    slot: Arc<Slot>,
    receiver: watch::Receiver<Option<Arc<AnalysisOutcome>>>,
    cancel: CancellationToken,
}

impl AnalysisResultFuture {
    /// A running future and the sender that completes it
    ///
    /// `cancel` is triggered by [`AnalysisResultFuture::cancel`]; the producer
    /// should watch it to stop work early.
    pub fn channel(cancel: CancellationToken) -> (OutcomeSender, AnalysisResultFuture) {
        let (sender, receiver) = watch::channel(None);
        let slot = Arc::new(sender);
        let future = AnalysisResultFuture {
            slot: Arc::clone(&slot),
            receiver,
            cancel,
        };
        (OutcomeSender { slot }, future)
    }

    /// An already terminal future
    pub fn ready(outcome: AnalysisOutcome) -> AnalysisResultFuture {
        let (sender, future) = Self::channel(CancellationToken::new());
        sender.complete(outcome);
        future
    }

    pub fn status(&self) -> JobStatus {
        self.receiver
            .borrow()
            .as_ref()
            .map_or(JobStatus::Running, |outcome| outcome.status)
    }

    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// The outcome if already terminal
    pub fn try_outcome(&self) -> Option<Arc<AnalysisOutcome>> {
        self.receiver.borrow().clone()
    }

    /// Wait for the terminal outcome
    pub async fn outcome(&self) -> Arc<AnalysisOutcome> {
        let mut receiver = self.receiver.clone();
        loop {
            if let Some(outcome) = receiver.borrow_and_update().clone() {
                return outcome;
            }
            if receiver.changed().await.is_err() {
                // `self.slot` keeps the sender alive, so this is not expected
                return Arc::new(AnalysisOutcome::cancelled());
            }
        }
    }

    /// Stop the analysis
    ///
    /// The future becomes cancelled immediately unless it already finished;
    /// the producer is signalled through the cancellation token.
    pub fn cancel(&self) -> bool {
        let cancelled = complete(&self.slot, AnalysisOutcome::cancelled());
        self.cancel.cancel();
        cancelled
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl std::fmt::Debug for AnalysisResultFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisResultFuture")
            .field("status", &self.status())
            .finish()
    }
}
