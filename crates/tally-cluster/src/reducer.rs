//! Combining division outcomes into the outcome of the whole job

use crate::division::DivisionContext;
use std::collections::BTreeMap;
use std::sync::Arc;
use tally_engine::future::DivisionReport;
use tally_engine::pipeline::ConsumeRowHandler;
use tally_engine::result;
use tally_engine::{AnalysisOutcome, AnalysisResult, AnalyzerResult, ErrorKind, JobError, JobStatus};
use tracing::{error, info, warn};

/// Terminal outcome of one dispatched division
#[derive(Debug, Clone)]
pub struct DivisionOutcome {
    pub context: DivisionContext,
    pub endpoint: Option<String>,
    pub outcome: Arc<AnalysisOutcome>,
}

/// Reduces the partial results of a distributed job
///
/// A component key is reduced only when every planned division produced a
/// result for it. Coordinator-side components handed over with
/// [`DistributedResultReducer::with_coordinator`] are closed once the job
/// ends, successfully only if no error was recorded.
pub struct DistributedResultReducer {
    planned: usize,
    coordinator: Option<ConsumeRowHandler>,
}

impl DistributedResultReducer {
    pub fn new(planned: usize) -> Self {
        Self {
            planned: planned.max(1),
            coordinator: None,
        }
    }

    pub fn with_coordinator(mut self, coordinator: ConsumeRowHandler) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn reduce(mut self, divisions: &[DivisionOutcome], dispatch_errors: Vec<JobError>) -> AnalysisOutcome {
        let reports = reports(divisions);

        let mut errors = dispatch_errors;
        for division in divisions.iter().filter(|d| !d.outcome.is_successful()) {
            errors.extend(
                division
                    .outcome
                    .errors
                    .iter()
                    .cloned()
                    .map(|e| e.in_division(division.context.index)),
            );
        }

        let mut partials: BTreeMap<&str, Vec<AnalyzerResult>> = BTreeMap::new();
        for division in divisions.iter().filter(|d| d.outcome.is_successful()) {
            for (key, partial) in &division.outcome.result.results {
                partials.entry(key.as_str()).or_default().push(partial.clone());
            }
        }

        let mut reduced = BTreeMap::new();
        for (key, results) in partials {
            if results.len() < self.planned {
                warn!(key, have = results.len(), planned = self.planned, "Not reducing incomplete results");
                continue;
            }
            match result::reduce(&results) {
                Ok(result) => {
                    reduced.insert(key.to_string(), result);
                },
                Err(e) => {
                    error!(key, error = %e, "Failed to reduce results");
                    errors.push(JobError::new(ErrorKind::Reduce, e.to_string()).with_component(key));
                },
            }
        }

        let mut status = if errors.is_empty() {
            JobStatus::Succeeded
        } else if errors.iter().all(|e| e.kind == ErrorKind::Cancelled) {
            JobStatus::Cancelled
        } else {
            JobStatus::Failed
        };
        let close_errors = self.close_coordinator(status == JobStatus::Succeeded);
        if !close_errors.is_empty() {
            errors.extend(close_errors);
            status = JobStatus::Failed;
            reduced.clear();
        }

        info!(
            ?status,
            divisions = divisions.len(),
            results = reduced.len(),
            errors = errors.len(),
            "Reduced distributed job"
        );
        AnalysisOutcome {
            status,
            result: AnalysisResult::new(reduced),
            errors,
            divisions: reports,
        }
    }

    /// End a cancelled job without reducing
    pub fn abort(mut self, divisions: &[DivisionOutcome]) -> AnalysisOutcome {
        let _ = self.close_coordinator(false);
        AnalysisOutcome::cancelled().with_divisions(reports(divisions))
    }

    fn close_coordinator(&mut self, success: bool) -> Vec<JobError> {
        let Some(mut coordinator) = self.coordinator.take() else {
            return Vec::new();
        };
        coordinator
            .close(success)
            .iter()
            .inspect(|e| error!(error = %e, "Coordinator component failed while closing"))
            .map(JobError::from)
            .collect()
    }
}

impl Drop for DistributedResultReducer {
    fn drop(&mut self) {
        let _ = self.close_coordinator(false);
    }
}

fn reports(divisions: &[DivisionOutcome]) -> Vec<DivisionReport> {
    divisions
        .iter()
        .map(|d| DivisionReport {
            index: d.context.index,
            status: d.outcome.status,
            endpoint: d.endpoint.clone(),
            error_count: d.outcome.errors.len(),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tally_engine::result::{Number, NumberResult, TextResult, ValueCount, ValueDistributionResult};

    fn division(index: usize, results: Vec<(&str, AnalyzerResult)>) -> DivisionOutcome {
        let results = results.into_iter().map(|(k, r)| (k.to_string(), r)).collect();
        DivisionOutcome {
            context: DivisionContext::new(index, 2),
            endpoint: Some(format!("http://w{}/tally/worker", index)),
            outcome: Arc::new(AnalysisOutcome::succeeded(AnalysisResult::new(results))),
        }
    }

    fn failed_division(index: usize) -> DivisionOutcome {
        DivisionOutcome {
            context: DivisionContext::new(index, 2),
            endpoint: None,
            outcome: Arc::new(AnalysisOutcome::failed(vec![JobError::new(
                ErrorKind::RowProcessing,
                "bad row",
            )])),
        }
    }

    fn distribution(counts: &[(&str, u64)]) -> AnalyzerResult {
        let counts = counts.iter().map(|(v, c)| ValueCount::new(*v, *c)).collect();
        AnalyzerResult::ValueDistribution(ValueDistributionResult::from_value_counts("word", 0, counts, 3, None))
    }

    fn number(n: i64) -> AnalyzerResult {
        AnalyzerResult::Number(NumberResult::new(n))
    }

    #[test]
    fn test_reduces_every_key() {
        let divisions = [
            division(0, vec![("rows", number(10)), ("words", distribution(&[("x", 5), ("y", 3), ("z", 2)]))]),
            division(1, vec![("rows", number(5)), ("words", distribution(&[("x", 1), ("w", 4)]))]),
        ];
        let outcome = DistributedResultReducer::new(2).reduce(&divisions, Vec::new());

        assert_eq!(outcome.status, JobStatus::Succeeded);
        assert_eq!(outcome.result.get("rows"), Some(&AnalyzerResult::Number(NumberResult::new(Number::Integer(15)))));
        let Some(AnalyzerResult::ValueDistribution(words)) = outcome.result.get("words") else {
            panic!("expected a value distribution");
        };
        let top: Vec<_> = words.top_values.values.iter().map(|v| (v.value.as_str(), v.count)).collect();
        assert_eq!(top, vec![("x", 6), ("w", 4), ("y", 3)]);
        assert_eq!(words.total_count, 15);
        assert_eq!(words.distinct_count, 4);

        assert_eq!(outcome.divisions.len(), 2);
        assert_eq!(outcome.divisions[1].endpoint.as_deref(), Some("http://w1/tally/worker"));
    }

    #[test]
    fn test_failed_division_leaves_keys_unreduced() {
        let divisions = [division(0, vec![("rows", number(10))]), failed_division(1)];
        let outcome = DistributedResultReducer::new(2).reduce(&divisions, Vec::new());

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.result.get("rows").is_none());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].division, Some(1));
        assert_eq!(outcome.divisions[0].status, JobStatus::Succeeded);
        assert_eq!(outcome.divisions[1].status, JobStatus::Failed);
    }

    #[test]
    fn test_dispatch_errors_come_first() {
        let dispatch_error = JobError::new(ErrorKind::Transport, "connection refused").in_division(1);
        let divisions = [division(0, vec![("rows", number(10))])];
        let outcome = DistributedResultReducer::new(2).reduce(&divisions, vec![dispatch_error.clone()]);

        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.errors[0], dispatch_error);
        assert!(outcome.result.is_empty());
    }

    #[test]
    fn test_reduce_error_only_affects_its_key() {
        let divisions = [
            division(0, vec![("rows", number(1)), ("first", AnalyzerResult::Text(TextResult::new("a")))]),
            division(1, vec![("rows", number(2)), ("first", AnalyzerResult::Text(TextResult::new("b")))]),
        ];
        let outcome = DistributedResultReducer::new(2).reduce(&divisions, Vec::new());

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.result.get("rows").is_some());
        assert!(outcome.result.get("first").is_none());
        assert_eq!(outcome.errors[0].kind, ErrorKind::Reduce);
        assert_eq!(outcome.errors[0].component.as_deref(), Some("first"));
    }

    #[test]
    fn test_abort_is_cancelled() {
        let divisions = [division(0, vec![("rows", number(1))])];
        let outcome = DistributedResultReducer::new(2).abort(&divisions);
        assert_eq!(outcome.status, JobStatus::Cancelled);
        assert_eq!(outcome.divisions.len(), 1);
    }
}
