/// Test Case Orchestrator - High-Level Coordination
///
/// **Responsibility:**
/// Turn a submission plus a set of test cases into an ordered summary.
///
/// **Architecture:**
/// 1. Build once through the pipeline (pipeline.rs)
/// 2. Run every selected case against the prepared program, several at a
///    time, keeping declared order
/// 3. Compare outputs with the evaluator (evaluator.rs)
///
/// Per-case failures never abort a batch. Request-level failures
/// (unknown language, sandbox failure while building, deadline) are
/// returned as errors with no partial summary.
use crate::evaluator;
use crate::pipeline::{Pipeline, Preparation, PreparedProgram};
use arbiter_common::config::EngineConfig;
use arbiter_common::types::{
    Action, EvaluationSummary, ExecutionOutcome, Submission, TestCase, Visibility,
};
use arbiter_common::{EngineError, EngineResult};
use futures_util::stream::{self, StreamExt};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Result of one dispatched action
#[derive(Debug, Clone)]
pub enum Evaluation {
    Compile(ExecutionOutcome),
    Visible(EvaluationSummary),
    Hidden(EvaluationSummary),
}

#[derive(Clone)]
pub struct Orchestrator {
    pipeline: Pipeline,
    max_parallel_tests: usize,
    request_deadline: Duration,
}

impl Orchestrator {
    pub fn new(pipeline: Pipeline, config: &EngineConfig) -> Self {
        Self {
            pipeline,
            max_parallel_tests: config.max_parallel_tests.max(1),
            request_deadline: Duration::from_millis(config.request_deadline_ms),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Dispatch an action against a challenge's test cases
    pub async fn evaluate(
        &self,
        action: Action,
        submission: &Submission,
        cases: &[TestCase],
    ) -> EngineResult<Evaluation> {
        match action {
            Action::Compile => {
                let stdin = submission.stdin.as_deref().unwrap_or("");
                self.compile(submission, stdin).await.map(Evaluation::Compile)
            }
            Action::Visible => self.run_visible(submission, cases).await.map(Evaluation::Visible),
            Action::Hidden => self.run_hidden(submission, cases).await.map(Evaluation::Hidden),
        }
    }

    /// Single ad-hoc run, no comparison
    #[instrument(skip_all, fields(challenge_id = %submission.challenge_id, language = %submission.language))]
    pub async fn compile(&self, submission: &Submission, stdin: &str) -> EngineResult<ExecutionOutcome> {
        let outcome = self
            .with_deadline(self.pipeline.execute(
                &submission.source_code,
                &submission.language,
                stdin,
                None,
            ))
            .await?;

        info!(
            verdict = %outcome.verdict,
            duration_ms = outcome.duration_ms,
            "Compile action finished"
        );
        Ok(outcome)
    }

    #[instrument(skip_all, fields(challenge_id = %submission.challenge_id, language = %submission.language))]
    pub async fn run_visible(
        &self,
        submission: &Submission,
        cases: &[TestCase],
    ) -> EngineResult<EvaluationSummary> {
        self.run_cases(submission, cases, Visibility::Visible).await
    }

    #[instrument(skip_all, fields(challenge_id = %submission.challenge_id, language = %submission.language))]
    pub async fn run_hidden(
        &self,
        submission: &Submission,
        cases: &[TestCase],
    ) -> EngineResult<EvaluationSummary> {
        self.run_cases(submission, cases, Visibility::Hidden).await
    }

    async fn run_cases(
        &self,
        submission: &Submission,
        cases: &[TestCase],
        visibility: Visibility,
    ) -> EngineResult<EvaluationSummary> {
        // Language errors surface even when there is nothing to run
        self.pipeline.registry().resolve(&submission.language)?;

        let selected: Vec<TestCase> = cases
            .iter()
            .filter(|case| case.visibility == visibility)
            .cloned()
            .collect();

        if selected.is_empty() {
            return Ok(EvaluationSummary::empty());
        }

        let start_time = Instant::now();
        let summary = self.with_deadline(self.evaluate_cases(submission, &selected)).await?;

        info!(
            total = summary.total_cases(),
            passed = summary.passed_cases(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Test cases evaluated"
        );
        Ok(summary)
    }

    async fn evaluate_cases(
        &self,
        submission: &Submission,
        cases: &[TestCase],
    ) -> EngineResult<EvaluationSummary> {
        let program = match self
            .pipeline
            .prepare(&submission.source_code, &submission.language)
            .await?
        {
            Preparation::Ready(program) => program,
            Preparation::CompileFailed(outcome) => {
                warn!("Compilation failed; all test cases marked as failed");
                let outcomes = vec![outcome; cases.len()];
                return Ok(evaluator::summarize(cases, &outcomes));
            }
        };

        let runs: Vec<_> = cases
            .iter()
            .enumerate()
            .map(|(index, case)| run_case(&program, index, case))
            .collect();
        let outcomes: Vec<ExecutionOutcome> = stream::iter(runs)
            .buffered(self.max_parallel_tests)
            .collect()
            .await;

        Ok(evaluator::summarize(cases, &outcomes))
    }

    async fn with_deadline<T>(&self, work: impl Future<Output = EngineResult<T>>) -> EngineResult<T> {
        match tokio::time::timeout(self.request_deadline, work).await {
            Ok(result) => result,
            Err(_) => {
                let deadline_ms = self.request_deadline.as_millis() as u64;
                warn!(deadline_ms, "Evaluation exceeded its deadline");
                Err(EngineError::DeadlineExceeded(deadline_ms))
            }
        }
    }
}

/// A case that cannot be executed fails on its own; the batch continues
async fn run_case(program: &PreparedProgram, index: usize, case: &TestCase) -> ExecutionOutcome {
    match program.run(&case.input, None).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(case = index, kind = e.kind(), error = %e, "Test case could not be executed");
            ExecutionOutcome::sandbox_fault(e.to_string())
        }
    }
}
