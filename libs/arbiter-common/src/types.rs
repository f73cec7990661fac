use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a test case's expected output may be disclosed to the submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub visibility: Visibility,
}

impl TestCase {
    pub fn visible(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            visibility: Visibility::Visible,
        }
    }

    pub fn hidden(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            visibility: Visibility::Hidden,
        }
    }
}

/// Challenge record as held by the challenge store.
///
/// Stored JSON may either carry a single `testCases` array with a
/// `visibility` per case, or split `visibleTestCases` / `hiddenTestCases`
/// arrays. Both are folded into `test_cases` in declared order (visible
/// block first when split).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawChallenge")]
pub struct Challenge {
    pub id: String,
    pub title: String,
    pub description: String,
    pub boilerplate_code: String,
    pub test_cases: Vec<TestCase>,
}

impl Challenge {
    pub fn visible_test_cases(&self) -> Vec<TestCase> {
        self.cases_with(Visibility::Visible)
    }

    pub fn hidden_test_cases(&self) -> Vec<TestCase> {
        self.cases_with(Visibility::Hidden)
    }

    fn cases_with(&self, visibility: Visibility) -> Vec<TestCase> {
        self.test_cases
            .iter()
            .filter(|tc| tc.visibility == visibility)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCase {
    input: String,
    expected_output: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChallenge {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    boilerplate_code: String,
    #[serde(default)]
    test_cases: Vec<TestCase>,
    #[serde(default)]
    visible_test_cases: Vec<RawCase>,
    #[serde(default)]
    hidden_test_cases: Vec<RawCase>,
}

impl From<RawChallenge> for Challenge {
    fn from(raw: RawChallenge) -> Self {
        let mut test_cases = raw.test_cases;
        test_cases.extend(
            raw.visible_test_cases
                .into_iter()
                .map(|c| TestCase::visible(c.input, c.expected_output)),
        );
        test_cases.extend(
            raw.hidden_test_cases
                .into_iter()
                .map(|c| TestCase::hidden(c.input, c.expected_output)),
        );

        Self {
            id: raw.id,
            title: raw.title,
            description: raw.description,
            boilerplate_code: raw.boilerplate_code,
            test_cases,
        }
    }
}

/// Evaluation mode requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Compile,
    Visible,
    Hidden,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Compile => "compile",
            Action::Visible => "visible",
            Action::Hidden => "hidden",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compile" => Ok(Action::Compile),
            "visible" => Ok(Action::Visible),
            "hidden" => Ok(Action::Hidden),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

/// One user-provided program plus its target language and optional input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub challenge_id: String,
    pub language: String,
    pub source_code: String,
    pub stdin: Option<String>,
}

impl Submission {
    pub fn new(
        challenge_id: impl Into<String>,
        language: impl Into<String>,
        source_code: impl Into<String>,
    ) -> Self {
        Self {
            challenge_id: challenge_id.into(),
            language: language.into(),
            source_code: source_code.into(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// How a sandboxed process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitStatus {
    Exited { code: i32 },
    Signaled { signal: i32 },
    CompileFailed { code: i32 },
    Unknown,
}

impl ExitStatus {
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Exited { code } | ExitStatus::CompileFailed { code } => Some(*code),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Exited { code: 0 })
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited { code } => write!(f, "exit code {}", code),
            ExitStatus::Signaled { signal } => write!(f, "signal {}", signal),
            ExitStatus::CompileFailed { code } => write!(f, "compiler exit code {}", code),
            ExitStatus::Unknown => f.write_str("unknown status"),
        }
    }
}

/// Classification of a single execution outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Ok,
    CompileError,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    OutputTooLarge,
    SandboxFault,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Ok => "ok",
            Verdict::CompileError => "compile_error",
            Verdict::RuntimeError => "runtime_error",
            Verdict::TimeLimitExceeded => "time_limit_exceeded",
            Verdict::MemoryLimitExceeded => "memory_limit_exceeded",
            Verdict::OutputTooLarge => "output_too_large",
            Verdict::SandboxFault => "sandbox_fault",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Verdict::Ok)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw captured result of one program execution, prior to comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: ExitStatus,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub verdict: Verdict,
    pub output_truncated: bool,
}

impl ExecutionOutcome {
    /// Outcome used when the sandbox itself failed for one run
    pub fn sandbox_fault(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_status: ExitStatus::Unknown,
            timed_out: false,
            duration_ms: 0,
            verdict: Verdict::SandboxFault,
            output_truncated: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.verdict.is_ok()
    }

    /// Human readable explanation of why the run did not succeed.
    pub fn diagnostic(&self) -> String {
        match self.verdict {
            Verdict::Ok => String::new(),
            Verdict::CompileError | Verdict::SandboxFault => self.stderr.clone(),
            Verdict::TimeLimitExceeded => {
                format!("Time limit exceeded after {}ms", self.duration_ms)
            }
            Verdict::MemoryLimitExceeded => "Memory limit exceeded".to_string(),
            Verdict::OutputTooLarge => "Output limit exceeded".to_string(),
            Verdict::RuntimeError => {
                if self.stderr.trim().is_empty() {
                    format!("Runtime error ({})", self.exit_status)
                } else {
                    self.stderr.clone()
                }
            }
        }
    }

    /// Text shown to the caller as "the output" of this run.
    ///
    /// Stdout on success; for compile errors the compiler diagnostics;
    /// otherwise whatever stdout was produced followed by the diagnostic.
    pub fn display_output(&self) -> String {
        match self.verdict {
            Verdict::Ok => self.stdout.clone(),
            Verdict::CompileError | Verdict::SandboxFault => self.diagnostic(),
            _ if self.stdout.is_empty() => self.diagnostic(),
            _ => {
                let mut text = self.stdout.clone();
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&self.diagnostic());
                text
            }
        }
    }
}

/// Result of one test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub input: String,
    pub expected_output: String,
    pub actual_output: String,
    pub passed: bool,
    pub verdict: Verdict,
    pub duration_ms: u64,
}

/// Aggregate of an ordered run over a set of test cases.
///
/// Counts are derived from `results` at construction so they can never
/// disagree with the per-case flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
    total_cases: usize,
    passed_cases: usize,
    results: Vec<TestResult>,
}

impl EvaluationSummary {
    pub fn from_results(results: Vec<TestResult>) -> Self {
        let passed_cases = results.iter().filter(|r| r.passed).count();
        Self {
            total_cases: results.len(),
            passed_cases,
            results,
        }
    }

    pub fn empty() -> Self {
        Self::from_results(Vec::new())
    }

    pub fn total_cases(&self) -> usize {
        self.total_cases
    }

    pub fn passed_cases(&self) -> usize {
        self.passed_cases
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<TestResult> {
        self.results
    }

    pub fn all_passed(&self) -> bool {
        self.passed_cases == self.total_cases
    }

    /// One-line summary rendered by the challenge page
    pub fn summary_line(&self) -> String {
        format!("{}/{} test cases passed", self.passed_cases, self.total_cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(passed: bool) -> TestResult {
        TestResult {
            input: "1".to_string(),
            expected_output: "1".to_string(),
            actual_output: if passed { "1" } else { "2" }.to_string(),
            passed,
            verdict: Verdict::Ok,
            duration_ms: 3,
        }
    }

    #[test]
    fn test_summary_counts_follow_results() {
        let summary = EvaluationSummary::from_results(vec![result(true), result(false), result(true)]);
        assert_eq!(summary.total_cases(), 3);
        assert_eq!(summary.passed_cases(), 2);
        assert!(!summary.all_passed());
        assert_eq!(summary.summary_line(), "2/3 test cases passed");
    }

    #[test]
    fn test_empty_summary() {
        let summary = EvaluationSummary::empty();
        assert_eq!(summary.total_cases(), 0);
        assert!(summary.all_passed());
        assert_eq!(summary.summary_line(), "0/0 test cases passed");
    }

    #[test]
    fn test_challenge_accepts_split_case_arrays() {
        let json = r#"{
            "id": "two-sum",
            "title": "Two Sum",
            "description": "Add two numbers",
            "boilerplateCode": "a, b = map(int, input().split())\\nprint(a + b)",
            "visibleTestCases": [{"input": "1 2", "expectedOutput": "3"}],
            "hiddenTestCases": [{"input": "5 5", "expectedOutput": "10"}]
        }"#;

        let challenge: Challenge = serde_json::from_str(json).unwrap();
        assert_eq!(challenge.visible_test_cases(), vec![TestCase::visible("1 2", "3")]);
        assert_eq!(challenge.hidden_test_cases(), vec![TestCase::hidden("5 5", "10")]);
    }

    #[test]
    fn test_challenge_tagged_cases_keep_order() {
        let json = r#"{
            "id": "echo",
            "testCases": [
                {"input": "a", "expectedOutput": "a", "visibility": "hidden"},
                {"input": "b", "expectedOutput": "b"},
                {"input": "c", "expectedOutput": "c", "visibility": "hidden"}
            ]
        }"#;

        let challenge: Challenge = serde_json::from_str(json).unwrap();
        let hidden: Vec<String> = challenge.hidden_test_cases().into_iter().map(|c| c.input).collect();
        assert_eq!(hidden, vec!["a", "c"]);
        assert_eq!(challenge.visible_test_cases().len(), 1);
        assert_eq!(challenge.title, "");
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("compile".parse::<Action>(), Ok(Action::Compile));
        assert_eq!("VISIBLE".parse::<Action>(), Ok(Action::Visible));
        assert_eq!("hidden".parse::<Action>(), Ok(Action::Hidden));
        assert!("submit".parse::<Action>().is_err());
    }

    #[test]
    fn test_display_output_by_verdict() {
        let mut outcome = ExecutionOutcome {
            stdout: "partial".to_string(),
            stderr: "Traceback: boom".to_string(),
            exit_status: ExitStatus::Exited { code: 1 },
            timed_out: false,
            duration_ms: 12,
            verdict: Verdict::RuntimeError,
            output_truncated: false,
        };
        assert_eq!(outcome.display_output(), "partial\nTraceback: boom");

        outcome.verdict = Verdict::Ok;
        assert_eq!(outcome.display_output(), "partial");

        outcome.verdict = Verdict::CompileError;
        outcome.exit_status = ExitStatus::CompileFailed { code: 1 };
        assert_eq!(outcome.display_output(), "Traceback: boom");
    }

    #[test]
    fn test_runtime_error_without_stderr_mentions_status() {
        let outcome = ExecutionOutcome {
            stdout: String::new(),
            stderr: String::new(),
            exit_status: ExitStatus::Signaled { signal: 11 },
            timed_out: false,
            duration_ms: 1,
            verdict: Verdict::RuntimeError,
            output_truncated: false,
        };
        assert_eq!(outcome.diagnostic(), "Runtime error (signal 11)");
    }
}
