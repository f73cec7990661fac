/// Test Evaluator - Language-Agnostic Comparison Logic
///
/// **Core Responsibility:**
/// Compare captured execution outcomes against expected outputs.
///
/// **Critical Properties:**
/// - Knows nothing about Docker or processes
/// - Knows nothing about language runtimes
/// - Pure functions: (test cases, outcomes) → results
///
/// **Normalization Rules (applied to both sides):**
/// - Line endings: `\r\n` and lone `\r` become `\n`
/// - Trailing whitespace at the end of the whole output: trimmed
/// - Leading whitespace: significant
/// - Internal whitespace and blank lines: significant
/// - Case sensitivity: exact match required
///
/// A run whose verdict is not `ok` never passes, whatever it printed.
use arbiter_common::types::{EvaluationSummary, ExecutionOutcome, TestCase, TestResult};

/// Normalize output for comparison
pub fn normalize_output(output: &str) -> String {
    output
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .trim_end()
        .to_string()
}

pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}

/// Evaluate one test case against its execution outcome
pub fn evaluate_case(test_case: &TestCase, outcome: &ExecutionOutcome) -> TestResult {
    let passed = outcome.is_success() && outputs_match(&outcome.stdout, &test_case.expected_output);

    TestResult {
        input: test_case.input.clone(),
        expected_output: test_case.expected_output.clone(),
        actual_output: outcome.display_output(),
        passed,
        verdict: outcome.verdict,
        duration_ms: outcome.duration_ms,
    }
}

/// Pair cases with outcomes positionally; results keep the case order
pub fn summarize(cases: &[TestCase], outcomes: &[ExecutionOutcome]) -> EvaluationSummary {
    debug_assert_eq!(cases.len(), outcomes.len());

    let results = cases
        .iter()
        .zip(outcomes)
        .map(|(case, outcome)| evaluate_case(case, outcome))
        .collect();

    EvaluationSummary::from_results(results)
}
