//! Results aggregation
//!
//! The runner hands each finished [`ModuleResult`] to the [`ResultsTree`] by
//! value. The tree is append-only: a module key can be recorded once.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ResultsError, TestError};
use crate::module::Assertion;
use crate::source::ModuleDescriptor;

/// Final outcome of a testcase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    /// An assertion was not met
    Failed,
    /// Uncaught error, panic or completion timeout
    Errored,
    Skipped,
}

impl Outcome {
    /// Failed or errored
    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::Failed | Outcome::Errored)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Passed => write!(f, "passed"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::Errored => write!(f, "errored"),
            Outcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of one testcase execution attempt
#[derive(Debug, Clone)]
pub struct TestcaseResult {
    pub name: String,
    pub outcome: Outcome,
    pub elapsed: Duration,
    /// Assertions in evaluation order
    pub assertions: Vec<Assertion>,
    /// Error that ended the testcase, if any
    pub error: Option<TestError>,
    /// Why the testcase did not run
    pub skip_reason: Option<String>,
}

impl TestcaseResult {
    /// Classify an executed testcase.
    ///
    /// An assertion error or a failed assertion gives `Failed`; any other
    /// error gives `Errored`.
    pub fn executed(
        name: impl Into<String>,
        elapsed: Duration,
        assertions: Vec<Assertion>,
        error: Option<TestError>,
    ) -> Self {
        let outcome = match &error {
            Some(err) if err.is_assertion() => Outcome::Failed,
            Some(_) => Outcome::Errored,
            None if assertions.iter().any(|a| !a.passed) => Outcome::Failed,
            None => Outcome::Passed,
        };
        Self {
            name: name.into(),
            outcome,
            elapsed,
            assertions,
            error,
            skip_reason: None,
        }
    }

    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Outcome::Skipped,
            elapsed: Duration::ZERO,
            assertions: Vec::new(),
            error: None,
            skip_reason: Some(reason.into()),
        }
    }

    /// Ran to completion (passed or failed)
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, Outcome::Passed | Outcome::Failed)
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.error, Some(TestError::Timeout { .. }))
    }

    /// Failure messages in report order: failed assertions, then an
    /// assertion error returned by the body.
    pub fn failure_messages(&self) -> Vec<&str> {
        let mut messages: Vec<&str> = self
            .assertions
            .iter()
            .filter(|a| !a.passed)
            .map(|a| a.message.as_str())
            .collect();
        if let Some(TestError::Assertion(message)) = &self.error {
            messages.push(message);
        }
        messages
    }
}

/// Error raised outside a testcase (hooks, session)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleError {
    /// `before`, `after` or `session`
    pub origin: String,
    pub error: TestError,
}

/// Everything recorded for one module
#[derive(Debug, Clone)]
pub struct ModuleResult {
    pub descriptor: ModuleDescriptor,
    /// Report file prefix derived from the session
    pub report_prefix: String,
    pub testcases: Vec<TestcaseResult>,
    pub errors: Vec<ModuleError>,
    pub elapsed: Duration,
    last_error: Option<TestError>,
}

impl ModuleResult {
    pub fn new(descriptor: ModuleDescriptor, report_prefix: impl Into<String>) -> Self {
        Self {
            descriptor,
            report_prefix: report_prefix.into(),
            testcases: Vec::new(),
            errors: Vec::new(),
            elapsed: Duration::ZERO,
            last_error: None,
        }
    }

    pub(crate) fn push_testcase(&mut self, result: TestcaseResult) {
        if result.outcome == Outcome::Errored {
            self.last_error.clone_from(&result.error);
        }
        self.testcases.push(result);
    }

    pub(crate) fn push_error(&mut self, origin: impl Into<String>, error: TestError) {
        self.last_error = Some(error.clone());
        self.errors.push(ModuleError {
            origin: origin.into(),
            error,
        });
    }

    pub fn key(&self) -> &str {
        &self.descriptor.key
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn testcase(&self, name: &str) -> Option<&TestcaseResult> {
        self.testcases.iter().find(|t| t.name == name)
    }

    /// Testcases that ran to completion, in execution order
    pub fn completed(&self) -> impl Iterator<Item = &TestcaseResult> {
        self.testcases.iter().filter(|t| t.is_completed())
    }

    pub fn is_completed(&self, name: &str) -> bool {
        self.testcase(name).is_some_and(TestcaseResult::is_completed)
    }

    pub fn tests(&self) -> usize {
        self.testcases.len()
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.testcases.iter().filter(|t| t.outcome == outcome).count()
    }

    pub fn assertions(&self) -> usize {
        self.testcases.iter().map(|t| t.assertions.len()).sum()
    }

    /// Most recent unrecoverable error of this module
    pub fn last_error(&self) -> Option<&TestError> {
        self.last_error.as_ref()
    }

    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty() || self.testcases.iter().any(|t| t.outcome.is_failure())
    }
}

/// All module results of a runner, in completion order
#[derive(Debug, Clone, Default)]
pub struct ResultsTree {
    modules: Vec<ModuleResult>,
    last_error: Option<TestError>,
}

impl ResultsTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finished module
    pub fn record(&mut self, result: ModuleResult) -> Result<(), ResultsError> {
        if self.module(result.key()).is_some() {
            return Err(ResultsError::AlreadyRecorded(result.key().to_string()));
        }
        if let Some(err) = result.last_error() {
            self.last_error = Some(err.clone());
        }
        self.modules.push(result);
        Ok(())
    }

    /// Append every module of a later run
    pub fn merge(&mut self, other: ResultsTree) -> Result<(), ResultsError> {
        if let Some(dup) = other.modules.iter().find(|m| self.module(m.key()).is_some()) {
            return Err(ResultsError::AlreadyRecorded(dup.key().to_string()));
        }
        for module in other.modules {
            self.record(module)?;
        }
        Ok(())
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleResult> {
        self.modules.iter()
    }

    pub fn module(&self, key: &str) -> Option<&ModuleResult> {
        self.modules.iter().find(|m| m.key() == key)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Most recent unrecoverable error across all modules
    pub fn last_error(&self) -> Option<&TestError> {
        self.last_error.as_ref()
    }

    pub fn has_failures(&self) -> bool {
        self.modules.iter().any(ModuleResult::has_failures)
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            modules: self.modules.len(),
            last_error: self.last_error.as_ref().map(ToString::to_string),
            ..RunSummary::default()
        };

        for module in &self.modules {
            summary.module_errors += module.errors.len();
            summary.elapsed_secs += module.elapsed.as_secs_f64();
            for testcase in &module.testcases {
                summary.tests += 1;
                summary.assertions += testcase.assertions.len();
                match testcase.outcome {
                    Outcome::Passed => summary.passed += 1,
                    Outcome::Failed => summary.failed += 1,
                    Outcome::Errored => summary.errored += 1,
                    Outcome::Skipped => summary.skipped += 1,
                }
            }
        }

        summary
    }
}

/// Counts over a results tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub modules: usize,
    pub tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub assertions: usize,
    /// Hook and session errors
    pub module_errors: usize,
    pub elapsed_secs: f64,
    pub last_error: Option<String>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.errored > 0 || self.module_errors > 0
    }

    /// Pass rate as percentage, excluding skipped
    pub fn pass_rate(&self) -> f64 {
        let run = self.passed + self.failed + self.errored;
        if run > 0 {
            (self.passed as f64 / run as f64) * 100.0
        } else {
            0.0
        }
    }
}
