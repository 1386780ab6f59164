//! Run reports: per-module JUnit XML files and a JSON summary

pub mod json;
pub mod junit;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::results::{Outcome, ResultsTree};

pub use junit::{JunitWriter, escape_xml};

/// Summary of a run, keyed by module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Total number of testcases
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    /// Pass rate as percentage, excluding skipped
    pub pass_rate: f64,
    /// Results by module key
    pub by_module: BTreeMap<String, ModuleReport>,
    /// Failed and errored testcase details
    pub failures: Vec<FailureInfo>,
    /// Most recent unrecoverable error
    pub last_error: Option<String>,
}

/// Per-module counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub assertions: usize,
    /// Elapsed seconds
    pub time: f64,
    /// Testcases that ran to completion
    pub completed: Vec<String>,
}

impl ModuleReport {
    pub fn pass_rate(&self) -> f64 {
        let run = self.passed + self.failed + self.errored;
        if run > 0 {
            (self.passed as f64 / run as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// A testcase that did not pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureInfo {
    /// `<module key>/<testcase>`
    pub path: String,
    pub outcome: Outcome,
    pub error: String,
}

impl RunReport {
    /// Generate a report from a results tree
    pub fn from_results(results: &ResultsTree) -> Self {
        let mut report = Self {
            total: 0,
            passed: 0,
            failed: 0,
            errored: 0,
            skipped: 0,
            pass_rate: 0.0,
            by_module: BTreeMap::new(),
            failures: Vec::new(),
            last_error: results.last_error().map(ToString::to_string),
        };

        for module in results.modules() {
            let entry = report.by_module.entry(module.key().to_string()).or_default();
            entry.time = module.elapsed.as_secs_f64();
            entry.assertions = module.assertions();

            for testcase in &module.testcases {
                report.total += 1;
                entry.total += 1;
                match testcase.outcome {
                    Outcome::Passed => {
                        report.passed += 1;
                        entry.passed += 1;
                    }
                    Outcome::Failed => {
                        report.failed += 1;
                        entry.failed += 1;
                    }
                    Outcome::Errored => {
                        report.errored += 1;
                        entry.errored += 1;
                    }
                    Outcome::Skipped => {
                        report.skipped += 1;
                        entry.skipped += 1;
                    }
                }
                if testcase.is_completed() {
                    entry.completed.push(testcase.name.clone());
                }

                if testcase.outcome.is_failure() {
                    let error = match &testcase.error {
                        Some(err) if !err.is_assertion() => err.to_string(),
                        _ => testcase.failure_messages().join("; "),
                    };
                    report.failures.push(FailureInfo {
                        path: format!("{}/{}", module.key(), testcase.name),
                        outcome: testcase.outcome,
                        error,
                    });
                }
            }

            for err in &module.errors {
                report.failures.push(FailureInfo {
                    path: format!("{}/{}", module.key(), err.origin),
                    outcome: Outcome::Errored,
                    error: err.error.to_string(),
                });
            }
        }

        let run_count = report.passed + report.failed + report.errored;
        if run_count > 0 {
            report.pass_rate = (report.passed as f64 / run_count as f64) * 100.0;
        }

        report
    }

    /// Print a summary to stdout
    pub fn print_summary(&self) {
        println!("\n=== E2E Results ===");
        println!("Total:   {}", self.total);
        println!("Passed:  {} ({:.1}%)", self.passed, self.pass_rate);
        println!("Failed:  {}", self.failed);
        println!("Errored: {}", self.errored);
        println!("Skipped: {}", self.skipped);

        if !self.failures.is_empty() {
            println!("\n=== Failures (first 10) ===");
            for failure in self.failures.iter().take(10) {
                println!("  {} - {}", failure.path, failure.error);
            }
            if self.failures.len() > 10 {
                println!("  ... and {} more", self.failures.len() - 10);
            }
        }
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TestError;
    use crate::module::Assertion;
    use crate::results::{ModuleResult, TestcaseResult};
    use crate::source::ModuleDescriptor;
    use std::time::Duration;

    #[test]
    fn test_report_generation() {
        let mut sample = ModuleResult::new(
            ModuleDescriptor::new("/src", "/src/simple/sample.yaml", &["simple".to_string()], "sample"),
            "",
        );
        sample.push_testcase(TestcaseResult::executed("ok", Duration::from_millis(3), Vec::new(), None));
        sample.push_testcase(TestcaseResult::executed(
            "bad",
            Duration::from_millis(3),
            vec![Assertion {
                message: "AssertionError: 1 == 0".to_string(),
                passed: false,
            }],
            None,
        ));
        sample.push_testcase(TestcaseResult::executed(
            "slow",
            Duration::from_millis(3),
            Vec::new(),
            Some(TestError::Timeout {
                timeout_ms: 10,
                name: "slow".to_string(),
            }),
        ));
        sample.push_testcase(TestcaseResult::skipped("later", "not ready"));

        let mut tree = ResultsTree::new();
        tree.record(sample).unwrap();
        let report = RunReport::from_results(&tree);

        assert_eq!(report.total, 4);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errored, 1);
        assert_eq!(report.skipped, 1);
        assert!((report.pass_rate - 100.0 / 3.0).abs() < 1e-9);

        let module = &report.by_module["simple/sample"];
        assert_eq!(module.completed, ["ok", "bad"]);
        assert_eq!(report.failures[0].path, "simple/sample/bad");
        assert_eq!(report.failures[0].error, "AssertionError: 1 == 0");
        assert!(report.failures[1].error.starts_with("done() callback timeout of 10 ms"));
        assert!(report.last_error.is_some());
    }
}
