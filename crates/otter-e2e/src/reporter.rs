//! Run events for console output and embedders

use colored::*;

use crate::config::Settings;
use crate::error::TestError;
use crate::results::{ModuleResult, Outcome, RunSummary, TestcaseResult};
use crate::source::ModuleDescriptor;

/// Receives scheduler events in execution order.
///
/// Every method has an empty default, so implementors pick what they need.
pub trait Reporter: Send {
    /// Called once before the first module runs
    fn on_run_start(&mut self, _modules: usize) {}

    /// Called when a module leaves `pending`
    fn on_module_start(&mut self, _module: &ModuleDescriptor) {}

    /// Called when a testcase has been recorded
    fn on_testcase_complete(&mut self, _module: &ModuleDescriptor, _result: &TestcaseResult) {}

    /// Called once per completion timeout or uncaught error, while the
    /// affected testcase or hook is still the current one
    fn on_uncaught_error(&mut self, _module: &ModuleDescriptor, _name: &str, _error: &TestError) {}

    /// Called when a module is finalized
    fn on_module_complete(&mut self, _result: &ModuleResult) {}

    /// Called once after every module is finalized
    fn on_run_complete(&mut self, _summary: &RunSummary) {}
}

/// Reporter that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {}

/// Colored console output
#[derive(Debug, Clone)]
pub struct ConsoleReporter {
    /// Print anything at all
    output: bool,
    /// Hide passing testcases
    silent: bool,
}

impl ConsoleReporter {
    pub fn new(output: bool, silent: bool) -> Self {
        Self { output, silent }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.output, settings.silent)
    }
}

impl Reporter for ConsoleReporter {
    fn on_module_start(&mut self, module: &ModuleDescriptor) {
        if self.output {
            println!("\n{} {}", "Running:".bold(), module.key);
        }
    }

    fn on_testcase_complete(&mut self, _module: &ModuleDescriptor, result: &TestcaseResult) {
        if !self.output {
            return;
        }

        match result.outcome {
            Outcome::Passed => {
                if !self.silent {
                    println!(
                        "  {} {} {}",
                        "✔".green(),
                        result.name,
                        format!("({} ms)", result.elapsed.as_millis()).dimmed()
                    );
                }
            }
            Outcome::Failed => {
                println!("  {} {}", "✖".red(), result.name.red());
                for message in result.failure_messages() {
                    println!("    {} {}", "-".red(), message);
                }
            }
            Outcome::Errored => {
                println!("  {} {}", "✖".red().bold(), result.name.red().bold());
                if let Some(err) = &result.error {
                    println!("    {}: {}", err.classification().yellow(), err);
                }
            }
            Outcome::Skipped => {
                if !self.silent {
                    println!(
                        "  {} {} {}",
                        "-".yellow(),
                        result.name,
                        result.skip_reason.as_deref().unwrap_or_default().dimmed()
                    );
                }
            }
        }
    }

    fn on_uncaught_error(&mut self, module: &ModuleDescriptor, name: &str, error: &TestError) {
        if self.output {
            eprintln!("{} {} ({}): {}", "ERROR".red().bold(), name, module.key, error);
        }
    }

    fn on_module_complete(&mut self, result: &ModuleResult) {
        if !self.output {
            return;
        }
        for err in &result.errors {
            println!("  {} {}: {}", "!".red(), err.origin, err.error);
        }
    }

    fn on_run_complete(&mut self, summary: &RunSummary) {
        if !self.output {
            return;
        }

        let status = if summary.has_failures() {
            "FAILED".red().bold()
        } else {
            "OK".green().bold()
        };
        println!(
            "\n{} {} tests in {} modules: {} passed, {} failed, {} errored, {} skipped ({} assertions, {:.2}s)",
            status,
            summary.tests,
            summary.modules,
            summary.passed.to_string().green(),
            summary.failed.to_string().red(),
            summary.errored.to_string().red(),
            summary.skipped.to_string().yellow(),
            summary.assertions,
            summary.elapsed_secs
        );
        if let Some(err) = &summary.last_error {
            println!("{} {}", "Last error:".yellow(), err);
        }
    }
}
