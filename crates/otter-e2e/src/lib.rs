//! # Otter E2E Runner
//!
//! Discovers test modules in a source tree, runs them against a backend
//! session and writes one JUnit XML report per module, mirroring the source
//! folders under the output root.
//!
//! ```text
//! read_test_source ──▶ TestSource ──▶ Runner::run ──▶ ResultsTree ──▶ report::junit
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod module;
pub mod report;
pub mod reporter;
pub mod results;
pub mod runner;
pub mod script;
pub mod session;
pub mod source;

pub use config::{BackendSettings, Globals, OutputFolder, Settings};
pub use error::{ConfigError, ReportError, ResultsError, RunnerError, SessionError, TestError};
pub use module::{AssertionLog, Done, Hooks, Module, ModuleKind, TestBody, TestContext, Testcase};
pub use report::{JunitWriter, RunReport};
pub use reporter::{ConsoleReporter, NullReporter, Reporter};
pub use results::{ModuleResult, Outcome, ResultsTree, RunSummary, TestcaseResult};
pub use runner::{ModuleState, ReportFormat, ReporterConfig, Runner, TestcaseState};
pub use script::{ModuleLoader, ModuleRegistry, ModuleScript, ScriptLoader};
pub use session::{Backend, Capabilities, DetachedBackend, Session, SessionHandle, SessionManager};
pub use source::{ModuleDescriptor, SourceLoader, SourcePaths, TestSource, read_test_source};
