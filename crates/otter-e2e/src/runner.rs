//! Scheduler: runs modules, hooks and testcases in order
//!
//! Modules run strictly one after another. Inside a module the order is
//! `before`, then every testcase wrapped by `before_each`/`after_each`, then
//! `after`. Failures are recorded and execution continues; only a
//! `TestError::Fatal` (or `skip_testcases_on_fail`) cuts a module short.
//!
//! Asynchronous bodies are awaited with a bounded wait. Three things can end
//! the wait and they are mutually exclusive: the `Done` signal, an uncaught
//! error from a task the body spawned, or the completion timeout. The
//! testcase scope is torn down right after, so a late signal, error or timer
//! of one testcase can never reach the next.

use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::error::{ResultsError, RunnerError, TestError, panic_message};
use crate::module::{AssertionLog, Done, Module, TestBody, TestContext, TestScope, Testcase, wait_done};
use crate::report;
use crate::reporter::{ConsoleReporter, Reporter};
use crate::results::{ModuleResult, ResultsTree, RunSummary, TestcaseResult};
use crate::session::{Backend, DetachedBackend, SessionHandle, SessionManager};
use crate::source::{ModuleDescriptor, TestSource};

/// Which report files a run writes besides the JUnit XML
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// One JUnit XML document per module
    #[default]
    Junit,
    /// JUnit XML plus `summary.json` at the output root
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "junit" | "xml" => Ok(ReportFormat::Junit),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!("Unknown reporter \"{}\" (expected junit or json)", other)),
        }
    }
}

/// Report selection for a runner
#[derive(Debug, Clone, Default)]
pub struct ReporterConfig {
    pub format: ReportFormat,
}

impl ReporterConfig {
    pub fn json() -> Self {
        Self {
            format: ReportFormat::Json,
        }
    }
}

/// Lifecycle of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Pending,
    HooksBefore,
    RunningTestcases,
    HooksAfter,
    Finalized,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleState::Pending => write!(f, "pending"),
            ModuleState::HooksBefore => write!(f, "hooksBefore"),
            ModuleState::RunningTestcases => write!(f, "runningTestcases"),
            ModuleState::HooksAfter => write!(f, "hooksAfter"),
            ModuleState::Finalized => write!(f, "finalized"),
        }
    }
}

/// Lifecycle of a testcase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestcaseState {
    Pending,
    Running,
    Completed,
    TimedOut,
    Errored,
}

impl TestcaseState {
    fn resolved(error: Option<&TestError>) -> Self {
        match error {
            None => TestcaseState::Completed,
            Some(err) if err.is_assertion() => TestcaseState::Completed,
            Some(TestError::Timeout { .. }) => TestcaseState::TimedOut,
            Some(_) => TestcaseState::Errored,
        }
    }
}

impl fmt::Display for TestcaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestcaseState::Pending => write!(f, "pending"),
            TestcaseState::Running => write!(f, "running"),
            TestcaseState::Completed => write!(f, "completed"),
            TestcaseState::TimedOut => write!(f, "timedOut"),
            TestcaseState::Errored => write!(f, "errored"),
        }
    }
}

/// Test runner
pub struct Runner {
    settings: Settings,
    reporter_config: ReporterConfig,
    sessions: SessionManager,
    reporter: Box<dyn Reporter>,
    results: ResultsTree,
    globals: Arc<serde_json::Map<String, serde_json::Value>>,
}

impl Runner {
    /// Create a runner with the detached backend and console output
    pub fn create(settings: Settings, reporter_config: ReporterConfig) -> Self {
        let sessions = SessionManager::new(Arc::new(DetachedBackend), settings.backend.clone());
        let reporter = Box::new(ConsoleReporter::from_settings(&settings));
        let globals = Arc::new(settings.globals.values.clone());

        Self {
            settings,
            reporter_config,
            sessions,
            reporter,
            results: ResultsTree::new(),
            globals,
        }
    }

    /// Use another session backend
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.sessions = SessionManager::new(backend, self.settings.backend.clone());
        self
    }

    /// Use another event reporter
    pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Everything recorded by this runner so far
    pub fn results(&self) -> &ResultsTree {
        &self.results
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Run every module of `source` and write the reports.
    ///
    /// Rejects before executing anything when the source is empty or holds a
    /// module already recorded. Each module lands in [`Runner::results`] as
    /// soon as it finishes, so results survive a failed report write.
    pub async fn run(&mut self, source: TestSource) -> Result<RunSummary, RunnerError> {
        if source.is_empty() {
            return Err(RunnerError::EmptySource {
                path: source.display_path(),
            });
        }
        self.check_unrecorded(&source)?;

        tracing::info!("running {} modules", source.len());
        self.reporter.on_run_start(source.len());

        let mut tree = ResultsTree::new();
        for module in source.into_modules() {
            let result = self.run_module(module).await;
            self.reporter.on_module_complete(&result);
            self.results.record(result.clone())?;
            tree.record(result)?;
        }

        let summary = tree.summary();
        self.write_reports(&tree).await?;
        self.reporter.on_run_complete(&summary);

        Ok(summary)
    }

    fn check_unrecorded(&self, source: &TestSource) -> Result<(), RunnerError> {
        let mut keys = HashSet::with_capacity(source.len());
        for module in source.modules() {
            if !keys.insert(module.key()) {
                return Err(RunnerError::DuplicateModule {
                    key: module.key().to_string(),
                });
            }
            if self.results.module(module.key()).is_some() {
                return Err(ResultsError::AlreadyRecorded(module.key().to_string()).into());
            }
        }
        Ok(())
    }

    async fn write_reports(&self, tree: &ResultsTree) -> Result<(), RunnerError> {
        let output = &self.settings.output_folder;
        report::junit::write(tree, output).await?;
        if self.reporter_config.format == ReportFormat::Json {
            report::json::write(tree, output).await?;
        }
        Ok(())
    }

    /// Run one module through its full lifecycle
    async fn run_module(&mut self, module: Module) -> ModuleResult {
        let started = Instant::now();
        let key = module.key().to_string();
        let timeout = module
            .async_timeout
            .unwrap_or_else(|| self.settings.globals.async_timeout());
        let mut state = ModuleState::Pending;

        tracing::info!("module {}: {} testcases", key, module.testcases.len());
        self.reporter.on_module_start(&module.descriptor);

        let session = if module.needs_session() && self.settings.start_session {
            match self.sessions.start().await {
                Ok(handle) => Some(handle),
                Err(err) => {
                    tracing::warn!("{}: session could not be started: {}", key, err);
                    return self.session_failed(module, TestError::Session(err), started);
                }
            }
        } else {
            None
        };

        let prefix = session.as_ref().map(SessionHandle::report_prefix).unwrap_or_default();
        let mut result = ModuleResult::new(module.descriptor.clone(), prefix);
        let mut skip_reason = None;

        transition(&key, &mut state, ModuleState::HooksBefore);
        if let Some(hook) = &module.hooks.before {
            if let Err(err) = self.run_hook(&module, "before", hook, session.as_ref(), timeout).await {
                tracing::warn!("{}: before hook failed: {}", key, err);
                if err.is_fatal() {
                    skip_reason = Some(format!("Skipped after fatal error in before hook: {}", err));
                }
                result.push_error("before", err);
            }
        }

        transition(&key, &mut state, ModuleState::RunningTestcases);
        for testcase in &module.testcases {
            let tc_result = match (&skip_reason, &testcase.skip) {
                (Some(reason), _) | (None, Some(reason)) => TestcaseResult::skipped(&testcase.name, reason.clone()),
                (None, None) => self.run_testcase(&module, testcase, session.as_ref(), timeout).await,
            };

            if skip_reason.is_none() {
                match &tc_result.error {
                    Some(err) if err.is_fatal() => {
                        skip_reason = Some(format!("Skipped after fatal error in \"{}\": {}", tc_result.name, err));
                    }
                    _ if self.settings.skip_testcases_on_fail && tc_result.outcome.is_failure() => {
                        skip_reason = Some(format!("Skipped after failure in \"{}\"", tc_result.name));
                    }
                    _ => {}
                }
            }

            self.reporter.on_testcase_complete(&module.descriptor, &tc_result);
            result.push_testcase(tc_result);
        }

        transition(&key, &mut state, ModuleState::HooksAfter);
        if let Some(hook) = &module.hooks.after {
            if let Err(err) = self.run_hook(&module, "after", hook, session.as_ref(), timeout).await {
                tracing::warn!("{}: after hook failed: {}", key, err);
                result.push_error("after", err);
            }
        }

        if let Some(handle) = session {
            if let Err(err) = self.sessions.stop(handle).await {
                tracing::warn!("{}: session did not stop cleanly: {}", key, err);
                result.push_error("session", TestError::Session(err));
            }
        }

        transition(&key, &mut state, ModuleState::Finalized);
        result.elapsed = started.elapsed();
        tracing::info!(
            "module {} finished in {:.3}s",
            key,
            result.elapsed.as_secs_f64()
        );
        result
    }

    /// A module whose session never started: every testcase is errored and
    /// no hook runs.
    fn session_failed(&mut self, module: Module, error: TestError, started: Instant) -> ModuleResult {
        let mut result = ModuleResult::new(module.descriptor.clone(), "");
        result.push_error("session", error.clone());

        for testcase in &module.testcases {
            let tc_result = TestcaseResult::executed(&testcase.name, Duration::ZERO, Vec::new(), Some(error.clone()));
            self.reporter.on_testcase_complete(&module.descriptor, &tc_result);
            result.push_testcase(tc_result);
        }

        result.elapsed = started.elapsed();
        result
    }

    async fn run_testcase(
        &mut self,
        module: &Module,
        testcase: &Testcase,
        session: Option<&SessionHandle>,
        timeout: Duration,
    ) -> TestcaseResult {
        let started = Instant::now();
        let assertions = AssertionLog::default();
        let mut ctx = TestContext::new(
            module.key(),
            &testcase.name,
            session.cloned(),
            Arc::clone(&self.globals),
            assertions.clone(),
        );
        let mut error = None;

        if let Some(hook) = &module.hooks.before_each {
            if let Err(err) = self.invoke(&module.descriptor, "beforeEach", hook, &mut ctx, timeout).await {
                tracing::warn!("{}: beforeEach failed for \"{}\": {}", module.key(), testcase.name, err);
                error = Some(err);
            }
        }

        if error.is_none() {
            tracing::debug!(
                "{}: \"{}\" {} -> {}",
                module.key(),
                testcase.name,
                TestcaseState::Pending,
                TestcaseState::Running
            );
            error = self
                .invoke(&module.descriptor, &testcase.name, &testcase.body, &mut ctx, timeout)
                .await
                .err();
        }

        if let Some(hook) = &module.hooks.after_each {
            if let Err(err) = self.invoke(&module.descriptor, "afterEach", hook, &mut ctx, timeout).await {
                tracing::warn!("{}: afterEach failed for \"{}\": {}", module.key(), testcase.name, err);
                error.get_or_insert(err);
            }
        }

        tracing::debug!(
            "{}: \"{}\" {} -> {}",
            module.key(),
            testcase.name,
            TestcaseState::Running,
            TestcaseState::resolved(error.as_ref())
        );
        TestcaseResult::executed(&testcase.name, started.elapsed(), assertions.entries(), error)
    }

    /// Run a module-level hook. A failed assertion inside the hook fails it.
    async fn run_hook(
        &mut self,
        module: &Module,
        name: &str,
        body: &TestBody,
        session: Option<&SessionHandle>,
        timeout: Duration,
    ) -> Result<(), TestError> {
        let assertions = AssertionLog::default();
        let mut ctx = TestContext::new(
            module.key(),
            name,
            session.cloned(),
            Arc::clone(&self.globals),
            assertions.clone(),
        );

        self.invoke(&module.descriptor, name, body, &mut ctx, timeout).await?;

        match assertions.entries().into_iter().find(|a| !a.passed) {
            Some(failed) => Err(TestError::Assertion(failed.message)),
            None => Ok(()),
        }
    }

    /// Execute one body inside its own testcase scope
    async fn invoke(
        &mut self,
        descriptor: &ModuleDescriptor,
        name: &str,
        body: &TestBody,
        ctx: &mut TestContext,
        timeout: Duration,
    ) -> Result<(), TestError> {
        let (scope, mut guard) = TestScope::open();
        ctx.attach_scope(scope);

        let outcome = match body {
            TestBody::Sync(f) => match std::panic::catch_unwind(AssertUnwindSafe(|| f(ctx))) {
                Ok(result) => result,
                Err(panic) => Err(TestError::Panic(panic_message(panic.as_ref()))),
            },
            TestBody::Async(f) => {
                let (done, rx) = Done::channel();
                match std::panic::catch_unwind(AssertUnwindSafe(|| f(ctx, done))) {
                    Err(panic) => Err(TestError::Panic(panic_message(panic.as_ref()))),
                    Ok(Err(err)) => Err(err),
                    Ok(Ok(())) => {
                        tokio::select! {
                            biased;
                            Some(err) = guard.errors.recv() => {
                                self.uncaught(descriptor, name, &err);
                                Err(err)
                            }
                            result = wait_done(rx) => result,
                            _ = tokio::time::sleep(timeout) => {
                                let err = TestError::Timeout {
                                    timeout_ms: timeout.as_millis() as u64,
                                    name: name.to_string(),
                                };
                                self.uncaught(descriptor, name, &err);
                                Err(err)
                            }
                        }
                    }
                }
            }
        };

        ctx.detach_scope();
        let pending = guard.pending_tasks();
        if pending > 0 {
            tracing::debug!("{}: aborting {} pending tasks of \"{}\"", descriptor.key, pending, name);
        }
        drop(guard);

        outcome
    }

    fn uncaught(&mut self, descriptor: &ModuleDescriptor, name: &str, error: &TestError) {
        tracing::warn!("{}: \"{}\": {}", descriptor.key, name, error);
        self.reporter.on_uncaught_error(descriptor, name, error);
    }
}

fn transition(key: &str, state: &mut ModuleState, next: ModuleState) {
    tracing::debug!("module {}: {} -> {}", key, state, next);
    *state = next;
}
