//! Test modules, testcases and the context a testcase runs in
//!
//! A `Module` is produced by discovery and consumed by the runner exactly
//! once. Testcase and hook bodies come in two shapes:
//!
//! - `TestBody::Sync` completes when the closure returns.
//! - `TestBody::Async` receives a [`Done`] handle and completes only when
//!   the handle is signalled, or is failed when the completion timeout
//!   elapses first.
//!
//! Work that outlives the closure must be started with
//! [`TestContext::spawn`]. Such tasks belong to the testcase: their panics
//! and errors are attributed to it, and they are aborted when it resolves.

use std::fmt::{self, Display};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use crate::error::{TestError, panic_message};
use crate::session::SessionHandle;
use crate::source::ModuleDescriptor;

/// Synchronous body: completes when it returns
pub type SyncFn = dyn Fn(&mut TestContext) -> Result<(), TestError> + Send + Sync;

/// Asynchronous body: completes when `Done` is signalled
pub type AsyncFn = dyn Fn(&mut TestContext, Done) -> Result<(), TestError> + Send + Sync;

/// Whether a module drives a backend session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// Runs against a backend session
    #[default]
    E2e,
    /// Plain unit tests, no session
    Unit,
}

/// A testcase or hook body
#[derive(Clone)]
pub enum TestBody {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl TestBody {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&mut TestContext) -> Result<(), TestError> + Send + Sync + 'static,
    {
        TestBody::Sync(Arc::new(f))
    }

    pub fn with_done<F>(f: F) -> Self
    where
        F: Fn(&mut TestContext, Done) -> Result<(), TestError> + Send + Sync + 'static,
    {
        TestBody::Async(Arc::new(f))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, TestBody::Async(_))
    }
}

impl fmt::Debug for TestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestBody::Sync(_) => write!(f, "TestBody::Sync"),
            TestBody::Async(_) => write!(f, "TestBody::Async"),
        }
    }
}

/// Lifecycle hooks of a module
#[derive(Debug, Clone, Default)]
pub struct Hooks {
    pub before: Option<TestBody>,
    pub after: Option<TestBody>,
    pub before_each: Option<TestBody>,
    pub after_each: Option<TestBody>,
}

/// A named unit of test logic
#[derive(Debug, Clone)]
pub struct Testcase {
    pub name: String,
    pub body: TestBody,
    /// Skip reason; a skipped testcase is recorded but never executed
    pub skip: Option<String>,
}

/// A discovered module with its hooks and testcases in declaration order
#[derive(Debug, Clone)]
pub struct Module {
    pub descriptor: ModuleDescriptor,
    pub kind: ModuleKind,
    pub hooks: Hooks,
    pub testcases: Vec<Testcase>,
    /// Overrides `globals.async_hook_timeout` for this module
    pub async_timeout: Option<Duration>,
}

impl Module {
    /// Start building a module for a descriptor
    pub fn builder(descriptor: ModuleDescriptor) -> ModuleBuilder {
        ModuleBuilder {
            module: Module {
                descriptor,
                kind: ModuleKind::E2e,
                hooks: Hooks::default(),
                testcases: Vec::new(),
                async_timeout: None,
            },
        }
    }

    /// Module key (`group/name`)
    pub fn key(&self) -> &str {
        &self.descriptor.key
    }

    pub fn needs_session(&self) -> bool {
        self.kind == ModuleKind::E2e
    }
}

/// Builder for code-defined modules
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn kind(mut self, kind: ModuleKind) -> Self {
        self.module.kind = kind;
        self
    }

    pub fn unit(self) -> Self {
        self.kind(ModuleKind::Unit)
    }

    pub fn async_timeout(mut self, timeout: Duration) -> Self {
        self.module.async_timeout = Some(timeout);
        self
    }

    pub fn before(mut self, body: TestBody) -> Self {
        self.module.hooks.before = Some(body);
        self
    }

    pub fn after(mut self, body: TestBody) -> Self {
        self.module.hooks.after = Some(body);
        self
    }

    pub fn before_each(mut self, body: TestBody) -> Self {
        self.module.hooks.before_each = Some(body);
        self
    }

    pub fn after_each(mut self, body: TestBody) -> Self {
        self.module.hooks.after_each = Some(body);
        self
    }

    /// Add a testcase; declaration order is execution order
    pub fn test(mut self, name: impl Into<String>, body: TestBody) -> Self {
        self.module.testcases.push(Testcase {
            name: name.into(),
            body,
            skip: None,
        });
        self
    }

    pub fn skip(mut self, name: impl Into<String>, reason: impl Into<String>, body: TestBody) -> Self {
        self.module.testcases.push(Testcase {
            name: name.into(),
            body,
            skip: Some(reason.into()),
        });
        self
    }

    pub fn build(self) -> Module {
        self.module
    }
}

// ---------------------------------------------------------------------------
// Completion signal
// ---------------------------------------------------------------------------

/// Completion handle passed to asynchronous bodies.
///
/// Signalling consumes the handle, so a testcase can complete at most once.
/// Dropping it without signalling does not complete the testcase.
#[derive(Debug)]
pub struct Done {
    tx: oneshot::Sender<Result<(), TestError>>,
}

pub(crate) type DoneReceiver = oneshot::Receiver<Result<(), TestError>>;

impl Done {
    pub(crate) fn channel() -> (Done, DoneReceiver) {
        let (tx, rx) = oneshot::channel();
        (Done { tx }, rx)
    }

    /// Signal successful completion
    pub fn complete(self) {
        self.finish(Ok(()));
    }

    /// Signal completion with an error
    pub fn fail(self, error: impl Into<TestError>) {
        self.finish(Err(error.into()));
    }

    /// Signal completion with a result
    pub fn finish(self, result: Result<(), TestError>) {
        // The runner may have timed out already; nobody is listening then.
        let _ = self.tx.send(result);
    }
}

/// Wait for a completion signal. A dropped `Done` never resolves.
pub(crate) async fn wait_done(rx: DoneReceiver) -> Result<(), TestError> {
    match rx.await {
        Ok(result) => result,
        Err(_) => futures::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Assertions
// ---------------------------------------------------------------------------

/// One evaluated assertion
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Assertion {
    pub message: String,
    pub passed: bool,
}

/// Shared, append-only assertion log of one testcase
#[derive(Debug, Clone, Default)]
pub struct AssertionLog {
    entries: Arc<Mutex<Vec<Assertion>>>,
}

impl AssertionLog {
    /// Record an assertion and return whether it passed
    pub fn record(&self, passed: bool, message: impl Into<String>) -> bool {
        self.entries.lock().push(Assertion {
            message: message.into(),
            passed,
        });
        passed
    }

    /// Assert `actual == expected`
    ///
    /// Failure message: `<message> - expected "<expected>" but got: "<actual>"`,
    /// where `<message>` defaults to `AssertionError: <actual> == <expected>`.
    pub fn equal<T>(&self, actual: T, expected: T, message: Option<&str>) -> bool
    where
        T: PartialEq + Display,
    {
        if actual == expected {
            let message = message
                .map(str::to_string)
                .unwrap_or_else(|| format!("Passed: {} == {}", actual, expected));
            return self.record(true, message);
        }
        let base = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("AssertionError: {} == {}", actual, expected));
        self.record(false, expectation_message(&base, &expected, &actual))
    }

    /// Assert a condition holds
    pub fn ok(&self, condition: bool, message: impl Into<String>) -> bool {
        self.record(condition, message)
    }

    pub fn entries(&self) -> Vec<Assertion> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn failed(&self) -> usize {
        self.entries.lock().iter().filter(|a| !a.passed).count()
    }
}

/// `<message> - expected "<expected>" but got: "<actual>"`
pub fn expectation_message(message: &str, expected: &dyn Display, actual: &dyn Display) -> String {
    format!("{} - expected \"{}\" but got: \"{}\"", message, expected, actual)
}

// ---------------------------------------------------------------------------
// Testcase scope
// ---------------------------------------------------------------------------

/// Tasks and error channel owned by the testcase currently executing.
///
/// The runner holds the receiving side only while the testcase is pending.
#[derive(Clone)]
pub(crate) struct TestScope {
    errors: mpsc::UnboundedSender<TestError>,
    tasks: Arc<Mutex<Vec<AbortHandle>>>,
}

/// Runner side of a [`TestScope`]. Dropping it aborts every task still
/// running and closes the error channel.
pub(crate) struct ScopeGuard {
    pub(crate) errors: mpsc::UnboundedReceiver<TestError>,
    tasks: Arc<Mutex<Vec<AbortHandle>>>,
}

impl TestScope {
    pub(crate) fn open() -> (TestScope, ScopeGuard) {
        let (tx, rx) = mpsc::unbounded_channel();
        let tasks = Arc::new(Mutex::new(Vec::new()));
        (
            TestScope {
                errors: tx,
                tasks: Arc::clone(&tasks),
            },
            ScopeGuard { errors: rx, tasks },
        )
    }
}

impl ScopeGuard {
    /// Number of scoped tasks that have not finished yet
    pub(crate) fn pending_tasks(&self) -> usize {
        self.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }
        self.errors.close();
    }
}

// ---------------------------------------------------------------------------
// Test context
// ---------------------------------------------------------------------------

/// What a testcase body sees while it runs
pub struct TestContext {
    module: String,
    name: String,
    session: Option<SessionHandle>,
    globals: Arc<serde_json::Map<String, serde_json::Value>>,
    assertions: AssertionLog,
    scope: Option<TestScope>,
}

impl TestContext {
    pub(crate) fn new(
        module: impl Into<String>,
        name: impl Into<String>,
        session: Option<SessionHandle>,
        globals: Arc<serde_json::Map<String, serde_json::Value>>,
        assertions: AssertionLog,
    ) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            session,
            globals,
            assertions,
            scope: None,
        }
    }

    pub(crate) fn attach_scope(&mut self, scope: TestScope) {
        self.scope = Some(scope);
    }

    pub(crate) fn detach_scope(&mut self) {
        self.scope = None;
    }

    /// Key of the module being executed
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Name of the testcase or hook being executed
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend session; `None` for unit modules or when sessions are disabled
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// Session or a runtime error explaining why there is none
    pub fn require_session(&self) -> Result<SessionHandle, TestError> {
        self.session
            .clone()
            .ok_or_else(|| TestError::runtime(format!("No backend session available in \"{}\"", self.module)))
    }

    pub fn globals(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.globals
    }

    pub fn global(&self, key: &str) -> Option<&serde_json::Value> {
        self.globals.get(key)
    }

    /// Assertion log; clone it into spawned tasks
    pub fn assertions(&self) -> &AssertionLog {
        &self.assertions
    }

    pub fn assert_equal<T: PartialEq + Display>(&self, actual: T, expected: T) -> bool {
        self.assertions.equal(actual, expected, None)
    }

    pub fn assert_ok(&self, condition: bool, message: impl Into<String>) -> bool {
        self.assertions.ok(condition, message)
    }

    /// Run a future owned by the current testcase.
    ///
    /// A panic or an `Err` from the future is attributed to the testcase
    /// and resolves it as errored. The task is aborted once the testcase
    /// resolves. Outside a testcase window the future is dropped.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        let Some(scope) = self.scope.clone() else {
            tracing::warn!(
                "{}: spawn outside of a testcase window, task dropped",
                self.name
            );
            return;
        };

        let errors = scope.errors.clone();
        let handle = tokio::spawn(async move {
            let error = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => err,
                Err(panic) => TestError::Panic(panic_message(panic.as_ref())),
            };
            // Closed once the testcase has resolved; late errors are dropped.
            let _ = errors.send(error);
        });
        scope.tasks.lock().push(handle.abort_handle());
    }
}
