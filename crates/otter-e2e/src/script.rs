//! Module loading: YAML test scripts and code-defined modules

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RunnerError, TestError};
use crate::module::{AssertionLog, Hooks, Module, ModuleKind, TestBody, Testcase, expectation_message};
use crate::session::SessionHandle;
use crate::source::ModuleDescriptor;

/// Turns a discovered module file into a module
pub trait ModuleLoader: Send + Sync {
    /// Load the module behind `descriptor`. `Ok(None)` drops it from the source.
    fn load(&self, descriptor: &ModuleDescriptor) -> Result<Option<Module>, RunnerError>;
}

// ---------------------------------------------------------------------------
// Script format
// ---------------------------------------------------------------------------

/// A YAML test script
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleScript {
    /// `e2e` modules get a backend session, `unit` modules do not
    #[serde(default)]
    pub kind: ModuleKind,

    /// Module override of the completion timeout
    #[serde(default)]
    pub async_timeout_ms: Option<u64>,

    /// Disabled modules are not discovered
    #[serde(default)]
    pub disabled: bool,

    #[serde(default)]
    pub before: Option<Vec<Step>>,
    #[serde(default)]
    pub after: Option<Vec<Step>>,
    #[serde(default)]
    pub before_each: Option<Vec<Step>>,
    #[serde(default)]
    pub after_each: Option<Vec<Step>>,

    /// Testcases in execution order
    #[serde(default)]
    pub tests: Vec<TestScript>,
}

/// One scripted testcase
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TestScript {
    pub name: String,
    #[serde(default)]
    pub skip: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One step of a scripted testcase
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Step {
    /// Local equality assertion; needs no session
    Assert {
        assert_equal: (serde_json::Value, serde_json::Value),
        #[serde(default)]
        message: Option<String>,
    },
    /// Backend command, optionally checked against an expected result
    Command {
        command: String,
        #[serde(default)]
        args: serde_json::Value,
        #[serde(default)]
        expect: Option<serde_json::Value>,
        #[serde(default)]
        message: Option<String>,
    },
}

impl ModuleScript {
    /// Parse a script from YAML text
    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file is an empty module, not a parse error.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Build the executable module
    pub fn into_module(self, descriptor: ModuleDescriptor) -> Module {
        Module {
            descriptor,
            kind: self.kind,
            hooks: Hooks {
                before: self.before.map(steps_body),
                after: self.after.map(steps_body),
                before_each: self.before_each.map(steps_body),
                after_each: self.after_each.map(steps_body),
            },
            testcases: self
                .tests
                .into_iter()
                .map(|test| Testcase {
                    name: test.name,
                    body: steps_body(test.steps),
                    skip: test.skip,
                })
                .collect(),
            async_timeout: self.async_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// A scripted body completes through `Done` once every step has run.
fn steps_body(steps: Vec<Step>) -> TestBody {
    let steps = Arc::new(steps);
    TestBody::with_done(move |ctx, done| {
        let steps = Arc::clone(&steps);
        let session = ctx.session().cloned();
        let assertions = ctx.assertions().clone();
        ctx.spawn(async move {
            let result = run_steps(&steps, session.as_ref(), &assertions).await;
            done.finish(result);
            Ok(())
        });
        Ok(())
    })
}

/// Run steps in order. Failed expectations are recorded and execution
/// continues; a command error ends the testcase.
async fn run_steps(
    steps: &[Step],
    session: Option<&SessionHandle>,
    assertions: &AssertionLog,
) -> Result<(), TestError> {
    for step in steps {
        match step {
            Step::Assert {
                assert_equal: (actual, expected),
                message,
            } => {
                assertions.equal(ValueDisplay(actual), ValueDisplay(expected), message.as_deref());
            }
            Step::Command {
                command,
                args,
                expect,
                message,
            } => {
                let session = session.ok_or_else(|| {
                    TestError::runtime(format!("Command \"{}\" needs a backend session", command))
                })?;
                let value = session.execute(command, args).await?;

                if let Some(expected) = expect {
                    let base = message.clone().unwrap_or_else(|| {
                        format!("Testing if \"{}\" returns {}", command, ValueDisplay(expected))
                    });
                    if &value == expected {
                        assertions.record(true, base);
                    } else {
                        assertions.record(
                            false,
                            expectation_message(&base, &ValueDisplay(expected), &ValueDisplay(&value)),
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

/// Strings print bare, everything else as JSON
#[derive(PartialEq)]
struct ValueDisplay<'a>(&'a serde_json::Value);

impl fmt::Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            serde_json::Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

/// Loads YAML test scripts from disk
#[derive(Debug, Default, Clone)]
pub struct ScriptLoader;

impl ScriptLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLoader for ScriptLoader {
    fn load(&self, descriptor: &ModuleDescriptor) -> Result<Option<Module>, RunnerError> {
        let content = std::fs::read_to_string(&descriptor.path).map_err(|e| RunnerError::Load {
            path: descriptor.path.clone(),
            message: e.to_string(),
        })?;
        let script = ModuleScript::parse(&content).map_err(|e| RunnerError::Load {
            path: descriptor.path.clone(),
            message: e.to_string(),
        })?;

        if script.disabled {
            return Ok(None);
        }
        Ok(Some(script.into_module(descriptor.clone())))
    }
}

type ModuleFactory = dyn Fn(ModuleDescriptor) -> Module + Send + Sync;

/// Maps module keys to modules built in code.
///
/// Discovery still walks the filesystem; the file only marks where the
/// module sits in the hierarchy.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: HashMap<String, Arc<ModuleFactory>>,
    fallback: Option<Arc<dyn ModuleLoader>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under its key (`group/name`)
    pub fn register<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(ModuleDescriptor) -> Module + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
        self
    }

    /// Loader used for files with no registered module
    pub fn with_fallback(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.fallback = Some(loader);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }
}

impl ModuleLoader for ModuleRegistry {
    fn load(&self, descriptor: &ModuleDescriptor) -> Result<Option<Module>, RunnerError> {
        if let Some(factory) = self.factories.get(&descriptor.key) {
            return Ok(Some(factory(descriptor.clone())));
        }
        match &self.fallback {
            Some(loader) => loader.load(descriptor),
            None => Err(RunnerError::Load {
                path: descriptor.path.clone(),
                message: format!("no module registered for \"{}\"", descriptor.key),
            }),
        }
    }
}
