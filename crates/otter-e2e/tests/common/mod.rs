//! Shared helpers for the runner integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;

use otter_e2e::{
    Backend, BackendSettings, Capabilities, ModuleDescriptor, ModuleResult, OutputFolder, Reporter, Session,
    SessionError, Settings, TestError,
};

/// Fixture folder under `tests/sampletests`
pub fn sample(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/sampletests")
        .join(path)
}

/// Quiet settings writing reports to `output`
pub fn settings(output: &std::path::Path) -> Settings {
    Settings {
        output_folder: OutputFolder::Path(output.to_path_buf()),
        output: false,
        ..Settings::default()
    }
}

/// Backend answering a tiny command set, counting session starts and stops
#[derive(Default, Clone)]
pub struct MockBackend {
    pub started: Arc<AtomicUsize>,
    pub stopped: Arc<AtomicUsize>,
    pub refuse: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose sessions never start
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct MockSession {
    capabilities: Capabilities,
    stopped: Arc<AtomicUsize>,
}

impl Backend for MockBackend {
    fn start<'a>(&'a self, _settings: &'a BackendSettings) -> BoxFuture<'a, Result<Box<dyn Session>, SessionError>> {
        Box::pin(async move {
            if self.refuse {
                return Err(SessionError::Start("connection refused".to_string()));
            }
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockSession {
                capabilities: Capabilities {
                    browser_name: "firefox".to_string(),
                    version: "TEST".to_string(),
                    platform: "TEST".to_string(),
                },
                stopped: Arc::clone(&self.stopped),
            }) as Box<dyn Session>)
        })
    }
}

impl Session for MockSession {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn execute<'a>(&'a mut self, command: &'a str, args: &'a Value) -> BoxFuture<'a, Result<Value, SessionError>> {
        Box::pin(async move {
            match command {
                "url" => Ok(Value::Null),
                "isPresent" => {
                    let selector = args.get("selector").and_then(Value::as_str).unwrap_or_default();
                    Ok(Value::Bool(selector != "#badElement"))
                }
                "pause" => {
                    tokio::time::sleep(Duration::from_millis(args.as_u64().unwrap_or(0))).await;
                    Ok(Value::Null)
                }
                other => Err(SessionError::Unsupported(other.to_string())),
            }
        })
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), SessionError>> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// Reporter that keeps the uncaught errors it was told about
#[derive(Default, Clone)]
pub struct RecordingReporter {
    pub uncaught: Arc<Mutex<Vec<(String, TestError)>>>,
    pub modules: Arc<Mutex<Vec<String>>>,
}

impl RecordingReporter {
    pub fn uncaught_messages(&self) -> Vec<String> {
        self.uncaught.lock().iter().map(|(_, err)| err.to_string()).collect()
    }
}

impl Reporter for RecordingReporter {
    fn on_uncaught_error(&mut self, _module: &ModuleDescriptor, name: &str, error: &TestError) {
        self.uncaught.lock().push((name.to_string(), error.clone()));
    }

    fn on_module_complete(&mut self, result: &ModuleResult) {
        self.modules.lock().push(result.key().to_string());
    }
}
