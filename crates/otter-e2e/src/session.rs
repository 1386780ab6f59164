//! Backend session lifecycle
//!
//! The wire protocol lives behind [`Backend`] and [`Session`]. The runner only
//! sees a [`SessionHandle`], which serializes commands, and the
//! [`SessionManager`], which pairs every successful start with one stop.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::BackendSettings;
use crate::error::SessionError;

/// What the backend reported about the session it opened
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub browser_name: String,
    pub version: String,
    pub platform: String,
}

impl Capabilities {
    /// `<BROWSER>_<VERSION>_<PLATFORM>_`, uppercased; empty parts are left out.
    pub fn report_prefix(&self) -> String {
        let parts: Vec<String> = [&self.browser_name, &self.version, &self.platform]
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .map(|part| part.split_whitespace().collect::<Vec<_>>().join("_").to_uppercase())
            .collect();

        if parts.is_empty() {
            String::new()
        } else {
            format!("{}_", parts.join("_"))
        }
    }
}

/// An open backend session
pub trait Session: Send {
    fn capabilities(&self) -> &Capabilities;

    /// Run an opaque command and return its result
    fn execute<'a>(&'a mut self, command: &'a str, args: &'a Value) -> BoxFuture<'a, Result<Value, SessionError>>;

    /// Close the session
    fn stop(&mut self) -> BoxFuture<'_, Result<(), SessionError>>;
}

/// Opens sessions
pub trait Backend: Send + Sync {
    fn start<'a>(&'a self, settings: &'a BackendSettings) -> BoxFuture<'a, Result<Box<dyn Session>, SessionError>>;
}

/// Shared handle to the session of the running module.
///
/// Commands take an async lock, so the session never sees two commands at once.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<tokio::sync::Mutex<Option<Box<dyn Session>>>>,
    capabilities: Capabilities,
}

impl SessionHandle {
    fn new(session: Box<dyn Session>) -> Self {
        let capabilities = session.capabilities().clone();
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(Some(session))),
            capabilities,
        }
    }

    /// Run a command on the session
    pub async fn execute(&self, command: &str, args: &Value) -> Result<Value, SessionError> {
        let mut guard = self.inner.lock().await;
        let session = guard.as_mut().ok_or(SessionError::Closed)?;
        session.execute(command, args).await
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn report_prefix(&self) -> String {
        self.capabilities.report_prefix()
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Starts and stops sessions for the runner
pub struct SessionManager {
    backend: Arc<dyn Backend>,
    settings: BackendSettings,
    started: usize,
    stopped: usize,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn Backend>, settings: BackendSettings) -> Self {
        Self {
            backend,
            settings,
            started: 0,
            stopped: 0,
        }
    }

    /// Open a session
    pub async fn start(&mut self) -> Result<SessionHandle, SessionError> {
        let session = self.backend.start(&self.settings).await?;
        self.started += 1;
        let handle = SessionHandle::new(session);
        tracing::debug!(
            "session started ({})",
            handle.capabilities().browser_name
        );
        Ok(handle)
    }

    /// Close a session. Stopping an already stopped handle does nothing.
    pub async fn stop(&mut self, handle: SessionHandle) -> Result<(), SessionError> {
        let session = handle.inner.lock().await.take();
        match session {
            Some(mut session) => {
                self.stopped += 1;
                let result = session.stop().await;
                tracing::debug!("session stopped");
                result
            }
            None => {
                tracing::warn!("session was already stopped");
                Ok(())
            }
        }
    }

    /// Sessions opened so far
    pub fn started(&self) -> usize {
        self.started
    }

    /// Sessions closed so far
    pub fn stopped(&self) -> usize {
        self.stopped
    }
}

// ---------------------------------------------------------------------------
// Detached backend
// ---------------------------------------------------------------------------

/// Backend without a remote end.
///
/// Sessions open instantly and report the configured browser name; every
/// command fails with `SessionError::Unsupported`. Unit modules and
/// assertion-only scripts run normally against it.
#[derive(Debug, Default, Clone)]
pub struct DetachedBackend;

struct DetachedSession {
    capabilities: Capabilities,
}

impl Backend for DetachedBackend {
    fn start<'a>(&'a self, settings: &'a BackendSettings) -> BoxFuture<'a, Result<Box<dyn Session>, SessionError>> {
        let capabilities = Capabilities {
            browser_name: settings.browser_name.clone(),
            ..Capabilities::default()
        };
        Box::pin(async move { Ok(Box::new(DetachedSession { capabilities }) as Box<dyn Session>) })
    }
}

impl Session for DetachedSession {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn execute<'a>(&'a mut self, command: &'a str, _args: &'a Value) -> BoxFuture<'a, Result<Value, SessionError>> {
        Box::pin(async move { Err(SessionError::Unsupported(command.to_string())) })
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async { Ok(()) })
    }
}
