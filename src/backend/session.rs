//! Per-request set of open backends

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use super::{BackendConnector, ToolBackend};
use crate::config::BackendConfig;

/// Every backend connection opened for one request.
///
/// Backends are kept in configuration order. [`BackendSession::close`]
/// releases them all; a session dropped without `close` (early return,
/// panic, cancelled request) hands its connections to the runtime to be
/// closed in the background.
pub struct BackendSession {
    backends: Vec<Arc<dyn ToolBackend>>,
    closed: bool,
}

impl BackendSession {
    /// Connect to every configured backend.
    ///
    /// Connections are opened concurrently. A backend that fails to connect
    /// is logged and left out; it never prevents the others from joining.
    pub async fn open<'a>(
        connector: &dyn BackendConnector,
        configs: impl IntoIterator<Item = &'a BackendConfig>,
    ) -> Self {
        let configs: Vec<&BackendConfig> = configs.into_iter().collect();
        let attempts = join_all(configs.iter().map(|config| connector.connect(config))).await;

        let mut backends = Vec::with_capacity(attempts.len());
        for (config, attempt) in configs.iter().zip(attempts) {
            match attempt {
                Ok(backend) => backends.push(backend),
                Err(e) => {
                    warn!(backend = %config.name, url = %config.url, error = %e, "Failed to connect to backend");
                }
            }
        }

        debug!(open = backends.len(), configured = configs.len(), "Backend session opened");
        Self::from_backends(backends)
    }

    /// Session over already-open backends
    #[must_use]
    pub fn from_backends(backends: Vec<Arc<dyn ToolBackend>>) -> Self {
        Self {
            backends,
            closed: false,
        }
    }

    /// Open backends, in configuration order
    #[must_use]
    pub fn backends(&self) -> &[Arc<dyn ToolBackend>] {
        &self.backends
    }

    /// Number of open backends
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns `true` if no backend could be opened
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Close every backend and wait for them to finish
    pub async fn close(mut self) {
        self.closed = true;
        let backends = std::mem::take(&mut self.backends);
        let results = join_all(backends.iter().map(|b| b.close())).await;

        for (backend, result) in backends.iter().zip(results) {
            if let Err(e) = result {
                warn!(backend = %backend.name(), error = %e, "Failed to close backend");
            }
        }
    }
}

impl Drop for BackendSession {
    fn drop(&mut self) {
        if self.closed || self.backends.is_empty() {
            return;
        }

        let backends = std::mem::take(&mut self.backends);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            debug!(count = backends.len(), "Session dropped unclosed, closing in background");
            for backend in backends {
                handle.spawn(async move {
                    if let Err(e) = backend.close().await {
                        warn!(backend = %backend.name(), error = %e, "Failed to close backend");
                    }
                });
            }
        } else {
            warn!(count = backends.len(), "Session dropped outside a runtime, connections not closed");
        }
    }
}

impl std::fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSession")
            .field(
                "backends",
                &self.backends.iter().map(|b| b.address()).collect::<Vec<_>>(),
            )
            .field("closed", &self.closed)
            .finish()
    }
}
