//! Tool catalog aggregation
//!
//! Merges the tool lists of every open backend into one ordered catalog.
//! Each entry remembers which backend (by session position) advertised it,
//! so the dispatcher can reuse the mapping instead of listing again.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::backend::BackendSession;
use crate::protocol::Tool;

/// One tool together with the session position of its backend
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Index into [`BackendSession::backends`]
    pub backend: usize,
    /// Tool descriptor as advertised
    pub tool: Tool,
}

/// Merged, ordered tool catalog of one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// List tools on every backend of `session` and merge the results.
    ///
    /// Lists are fetched concurrently but merged in configuration order.
    /// A backend whose listing fails is logged and contributes nothing;
    /// if all fail the catalog is empty.
    pub async fn aggregate(session: &BackendSession) -> Self {
        let backends = session.backends();
        let listings = join_all(backends.iter().map(|b| b.list_tools())).await;

        let mut entries = Vec::new();
        for (index, (backend, listing)) in backends.iter().zip(listings).enumerate() {
            match listing {
                Ok(tools) => {
                    debug!(backend = %backend.name(), count = tools.len(), "Catalog fetched");
                    entries.extend(tools.into_iter().map(|tool| CatalogEntry { backend: index, tool }));
                }
                Err(e) => {
                    warn!(
                        backend = %backend.name(),
                        url = %backend.address(),
                        error = %e,
                        "Failed to list tools, skipping backend"
                    );
                }
            }
        }

        Self { entries }
    }

    /// Build a catalog from prepared entries
    #[must_use]
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// All entries, in merge order
    #[must_use]
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// All tool descriptors, in merge order
    pub fn tools(&self) -> impl Iterator<Item = &Tool> {
        self.entries.iter().map(|e| &e.tool)
    }

    /// First entry advertising `name` (earliest backend wins)
    #[must_use]
    pub fn owner_of(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.tool.name == name)
    }

    /// Number of tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no tool was collected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
