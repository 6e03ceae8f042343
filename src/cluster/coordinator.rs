//! Contract for the external coordination service backing cluster membership.
//!
//! The service must provide strongly ordered ephemeral sequential nodes and
//! child-set change notifications. Raw one-shot watches are hidden behind
//! [`ChildWatch`], a persistent stream that yields the full child set every
//! time it changes.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::CoordinationError;

/// Node lifetime and naming policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the session that created it.
    Persistent,
    /// Removed when the creating session ends; the service appends a
    /// fixed-width, monotonically increasing suffix to the requested name.
    EphemeralSequential,
}

/// Stream of child-name sets for one parent path.
///
/// The first item is the set at subscription time.
pub struct ChildWatch {
    rx: mpsc::UnboundedReceiver<Vec<String>>,
}

impl ChildWatch {
    pub fn new(rx: mpsc::UnboundedReceiver<Vec<String>>) -> Self {
        Self { rx }
    }

    /// Next child set, or `None` once the session has ended.
    pub async fn changed(&mut self) -> Option<Vec<String>> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Opaque session identifier, for diagnostics.
    fn session_id(&self) -> String;

    async fn exists(&self, path: &str) -> Result<bool, CoordinationError>;

    /// Create a node and return the full path actually created.
    async fn create(&self, path: &str, mode: CreateMode) -> Result<String, CoordinationError>;

    async fn delete(&self, path: &str) -> Result<(), CoordinationError>;

    async fn watch_children(&self, path: &str) -> Result<ChildWatch, CoordinationError>;

    /// End the session, dropping any ephemeral nodes it owns.
    async fn close(&self);
}

/// A live session plus a signal that fires when the session ends.
pub struct Connection {
    pub client: Arc<dyn CoordinationClient>,
    pub closed: oneshot::Receiver<()>,
}

/// Opens sessions against the coordination service.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, CoordinationError>;
}

/// Split a path into its cumulative prefixes, root to leaf.
///
/// `/bot//members/` yields `["/bot", "/bot/members"]`.
pub fn path_prefixes(path: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
        current.push('/');
        current.push_str(segment);
        prefixes.push(current.clone());
    }
    prefixes
}

/// Create every missing segment of `path` as a persistent node.
///
/// Returns the last node created, if any were missing.
pub async fn ensure_path(
    client: &dyn CoordinationClient,
    path: &str,
) -> Result<Option<String>, CoordinationError> {
    let mut created = None;
    for subpath in path_prefixes(path) {
        if client.exists(&subpath).await? {
            continue;
        }
        match client.create(&subpath, CreateMode::Persistent).await {
            Ok(node) => created = Some(node),
            // Another member won the race; the node is there either way.
            Err(CoordinationError::NodeExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(created)
}

/// Last segment of a node path.
pub fn node_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_normalize_slashes() {
        assert_eq!(
            path_prefixes("/bot//members/"),
            vec!["/bot".to_string(), "/bot/members".to_string()]
        );
        assert_eq!(path_prefixes("/"), Vec::<String>::new());
    }

    #[test]
    fn node_name_takes_last_segment() {
        assert_eq!(node_name("/bot/members/m_0000000003"), "m_0000000003");
        assert_eq!(node_name("m_1"), "m_1");
    }
}
