//! In-process coordination service.
//!
//! Implements the same contract as a real ensemble: persistent and
//! ephemeral-sequential nodes, session-scoped ephemerals, and child watches.
//! Child sets are reported in no particular order, like the real thing.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::coordinator::{ChildWatch, Connection, Connector, CoordinationClient, CreateMode};
use crate::error::CoordinationError;

#[derive(Default)]
struct State {
    /// Node path -> owning session for ephemerals.
    nodes: HashMap<String, Option<u64>>,
    /// Per-parent sequence counters.
    sequences: HashMap<String, u64>,
    watchers: HashMap<String, Vec<Watcher>>,
    sessions: HashMap<u64, oneshot::Sender<()>>,
    next_session: u64,
    unreachable: bool,
}

struct Watcher {
    session: u64,
    tx: mpsc::UnboundedSender<Vec<String>>,
}

impl State {
    fn children(&self, parent: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|path| parent_of(path) == parent)
            .map(|path| path[parent.len()..].trim_start_matches('/').to_string())
            .collect()
    }

    fn notify(&mut self, parent: &str) {
        let children = self.children(parent);
        if let Some(watchers) = self.watchers.get_mut(parent) {
            watchers.retain(|w| w.tx.send(children.clone()).is_ok());
        }
    }

    fn expire(&mut self, session: u64) {
        let Some(closed) = self.sessions.remove(&session) else {
            return;
        };

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, owner)| **owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        let mut parents = HashSet::new();
        for path in owned {
            self.nodes.remove(&path);
            parents.insert(parent_of(&path).to_string());
        }

        for watchers in self.watchers.values_mut() {
            watchers.retain(|w| w.session != session);
        }
        for parent in parents {
            self.notify(&parent);
        }

        let _ = closed.send(());
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Shared in-memory coordination service. Clones refer to the same state.
#[derive(Clone, Default)]
pub struct MemoryCoordinator {
    state: Arc<Mutex<State>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new session directly.
    pub fn open_session(&self) -> Result<Connection, CoordinationError> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(CoordinationError::ConnectionLost);
        }
        state.next_session += 1;
        let id = state.next_session;
        let (closed_tx, closed_rx) = oneshot::channel();
        state.sessions.insert(id, closed_tx);
        debug!("Memory coordinator: opened session {}", id);

        Ok(Connection {
            client: Arc::new(MemorySession {
                id,
                coordinator: self.clone(),
            }),
            closed: closed_rx,
        })
    }

    /// A connector handing out sessions on this coordinator.
    ///
    /// While the coordinator is unreachable, connection attempts hang.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            coordinator: self.clone(),
        }
    }

    /// Simulate an outage (or recovery) for new connection attempts.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// End a session as if its connection had been lost.
    pub fn expire_session(&self, session: u64) {
        self.lock().expire(session);
    }

    /// Drop every watch held by `session` while keeping the session alive.
    pub fn drop_watches(&self, session: u64) {
        for watchers in self.lock().watchers.values_mut() {
            watchers.retain(|w| w.session != session);
        }
    }

    pub fn live_sessions(&self) -> Vec<u64> {
        let mut sessions: Vec<u64> = self.lock().sessions.keys().copied().collect();
        sessions.sort_unstable();
        sessions
    }

    /// Sorted child names of `parent`.
    pub fn children(&self, parent: &str) -> Vec<String> {
        let mut children = self.lock().children(parent);
        children.sort();
        children
    }

    /// Session owning the ephemeral node at `path`.
    pub fn owner_of(&self, path: &str) -> Option<u64> {
        self.lock().nodes.get(path).copied().flatten()
    }
}

pub struct MemoryConnector {
    coordinator: MemoryCoordinator,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Connection, CoordinationError> {
        if self.coordinator.lock().unreachable {
            std::future::pending::<()>().await;
        }
        self.coordinator.open_session()
    }
}

struct MemorySession {
    id: u64,
    coordinator: MemoryCoordinator,
}

impl MemorySession {
    fn live(&self) -> Result<MutexGuard<'_, State>, CoordinationError> {
        let state = self.coordinator.lock();
        if state.sessions.contains_key(&self.id) {
            Ok(state)
        } else {
            Err(CoordinationError::ConnectionLost)
        }
    }
}

#[async_trait]
impl CoordinationClient for MemorySession {
    fn session_id(&self) -> String {
        format!("{:#x}", self.id)
    }

    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        Ok(self.live()?.nodes.contains_key(path))
    }

    async fn create(&self, path: &str, mode: CreateMode) -> Result<String, CoordinationError> {
        let mut state = self.live()?;
        let parent = parent_of(path).to_string();
        if parent != "/" && !state.nodes.contains_key(&parent) {
            return Err(CoordinationError::NoParent(path.to_string()));
        }

        let (node, owner) = match mode {
            CreateMode::Persistent => (path.to_string(), None),
            CreateMode::EphemeralSequential => {
                let seq = state.sequences.entry(parent.clone()).or_insert(0);
                let node = format!("{}{:010}", path, *seq);
                *seq += 1;
                (node, Some(self.id))
            }
        };
        if state.nodes.contains_key(&node) {
            return Err(CoordinationError::NodeExists(node));
        }

        state.nodes.insert(node.clone(), owner);
        state.notify(&parent);
        Ok(node)
    }

    async fn delete(&self, path: &str) -> Result<(), CoordinationError> {
        let mut state = self.live()?;
        if state.nodes.remove(path).is_none() {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        state.notify(parent_of(path));
        Ok(())
    }

    async fn watch_children(&self, path: &str) -> Result<ChildWatch, CoordinationError> {
        let mut state = self.live()?;
        if !state.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(state.children(path));
        state.watchers.entry(path.to_string()).or_default().push(Watcher {
            session: self.id,
            tx,
        });
        Ok(ChildWatch::new(rx))
    }

    async fn close(&self) {
        self.coordinator.expire_session(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::coordinator::ensure_path;

    #[tokio::test]
    async fn sequential_nodes_are_zero_padded_and_ordered() {
        let coordinator = MemoryCoordinator::new();
        let conn = coordinator.open_session().unwrap();
        ensure_path(conn.client.as_ref(), "/app/members").await.unwrap();

        let first = conn
            .client
            .create("/app/members/m_", CreateMode::EphemeralSequential)
            .await
            .unwrap();
        let second = conn
            .client
            .create("/app/members/m_", CreateMode::EphemeralSequential)
            .await
            .unwrap();

        assert_eq!(first, "/app/members/m_0000000000");
        assert_eq!(second, "/app/members/m_0000000001");
        assert!(first < second);
    }

    #[tokio::test]
    async fn create_requires_parent() {
        let coordinator = MemoryCoordinator::new();
        let conn = coordinator.open_session().unwrap();
        let err = conn
            .client
            .create("/missing/child", CreateMode::Persistent)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::NoParent(_)));
    }

    #[tokio::test]
    async fn expiring_a_session_drops_ephemerals_and_notifies_watchers() {
        let coordinator = MemoryCoordinator::new();
        let a = coordinator.open_session().unwrap();
        let b = coordinator.open_session().unwrap();
        ensure_path(a.client.as_ref(), "/app/members").await.unwrap();

        a.client
            .create("/app/members/m_", CreateMode::EphemeralSequential)
            .await
            .unwrap();
        b.client
            .create("/app/members/m_", CreateMode::EphemeralSequential)
            .await
            .unwrap();

        let mut watch = b.client.watch_children("/app/members").await.unwrap();
        assert_eq!(watch.changed().await.unwrap().len(), 2);

        let a_id = coordinator.live_sessions()[0];
        coordinator.expire_session(a_id);

        assert_eq!(watch.changed().await.unwrap(), vec!["m_0000000001".to_string()]);
        assert!(a.closed.await.is_ok());
        assert!(matches!(
            a.client.exists("/app").await,
            Err(CoordinationError::ConnectionLost)
        ));
        // Persistent nodes survive their creator.
        assert!(b.client.exists("/app/members").await.unwrap());
    }
}
