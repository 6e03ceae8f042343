//! ZooKeeper-backed coordination sessions.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use zookeeper_client as zk;

use super::coordinator::{ChildWatch, Connection, Connector, CoordinationClient, CreateMode};
use crate::error::CoordinationError;

/// Default ensemble connect string.
pub const DEFAULT_CONNECT: &str = "127.0.0.1:2181";

/// Opens ZooKeeper sessions against an ensemble.
pub struct ZkConnector {
    connect: String,
    session_timeout: Option<Duration>,
}

impl ZkConnector {
    /// `connect` is a comma-separated `host:port` list, optionally followed
    /// by a chroot path.
    pub fn new(connect: impl Into<String>, session_timeout: Option<Duration>) -> Self {
        Self {
            connect: connect.into(),
            session_timeout,
        }
    }
}

fn coordination_error(path: &str, e: zk::Error) -> CoordinationError {
    match e {
        zk::Error::NodeExists => CoordinationError::NodeExists(path.to_string()),
        zk::Error::NoNode => CoordinationError::NoNode(path.to_string()),
        zk::Error::ConnectionLoss | zk::Error::SessionExpired | zk::Error::ClientClosed => {
            CoordinationError::ConnectionLost
        }
        zk::Error::Timeout => CoordinationError::Timeout,
        e => CoordinationError::Other(e.to_string()),
    }
}

fn create_mode(mode: CreateMode) -> zk::CreateMode {
    match mode {
        CreateMode::Persistent => zk::CreateMode::Persistent,
        CreateMode::EphemeralSequential => zk::CreateMode::EphemeralSequential,
    }
}

#[async_trait]
impl Connector for ZkConnector {
    async fn connect(&self) -> Result<Connection, CoordinationError> {
        let mut connector = zk::Client::connector();
        if let Some(timeout) = self.session_timeout {
            connector.session_timeout(timeout);
        }
        let client = connector
            .connect(&self.connect)
            .await
            .map_err(|e| coordination_error(&self.connect, e))?;

        // The session ends for good on expiry, auth failure or close; the
        // client reconnects transparently on plain disconnects.
        let (closed_tx, closed) = oneshot::channel();
        let mut state = client.state_watcher();
        tokio::spawn(async move {
            loop {
                let current = state.changed().await;
                debug!("ZooKeeper: session state {:?}", current);
                if current.is_terminated() {
                    break;
                }
            }
            let _ = closed_tx.send(());
        });

        Ok(Connection {
            client: Arc::new(ZkSession {
                id: client.session_id().to_string(),
                client: Mutex::new(Some(Arc::new(client))),
            }),
            closed,
        })
    }
}

/// One ZooKeeper session. Dropping the last client handle closes it.
struct ZkSession {
    id: String,
    client: Mutex<Option<Arc<zk::Client>>>,
}

impl ZkSession {
    fn client(&self) -> Result<Arc<zk::Client>, CoordinationError> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CoordinationError::ConnectionLost)
    }
}

/// Re-arm a one-shot child watch after every change and forward each child
/// set. Holds the client weakly so a closed session is not kept alive.
async fn forward_children(
    client: Weak<zk::Client>,
    path: String,
    mut watcher: zk::OneshotWatcher,
    tx: mpsc::UnboundedSender<Vec<String>>,
) {
    loop {
        let event = watcher.changed().await;
        if event.event_type == zk::EventType::Session {
            debug!("ZooKeeper: child watch on {} ended: {:?}", path, event.session_state);
            return;
        }

        let Some(client) = client.upgrade() else {
            return;
        };
        let result = client.get_and_watch_children(&path).await;
        drop(client);
        match result {
            Ok((children, _, next)) => {
                if tx.send(children).is_err() {
                    return;
                }
                watcher = next;
            }
            Err(e) => {
                warn!("ZooKeeper: failed to re-arm child watch on {}: {}", path, e);
                return;
            }
        }
    }
}

#[async_trait]
impl CoordinationClient for ZkSession {
    fn session_id(&self) -> String {
        self.id.clone()
    }

    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        let stat = self
            .client()?
            .check_stat(path)
            .await
            .map_err(|e| coordination_error(path, e))?;
        Ok(stat.is_some())
    }

    async fn create(&self, path: &str, mode: CreateMode) -> Result<String, CoordinationError> {
        let client = self.client()?;
        let options = create_mode(mode).with_acls(zk::Acls::anyone_all());
        let (_, sequence) = client
            .create(path, &[], &options)
            .await
            .map_err(|e| coordination_error(path, e))?;
        Ok(match mode {
            CreateMode::Persistent => path.to_string(),
            CreateMode::EphemeralSequential => format!("{}{}", path, sequence),
        })
    }

    async fn delete(&self, path: &str) -> Result<(), CoordinationError> {
        self.client()?
            .delete(path, None)
            .await
            .map_err(|e| coordination_error(path, e))
    }

    async fn watch_children(&self, path: &str) -> Result<ChildWatch, CoordinationError> {
        let client = self.client()?;
        let (children, _, watcher) = client
            .get_and_watch_children(path)
            .await
            .map_err(|e| coordination_error(path, e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(children);
        tokio::spawn(forward_children(
            Arc::downgrade(&client),
            path.to_string(),
            watcher,
            tx,
        ));
        Ok(ChildWatch::new(rx))
    }

    async fn close(&self) {
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if client.is_some() {
            debug!("ZooKeeper: closing session {}", self.id);
        }
    }
}
