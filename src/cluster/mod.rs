//! Cluster membership and leader election.
//!
//! Every instance of the bot joins a shared members path with an ephemeral
//! sequential node. An instance's rank is the position of its node among the
//! lexicographically sorted siblings; rank 0 is the leader.

pub mod coordinator;
pub mod memory;
pub mod zookeeper;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dependency::Dependency;
use crate::error::CoordinationError;
use coordinator::{ensure_path, node_name, ChildWatch, Connection, Connector, CoordinationClient, CreateMode};

/// Fallback connect timeout and fixed reconnect backoff.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub enabled: bool,
    /// Prefix for every node this application creates.
    pub path_prefix: String,
    /// Request timeout of the coordination client; connect attempts get twice this.
    pub timeout: Option<Duration>,
    pub reconnect_delay: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path_prefix: "/bot".to_string(),
            timeout: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl ClusterConfig {
    fn members_path(&self) -> String {
        format!("{}/members", self.path_prefix.trim_end_matches('/'))
    }

    fn connect_timeout(&self) -> Duration {
        self.timeout
            .map(|t| t * 2)
            .unwrap_or(self.reconnect_delay)
    }
}

/// This instance's view of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    /// Rank among live members, `None` while unknown or disconnected.
    pub index: Option<usize>,
    pub count: usize,
    /// Name of this instance's membership node.
    pub node: Option<String>,
}

impl Membership {
    fn solo() -> Self {
        Self {
            index: Some(0),
            count: 1,
            node: None,
        }
    }

    fn unknown() -> Self {
        Self {
            index: None,
            count: 0,
            node: None,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.index == Some(0)
    }
}

impl std::fmt::Display for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.map(|i| i as i64).unwrap_or(-1);
        write!(f, "membership_index={}, member_count={}", index, self.count)
    }
}

/// Tracks this process's position in a fleet of identical processes.
pub struct ClusterManager {
    config: ClusterConfig,
    membership: watch::Sender<Membership>,
    dependency: Dependency,
    /// Current coordination session; guarded so overlapping calls cannot
    /// create two clients.
    client: Mutex<Option<Arc<dyn CoordinationClient>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl ClusterManager {
    pub fn new(config: ClusterConfig) -> Self {
        let initial = if config.enabled {
            Membership::unknown()
        } else {
            Membership::solo()
        };
        let (membership, _) = watch::channel(initial);
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            membership,
            dependency: Dependency::new("ClusterManager"),
            client: Mutex::new(None),
            task: Mutex::new(None),
            shutdown,
        }
    }

    /// A manager for an unclustered deployment: always leader, never connects.
    pub fn solo() -> Self {
        Self::new(ClusterConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Start membership tracking.
    ///
    /// With clustering disabled this only resolves the readiness dependency.
    pub async fn init(self: &Arc<Self>, connector: Arc<dyn Connector>) {
        if !self.config.enabled {
            self.dependency.ready();
            return;
        }

        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("Cluster: attempted double-initialisation of coordination client");
            return;
        }
        let manager = Arc::clone(self);
        *task = Some(tokio::spawn(async move { manager.run(connector).await }));
    }

    /// Leave the cluster and stop reconnecting.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                error!("Cluster: membership task failed: {}", e);
            }
        }
        if let Some(client) = self.client.lock().await.take() {
            client.close().await;
        }
        if self.config.enabled {
            self.membership.send_replace(Membership::unknown());
        }
    }

    /// Resolves once this instance's rank is first known.
    pub fn dependency(&self) -> &Dependency {
        &self.dependency
    }

    pub fn is_leader(&self) -> bool {
        self.membership.borrow().is_leader()
    }

    pub fn membership_index(&self) -> Option<usize> {
        self.membership.borrow().index
    }

    pub fn member_count(&self) -> usize {
        self.membership.borrow().count
    }

    pub fn membership(&self) -> Membership {
        self.membership.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Membership> {
        self.membership.subscribe()
    }

    async fn run(&self, connector: Arc<dyn Connector>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut member_node: Option<String> = None;
        let connect_timeout = self.config.connect_timeout();

        loop {
            let attempt = tokio::select! {
                attempt = tokio::time::timeout(connect_timeout, connector.connect()) => {
                    attempt.unwrap_or(Err(CoordinationError::Timeout))
                }
                _ = shutdown.changed() => return,
            };

            let connection = match attempt {
                Ok(connection) => connection,
                Err(e) => {
                    error!(
                        "Cluster: connection attempt failed (timeout {:?}), discarding client: {}",
                        connect_timeout, e
                    );
                    if !self.backoff(&mut shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            let Connection { client, mut closed } = connection;
            info!("Cluster: coordination service connected");
            debug!("Cluster: received session id {}", client.session_id());
            {
                let mut slot = self.client.lock().await;
                if slot.is_some() {
                    warn!("Cluster: attempted double-initialisation of coordination client");
                    client.close().await;
                    return;
                }
                *slot = Some(Arc::clone(&client));
            }

            match self.join(client.as_ref(), &mut member_node).await {
                Ok(mut watch) => loop {
                    tokio::select! {
                        children = watch.changed() => match children {
                            Some(children) => self.on_members_change(member_node.as_deref(), children),
                            None => {
                                warn!("Cluster: membership watch ended, closing session");
                                client.close().await;
                                break;
                            }
                        },
                        _ = &mut closed => break,
                        _ = shutdown.changed() => {
                            client.close().await;
                            self.client.lock().await.take();
                            return;
                        }
                    }
                },
                Err(e) => {
                    error!("Cluster: failed to join cluster members: {}", e);
                    client.close().await;
                }
            }

            self.client.lock().await.take();
            let previous = self.membership.send_replace(Membership {
                node: member_node.clone(),
                ..Membership::unknown()
            });
            error!(
                "Cluster: coordination connection closed (was {}), reconnecting in {:?}",
                previous, self.config.reconnect_delay
            );
            if !self.backoff(&mut shutdown).await {
                return;
            }
        }
    }

    /// Wait out the fixed reconnect delay. Returns `false` on shutdown.
    async fn backoff(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.config.reconnect_delay) => !*shutdown.borrow(),
            _ = shutdown.changed() => false,
        }
    }

    /// Ensure the members path exists, replace any stale node from a previous
    /// session, register a fresh node and watch the member set.
    async fn join(
        &self,
        client: &dyn CoordinationClient,
        member_node: &mut Option<String>,
    ) -> Result<ChildWatch, CoordinationError> {
        let members = self.config.members_path();
        ensure_path(client, &members).await?;

        if let Some(previous) = member_node.as_deref() {
            let stale = format!("{}/{}", members, previous);
            if client.exists(&stale).await? {
                warn!("Cluster: reconnecting, removing old membership node {}", previous);
                match client.delete(&stale).await {
                    Ok(()) | Err(CoordinationError::NoNode(_)) => {}
                    Err(e) => return Err(e),
                }
            } else {
                warn!("Cluster: reconnecting, no old membership node to clean up");
            }
        }

        let created = client
            .create(&format!("{}/m_", members), CreateMode::EphemeralSequential)
            .await?;
        let node = node_name(&created).to_string();
        debug!("Cluster: joined members as {}", node);
        *member_node = Some(node);

        client.watch_children(&members).await
    }

    fn on_members_change(&self, member_node: Option<&str>, mut children: Vec<String>) {
        let Some(node) = member_node else {
            return;
        };
        if children.is_empty() {
            return;
        }

        // Sequential suffixes are fixed width, so lexicographic order is join order.
        children.sort();
        let updated = Membership {
            index: children.iter().position(|c| c == node),
            count: children.len(),
            node: Some(node.to_string()),
        };

        let changed = self.membership.send_if_modified(|current| {
            if *current == updated {
                false
            } else {
                *current = updated.clone();
                true
            }
        });
        if changed {
            info!("Cluster: status updated: {}", updated);
        }

        if updated.index.is_some() {
            self.dependency.ready();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memory::MemoryCoordinator;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn clustered() -> ClusterConfig {
        ClusterConfig {
            enabled: true,
            path_prefix: "/test".to_string(),
            timeout: Some(Duration::from_secs(5)),
            reconnect_delay: Duration::from_secs(15),
        }
    }

    async fn start_member(coordinator: &MemoryCoordinator) -> Arc<ClusterManager> {
        let manager = Arc::new(ClusterManager::new(clustered()));
        manager.init(Arc::new(coordinator.connector())).await;
        manager.dependency().wait().await;
        manager
    }

    async fn wait_for_index(manager: &ClusterManager, index: Option<usize>) {
        let mut rx = manager.subscribe();
        rx.wait_for(|m| m.index == index).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_one_leader_which_sorts_first() {
        let coordinator = MemoryCoordinator::new();
        let mut members = Vec::new();
        for _ in 0..4 {
            members.push(start_member(&coordinator).await);
        }
        for member in &members {
            let mut rx = member.subscribe();
            rx.wait_for(|m| m.count == 4).await.unwrap();
        }

        let leaders: Vec<_> = members.iter().filter(|m| m.is_leader()).collect();
        assert_eq!(leaders.len(), 1);

        let first = coordinator.children("/test/members")[0].clone();
        assert_eq!(leaders[0].membership().node, Some(first));

        let mut ranks: Vec<usize> = members.iter().filter_map(|m| m.membership_index()).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn rank_moves_up_when_leader_leaves() {
        let coordinator = MemoryCoordinator::new();
        let a = start_member(&coordinator).await;
        let b = start_member(&coordinator).await;
        let c = start_member(&coordinator).await;
        let mut rx = b.subscribe();
        rx.wait_for(|m| m.count == 3).await.unwrap();
        assert_eq!(b.membership_index(), Some(1));

        let sessions_before = coordinator.live_sessions();
        let b_node = b.membership().node;

        a.shutdown().await;
        wait_for_index(&b, Some(0)).await;
        wait_for_index(&c, Some(1)).await;

        assert!(b.is_leader());
        assert_eq!(b.member_count(), 2);
        // Same session and node: no reconnect was needed.
        assert_eq!(b.membership().node, b_node);
        assert!(coordinator
            .live_sessions()
            .iter()
            .all(|s| sessions_before.contains(s)));
    }

    struct CountingConnector(AtomicUsize);

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self) -> Result<Connection, CoordinationError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(CoordinationError::Other("unused".into()))
        }
    }

    #[tokio::test]
    async fn solo_mode_is_always_leader_without_connecting() {
        let manager = Arc::new(ClusterManager::solo());
        assert!(manager.is_leader());

        let connector = Arc::new(CountingConnector(AtomicUsize::new(0)));
        manager.init(connector.clone()).await;
        manager.dependency().wait().await;

        assert!(manager.is_leader());
        assert_eq!(manager.member_count(), 1);
        assert_eq!(manager.membership_index(), Some(0));
        assert_eq!(connector.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_session_loss() {
        let coordinator = MemoryCoordinator::new();
        let a = start_member(&coordinator).await;
        let b = start_member(&coordinator).await;
        wait_for_index(&b, Some(1)).await;
        let old_node = b.membership().node.unwrap();

        let b_session = coordinator
            .owner_of(&format!("/test/members/{}", old_node))
            .unwrap();
        coordinator.expire_session(b_session);

        wait_for_index(&b, None).await;
        assert!(!b.is_leader());

        wait_for_index(&b, Some(1)).await;
        let new_node = b.membership().node.unwrap();
        assert_ne!(new_node, old_node);
        assert_eq!(coordinator.children("/test/members").len(), 2);
        assert!(a.is_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn lost_watch_closes_session_before_reconnecting() {
        let coordinator = MemoryCoordinator::new();
        let a = start_member(&coordinator).await;
        let old_session = coordinator.live_sessions()[0];

        coordinator.drop_watches(old_session);
        wait_for_index(&a, None).await;
        assert!(!coordinator.live_sessions().contains(&old_session));
        assert!(coordinator.children("/test/members").is_empty());

        wait_for_index(&a, Some(0)).await;
        let sessions = coordinator.live_sessions();
        assert_eq!(sessions.len(), 1);
        assert_ne!(sessions[0], old_session);
        assert_eq!(coordinator.children("/test/members").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_retries_until_reachable() {
        let coordinator = MemoryCoordinator::new();
        coordinator.set_reachable(false);

        let manager = Arc::new(ClusterManager::new(clustered()));
        manager.init(Arc::new(coordinator.connector())).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!manager.dependency().is_ready());
        assert_eq!(manager.membership_index(), None);

        coordinator.set_reachable(true);
        manager.dependency().wait().await;
        assert!(manager.is_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn double_init_is_ignored() {
        let coordinator = MemoryCoordinator::new();
        let manager = start_member(&coordinator).await;
        manager.init(Arc::new(coordinator.connector())).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(coordinator.live_sessions().len(), 1);
        assert_eq!(manager.member_count(), 1);
    }

    #[test]
    fn sorted_rank_ignores_delivery_order() {
        let manager = ClusterManager::new(clustered());
        manager.on_members_change(
            Some("m_0000000002"),
            vec![
                "m_0000000010".to_string(),
                "m_0000000002".to_string(),
                "m_0000000001".to_string(),
            ],
        );
        assert_eq!(manager.membership_index(), Some(1));
        assert_eq!(manager.member_count(), 3);
        assert!(manager.dependency().is_ready());
    }

    #[test]
    fn empty_child_set_keeps_previous_state() {
        let manager = ClusterManager::new(clustered());
        manager.on_members_change(Some("m_0000000000"), Vec::new());
        assert_eq!(manager.membership_index(), None);
        assert!(!manager.dependency().is_ready());
    }
}
