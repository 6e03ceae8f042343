//! One-shot readiness gates used to sequence service startup.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

/// A named readiness gate that resolves exactly once.
///
/// Clones share the same state, so a component can hand a clone to every
/// service that needs to wait on it.
#[derive(Clone)]
pub struct Dependency {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    ready: watch::Sender<bool>,
}

impl Dependency {
    pub fn new(name: impl Into<String>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                ready,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Mark the dependency as ready, waking every waiter.
    ///
    /// Calling this again after the first time does nothing.
    pub fn ready(&self) {
        let changed = self.inner.ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
        if changed {
            trace!("Dependency '{}': ready state triggered", self.inner.name);
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Wait until [`Dependency::ready`] has been called.
    pub async fn wait(&self) {
        let mut rx = self.inner.ready.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Wait until all of the given dependencies are ready.
    pub async fn wait_all(dependencies: &[&Dependency]) {
        for dependency in dependencies {
            dependency.wait().await;
        }
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("name", &self.inner.name)
            .field("ready", &self.is_ready())
            .finish()
    }
}
