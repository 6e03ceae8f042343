//! Message-bound interactive sessions.
//!
//! A session binds handlers to one live message for a limited time. Events
//! for the message are routed through a [`SessionRegistry`] into the
//! session's task, which spawns the matching handler for each one. When the
//! session ends (timeout, explicit stop, or the message being deleted) the
//! interactive elements are stripped from the message and the removal
//! handler runs exactly once.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serenity::all::{ChannelId, MessageId, UserId};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{trace, warn};

use crate::error::SessionError;
use crate::Error;

/// Time a session stays active unless configured otherwise.
pub const DEFAULT_SESSION_DURATION: Duration = Duration::from_secs(120);

pub type BoxFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;
pub type EventHandler<T, E> = Arc<dyn Fn(SessionContext<T>, E) -> BoxFuture + Send + Sync>;
pub type RemovalHandler<T> = Arc<dyn Fn(SessionContext<T>) -> BoxFuture + Send + Sync>;

pub(crate) fn event_handler<T, E, F, Fut>(handler: F) -> EventHandler<T, E>
where
    F: Fn(SessionContext<T>, E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Arc::new(move |ctx, event| Box::pin(handler(ctx, event)))
}

pub(crate) fn removal_handler<T, F, Fut>(handler: F) -> RemovalHandler<T>
where
    F: Fn(SessionContext<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(handler(ctx)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl MessageRef {
    pub fn new(channel_id: ChannelId, message_id: MessageId) -> Self {
        Self {
            channel_id,
            message_id,
        }
    }
}

/// Platform operations a session needs to tidy up its message.
#[async_trait]
pub trait SessionSurface: Send + Sync {
    async fn clear_components(&self, message: MessageRef) -> Result<(), Error>;

    async fn clear_reactions(&self, message: MessageRef) -> Result<(), Error>;

    async fn add_reaction(&self, message: MessageRef, emoji: &str) -> Result<(), Error>;

    async fn remove_user_reaction(
        &self,
        message: MessageRef,
        emoji: &str,
        user: UserId,
    ) -> Result<(), Error>;
}

/// A platform event addressed to a session's message.
pub trait SessionEvent: Send + 'static {
    /// Handler key: a component custom id or an emoji name.
    fn key(&self) -> String;

    fn from_bot(&self) -> bool;

    fn user_id(&self) -> Option<UserId>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Timeout,
    Stopped,
    MessageDeleted,
}

enum Signal<E> {
    Event(E),
    MessageDeleted,
}

struct Route<E> {
    generation: u64,
    tx: mpsc::UnboundedSender<Signal<E>>,
}

/// Routes events for live messages to the session bound to them.
pub struct SessionRegistry<E> {
    sessions: Mutex<HashMap<MessageId, Route<E>>>,
    next_generation: AtomicU64,
}

impl<E> Default for SessionRegistry<E> {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }
}

impl<E: SessionEvent> SessionRegistry<E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MessageId, Route<E>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self, message_id: MessageId) -> bool {
        self.lock().contains_key(&message_id)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Hand an event to the session bound to `message_id`. Returns whether
    /// a session received it.
    pub fn dispatch(&self, message_id: MessageId, event: E) -> bool {
        match self.lock().get(&message_id) {
            Some(route) => route.tx.send(Signal::Event(event)).is_ok(),
            None => false,
        }
    }

    /// End the session for a deleted message without touching the message.
    pub fn message_deleted(&self, message_id: MessageId) -> bool {
        match self.lock().get(&message_id) {
            Some(route) => route.tx.send(Signal::MessageDeleted).is_ok(),
            None => false,
        }
    }

    fn bind(
        &self,
        message_id: MessageId,
    ) -> Result<(u64, mpsc::UnboundedReceiver<Signal<E>>), SessionError> {
        let mut sessions = self.lock();
        if sessions.contains_key(&message_id) {
            return Err(SessionError::AlreadyActive);
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        sessions.insert(message_id, Route { generation, tx });
        Ok((generation, rx))
    }

    fn unbind(&self, message_id: MessageId, generation: u64) {
        let mut sessions = self.lock();
        if sessions
            .get(&message_id)
            .is_some_and(|route| route.generation == generation)
        {
            sessions.remove(&message_id);
        }
    }
}

/// Passed to every handler of a session.
pub struct SessionContext<T> {
    pub message: MessageRef,
    pub props: Arc<T>,
    stop: Arc<Notify>,
}

impl<T> Clone for SessionContext<T> {
    fn clone(&self) -> Self {
        Self {
            message: self.message,
            props: Arc::clone(&self.props),
            stop: Arc::clone(&self.stop),
        }
    }
}

impl<T> SessionContext<T> {
    /// End the session as soon as the current event has been handed off.
    pub fn stop(&self) {
        self.stop.notify_one();
    }
}

/// Handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    message: MessageRef,
    stop: Arc<Notify>,
    ended: watch::Receiver<Option<EndReason>>,
}

impl SessionHandle {
    pub fn message(&self) -> MessageRef {
        self.message
    }

    pub fn stop(&self) {
        self.stop.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.ended.borrow().is_some()
    }

    /// Wait until cleanup and the removal handler have completed.
    pub async fn finished(&self) -> EndReason {
        let mut ended = self.ended.clone();
        let reason = match ended.wait_for(|reason| reason.is_some()).await {
            Ok(reason) => (*reason).unwrap_or(EndReason::Stopped),
            Err(_) => EndReason::Stopped,
        };
        reason
    }
}

/// What to strip from the message when the session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cleanup {
    Components,
    Reactions,
}

pub(crate) struct SessionSpec<T, E> {
    pub kind: &'static str,
    pub message: MessageRef,
    pub props: Arc<T>,
    pub handlers: HashMap<String, EventHandler<T, E>>,
    pub removal: Option<RemovalHandler<T>>,
    pub duration: Duration,
    pub cleanup: Cleanup,
    /// Remove the triggering user's reaction once a handler has run.
    pub remove_user_reaction: bool,
}

/// Bind `spec` to its message and start the session task.
pub(crate) fn start<T, E>(
    registry: Arc<SessionRegistry<E>>,
    surface: Arc<dyn SessionSurface>,
    spec: SessionSpec<T, E>,
) -> Result<SessionHandle, SessionError>
where
    T: Send + Sync + 'static,
    E: SessionEvent,
{
    let (generation, rx) = registry.bind(spec.message.message_id)?;
    let stop = Arc::new(Notify::new());
    let (ended_tx, ended_rx) = watch::channel(None);

    let handle = SessionHandle {
        message: spec.message,
        stop: Arc::clone(&stop),
        ended: ended_rx,
    };

    trace!("{} created for message {}", spec.kind, spec.message.message_id);
    tokio::spawn(async move {
        let message_id = spec.message.message_id;
        let reason = run(spec, Arc::clone(&surface), rx, stop, &registry, generation).await;
        let _ = ended_tx.send(Some(reason));
        trace!("Session for message {} ended: {:?}", message_id, reason);
    });

    Ok(handle)
}

async fn run<T, E>(
    spec: SessionSpec<T, E>,
    surface: Arc<dyn SessionSurface>,
    mut rx: mpsc::UnboundedReceiver<Signal<E>>,
    stop: Arc<Notify>,
    registry: &SessionRegistry<E>,
    generation: u64,
) -> EndReason
where
    T: Send + Sync + 'static,
    E: SessionEvent,
{
    let ctx = SessionContext {
        message: spec.message,
        props: spec.props,
        stop: Arc::clone(&stop),
    };

    let kind = spec.kind;
    let deadline = tokio::time::sleep(spec.duration);
    tokio::pin!(deadline);

    let reason = loop {
        tokio::select! {
            _ = &mut deadline => break EndReason::Timeout,
            _ = stop.notified() => break EndReason::Stopped,
            signal = rx.recv() => match signal {
                Some(Signal::Event(event)) => {
                    if event.from_bot() {
                        continue;
                    }
                    let key = event.key();
                    let Some(handler) = spec.handlers.get(&key) else {
                        continue;
                    };
                    let handler = Arc::clone(handler);
                    let ctx = ctx.clone();
                    let user = event.user_id();
                    let surface = Arc::clone(&surface);
                    let remove_reaction = spec.remove_user_reaction;
                    tokio::spawn(async move {
                        let message = ctx.message;
                        if let Err(e) = handler(ctx, event).await {
                            warn!("{} handler '{}' failed: {}", kind, key, e);
                        }
                        if let (true, Some(user)) = (remove_reaction, user) {
                            if let Err(e) = surface.remove_user_reaction(message, &key, user).await {
                                warn!("Failed to remove reaction '{}' by {}: {}", key, user, e);
                            }
                        }
                    });
                }
                Some(Signal::MessageDeleted) => break EndReason::MessageDeleted,
                None => break EndReason::Stopped,
            },
        }
    };

    registry.unbind(spec.message.message_id, generation);

    if reason != EndReason::MessageDeleted {
        let cleared = match spec.cleanup {
            Cleanup::Components => surface.clear_components(spec.message).await,
            Cleanup::Reactions => surface.clear_reactions(spec.message).await,
        };
        if let Err(e) = cleared {
            warn!(
                "{} failed to clean up message {}: {}",
                spec.kind, spec.message.message_id, e
            );
        }
    }

    if let Some(removal) = spec.removal {
        if let Err(e) = removal(ctx).await {
            warn!("{} removal handler failed: {}", spec.kind, e);
        }
    }

    reason
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SurfaceCall {
        ClearComponents(MessageId),
        ClearReactions(MessageId),
        AddReaction(MessageId, String),
        RemoveUserReaction(MessageId, String, UserId),
    }

    /// Surface recording every call.
    #[derive(Default)]
    pub struct RecordingSurface {
        pub calls: Mutex<Vec<SurfaceCall>>,
        pub rejected_emoji: Option<String>,
    }

    impl RecordingSurface {
        pub fn calls(&self) -> Vec<SurfaceCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionSurface for RecordingSurface {
        async fn clear_components(&self, message: MessageRef) -> Result<(), Error> {
            self.calls
                .lock()
                .unwrap()
                .push(SurfaceCall::ClearComponents(message.message_id));
            Ok(())
        }

        async fn clear_reactions(&self, message: MessageRef) -> Result<(), Error> {
            self.calls
                .lock()
                .unwrap()
                .push(SurfaceCall::ClearReactions(message.message_id));
            Ok(())
        }

        async fn add_reaction(&self, message: MessageRef, emoji: &str) -> Result<(), Error> {
            if self.rejected_emoji.as_deref() == Some(emoji) {
                return Err("Unknown Emoji".into());
            }
            self.calls
                .lock()
                .unwrap()
                .push(SurfaceCall::AddReaction(message.message_id, emoji.to_string()));
            Ok(())
        }

        async fn remove_user_reaction(
            &self,
            message: MessageRef,
            emoji: &str,
            user: UserId,
        ) -> Result<(), Error> {
            self.calls.lock().unwrap().push(SurfaceCall::RemoveUserReaction(
                message.message_id,
                emoji.to_string(),
                user,
            ));
            Ok(())
        }
    }

    /// A button press or reaction.
    pub struct FakeEvent {
        pub key: String,
        pub bot: bool,
        pub user: UserId,
    }

    impl FakeEvent {
        pub fn new(key: &str) -> Self {
            Self {
                key: key.to_string(),
                bot: false,
                user: UserId::new(42),
            }
        }
    }

    impl SessionEvent for FakeEvent {
        fn key(&self) -> String {
            self.key.clone()
        }

        fn from_bot(&self) -> bool {
            self.bot
        }

        fn user_id(&self) -> Option<UserId> {
            Some(self.user)
        }
    }

    pub fn message(id: u64) -> MessageRef {
        MessageRef::new(ChannelId::new(1), MessageId::new(id))
    }

    /// Let spawned tasks run to completion.
    pub async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_spec(
        message: MessageRef,
        hits: Arc<AtomicUsize>,
        removals: Arc<AtomicUsize>,
    ) -> SessionSpec<(), FakeEvent> {
        let mut handlers = HashMap::new();
        handlers.insert(
            "go".to_string(),
            event_handler(move |_ctx: SessionContext<()>, _event: FakeEvent| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        SessionSpec {
            kind: "Test session",
            message,
            props: Arc::new(()),
            handlers,
            removal: Some(removal_handler(move |_ctx: SessionContext<()>| {
                let removals = Arc::clone(&removals);
                async move {
                    removals.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })),
            duration: Duration::from_secs(120),
            cleanup: Cleanup::Components,
            remove_user_reaction: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_handle_clone_observes_the_end() {
        let registry = Arc::new(SessionRegistry::new());
        let surface = Arc::new(RecordingSurface::default());
        let removals = Arc::new(AtomicUsize::new(0));

        let handle = start(
            registry,
            surface,
            counting_spec(message(3), Arc::new(AtomicUsize::new(0)), removals.clone()),
        )
        .unwrap();
        let waiter = handle.clone();
        let waiting = tokio::spawn(async move { waiter.finished().await });

        handle.stop();
        assert_eq!(waiting.await.unwrap(), EndReason::Stopped);
        assert!(handle.is_finished());
        // Already ended: resolves immediately with the same reason.
        assert_eq!(handle.finished().await, EndReason::Stopped);
        assert_eq!(removals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cleans_up_and_runs_removal_once() {
        let registry = Arc::new(SessionRegistry::new());
        let surface = Arc::new(RecordingSurface::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let removals = Arc::new(AtomicUsize::new(0));

        let handle = start(
            registry.clone(),
            surface.clone(),
            counting_spec(message(7), hits.clone(), removals.clone()),
        )
        .unwrap();

        assert!(registry.dispatch(MessageId::new(7), FakeEvent::new("go")));
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert_eq!(handle.finished().await, EndReason::Timeout);
        assert_eq!(removals.load(Ordering::SeqCst), 1);
        assert_eq!(surface.calls(), vec![SurfaceCall::ClearComponents(MessageId::new(7))]);
        assert!(!registry.is_active(MessageId::new(7)));

        // Events after the end go nowhere.
        assert!(!registry.dispatch(MessageId::new(7), FakeEvent::new("go")));
        handle.stop();
        settle().await;
        assert_eq!(removals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_message_is_not_edited() {
        let registry = Arc::new(SessionRegistry::new());
        let surface = Arc::new(RecordingSurface::default());
        let removals = Arc::new(AtomicUsize::new(0));

        let handle = start(
            registry.clone(),
            surface.clone(),
            counting_spec(message(8), Arc::default(), removals.clone()),
        )
        .unwrap();

        assert!(registry.message_deleted(MessageId::new(8)));
        assert_eq!(handle.finished().await, EndReason::MessageDeleted);
        assert!(surface.calls().is_empty());
        assert_eq!(removals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bot_events_and_unknown_keys_are_ignored() {
        let registry = Arc::new(SessionRegistry::new());
        let surface = Arc::new(RecordingSurface::default());
        let hits = Arc::new(AtomicUsize::new(0));

        let handle = start(
            registry.clone(),
            surface,
            counting_spec(message(9), hits.clone(), Arc::default()),
        )
        .unwrap();

        let mut from_bot = FakeEvent::new("go");
        from_bot.bot = true;
        registry.dispatch(MessageId::new(9), from_bot);
        registry.dispatch(MessageId::new(9), FakeEvent::new("other"));
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        handle.stop();
        assert_eq!(handle.finished().await, EndReason::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn one_session_per_message() {
        let registry = Arc::new(SessionRegistry::new());
        let surface: Arc<dyn SessionSurface> = Arc::new(RecordingSurface::default());

        let first = start(
            registry.clone(),
            surface.clone(),
            counting_spec(message(10), Arc::default(), Arc::default()),
        )
        .unwrap();
        let second = start(
            registry.clone(),
            surface.clone(),
            counting_spec(message(10), Arc::default(), Arc::default()),
        );
        assert_eq!(second.err(), Some(SessionError::AlreadyActive));

        first.stop();
        first.finished().await;
        assert!(start(
            registry,
            surface,
            counting_spec(message(10), Arc::default(), Arc::default()),
        )
        .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn handler_can_stop_its_session() {
        let registry = Arc::new(SessionRegistry::new());
        let surface = Arc::new(RecordingSurface::default());

        let mut handlers = HashMap::new();
        handlers.insert(
            "close".to_string(),
            event_handler(|ctx: SessionContext<()>, _event: FakeEvent| async move {
                ctx.stop();
                Ok(())
            }),
        );
        let spec = SessionSpec {
            kind: "Test session",
            message: message(11),
            props: Arc::new(()),
            handlers,
            removal: None,
            duration: Duration::from_secs(120),
            cleanup: Cleanup::Reactions,
            remove_user_reaction: false,
        };
        let handle = start(registry.clone(), surface.clone(), spec).unwrap();

        registry.dispatch(MessageId::new(11), FakeEvent::new("close"));
        assert_eq!(handle.finished().await, EndReason::Stopped);
        assert_eq!(surface.calls(), vec![SurfaceCall::ClearReactions(MessageId::new(11))]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_events_each_get_a_handler() {
        let registry = Arc::new(SessionRegistry::new());
        let surface = Arc::new(RecordingSurface::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = start(
            registry.clone(),
            surface,
            counting_spec(message(12), hits.clone(), Arc::default()),
        )
        .unwrap();

        for _ in 0..5 {
            registry.dispatch(MessageId::new(12), FakeEvent::new("go"));
        }
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        handle.stop();
        handle.finished().await;
    }
}
