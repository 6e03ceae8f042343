//! Emoji reactions bound to one message.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::session::{
    self, event_handler, removal_handler, Cleanup, EventHandler, MessageRef, RemovalHandler,
    SessionContext, SessionEvent, SessionHandle, SessionRegistry, SessionSpec, SessionSurface,
};
use crate::error::SessionError;
use crate::Error;

/// Handlers for reactions on a message, keyed by emoji name.
///
/// The reacting user's reaction is removed once its handler has run, so the
/// same emoji can be used again.
pub struct Reactable<T, E> {
    props: Arc<T>,
    emojis: Vec<String>,
    handlers: HashMap<String, EventHandler<T, E>>,
    removal: Option<RemovalHandler<T>>,
}

impl<T, E> Reactable<T, E>
where
    T: Send + Sync + 'static,
    E: SessionEvent,
{
    pub fn new(props: T) -> Self {
        Self {
            props: Arc::new(props),
            emojis: Vec::new(),
            handlers: HashMap::new(),
            removal: None,
        }
    }

    pub fn props(&self) -> &Arc<T> {
        &self.props
    }

    pub fn register<F, Fut>(&mut self, emoji: impl Into<String>, handler: F)
    where
        F: Fn(SessionContext<T>, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let emoji = emoji.into();
        if !self.emojis.contains(&emoji) {
            self.emojis.push(emoji.clone());
        }
        self.handlers.insert(emoji, event_handler(handler));
    }

    pub fn on_removal<F, Fut>(&mut self, handler: F)
    where
        F: Fn(SessionContext<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.removal = Some(removal_handler(handler));
    }

    /// Start handling reactions on `message` for `duration`.
    ///
    /// With `add_template_reactions` every registered emoji is added to the
    /// message in registration order. An emoji the platform rejects ends the
    /// session and is reported as [`SessionError::UnknownReaction`].
    pub async fn activate(
        self,
        registry: Arc<SessionRegistry<E>>,
        surface: Arc<dyn SessionSurface>,
        message: MessageRef,
        add_template_reactions: bool,
        duration: Duration,
    ) -> Result<SessionHandle, SessionError> {
        let emojis = self.emojis;
        let handle = session::start(
            registry,
            Arc::clone(&surface),
            SessionSpec {
                kind: "Reactable",
                message,
                props: self.props,
                handlers: self.handlers,
                removal: self.removal,
                duration,
                cleanup: Cleanup::Reactions,
                remove_user_reaction: true,
            },
        )?;

        if add_template_reactions {
            for emoji in &emojis {
                if let Err(e) = surface.add_reaction(message, emoji).await {
                    debug!("Failed to add template reaction {}: {}", emoji, e);
                    handle.stop();
                    return Err(SessionError::UnknownReaction(emoji.clone()));
                }
            }
        }

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::session::testing::*;
    use crate::ui::session::EndReason;
    use serenity::all::{MessageId, UserId};
    use std::sync::Mutex;

    type Log = Mutex<Vec<String>>;

    fn reactable() -> Reactable<Log, FakeEvent> {
        let mut reactable = Reactable::new(Mutex::new(Vec::new()));
        reactable.register("👍", |ctx: SessionContext<Log>, _event| async move {
            ctx.props.lock().unwrap().push("up".to_string());
            Ok(())
        });
        reactable.register("👎", |ctx: SessionContext<Log>, _event| async move {
            ctx.props.lock().unwrap().push("down".to_string());
            Ok(())
        });
        reactable
    }

    #[tokio::test(start_paused = true)]
    async fn template_reactions_are_added_in_order() {
        let registry = Arc::new(SessionRegistry::new());
        let surface = Arc::new(RecordingSurface::default());

        let handle = reactable()
            .activate(
                registry,
                surface.clone(),
                message(5),
                true,
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        assert_eq!(
            surface.calls(),
            vec![
                SurfaceCall::AddReaction(MessageId::new(5), "👍".to_string()),
                SurfaceCall::AddReaction(MessageId::new(5), "👎".to_string()),
            ]
        );
        assert_eq!(handle.finished().await, EndReason::Timeout);
        assert_eq!(
            surface.calls().last(),
            Some(&SurfaceCall::ClearReactions(MessageId::new(5)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reaction_is_dispatched_then_removed() {
        let registry = Arc::new(SessionRegistry::new());
        let surface = Arc::new(RecordingSurface::default());
        let reactable = reactable();
        let log = Arc::clone(reactable.props());

        let handle = reactable
            .activate(
                registry.clone(),
                surface.clone(),
                message(6),
                false,
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        registry.dispatch(MessageId::new(6), FakeEvent::new("👎"));
        settle().await;

        assert_eq!(*log.lock().unwrap(), vec!["down".to_string()]);
        assert_eq!(
            surface.calls(),
            vec![SurfaceCall::RemoveUserReaction(
                MessageId::new(6),
                "👎".to_string(),
                UserId::new(42)
            )]
        );
        handle.stop();
        handle.finished().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_emoji_is_reported() {
        let registry = Arc::new(SessionRegistry::new());
        let surface = Arc::new(RecordingSurface {
            rejected_emoji: Some("👎".to_string()),
            ..Default::default()
        });

        let err = reactable()
            .activate(
                registry.clone(),
                surface,
                message(7),
                true,
                Duration::from_secs(30),
            )
            .await
            .err();
        assert_eq!(err, Some(SessionError::UnknownReaction("👎".to_string())));

        settle().await;
        assert!(!registry.is_active(MessageId::new(7)));
    }
}
