use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{EditMessage, Http, ReactionType, UserId};

use crate::ui::{MessageRef, SessionSurface};
use crate::Error;

/// Session cleanup over serenity's REST client.
pub struct HttpSurface {
    http: Arc<Http>,
}

impl HttpSurface {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn reaction(emoji: &str) -> Result<ReactionType, Error> {
    ReactionType::try_from(emoji).map_err(|e| format!("invalid emoji {}: {}", emoji, e).into())
}

#[async_trait]
impl SessionSurface for HttpSurface {
    async fn clear_components(&self, message: MessageRef) -> Result<(), Error> {
        message
            .channel_id
            .edit_message(
                &*self.http,
                message.message_id,
                EditMessage::new().components(Vec::new()),
            )
            .await?;
        Ok(())
    }

    async fn clear_reactions(&self, message: MessageRef) -> Result<(), Error> {
        message
            .channel_id
            .delete_reactions(&*self.http, message.message_id)
            .await?;
        Ok(())
    }

    async fn add_reaction(&self, message: MessageRef, emoji: &str) -> Result<(), Error> {
        message
            .channel_id
            .create_reaction(&*self.http, message.message_id, reaction(emoji)?)
            .await?;
        Ok(())
    }

    async fn remove_user_reaction(
        &self,
        message: MessageRef,
        emoji: &str,
        user: UserId,
    ) -> Result<(), Error> {
        message
            .channel_id
            .delete_reaction(&*self.http, message.message_id, Some(user), reaction(emoji)?)
            .await?;
        Ok(())
    }
}
