use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serenity::all::{Command, GuildId};
use serenity::http::Http;

use crate::commands::CommandSchema;
use crate::error::RegistrationError;

/// Upserts command definitions with the platform.
#[async_trait]
pub trait CommandRegistrar: Send + Sync {
    /// Register `schema` globally (`guild == None`) or in one guild, returning
    /// the name the platform echoed back.
    async fn upsert(
        &self,
        schema: &CommandSchema,
        guild: Option<GuildId>,
    ) -> Result<String, RegistrationError>;
}

/// Registrar over serenity's REST client.
///
/// The HTTP client is attached once the gateway reports ready, since the
/// application id is only known from then on.
#[derive(Default)]
pub struct HttpRegistrar {
    http: OnceLock<Arc<Http>>,
}

impl HttpRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, http: Arc<Http>) {
        let _ = self.http.set(http);
    }
}

#[async_trait]
impl CommandRegistrar for HttpRegistrar {
    async fn upsert(
        &self,
        schema: &CommandSchema,
        guild: Option<GuildId>,
    ) -> Result<String, RegistrationError> {
        let http = self.http.get().ok_or_else(|| RegistrationError::Rejected {
            name: schema.name.clone(),
            reason: "not connected to Discord".to_string(),
        })?;

        let created = match guild {
            Some(guild_id) => guild_id.create_command(http, schema.to_builder()).await,
            None => Command::create_global_command(http, schema.to_builder()).await,
        };

        created
            .map(|command| command.name)
            .map_err(|source| RegistrationError::Platform {
                name: schema.name.clone(),
                source,
            })
    }
}
