//! serenity adapter: gateway events in, bot and UI session calls out.

pub mod surface;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{
    ChannelId, Client, CommandInteraction, CommandType, ComponentInteraction, Context,
    EventHandler, GatewayIntents, Guild, GuildId, Interaction, MessageId, Reaction, ReactionType,
    Ready, UserId,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::bot::registrar::HttpRegistrar;
use crate::bot::{Bot, BotBuilder};
use crate::cluster::ClusterManager;
use crate::commands::{InboundInteraction, InteractionKind};
use crate::config::Config;
use crate::discord_text::reply_chunked;
use crate::logging::{ChannelSink, LogForwarder};
use crate::ui::{SessionEvent, SessionRegistry};
use crate::Error;

pub use surface::HttpSurface;

/// An inbound gateway interaction.
pub struct DiscordInteraction {
    ctx: Context,
    interaction: Interaction,
    deferred: AtomicBool,
}

impl DiscordInteraction {
    pub fn new(ctx: Context, interaction: Interaction) -> Self {
        Self {
            ctx,
            interaction,
            deferred: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    /// The command or context-menu invocation, if this is one.
    pub fn command(&self) -> Option<&CommandInteraction> {
        match &self.interaction {
            Interaction::Command(command) => Some(command),
            _ => None,
        }
    }

    /// Acknowledge a command now and reply later; [`InboundInteraction::reply`]
    /// then edits the deferred response.
    pub async fn defer(&self) -> Result<(), Error> {
        if let Some(command) = self.command() {
            command.defer(&self.ctx.http).await?;
            self.deferred.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn invoking_user(&self) -> Option<&serenity::all::User> {
        match &self.interaction {
            Interaction::Command(c) | Interaction::Autocomplete(c) => Some(&c.user),
            Interaction::Component(c) => Some(&c.user),
            Interaction::Modal(m) => Some(&m.user),
            _ => None,
        }
    }

    fn guild_id(&self) -> Option<GuildId> {
        match &self.interaction {
            Interaction::Command(c) | Interaction::Autocomplete(c) => c.guild_id,
            Interaction::Component(c) => c.guild_id,
            Interaction::Modal(m) => m.guild_id,
            _ => None,
        }
    }
}

#[async_trait]
impl InboundInteraction for DiscordInteraction {
    fn kind(&self) -> InteractionKind {
        match &self.interaction {
            Interaction::Command(command) => match command.data.kind {
                CommandType::ChatInput => InteractionKind::ChatCommand,
                CommandType::User | CommandType::Message => InteractionKind::ContextMenuCommand,
                _ => InteractionKind::Other,
            },
            Interaction::Autocomplete(_) => InteractionKind::Autocomplete,
            _ => InteractionKind::Other,
        }
    }

    fn command_name(&self) -> Option<&str> {
        match &self.interaction {
            Interaction::Command(c) | Interaction::Autocomplete(c) => Some(&c.data.name),
            _ => None,
        }
    }

    fn from_bot(&self) -> bool {
        self.invoking_user().is_some_and(|user| user.bot)
    }

    fn user_label(&self) -> String {
        self.invoking_user()
            .map(|user| user.name.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn guild_label(&self) -> String {
        match self.guild_id() {
            Some(guild_id) => self
                .ctx
                .cache
                .guild(guild_id)
                .map(|guild| guild.name.clone())
                .unwrap_or_else(|| guild_id.to_string()),
            None => "DM".to_string(),
        }
    }

    async fn reply(&self, content: &str) -> Result<(), Error> {
        let Some(command) = self.command() else {
            return Err("only command interactions can be replied to".into());
        };
        let deferred = self.deferred.load(Ordering::SeqCst);
        reply_chunked(&self.ctx.http, command, content, deferred).await?;
        Ok(())
    }
}

/// A button press or select-menu choice on a message.
pub struct ComponentEvent {
    pub ctx: Context,
    pub interaction: ComponentInteraction,
}

impl SessionEvent for ComponentEvent {
    fn key(&self) -> String {
        self.interaction.data.custom_id.clone()
    }

    fn from_bot(&self) -> bool {
        self.interaction.user.bot
    }

    fn user_id(&self) -> Option<UserId> {
        Some(self.interaction.user.id)
    }
}

/// A reaction added to a message.
pub struct ReactionEvent {
    pub ctx: Context,
    pub reaction: Reaction,
    from_bot: bool,
}

impl ReactionEvent {
    pub fn new(ctx: Context, reaction: Reaction) -> Self {
        // Our own template reactions come back through the gateway too.
        let own_id = ctx.cache.current_user().id;
        let from_bot = reaction.user_id == Some(own_id)
            || reaction
                .member
                .as_ref()
                .is_some_and(|member| member.user.bot);
        Self {
            ctx,
            reaction,
            from_bot,
        }
    }
}

impl SessionEvent for ReactionEvent {
    fn key(&self) -> String {
        match &self.reaction.emoji {
            ReactionType::Unicode(emoji) => emoji.clone(),
            ReactionType::Custom { name, .. } => name.clone().unwrap_or_default(),
            _ => String::new(),
        }
    }

    fn from_bot(&self) -> bool {
        self.from_bot
    }

    fn user_id(&self) -> Option<UserId> {
        self.reaction.user_id
    }
}

/// Registries for component and reaction sessions. Clones share state.
#[derive(Clone, Default)]
pub struct Sessions {
    pub components: Arc<SessionRegistry<ComponentEvent>>,
    pub reactions: Arc<SessionRegistry<ReactionEvent>>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct DiscordHandler {
    bot: Arc<Bot<DiscordInteraction>>,
    registrar: Arc<HttpRegistrar>,
    sessions: Sessions,
}

impl DiscordHandler {
    pub fn new(
        bot: Arc<Bot<DiscordInteraction>>,
        registrar: Arc<HttpRegistrar>,
        sessions: Sessions,
    ) -> Self {
        Self {
            bot,
            registrar,
            sessions,
        }
    }
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected as {}", self.bot.name(), ready.user.name);
        self.registrar.attach(Arc::clone(&ctx.http));
        self.bot
            .on_ready(ready.guilds.iter().map(|guild| guild.id))
            .await;
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, is_new: Option<bool>) {
        // Startup replays every joined guild with is_new = false.
        if is_new == Some(true) {
            self.bot.on_guild_join(guild.id).await;
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Component(component) => {
                let message_id = component.message.id;
                let event = ComponentEvent {
                    ctx,
                    interaction: component,
                };
                if !self.sessions.components.dispatch(message_id, event) {
                    debug!("Component interaction for inactive message {}", message_id);
                }
            }
            interaction => {
                self.bot
                    .handle_interaction(DiscordInteraction::new(ctx, interaction))
                    .await;
            }
        }
    }

    async fn message_delete(
        &self,
        _ctx: Context,
        _channel_id: ChannelId,
        deleted_message_id: MessageId,
        _guild_id: Option<GuildId>,
    ) {
        self.sessions.components.message_deleted(deleted_message_id);
        self.sessions.reactions.message_deleted(deleted_message_id);
    }

    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        let message_id = reaction.message_id;
        self.sessions
            .reactions
            .dispatch(message_id, ReactionEvent::new(ctx, reaction));
    }
}

/// Wait for cluster membership, then connect to Discord and serve until the
/// gateway shuts down.
pub async fn run(
    config: &Config,
    cluster: Arc<ClusterManager>,
    builder: BotBuilder<DiscordInteraction>,
    sessions: Sessions,
    forwarded_logs: Option<mpsc::UnboundedReceiver<String>>,
) -> anyhow::Result<()> {
    if cluster.is_enabled() {
        info!("Waiting for cluster membership...");
    }
    cluster.dependency().wait().await;

    let registrar = Arc::new(HttpRegistrar::new());
    let bot = Arc::new(
        builder
            .options(config.bot_options())
            .cluster(cluster)
            .build(registrar.clone()),
    );
    bot.watch_leadership();

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(DiscordHandler::new(bot, registrar, sessions))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    if let (Some(lines), Some(channel_id)) = (forwarded_logs, config.error_channel) {
        let forwarder = LogForwarder::new(ChannelSink::new(Arc::clone(&client.http), channel_id));
        tokio::spawn(forwarder.run(lines));
    }

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
        return Err(why.into());
    }
    Ok(())
}
