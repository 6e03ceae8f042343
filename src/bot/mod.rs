//! Command registration and interaction dispatch.

pub mod registrar;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serenity::all::GuildId;
use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};

use crate::cluster::ClusterManager;
use crate::commands::help::HelpCommand;
use crate::commands::{CommandProvider, CommandSchema, InboundInteraction, InteractionKind};
use registrar::CommandRegistrar;

/// Command registration behaviour.
#[derive(Debug, Clone, Copy)]
pub struct BotOptions {
    /// Register commands with the platform once the gateway is ready.
    pub register_commands: bool,
    /// Register once globally instead of once per joined guild.
    pub register_globally: bool,
}

impl Default for BotOptions {
    fn default() -> Self {
        Self {
            register_commands: true,
            register_globally: false,
        }
    }
}

/// Runs before an interaction is classified and routed.
#[async_trait]
pub trait InteractionHook<I: InboundInteraction>: Send + Sync {
    async fn prepare(&self, interaction: &I);
}

struct PlannedCommand<I: InboundInteraction> {
    schema: Arc<CommandSchema>,
    provider: Arc<dyn CommandProvider<I>>,
}

impl<I: InboundInteraction> Clone for PlannedCommand<I> {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            provider: Arc::clone(&self.provider),
        }
    }
}

type HandlerMap<I> = RwLock<HashMap<String, Arc<dyn CommandProvider<I>>>>;

pub struct BotBuilder<I: InboundInteraction> {
    name: String,
    help_message: String,
    options: BotOptions,
    providers: Vec<Arc<dyn CommandProvider<I>>>,
    cluster: Option<Arc<ClusterManager>>,
    hook: Option<Arc<dyn InteractionHook<I>>>,
}

impl<I: InboundInteraction> BotBuilder<I> {
    pub fn help_message(mut self, help_message: impl Into<String>) -> Self {
        self.help_message = help_message.into();
        self
    }

    pub fn options(mut self, options: BotOptions) -> Self {
        self.options = options;
        self
    }

    /// Providers are registered in the order they are added.
    pub fn provider(mut self, provider: Arc<dyn CommandProvider<I>>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn cluster(mut self, cluster: Arc<ClusterManager>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn InteractionHook<I>>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn build(self, registrar: Arc<dyn CommandRegistrar>) -> Bot<I> {
        let mut providers = self.providers;
        let help = HelpCommand::new(&self.name, &self.help_message, &providers);
        providers.push(Arc::new(help));

        Bot {
            commands: plan_commands(&providers),
            name: self.name,
            options: self.options,
            providers,
            registrar,
            cluster: self
                .cluster
                .unwrap_or_else(|| Arc::new(ClusterManager::solo())),
            hook: self.hook,
            chat_handlers: RwLock::default(),
            context_handlers: RwLock::default(),
            guilds: RwLock::default(),
            ready_seen: AtomicBool::new(false),
        }
    }
}

/// Flatten provider declarations, keeping the first declaration of any name.
fn plan_commands<I: InboundInteraction>(
    providers: &[Arc<dyn CommandProvider<I>>],
) -> Vec<PlannedCommand<I>> {
    let mut seen: HashMap<String, CommandSchema> = HashMap::new();
    let mut planned = Vec::new();

    for provider in providers {
        for schema in provider.provide_commands() {
            if let Some(first) = seen.get(&schema.name) {
                if first.kind.is_context_menu() != schema.kind.is_context_menu() {
                    error!(
                        "Command '{}' declared as both a chat and a context-menu command, ignoring the {:?} declaration",
                        schema.name, schema.kind
                    );
                } else {
                    error!(
                        "Command '{}' declared more than once, ignoring the later declaration",
                        schema.name
                    );
                }
                continue;
            }

            seen.insert(schema.name.clone(), schema.clone());
            planned.push(PlannedCommand {
                schema: Arc::new(schema),
                provider: Arc::clone(provider),
            });
        }
    }

    planned
}

fn describe_scope(guild: Option<GuildId>) -> String {
    match guild {
        Some(guild_id) => format!("to guild '{}'", guild_id),
        None => "globally".to_string(),
    }
}

/// Upsert one command in every scope concurrently. Every scope is attempted
/// even if some fail; returns whether all of them succeeded.
async fn upsert_in_scopes(
    registrar: Arc<dyn CommandRegistrar>,
    schema: Arc<CommandSchema>,
    scopes: Vec<Option<GuildId>>,
) -> bool {
    let mut upserts = JoinSet::new();
    for scope in scopes {
        let registrar = Arc::clone(&registrar);
        let schema = Arc::clone(&schema);
        upserts.spawn(async move { (scope, registrar.upsert(&schema, scope).await) });
    }

    let mut all_ok = true;
    while let Some(joined) = upserts.join_next().await {
        match joined {
            Ok((scope, Ok(registered))) => {
                debug!("Registered command '{}' {}", registered, describe_scope(scope));
            }
            Ok((scope, Err(e))) => {
                error!(
                    "Failed to register command '{}' {}: {}",
                    schema.name,
                    describe_scope(scope),
                    e
                );
                all_ok = false;
            }
            Err(e) => {
                error!("Registration task for command '{}' failed: {}", schema.name, e);
                all_ok = false;
            }
        }
    }
    all_ok
}

/// A chat-platform bot: owns the command providers, keeps the platform's
/// command list in sync and routes interactions to providers.
pub struct Bot<I: InboundInteraction> {
    name: String,
    options: BotOptions,
    providers: Vec<Arc<dyn CommandProvider<I>>>,
    commands: Vec<PlannedCommand<I>>,
    registrar: Arc<dyn CommandRegistrar>,
    cluster: Arc<ClusterManager>,
    hook: Option<Arc<dyn InteractionHook<I>>>,
    chat_handlers: HandlerMap<I>,
    context_handlers: HandlerMap<I>,
    guilds: RwLock<HashSet<GuildId>>,
    ready_seen: AtomicBool,
}

impl<I: InboundInteraction> Bot<I> {
    pub fn builder(name: impl Into<String>) -> BotBuilder<I> {
        BotBuilder {
            name: name.into(),
            help_message: String::new(),
            options: BotOptions::default(),
            providers: Vec::new(),
            cluster: None,
            hook: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> BotOptions {
        self.options
    }

    /// Providers in registration order; the help provider is last.
    pub fn providers(&self) -> &[Arc<dyn CommandProvider<I>>] {
        &self.providers
    }

    pub fn cluster(&self) -> &Arc<ClusterManager> {
        &self.cluster
    }

    pub async fn is_routed(&self, kind: InteractionKind, name: &str) -> bool {
        match kind {
            InteractionKind::ChatCommand | InteractionKind::Autocomplete => {
                self.chat_handlers.read().await.contains_key(name)
            }
            InteractionKind::ContextMenuCommand => {
                self.context_handlers.read().await.contains_key(name)
            }
            InteractionKind::Other => false,
        }
    }

    pub async fn known_guilds(&self) -> HashSet<GuildId> {
        self.guilds.read().await.clone()
    }

    /// Gateway ready: remember the joined guilds and register commands.
    ///
    /// Only the first ready of the process triggers registration.
    pub async fn on_ready(&self, guilds: impl IntoIterator<Item = GuildId>) {
        self.guilds.write().await.extend(guilds);
        if self.ready_seen.swap(true, Ordering::SeqCst) {
            debug!("{}: gateway ready again, commands already registered", self.name);
            return;
        }

        info!("{}: Discord connected", self.name);
        if self.options.register_commands {
            self.register_commands().await;
        }
    }

    /// Register every declared command and route the ones that succeed.
    pub async fn register_commands(&self) {
        if !self.cluster.is_leader() {
            debug!("{}: not the cluster leader, skipping command registration", self.name);
            return;
        }

        let scopes: Vec<Option<GuildId>> = if self.options.register_globally {
            vec![None]
        } else {
            self.guilds.read().await.iter().copied().map(Some).collect()
        };

        let mut registrations = JoinSet::new();
        for planned in &self.commands {
            let planned = planned.clone();
            let registrar = Arc::clone(&self.registrar);
            let scopes = scopes.clone();
            registrations.spawn(async move {
                let ok = upsert_in_scopes(registrar, Arc::clone(&planned.schema), scopes).await;
                (planned, ok)
            });
        }

        let mut routed = 0;
        while let Some(joined) = registrations.join_next().await {
            match joined {
                Ok((planned, true)) => {
                    self.route(&planned).await;
                    routed += 1;
                }
                Ok((planned, false)) => {
                    warn!(
                        "{}: command '{}' left unrouted after registration failure",
                        self.name, planned.schema.name
                    );
                }
                Err(e) => error!("{}: command registration task failed: {}", self.name, e),
            }
        }
        info!(
            "{}: registered {}/{} commands",
            self.name,
            routed,
            self.commands.len()
        );
    }

    /// Follow leadership changes for the lifetime of the bot.
    ///
    /// An instance promoted to leader after the gateway became ready has never
    /// routed anything, so it registers and routes every command on promotion.
    pub fn watch_leadership(self: &Arc<Self>) -> JoinHandle<()> {
        let bot: Weak<Self> = Arc::downgrade(self);
        let mut membership = self.cluster.subscribe();
        tokio::spawn(async move {
            let mut was_leader = membership.borrow_and_update().is_leader();
            while membership.changed().await.is_ok() {
                let is_leader = membership.borrow_and_update().is_leader();
                let promoted = is_leader && !was_leader;
                was_leader = is_leader;
                if !promoted {
                    continue;
                }
                let Some(bot) = bot.upgrade() else {
                    return;
                };
                bot.on_promoted().await;
            }
        })
    }

    async fn on_promoted(&self) {
        if !self.ready_seen.load(Ordering::SeqCst) {
            // Registration happens on ready.
            return;
        }
        info!("{}: promoted to cluster leader", self.name);
        if self.options.register_commands {
            self.register_commands().await;
        }
    }

    /// A guild was joined after startup: register every command in it.
    pub async fn on_guild_join(&self, guild_id: GuildId) {
        let newly_known = self.guilds.write().await.insert(guild_id);
        if !newly_known {
            debug!("{}: guild '{}' already known", self.name, guild_id);
        }

        if self.options.register_globally || !self.options.register_commands {
            return;
        }
        if !self.cluster.is_leader() {
            return;
        }

        info!("{}: joined guild '{}', registering commands", self.name, guild_id);
        let mut registrations = JoinSet::new();
        for planned in &self.commands {
            let planned = planned.clone();
            let registrar = Arc::clone(&self.registrar);
            registrations.spawn(async move {
                let ok =
                    upsert_in_scopes(registrar, Arc::clone(&planned.schema), vec![Some(guild_id)])
                        .await;
                (planned, ok)
            });
        }

        while let Some(joined) = registrations.join_next().await {
            match joined {
                Ok((planned, true)) => self.route(&planned).await,
                Ok((_, false)) => {}
                Err(e) => error!("{}: command registration task failed: {}", self.name, e),
            }
        }
    }

    async fn route(&self, planned: &PlannedCommand<I>) {
        let handlers = if planned.schema.kind.is_context_menu() {
            &self.context_handlers
        } else {
            &self.chat_handlers
        };
        handlers
            .write()
            .await
            .insert(planned.schema.name.clone(), Arc::clone(&planned.provider));
    }

    /// Route an inbound interaction to at most one provider.
    ///
    /// The provider runs on its own task; the returned handle is only for
    /// callers that want to observe completion.
    pub async fn handle_interaction(&self, interaction: I) -> Option<JoinHandle<()>> {
        if interaction.from_bot() {
            return None;
        }
        if !self.cluster.is_leader() {
            return None;
        }

        if let Some(hook) = &self.hook {
            hook.prepare(&interaction).await;
        }

        let kind = interaction.kind();
        let name = interaction.command_name()?.to_string();
        let provider = match kind {
            InteractionKind::ChatCommand | InteractionKind::Autocomplete => {
                self.chat_handlers.read().await.get(&name).cloned()
            }
            InteractionKind::ContextMenuCommand => {
                self.context_handlers.read().await.get(&name).cloned()
            }
            InteractionKind::Other => None,
        }?;

        let autocomplete = kind == InteractionKind::Autocomplete;
        if autocomplete {
            if !provider.supports_autocomplete() {
                return None;
            }
            trace!(
                "Autocomplete request received from '{}' in '{}': '{}'",
                interaction.user_label(),
                interaction.guild_label(),
                name
            );
        } else {
            debug!(
                "Command received from '{}' in '{}': '{}'",
                interaction.user_label(),
                interaction.guild_label(),
                name
            );
        }

        Some(tokio::spawn(async move {
            let result = if autocomplete {
                provider.autocomplete(interaction).await
            } else {
                provider.handle(interaction).await
            };
            if let Err(e) = result {
                warn!("Handler for command '{}' failed: {}", name, e);
            }
        }))
    }
}
