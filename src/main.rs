use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bot_framework::bot::Bot;
use bot_framework::cluster::ClusterManager;
use bot_framework::commands::ping::PingCommand;
use bot_framework::commands::{CommandProvider, CommandSchema, InboundInteraction};
use bot_framework::config::Config;
use bot_framework::discord::{self, DiscordInteraction, HttpSurface, Sessions};
use bot_framework::ui::{MessageRef, Scrollable};
use bot_framework::{logging, Error};
use serenity::all::EditMessage;
use tracing::info;

const PAGES: &[&str] = &[
    "**Page 1/3**\nReact with ⬅️ and ➡️ to flip through these pages.",
    "**Page 2/3**\nOnly the person who reacts gets their reaction removed.",
    "**Page 3/3**\nThe reactions disappear when the session times out.",
];

/// `/pages`, a message paged with reactions.
struct PagesCommand {
    sessions: Sessions,
    duration: Duration,
}

#[async_trait]
impl CommandProvider<DiscordInteraction> for PagesCommand {
    fn provide_commands(&self) -> Vec<CommandSchema> {
        vec![CommandSchema::chat("pages", "Show a message you can page through")]
    }

    fn provide_help_message(&self) -> Option<String> {
        Some("/pages - flip through a paged message".to_string())
    }

    async fn handle(&self, interaction: DiscordInteraction) -> Result<(), Error> {
        let Some(command) = interaction.command() else {
            return Ok(());
        };
        let http = Arc::clone(&interaction.context().http);

        interaction.reply(PAGES[0]).await?;
        let message = command.get_response(&http).await?;

        let render_http = Arc::clone(&http);
        let scrollable = Scrollable::new(PAGES, PAGES.len(), move |session, page| {
            let http = Arc::clone(&render_http);
            async move {
                let content = session.props.data[page];
                session
                    .message
                    .channel_id
                    .edit_message(&http, session.message.message_id, EditMessage::new().content(content))
                    .await?;
                Ok::<(), Error>(())
            }
        });

        scrollable
            .activate(
                Arc::clone(&self.sessions.reactions),
                Arc::new(HttpSurface::new(http)),
                MessageRef::new(message.channel_id, message.id),
                self.duration,
            )
            .await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let forwarded_logs = logging::init(&config);
    info!("Loaded configuration: {:?}", config);

    let cluster = Arc::new(ClusterManager::new(config.cluster_config()));
    if cluster.is_enabled() {
        info!("Joining cluster at {}", config.cluster_connect);
    }
    cluster.init(Arc::new(config.cluster_connector())).await;

    let sessions = Sessions::new();
    let builder = Bot::builder(&config.bot_name)
        .help_message(&config.bot_help_message)
        .provider(Arc::new(PingCommand))
        .provider(Arc::new(PagesCommand {
            sessions: sessions.clone(),
            duration: config.session_duration,
        }));

    let result = discord::run(&config, Arc::clone(&cluster), builder, sessions, forwarded_logs).await;
    cluster.shutdown().await;
    result
}
