use async_trait::async_trait;

use super::{CommandProvider, CommandSchema, InboundInteraction};
use crate::Error;

/// `/ping`, replies with `Pong!`.
pub struct PingCommand;

#[async_trait]
impl<I: InboundInteraction> CommandProvider<I> for PingCommand {
    fn provide_commands(&self) -> Vec<CommandSchema> {
        vec![CommandSchema::chat("ping", "Check the bot is responsive")]
    }

    fn provide_help_message(&self) -> Option<String> {
        Some("/ping - check the bot is responsive".to_string())
    }

    async fn handle(&self, interaction: I) -> Result<(), Error> {
        interaction.reply("Pong!").await
    }
}
