use std::sync::Arc;

use async_trait::async_trait;

use super::{CommandProvider, CommandSchema, InboundInteraction};
use crate::Error;

/// Built-in `/help`, generated from every other provider's help line.
pub struct HelpCommand {
    bot_name: String,
    help_message: String,
}

impl HelpCommand {
    pub fn new<I: InboundInteraction>(
        bot_name: &str,
        bot_help_message: &str,
        providers: &[Arc<dyn CommandProvider<I>>],
    ) -> Self {
        let mut help_message = format!("{}\n\n", bot_help_message);
        for line in providers.iter().filter_map(|p| p.provide_help_message()) {
            help_message.push_str(&line);
            help_message.push('\n');
        }

        Self {
            bot_name: bot_name.to_string(),
            help_message,
        }
    }

    pub fn help_message(&self) -> &str {
        &self.help_message
    }
}

#[async_trait]
impl<I: InboundInteraction> CommandProvider<I> for HelpCommand {
    fn provide_commands(&self) -> Vec<CommandSchema> {
        vec![CommandSchema::chat(
            "help",
            format!("Shows available commands for {}", self.bot_name),
        )]
    }

    // Help is not listed in its own output.
    fn provide_help_message(&self) -> Option<String> {
        None
    }

    async fn handle(&self, interaction: I) -> Result<(), Error> {
        interaction.reply(&self.help_message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::ping::PingCommand;
    use crate::commands::testing::FakeInteraction;

    struct Silent;

    #[async_trait]
    impl CommandProvider<FakeInteraction> for Silent {
        fn provide_commands(&self) -> Vec<CommandSchema> {
            vec![CommandSchema::user("Inspect")]
        }

        fn provide_help_message(&self) -> Option<String> {
            None
        }

        async fn handle(&self, _interaction: FakeInteraction) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn help_lists_provider_lines_after_bot_message() {
        let providers: Vec<Arc<dyn CommandProvider<FakeInteraction>>> =
            vec![Arc::new(PingCommand), Arc::new(Silent)];
        let help = HelpCommand::new("tester", "A test bot.", &providers);

        assert_eq!(
            help.help_message(),
            "A test bot.\n\n/ping - check the bot is responsive\n"
        );

        let interaction = FakeInteraction::chat("help");
        help.handle(interaction.clone()).await.unwrap();
        assert_eq!(interaction.replies(), vec![help.help_message().to_string()]);
    }
}
