//! Command providers and the command/interaction contract the bot dispatches on.

pub mod help;
pub mod ping;

use async_trait::async_trait;
use serenity::all::{CommandType, CreateCommand, CreateCommandOption};

use crate::Error;

/// Platform command type. Chat commands and context-menu commands are
/// routed through separate tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Chat,
    User,
    Message,
}

impl CommandKind {
    pub fn is_context_menu(self) -> bool {
        matches!(self, CommandKind::User | CommandKind::Message)
    }
}

impl From<CommandKind> for CommandType {
    fn from(kind: CommandKind) -> Self {
        match kind {
            CommandKind::Chat => CommandType::ChatInput,
            CommandKind::User => CommandType::User,
            CommandKind::Message => CommandType::Message,
        }
    }
}

/// A command declaration as a provider hands it to the bot.
#[derive(Debug, Clone)]
pub struct CommandSchema {
    pub name: String,
    pub kind: CommandKind,
    pub description: Option<String>,
    pub options: Vec<CreateCommandOption>,
}

impl CommandSchema {
    /// A slash command.
    pub fn chat(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CommandKind::Chat,
            description: Some(description.into()),
            options: Vec::new(),
        }
    }

    /// A context-menu command shown on users.
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CommandKind::User,
            description: None,
            options: Vec::new(),
        }
    }

    /// A context-menu command shown on messages.
    pub fn message(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CommandKind::Message,
            description: None,
            options: Vec::new(),
        }
    }

    pub fn option(mut self, option: CreateCommandOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn to_builder(&self) -> CreateCommand {
        let mut builder = CreateCommand::new(&self.name).kind(self.kind.into());
        if let Some(description) = &self.description {
            builder = builder.description(description);
        }
        builder.set_options(self.options.clone())
    }
}

/// Classification of an inbound interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    ChatCommand,
    ContextMenuCommand,
    Autocomplete,
    Other,
}

/// What the dispatcher needs to know about an inbound interaction.
#[async_trait]
pub trait InboundInteraction: Send + Sync + 'static {
    fn kind(&self) -> InteractionKind;

    /// Invoked command name for command and autocomplete interactions.
    fn command_name(&self) -> Option<&str>;

    /// Whether the interaction was triggered by a bot account.
    fn from_bot(&self) -> bool;

    fn user_label(&self) -> String;

    fn guild_label(&self) -> String;

    /// Reply to the interaction, splitting long content as needed.
    async fn reply(&self, content: &str) -> Result<(), Error>;
}

/// A self-contained unit declaring commands and handling them.
#[async_trait]
pub trait CommandProvider<I: InboundInteraction>: Send + Sync {
    fn provide_commands(&self) -> Vec<CommandSchema>;

    /// One line for the generated help text; `None` leaves the provider out.
    fn provide_help_message(&self) -> Option<String>;

    async fn handle(&self, interaction: I) -> Result<(), Error>;

    fn supports_autocomplete(&self) -> bool {
        false
    }

    async fn autocomplete(&self, _interaction: I) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Interaction stand-in recording replies.
    #[derive(Clone)]
    pub struct FakeInteraction {
        pub kind: InteractionKind,
        pub name: Option<String>,
        pub bot: bool,
        pub replies: Arc<Mutex<Vec<String>>>,
    }

    impl FakeInteraction {
        pub fn new(kind: InteractionKind, name: &str) -> Self {
            Self {
                kind,
                name: Some(name.to_string()),
                bot: false,
                replies: Arc::default(),
            }
        }

        pub fn chat(name: &str) -> Self {
            Self::new(InteractionKind::ChatCommand, name)
        }

        pub fn replies(&self) -> Vec<String> {
            self.replies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InboundInteraction for FakeInteraction {
        fn kind(&self) -> InteractionKind {
            self.kind
        }

        fn command_name(&self) -> Option<&str> {
            self.name.as_deref()
        }

        fn from_bot(&self) -> bool {
            self.bot
        }

        fn user_label(&self) -> String {
            "tester".to_string()
        }

        fn guild_label(&self) -> String {
            "test-guild".to_string()
        }

        async fn reply(&self, content: &str) -> Result<(), Error> {
            self.replies.lock().unwrap().push(content.to_string());
            Ok(())
        }
    }
}
