//! Buttons and select menus bound to one message.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serenity::all::{
    ButtonStyle, CreateActionRow, CreateButton, CreateSelectMenu, CreateSelectMenuKind,
    CreateSelectMenuOption, ReactionType,
};

use super::session::{
    self, event_handler, removal_handler, Cleanup, EventHandler, MessageRef, RemovalHandler,
    SessionContext, SessionEvent, SessionHandle, SessionRegistry, SessionSpec, SessionSurface,
};
use crate::error::SessionError;
use crate::Error;

const BUTTONS_PER_ROW: usize = 5;
/// Discord rejects messages with more action rows than this.
pub const MAX_ACTION_ROWS: usize = 5;

/// Random 10-character custom id.
fn random_id() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    const ID_LENGTH: usize = 10;

    let mut rng = rand::rng();
    (0..ID_LENGTH)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

#[derive(Debug, Clone)]
pub struct ButtonOptions {
    pub custom_id: Option<String>,
    pub label: Option<String>,
    pub emoji: Option<String>,
    pub style: ButtonStyle,
}

impl Default for ButtonOptions {
    fn default() -> Self {
        Self {
            custom_id: None,
            label: None,
            emoji: None,
            style: ButtonStyle::Secondary,
        }
    }
}

impl ButtonOptions {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Default::default()
        }
    }

    pub fn emoji(emoji: impl Into<String>) -> Self {
        Self {
            emoji: Some(emoji.into()),
            ..Default::default()
        }
    }

    pub fn custom_id(mut self, custom_id: impl Into<String>) -> Self {
        self.custom_id = Some(custom_id.into());
        self
    }

    pub fn style(mut self, style: ButtonStyle) -> Self {
        self.style = style;
        self
    }

    fn to_builder(&self, custom_id: &str) -> CreateButton {
        let button = CreateButton::new(custom_id).style(self.style);
        match (&self.label, &self.emoji) {
            (Some(label), _) => button.label(label),
            (None, Some(emoji)) => button.emoji(ReactionType::Unicode(emoji.clone())),
            (None, None) => button,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectItem {
    /// Shown to the user.
    pub label: String,
    /// Reported back in the interaction.
    pub value: String,
}

impl SelectItem {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    pub custom_id: Option<String>,
    pub placeholder: String,
    pub items: Vec<SelectItem>,
}

impl SelectOptions {
    fn to_builder(&self, custom_id: &str) -> CreateSelectMenu {
        let options = self
            .items
            .iter()
            .map(|item| CreateSelectMenuOption::new(&item.label, &item.value))
            .collect();
        CreateSelectMenu::new(custom_id, CreateSelectMenuKind::String { options })
            .placeholder(&self.placeholder)
    }
}

enum Component {
    Button(String, ButtonOptions),
    Select(String, SelectOptions),
}

impl Component {
    fn custom_id(&self) -> &str {
        match self {
            Component::Button(id, _) | Component::Select(id, _) => id,
        }
    }
}

/// Handlers for message components, keyed by custom id.
///
/// Handlers are registered first; [`Interactable::activate`] consumes the
/// builder, so nothing can be registered on a live session.
pub struct Interactable<T, E> {
    props: Arc<T>,
    components: Vec<Component>,
    handlers: HashMap<String, EventHandler<T, E>>,
    removal: Option<RemovalHandler<T>>,
}

impl<T, E> Interactable<T, E>
where
    T: Send + Sync + 'static,
    E: SessionEvent,
{
    pub fn new(props: T) -> Self {
        Self {
            props: Arc::new(props),
            components: Vec::new(),
            handlers: HashMap::new(),
            removal: None,
        }
    }

    pub fn props(&self) -> &Arc<T> {
        &self.props
    }

    /// Add a button, returning its custom id.
    pub fn register_button<F, Fut>(
        &mut self,
        options: ButtonOptions,
        handler: F,
    ) -> Result<String, SessionError>
    where
        F: Fn(SessionContext<T>, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        if options.label.is_none() && options.emoji.is_none() {
            return Err(SessionError::MissingLabel);
        }
        let custom_id = options.custom_id.clone().unwrap_or_else(random_id);
        self.insert(
            Component::Button(custom_id.clone(), options),
            event_handler(handler),
        );
        Ok(custom_id)
    }

    /// Add a string select menu, returning its custom id.
    pub fn register_select<F, Fut>(&mut self, options: SelectOptions, handler: F) -> String
    where
        F: Fn(SessionContext<T>, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let custom_id = options.custom_id.clone().unwrap_or_else(random_id);
        self.insert(
            Component::Select(custom_id.clone(), options),
            event_handler(handler),
        );
        custom_id
    }

    pub fn on_removal<F, Fut>(&mut self, handler: F)
    where
        F: Fn(SessionContext<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.removal = Some(removal_handler(handler));
    }

    // Re-registering a custom id replaces the earlier component in place.
    fn insert(&mut self, component: Component, handler: EventHandler<T, E>) {
        let id = component.custom_id().to_string();
        match self.components.iter_mut().find(|c| c.custom_id() == id) {
            Some(existing) => *existing = component,
            None => self.components.push(component),
        }
        self.handlers.insert(id, handler);
    }

    /// Component rows to attach to the message, in registration order.
    ///
    /// Consecutive buttons share rows of up to five; each select menu takes
    /// a row of its own. Fails when the layout needs more than
    /// [`MAX_ACTION_ROWS`] rows.
    pub fn action_rows(&self) -> Result<Vec<CreateActionRow>, SessionError> {
        let mut rows = Vec::new();
        let mut buttons = Vec::new();

        for component in &self.components {
            match component {
                Component::Button(id, options) => {
                    if buttons.len() == BUTTONS_PER_ROW {
                        rows.push(CreateActionRow::Buttons(std::mem::take(&mut buttons)));
                    }
                    buttons.push(options.to_builder(id));
                }
                Component::Select(id, options) => {
                    if !buttons.is_empty() {
                        rows.push(CreateActionRow::Buttons(std::mem::take(&mut buttons)));
                    }
                    rows.push(CreateActionRow::SelectMenu(options.to_builder(id)));
                }
            }
        }
        if !buttons.is_empty() {
            rows.push(CreateActionRow::Buttons(buttons));
        }
        if rows.len() > MAX_ACTION_ROWS {
            return Err(SessionError::TooManyRows(rows.len()));
        }
        Ok(rows)
    }

    /// Start handling component events on `message` for `duration`.
    pub fn activate(
        self,
        registry: Arc<SessionRegistry<E>>,
        surface: Arc<dyn SessionSurface>,
        message: MessageRef,
        duration: Duration,
    ) -> Result<SessionHandle, SessionError> {
        session::start(
            registry,
            surface,
            SessionSpec {
                kind: "Interactable",
                message,
                props: self.props,
                handlers: self.handlers,
                removal: self.removal,
                duration,
                cleanup: Cleanup::Components,
                remove_user_reaction: false,
            },
        )
    }
}
