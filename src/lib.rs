pub mod bot;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod dependency;
pub mod discord;
pub mod discord_text;
pub mod error;
pub mod logging;
pub mod ui;

/// Error type returned by command and UI handlers.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
