//! Logging setup and forwarding of log lines to a Discord channel.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serenity::all::{ChannelId, Http};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::field::{Field, Visit};
use tracing::{debug, error, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::Config;
use crate::discord_text::send_chunked;
use crate::Error;

/// Target of the forwarder's own log lines, which are never forwarded.
pub const FORWARDER_TARGET: &str = "bot_framework::logging::forwarder";

/// How long forwarding stays disabled after a failed send.
pub const ERROR_STATUS_RESET: Duration = Duration::from_secs(60);

// Sending these would feed back into the HTTP stack doing the sending.
const EXCLUDED_TARGETS: &[&str] = &[
    FORWARDER_TARGET,
    "serenity",
    "hyper",
    "reqwest",
    "rustls",
    "tungstenite",
    "tokio_tungstenite",
    "h2",
];

/// Install the global subscriber.
///
/// Returns the receiving end of forwarded log lines when the configuration
/// asks for log lines to be posted to a channel.
pub fn init(config: &Config) -> Option<mpsc::UnboundedReceiver<String>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (forward, rx) = if config.forwards_logs() {
        ForwardLayer::new(config.error_logging_enabled, config.general_logging_enabled)
            .map_or((None, None), |(layer, rx)| (Some(layer), Some(rx)))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(forward)
        .init();

    rx
}

/// Publishes formatted log lines into a channel.
pub struct ForwardLayer {
    max_level: Level,
    tx: mpsc::UnboundedSender<String>,
}

impl ForwardLayer {
    /// ERROR lines with error logging; every level with general logging.
    /// `None` when neither is enabled.
    pub fn new(
        error_logging: bool,
        general_logging: bool,
    ) -> Option<(Self, mpsc::UnboundedReceiver<String>)> {
        let max_level = if general_logging {
            Level::TRACE
        } else if error_logging {
            Level::ERROR
        } else {
            return None;
        };
        let (tx, rx) = mpsc::unbounded_channel();
        Some((Self { max_level, tx }, rx))
    }

    fn accepts(&self, level: &Level, target: &str) -> bool {
        // More verbose levels compare greater.
        *level <= self.max_level && !EXCLUDED_TARGETS.iter().any(|t| target.starts_with(t))
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for ForwardLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if !self.accepts(meta.level(), meta.target()) {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let line = format!(
            "{:<5} --- {}: {}{}",
            meta.level(),
            meta.target(),
            visitor.message,
            visitor.fields
        );
        let _ = self.tx.send(line);
    }
}

/// Collapse runs of spaces to one.
pub fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut previous_space = false;
    for c in line.chars() {
        if c == ' ' && previous_space {
            continue;
        }
        previous_space = c == ' ';
        out.push(c);
    }
    out
}

/// Destination of forwarded log lines.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn send(&self, line: &str) -> Result<(), Error>;
}

/// Posts log lines to a Discord channel.
pub struct ChannelSink {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelSink {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl LogSink for ChannelSink {
    async fn send(&self, line: &str) -> Result<(), Error> {
        send_chunked(&self.http, self.channel_id, line).await?;
        Ok(())
    }
}

/// Drains forwarded log lines into a [`LogSink`].
///
/// A failed send disables forwarding for [`ERROR_STATUS_RESET`]; lines that
/// arrive meanwhile are dropped.
pub struct LogForwarder<S> {
    sink: S,
    reset_after: Duration,
}

impl<S: LogSink> LogForwarder<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            reset_after: ERROR_STATUS_RESET,
        }
    }

    pub async fn run(self, mut lines: mpsc::UnboundedReceiver<String>) {
        let mut disabled_until: Option<Instant> = None;

        while let Some(line) = lines.recv().await {
            if let Some(until) = disabled_until {
                if Instant::now() < until {
                    continue;
                }
                disabled_until = None;
                debug!(target: FORWARDER_TARGET, "Discord logging re-enabled");
            }

            if let Err(e) = self.sink.send(&collapse_spaces(&line)).await {
                error!(
                    target: FORWARDER_TARGET,
                    "Discord logging exception, disabling log: {}", e
                );
                disabled_until = Some(Instant::now() + self.reset_after);
            }
        }
    }
}
