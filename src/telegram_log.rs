//! Mirrors this crate's log events into an operator chat.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Telegram's message limit, minus room for the ellipsis.
const MAX_LOG_MESSAGE: usize = 4000;

/// INFO lines are flushed once this many are waiting.
const BATCH_LIMIT: usize = 50;

const FLUSH_EVERY: Duration = Duration::from_secs(5);

enum LogMessage {
    /// WARN and ERROR, sent at once.
    Urgent(String),
    /// INFO, batched.
    Info(String),
}

/// Buffered INFO lines waiting for the next flush.
#[derive(Default)]
struct Batch {
    lines: Vec<String>,
}

impl Batch {
    /// Returns true when the batch should be flushed early.
    fn push(&mut self, line: String) -> bool {
        self.lines.push(line);
        self.lines.len() >= BATCH_LIMIT
    }

    fn take(&mut self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        let text = self.lines.join("\n");
        self.lines.clear();
        Some(text)
    }
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
    target_prefix: &'static str,
}

impl TelegramLogLayer {
    /// Events whose target does not start with `target_prefix` are ignored,
    /// so HTTP and dispatcher internals stay out of the chat.
    pub fn new(bot: Bot, chat_id: ChatId, target_prefix: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            let mut batch = Batch::default();
            let mut interval = tokio::time::interval(FLUSH_EVERY);

            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(LogMessage::Urgent(text)) => send_log(&bot, chat_id, &text).await,
                        Some(LogMessage::Info(text)) => {
                            if batch.push(text) {
                                flush(&bot, chat_id, &mut batch).await;
                            }
                        }
                        None => {
                            flush(&bot, chat_id, &mut batch).await;
                            break;
                        }
                    },
                    _ = interval.tick() => flush(&bot, chat_id, &mut batch).await,
                }
            }
        });

        Self { tx, target_prefix }
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_LOG_MESSAGE {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(MAX_LOG_MESSAGE).collect();
    clipped.push_str("...");
    clipped
}

async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    // Not through tracing: a failure here would feed back into this layer
    if let Err(e) = bot.send_message(chat_id, clip(text)).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

async fn flush(bot: &Bot, chat_id: ChatId, batch: &mut Batch) {
    if let Some(text) = batch.take() {
        send_log(bot, chat_id, &text).await;
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let fields = std::mem::take(&mut self.message);
            self.message = format!("{value:?}");
            if !fields.is_empty() {
                self.message.push_str(&format!(" ({fields})"));
            }
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

/// Chat line for an event, or `None` when it is below INFO.
fn render(level: Level, message: String) -> Option<LogMessage> {
    match level {
        Level::ERROR => Some(LogMessage::Urgent(format!("❌ {message}"))),
        Level::WARN => Some(LogMessage::Urgent(format!("⚠️ {message}"))),
        Level::INFO => Some(LogMessage::Info(message)),
        _ => None,
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !metadata.target().starts_with(self.target_prefix) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if let Some(msg) = render(*metadata.level(), visitor.message) {
            if self.tx.send(msg).is_err() {
                eprintln!("Log channel closed, message dropped");
            }
        }
    }
}
