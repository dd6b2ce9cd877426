//! Outgoing Telegram calls.

use teloxide::prelude::*;
use teloxide::types::{ChatAction, MessageId, ReplyParameters};
use tracing::warn;

pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Send `text` as plain text. Replies are never parsed as HTML or Markdown,
    /// since they carry database values and model output verbatim.
    pub async fn send_reply(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, String> {
        let mut request = self.bot.send_message(chat_id, text);
        if let Some(id) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(id));
        }

        request.await.map(|msg| msg.id).map_err(|e| {
            let msg = format!("Failed to send reply to {chat_id}: {e}");
            warn!("{}", msg);
            msg
        })
    }

    /// Show "typing…" while the pipeline runs. Failures only get logged.
    pub async fn typing(&self, chat_id: ChatId) {
        if let Err(e) = self.bot.send_chat_action(chat_id, ChatAction::Typing).await {
            warn!("Failed to send typing action to {chat_id}: {e}");
        }
    }
}
