use std::{sync::Arc, time::Duration};

use {
    antares_config::TelegramSection,
    antares_framework::{HandlerTable, SentMessage, Transport},
    async_trait::async_trait,
    secrecy::ExposeSecret,
    teloxide::{
        prelude::*,
        types::{ChatId, MessageId},
    },
};

use crate::error::{Error, Result};

/// Headroom on top of the long-polling timeout so the HTTP client never
/// aborts a `getUpdates` request before Telegram answers it.
const CLIENT_TIMEOUT_MARGIN: Duration = Duration::from_secs(15);

/// Bot API client plus the handlers modules registered with it.
pub struct TelegramTransport {
    bot: Bot,
    owner_id: Option<i64>,
    poll_timeout_secs: u32,
    table: Arc<HandlerTable>,
}

impl TelegramTransport {
    pub fn new(section: &TelegramSection, owner_id: Option<i64>) -> Result<Self> {
        if !section.has_token() {
            return Err(Error::MissingToken);
        }
        let client = teloxide::net::default_reqwest_settings()
            .timeout(Duration::from_secs(section.poll_timeout_secs.into()) + CLIENT_TIMEOUT_MARGIN)
            .build()
            .map_err(|e| Error::external("failed to build telegram HTTP client", e))?;
        Ok(Self {
            bot: Bot::with_client(section.token.expose_secret(), client),
            owner_id,
            poll_timeout_secs: section.poll_timeout_secs,
            table: Arc::new(HandlerTable::new()),
        })
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    pub fn poll_timeout_secs(&self) -> u32 {
        self.poll_timeout_secs
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_message(&self, chat_id: i64, text: &str) -> anyhow::Result<SentMessage> {
        let msg = self.bot.send_message(ChatId(chat_id), text).await?;
        Ok(SentMessage {
            chat_id: msg.chat.id.0,
            message_id: msg.id.0,
        })
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> anyhow::Result<()> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await?;
        Ok(())
    }

    async fn answer_button(&self, query_id: &str) -> anyhow::Result<()> {
        self.bot.answer_callback_query(query_id).await?;
        Ok(())
    }

    fn handler_table(&self) -> Arc<HandlerTable> {
        Arc::clone(&self.table)
    }

    fn owner_id(&self) -> Option<i64> {
        self.owner_id
    }
}
