//! Transport-agnostic inbound events.

use antares_common::types::ChatType;

/// One inbound event as delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub chat_id: i64,
    pub chat_type: ChatType,
    /// Absent for channel posts.
    pub user_id: Option<i64>,
    pub message_id: Option<i32>,
    pub kind: UpdateKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    Message {
        text: Option<String>,
        has_photo: bool,
    },
    ButtonClick {
        query_id: String,
        data: Option<String>,
    },
}

/// A parsed `/command@bot arg1 arg2` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command<'a> {
    pub name: &'a str,
    pub target_bot: Option<&'a str>,
    pub args: Vec<&'a str>,
}

impl Update {
    /// A plain text message, the most common update in tests and modules.
    pub fn text(chat_id: i64, chat_type: ChatType, user_id: Option<i64>, text: &str) -> Self {
        Self {
            chat_id,
            chat_type,
            user_id,
            message_id: None,
            kind: UpdateKind::Message {
                text: Some(text.to_string()),
                has_photo: false,
            },
        }
    }

    pub fn button(
        chat_id: i64,
        chat_type: ChatType,
        user_id: Option<i64>,
        query_id: &str,
        data: &str,
    ) -> Self {
        Self {
            chat_id,
            chat_type,
            user_id,
            message_id: None,
            kind: UpdateKind::ButtonClick {
                query_id: query_id.to_string(),
                data: Some(data.to_string()),
            },
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: i32) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn message_text(&self) -> Option<&str> {
        match &self.kind {
            UpdateKind::Message { text, .. } => text.as_deref(),
            UpdateKind::ButtonClick { .. } => None,
        }
    }

    pub fn has_photo(&self) -> bool {
        matches!(self.kind, UpdateKind::Message { has_photo: true, .. })
    }

    pub fn button_data(&self) -> Option<&str> {
        match &self.kind {
            UpdateKind::ButtonClick { data, .. } => data.as_deref(),
            UpdateKind::Message { .. } => None,
        }
    }

    pub fn is_button_click(&self) -> bool {
        matches!(self.kind, UpdateKind::ButtonClick { .. })
    }

    /// Parse the message text as a bot command, if it is one.
    pub fn command(&self) -> Option<Command<'_>> {
        let text = self.message_text()?.strip_prefix('/')?;
        let mut parts = text.split_whitespace();
        let head = parts.next()?;
        let (name, target_bot) = match head.split_once('@') {
            Some((name, bot)) => (name, Some(bot)),
            None => (head, None),
        };
        if name.is_empty() {
            return None;
        }
        Some(Command {
            name,
            target_bot,
            args: parts.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_with_bot_suffix_and_args() {
        let update = Update::text(1, ChatType::Group, Some(2), "/alarm@antares_bot 07:30 wake");
        let cmd = update.command();
        assert_eq!(
            cmd,
            Some(Command {
                name: "alarm",
                target_bot: Some("antares_bot"),
                args: vec!["07:30", "wake"],
            })
        );
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert!(Update::text(1, ChatType::Private, Some(1), "hello /ping").command().is_none());
        assert!(Update::text(1, ChatType::Private, Some(1), "/").command().is_none());
        assert!(Update::text(1, ChatType::Private, Some(1), "/@bot").command().is_none());
    }

    #[test]
    fn button_clicks_expose_data() {
        let update = Update::button(1, ChatType::Private, Some(1), "q1", "alarm:del:3");
        assert!(update.is_button_click());
        assert_eq!(update.button_data(), Some("alarm:del:3"));
        assert!(update.message_text().is_none());
        assert!(update.command().is_none());
    }
}
