//! Bot API payloads to framework updates.

use {
    antares_common::types::ChatType,
    antares_framework::{Update, UpdateKind},
    teloxide::types::{
        CallbackQuery, Chat, ChatKind, MediaKind, Message, MessageKind, PublicChatKind,
        UpdateKind as TgUpdateKind,
    },
};

pub fn chat_type(chat: &Chat) -> ChatType {
    match &chat.kind {
        ChatKind::Private(_) => ChatType::Private,
        ChatKind::Public(public) => match public.kind {
            PublicChatKind::Channel(_) => ChatType::Channel,
            PublicChatKind::Supergroup(_) => ChatType::Supergroup,
            _ => ChatType::Group,
        },
    }
}

/// Text of a message, or the caption of a media message.
fn message_text(msg: &Message) -> Option<String> {
    match &msg.kind {
        MessageKind::Common(common) => match &common.media_kind {
            MediaKind::Text(t) => Some(t.text.clone()),
            MediaKind::Photo(p) => p.caption.clone(),
            MediaKind::Document(d) => d.caption.clone(),
            MediaKind::Video(v) => v.caption.clone(),
            MediaKind::Animation(a) => a.caption.clone(),
            _ => None,
        },
        _ => None,
    }
}

fn has_photo(msg: &Message) -> bool {
    matches!(
        &msg.kind,
        MessageKind::Common(common) if matches!(common.media_kind, MediaKind::Photo(_))
    )
}

pub fn from_message(msg: &Message) -> Update {
    Update {
        chat_id: msg.chat.id.0,
        chat_type: chat_type(&msg.chat),
        user_id: msg.from.as_ref().map(|u| u.id.0 as i64),
        message_id: Some(msg.id.0),
        kind: UpdateKind::Message {
            text: message_text(msg),
            has_photo: has_photo(msg),
        },
    }
}

/// `None` for clicks on inline-mode messages, which have no chat.
pub fn from_callback_query(query: &CallbackQuery) -> Option<Update> {
    let message = query.message.as_ref()?;
    let chat = message.chat();
    Some(Update {
        chat_id: chat.id.0,
        chat_type: chat_type(chat),
        user_id: Some(query.from.id.0 as i64),
        message_id: Some(message.id().0),
        kind: UpdateKind::ButtonClick {
            query_id: query.id.clone(),
            data: query.data.clone(),
        },
    })
}

/// The framework view of a polled update, if it carries anything the
/// framework handles.
pub fn from_update(update: &teloxide::types::Update) -> Option<Update> {
    match &update.kind {
        TgUpdateKind::Message(msg) | TgUpdateKind::ChannelPost(msg) => Some(from_message(msg)),
        TgUpdateKind::CallbackQuery(query) => from_callback_query(query),
        _ => None,
    }
}
