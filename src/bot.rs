/// Telegram update handlers: turn messages and button presses into dialog events.
use crate::dialog::{DialogController, InboundEvent, InboundKind};
use crate::locale::DEFAULT_LANGUAGE;
use crate::models::{Coordinates, MessageId, UserId};
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use tracing::{debug, error};

/// Shared bot state handed to every handler.
#[derive(Clone)]
pub struct BotState {
    pub controller: Arc<DialogController>,
}

impl BotState {
    pub fn new(controller: Arc<DialogController>) -> Self {
        Self { controller }
    }

    /// Run one event through the dialog. Errors end here, logged.
    async fn dispatch(&self, event: InboundEvent) {
        let user = event.user;
        if let Err(e) = self.controller.handle(event).await {
            error!("Failed to handle update from user {}: {}", user, e);
        }
    }
}

fn language_of(code: Option<&str>) -> String {
    code.and_then(|code| code.split(['-', '_']).next())
        .filter(|lang| !lang.is_empty())
        .unwrap_or(DEFAULT_LANGUAGE)
        .to_lowercase()
}

/// Classify a non-command message. Unknown commands never reach the city search.
fn message_kind(text: Option<&str>, location: Option<(f64, f64)>) -> InboundKind {
    match (text, location) {
        (Some(text), _) if text.starts_with('/') => InboundKind::Other,
        (Some(text), _) => InboundKind::Text(text.to_string()),
        (None, Some((latitude, longitude))) => {
            InboundKind::Location(Coordinates::new(latitude, longitude))
        }
        (None, None) => InboundKind::Other,
    }
}

fn event_from_message(msg: &Message, kind: InboundKind) -> InboundEvent {
    let language = language_of(
        msg.from()
            .and_then(|user| user.language_code.as_deref()),
    );
    InboundEvent {
        user: UserId(msg.chat.id.0),
        language,
        message_id: Some(MessageId(msg.id.0)),
        kind,
    }
}

/// Handler for recognised commands.
pub async fn handle_command(msg: Message, kind: InboundKind, state: BotState) -> ResponseResult<()> {
    if !msg.chat.is_private() {
        debug!("Ignoring command from non-private chat {}", msg.chat.id);
        return Ok(());
    }

    state.dispatch(event_from_message(&msg, kind)).await;
    Ok(())
}

/// Handler for every other message: city names, locations and junk.
pub async fn handle_message(msg: Message, state: BotState) -> ResponseResult<()> {
    if !msg.chat.is_private() {
        debug!("Ignoring message from non-private chat {}", msg.chat.id);
        return Ok(());
    }

    let location = msg
        .location()
        .map(|location| (location.latitude, location.longitude));
    let kind = message_kind(msg.text(), location);
    state.dispatch(event_from_message(&msg, kind)).await;
    Ok(())
}

/// Handler for inline button callbacks.
pub async fn handle_callback(q: CallbackQuery, state: BotState) -> ResponseResult<()> {
    let event = InboundEvent {
        user: UserId(q.from.id.0 as i64),
        language: language_of(q.from.language_code.as_deref()),
        message_id: None,
        kind: InboundKind::Callback {
            id: q.id,
            data: q.data.unwrap_or_default(),
        },
    };

    state.dispatch(event).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_of() {
        assert_eq!(language_of(Some("ru")), "ru");
        assert_eq!(language_of(Some("pt-BR")), "pt");
        assert_eq!(language_of(Some("EN")), "en");
        assert_eq!(language_of(Some("")), "en");
        assert_eq!(language_of(None), "en");
    }

    #[test]
    fn test_message_kind() {
        assert_eq!(
            message_kind(Some("London"), None),
            InboundKind::Text("London".to_string())
        );
        assert_eq!(message_kind(Some("/weather"), None), InboundKind::Other);
        assert_eq!(
            message_kind(None, Some((51.5074, -0.1278))),
            InboundKind::Location(Coordinates::new(51.5074, -0.1278))
        );
        assert_eq!(message_kind(None, None), InboundKind::Other);
    }
}
