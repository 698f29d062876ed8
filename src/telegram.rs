/// `ChatTransport` backed by the Telegram Bot API.
use crate::models::{MessageId, UserId};
use crate::transport::{ChatTransport, Content, Keyboard, Outgoing, TransportError};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ButtonRequest, ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, KeyboardButton,
    KeyboardMarkup, KeyboardRemove, MessageId as TgMessageId, ParseMode, ReplyMarkup,
};
use teloxide::{ApiError, RequestError};

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send(&self, user: UserId, message: Outgoing) -> Result<MessageId, TransportError> {
        let chat_id = ChatId(user.0);
        let markup = message.keyboard.map(reply_markup);

        let sent = match message.content {
            Content::Text(text) => {
                let mut request = self
                    .bot
                    .send_message(chat_id, text)
                    .parse_mode(ParseMode::Html)
                    .disable_notification(true);
                if let Some(markup) = markup {
                    request = request.reply_markup(markup);
                }
                request.await
            }
            Content::Photo { path, caption } => {
                let mut request = self
                    .bot
                    .send_photo(chat_id, InputFile::file(path))
                    .caption(caption)
                    .parse_mode(ParseMode::Html)
                    .disable_notification(true);
                if let Some(markup) = markup {
                    request = request.reply_markup(markup);
                }
                request.await
            }
        };

        sent.map(|msg| MessageId(msg.id.0)).map_err(classify)
    }

    async fn delete(&self, user: UserId, message: MessageId) -> Result<(), TransportError> {
        self.bot
            .delete_message(ChatId(user.0), TgMessageId(message.0))
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), TransportError> {
        self.bot
            .answer_callback_query(callback_id)
            .cache_time(1)
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

fn reply_markup(keyboard: Keyboard) -> ReplyMarkup {
    match keyboard {
        Keyboard::Inline(rows) => ReplyMarkup::InlineKeyboard(InlineKeyboardMarkup::new(
            rows.into_iter().map(|row| {
                row.into_iter()
                    .map(|button| InlineKeyboardButton::callback(button.text, button.data))
                    .collect::<Vec<_>>()
            }),
        )),
        Keyboard::RequestLocation(label) => ReplyMarkup::Keyboard(
            KeyboardMarkup::new(vec![vec![
                KeyboardButton::new(label).request(ButtonRequest::Location)
            ]])
            .resize_keyboard(true)
            .one_time_keyboard(true),
        ),
        Keyboard::Remove => ReplyMarkup::KeyboardRemove(KeyboardRemove::new()),
    }
}

/// Map Telegram failures onto the outcomes the dialog cares about.
fn classify(err: RequestError) -> TransportError {
    match err {
        RequestError::Api(ApiError::MessageToDeleteNotFound)
        | RequestError::Api(ApiError::MessageIdentifierNotSpecified)
        | RequestError::Api(ApiError::MessageIdInvalid)
        | RequestError::Api(ApiError::MessageCantBeDeleted) => TransportError::NotFound,
        RequestError::Api(ApiError::BotBlocked)
        | RequestError::Api(ApiError::UserDeactivated)
        | RequestError::Api(ApiError::BotKicked)
        | RequestError::Api(ApiError::ChatNotFound) => TransportError::Blocked,
        RequestError::RetryAfter(delay) => TransportError::RetryAfter(delay),
        other => TransportError::Other(other.to_string()),
    }
}
