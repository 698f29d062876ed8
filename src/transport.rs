/// Outgoing chat operations used by the dialog controller and the scheduler.
use crate::models::{MessageId, UserId};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by the chat platform.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The target message is already gone or no id was given.
    #[error("message not found")]
    NotFound,
    /// The user blocked the bot or deleted their account.
    #[error("user blocked the bot or was deactivated")]
    Blocked,
    /// Flood control; the request may be repeated after the delay.
    #[error("retry after {0:?}")]
    RetryAfter(Duration),
    #[error("{0}")]
    Other(String),
}

/// One inline button with its callback payload.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineButton {
    pub text: String,
    pub data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Keyboard {
    Inline(Vec<Vec<InlineButton>>),
    /// One-time reply keyboard with a single "share location" button.
    RequestLocation(String),
    /// Remove a previously shown reply keyboard.
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    Photo { path: PathBuf, caption: String },
}

/// A message to send. Texts are HTML formatted and sent silently.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub content: Content,
    pub keyboard: Option<Keyboard>,
}

impl Outgoing {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Content::Text(text.into()),
            keyboard: None,
        }
    }

    pub fn photo(path: PathBuf, caption: impl Into<String>) -> Self {
        Self {
            content: Content::Photo {
                path,
                caption: caption.into(),
            },
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, user: UserId, message: Outgoing) -> Result<MessageId, TransportError>;

    async fn delete(&self, user: UserId, message: MessageId) -> Result<(), TransportError>;

    /// Acknowledge an inline button press so the client stops its spinner.
    async fn answer_callback(&self, callback_id: &str) -> Result<(), TransportError>;
}
