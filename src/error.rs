/// Custom error types for the weather bot.
use crate::locale::LocaleError;
use crate::render::RenderError;
use crate::store::StoreError;
use crate::transport::TransportError;
use crate::weather::WeatherError;
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration errors (missing or invalid environment variables).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings store errors. Fatal to the current dialog transition.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Chat transport errors other than a missing delete target.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Forecast renderer set-up errors (font or icon assets).
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Translation table errors.
    #[error("Locale error: {0}")]
    Locale(#[from] LocaleError),

    /// Weather provider client construction errors.
    #[error("Weather client error: {0}")]
    Weather(#[from] WeatherError),

    /// Telegram API errors.
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),
}

/// Convenient Result alias using our custom error type.
pub type Result<T> = std::result::Result<T, BotError>;
