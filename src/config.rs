/// Configuration management for the weather bot.
use crate::error::{BotError, Result};
use crate::models::UserId;
use std::env;
use std::path::PathBuf;

/// Main application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token (from TELEGRAM_BOT_TOKEN).
    pub bot_token: String,
    /// OpenWeatherMap API key (from WEATHER_API_TOKEN).
    pub weather_api_token: String,
    /// Users allowed to run /stats.
    pub admins: Vec<UserId>,
    /// sqlx connection string for the settings database.
    pub database_url: String,
    /// Directory holding `font/` and `icons/`.
    pub assets_dir: PathBuf,
    /// Directory for rendered forecast images.
    pub temp_dir: PathBuf,
    /// Hours between scheduled weather refreshes.
    pub refresh_interval_hours: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `TELEGRAM_BOT_TOKEN`: The bot token from BotFather.
    /// - `WEATHER_API_TOKEN`: OpenWeatherMap API key.
    ///
    /// Optional environment variables:
    /// - `ADMINS`: Comma-separated admin user ids (default: none).
    /// - `DATABASE_URL`: Settings database (default: `sqlite://weather_bot.db?mode=rwc`).
    /// - `ASSETS_DIR`: Font and icon directory (default: `assets`).
    /// - `TEMP_DIR`: Where forecast images are written (default: `<tmp>/weather_bot`).
    /// - `REFRESH_INTERVAL_HOURS`: Refresh period, must divide 24 (default: 3).
    pub fn from_env() -> Result<Self> {
        let bot_token = required("TELEGRAM_BOT_TOKEN", "Get your token from @BotFather on Telegram.")?;
        let weather_api_token = required(
            "WEATHER_API_TOKEN",
            "Get your key at https://openweathermap.org/api.",
        )?;

        let admins = match env::var("ADMINS") {
            Ok(raw) => parse_admins(&raw)?,
            Err(_) => Vec::new(),
        };

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://weather_bot.db?mode=rwc".to_string());

        let assets_dir = env::var("ASSETS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("assets"));

        let temp_dir = env::var("TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("weather_bot"));

        let refresh_interval_hours = env::var("REFRESH_INTERVAL_HOURS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(3);

        let config = Config {
            bot_token,
            weather_api_token,
            admins,
            database_url,
            assets_dir,
            temp_dir,
            refresh_interval_hours,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check values that cannot be expressed by parsing alone.
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_hours == 0 || 24 % self.refresh_interval_hours != 0 {
            return Err(BotError::Config(format!(
                "REFRESH_INTERVAL_HOURS ({}) must be a divisor of 24",
                self.refresh_interval_hours
            )));
        }
        Ok(())
    }
}

fn required(name: &str, hint: &str) -> Result<String> {
    let value = env::var(name).map_err(|_| {
        BotError::Config(format!("{} environment variable is required. {}", name, hint))
    })?;

    if value.is_empty() {
        return Err(BotError::Config(format!("{} cannot be empty", name)));
    }

    Ok(value)
}

/// Parse `ADMINS`, e.g. `"123, 456"`.
pub fn parse_admins(raw: &str) -> Result<Vec<UserId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>().map(UserId).map_err(|_| {
                BotError::Config(format!("ADMINS contains an invalid user id: '{}'", part))
            })
        })
        .collect()
}
