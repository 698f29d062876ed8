/// Telegram Weather Bot - Main entry point.
///
/// Walks each user through picking a city and units, then keeps a single
/// weather message (current conditions plus a rendered 24-hour forecast
/// strip) up to date on a fixed UTC schedule.
mod bot;
mod callback;
mod config;
mod dialog;
mod error;
mod format;
mod locale;
mod models;
mod render;
mod scheduler;
mod store;
mod telegram;
mod transport;
mod weather;

#[cfg(test)]
mod testing;

use bot::{handle_callback, handle_message, BotState};
use config::Config;
use dialog::{DialogController, DialogSettings, InboundKind};
use error::Result;
use locale::Locale;
use render::ForecastRenderer;
use scheduler::Scheduler;
use std::sync::Arc;
use store::SqliteStore;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::types::Update;
use teloxide::utils::command::BotCommands;
use telegram::TelegramTransport;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weather::OpenWeatherClient;

/// Telegram bot commands.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Weather Bot Commands:")]
enum Command {
    #[command(description = "Run the bot")]
    Start,
    #[command(description = "Bot info")]
    About,
    #[command(description = "Stop bot and delete data")]
    Stop,
    #[command(description = "Usage statistics (admins only)")]
    Stats,
}

/// Main bot command handler.
async fn handle_command(msg: Message, cmd: Command, state: BotState) -> ResponseResult<()> {
    let kind = match cmd {
        Command::Start => InboundKind::Start,
        Command::About => InboundKind::About,
        Command::Stop => InboundKind::Stop,
        Command::Stats => InboundKind::Stats,
    };
    bot::handle_command(msg, kind, state).await
}

/// Set up the command menu that appears in Telegram. `/stats` stays hidden.
async fn set_bot_commands(bot: &Bot) -> Result<()> {
    use teloxide::types::BotCommand;

    let commands = vec![
        BotCommand {
            command: "start".to_string(),
            description: "▶️ Run the bot".to_string(),
        },
        BotCommand {
            command: "about".to_string(),
            description: "ℹ️ Bot info".to_string(),
        },
        BotCommand {
            command: "stop".to_string(),
            description: "⏹ Stop bot and delete data".to_string(),
        },
    ];

    bot.set_my_commands(commands).await?;
    info!("Bot commands menu set successfully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_bot=info,teloxide=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Telegram Weather Bot...");

    // Load .env file if present (for development)
    if let Err(e) = dotenvy::dotenv() {
        info!("No .env file found or error loading it: {}", e);
    }

    // Load configuration from environment variables
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!("Configuration loaded successfully");
    info!("Settings database: {}", config.database_url);
    info!("Assets directory: {}", config.assets_dir.display());
    info!(
        "Weather refresh every {} hours, {} admin(s)",
        config.refresh_interval_hours,
        config.admins.len()
    );

    let bot = Bot::new(&config.bot_token);

    // Collaborators of the dialog controller
    let store = Arc::new(SqliteStore::connect(&config.database_url).await?);
    let locale = Arc::new(Locale::embedded()?);
    let weather = Arc::new(OpenWeatherClient::new(
        &config.weather_api_token,
        store.clone(),
    )?);
    let renderer = Arc::new(ForecastRenderer::load(
        &config.assets_dir,
        config.temp_dir.clone(),
    )?);
    let transport = Arc::new(TelegramTransport::new(bot.clone()));

    let controller = Arc::new(DialogController::new(
        transport,
        weather,
        store.clone(),
        renderer,
        locale,
        DialogSettings::from_config(&config),
    ));

    // Scheduled refresh of every configured user
    let scheduler = Scheduler::new(controller.clone(), store, config.refresh_interval_hours);
    tokio::spawn(scheduler.run());

    info!("Bot initialized, starting dispatcher...");

    // Set up command menu in Telegram
    set_bot_commands(&bot).await?;

    let state = BotState::new(controller);

    // Commands first, then any other message
    let message_handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(dptree::endpoint(handle_message));

    let callback_handler = Update::filter_callback_query().endpoint(handle_callback);

    let handler = dptree::entry()
        .branch(message_handler)
        .branch(callback_handler);

    // Start the dispatcher
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Bot stopped");

    Ok(())
}
