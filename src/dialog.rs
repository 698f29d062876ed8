/// Per-user setup dialog and the single live bot message.
///
/// Every user has at most one bot-authored dialog message on screen. Each
/// step deletes the previous one and records the id of its replacement in
/// the stored session, so the chat never accumulates stale prompts.
use crate::callback::CallbackAction;
use crate::config::Config;
use crate::error::Result;
use crate::format;
use crate::locale::{Locale, DEFAULT_LANGUAGE};
use crate::models::{
    CityCandidate, CityConfig, Coordinates, DialogState, MessageId, MonthlyApiCounter,
    PendingCity, Units, UserId, UserSession,
};
use crate::render::ForecastRenderer;
use crate::store::SettingsStore;
use crate::transport::{ChatTransport, InlineButton, Keyboard, Outgoing, TransportError};
use crate::weather::{CityQuery, WeatherClient};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use teloxide::utils::html;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// What the user did.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundKind {
    Start,
    Stop,
    About,
    Stats,
    Text(String),
    Location(Coordinates),
    Callback { id: String, data: String },
    /// Stickers, photos, unknown commands and the like.
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub user: UserId,
    /// Language reported by the client.
    pub language: String,
    /// The user's own message, if the event came with one.
    pub message_id: Option<MessageId>,
    pub kind: InboundKind,
}

/// Static knobs of the dialog.
#[derive(Debug, Clone)]
pub struct DialogSettings {
    pub admins: Vec<UserId>,
    pub refresh_interval_hours: u32,
    pub setup_notice_ttl: Duration,
    pub about_ttl: Duration,
    pub stats_ttl: Duration,
    pub data_deleted_ttl: Duration,
}

impl DialogSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            admins: config.admins.clone(),
            refresh_interval_hours: config.refresh_interval_hours,
            setup_notice_ttl: Duration::from_secs(15),
            about_ttl: Duration::from_secs(15),
            stats_ttl: Duration::from_secs(10),
            data_deleted_ttl: Duration::from_secs(5),
        }
    }

    fn is_admin(&self, user: UserId) -> bool {
        self.admins.contains(&user)
    }
}

pub struct DialogController {
    transport: Arc<dyn ChatTransport>,
    weather: Arc<dyn WeatherClient>,
    store: Arc<dyn SettingsStore>,
    renderer: Arc<ForecastRenderer>,
    locale: Arc<Locale>,
    settings: DialogSettings,
    /// Per-user input gates. A transition or refresh holds its user's gate
    /// until it finishes; later events for that user wait their turn.
    gates: std::sync::Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl DialogController {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        weather: Arc<dyn WeatherClient>,
        store: Arc<dyn SettingsStore>,
        renderer: Arc<ForecastRenderer>,
        locale: Arc<Locale>,
        settings: DialogSettings,
    ) -> Self {
        Self {
            transport,
            weather,
            store,
            renderer,
            locale,
            settings,
            gates: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn gate(&self, user: UserId) -> Arc<Mutex<()>> {
        let mut gates = self
            .gates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(gates.entry(user).or_default())
    }

    /// Drop the gate of a user without a session, unless someone still holds
    /// or waits on it.
    fn release_gate(&self, user: UserId) {
        let mut gates = self
            .gates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if gates
            .get(&user)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            gates.remove(&user);
        }
    }

    fn language_for(&self, lang: &str) -> String {
        if self.locale.supports(lang) {
            lang.to_string()
        } else {
            DEFAULT_LANGUAGE.to_string()
        }
    }

    fn text(&self, lang: &str, key: &'static str) -> String {
        self.locale.text(lang, key).to_string()
    }

    /// Apply one inbound event to the user's dialog.
    pub async fn handle(&self, event: InboundEvent) -> Result<()> {
        if let InboundKind::Callback { id, .. } = &event.kind {
            if let Err(e) = self.transport.answer_callback(id).await {
                warn!("Failed to answer callback for user {}: {}", event.user, e);
            }
        }

        let result = {
            let gate = self.gate(event.user);
            let _guard = gate.lock().await;

            match &event.kind {
                InboundKind::Start => self.start(&event).await,
                InboundKind::Stop => self.stop(&event).await,
                InboundKind::About => self.about(&event).await,
                InboundKind::Stats if self.settings.is_admin(event.user) => {
                    self.stats(&event).await
                }
                _ => self.advance(&event).await,
            }
        };

        if matches!(event.kind, InboundKind::Stop) {
            self.release_gate(event.user);
        }
        result
    }

    async fn start(&self, event: &InboundEvent) -> Result<()> {
        self.delete_inbound(event).await;

        let previous = self.store.load(event.user).await?;
        let mut session = UserSession::new(event.user, self.language_for(&event.language));
        session.last_message_id = previous.and_then(|s| s.last_message_id);

        info!("User {} started the setup dialog", event.user);
        self.ask_city(session, None).await
    }

    async fn stop(&self, event: &InboundEvent) -> Result<()> {
        self.delete_inbound(event).await;

        let lang = match self.store.load(event.user).await? {
            Some(session) => {
                if let Some(id) = session.last_message_id {
                    self.delete_message(event.user, id).await?;
                }
                session.language
            }
            None => self.language_for(&event.language),
        };

        self.store.delete(event.user).await?;
        info!("User {} stopped the bot, session deleted", event.user);

        self.send_transient(
            event.user,
            self.text(&lang, "data_deleted"),
            self.settings.data_deleted_ttl,
        )
        .await
    }

    async fn about(&self, event: &InboundEvent) -> Result<()> {
        self.delete_inbound(event).await;
        let lang = self.language_for(&event.language);
        self.send_transient(event.user, self.text(&lang, "about"), self.settings.about_ttl)
            .await
    }

    async fn stats(&self, event: &InboundEvent) -> Result<()> {
        self.delete_inbound(event).await;

        let month = MonthlyApiCounter::month_key(chrono::Utc::now());
        let counter = self.store.api_counter(&month).await?;
        let users = self.store.count_users().await?;
        let lang = self.language_for(&event.language);

        info!(
            "Admin {} requested statistics for {}",
            event.user, counter.month_key
        );
        self.send_transient(
            event.user,
            format::statistics(&self.locale, &lang, counter.count, users),
            self.settings.stats_ttl,
        )
        .await
    }

    /// State-dependent steps of the setup dialog.
    async fn advance(&self, event: &InboundEvent) -> Result<()> {
        let Some(session) = self.store.load(event.user).await? else {
            return self.discard(event).await;
        };

        match (&session.state, &event.kind) {
            (DialogState::AwaitingCityInput, InboundKind::Text(text)) => {
                let query = CityQuery::Name(text.clone());
                self.search_city(session, event, query).await
            }
            (DialogState::AwaitingCityInput, InboundKind::Location(coordinates)) => {
                let query = CityQuery::Location(*coordinates);
                self.search_city(session, event, query).await
            }
            (DialogState::AwaitingCitySelection, InboundKind::Callback { data, .. }) => {
                match CallbackAction::decode(data) {
                    Ok(CallbackAction::AnotherCity) => self.ask_city(session, None).await,
                    Ok(CallbackAction::SelectCity(pending)) => {
                        self.ask_units(session, pending).await
                    }
                    _ => self.discard(event).await,
                }
            }
            (DialogState::AwaitingUnitsConfirm { pending }, InboundKind::Callback { data, .. }) => {
                match CallbackAction::decode(data) {
                    Ok(CallbackAction::SelectUnits(units)) => {
                        let config = CityConfig::commit(pending.clone(), units);
                        self.complete_setup(session, config).await
                    }
                    _ => self.discard(event).await,
                }
            }
            _ => self.discard(event).await,
        }
    }

    /// Input with no handler in the current state: remove it and move on.
    async fn discard(&self, event: &InboundEvent) -> Result<()> {
        debug!("Discarding {:?} from user {}", event.kind, event.user);
        if !matches!(event.kind, InboundKind::Callback { .. }) {
            self.delete_inbound(event).await;
        }
        Ok(())
    }

    async fn ask_city(&self, mut session: UserSession, note: Option<&'static str>) -> Result<()> {
        let lang = session.language.clone();
        let text = match note {
            Some(key) => self.text(&lang, key),
            None => self.text(&lang, "greeting"),
        };

        session.state = DialogState::AwaitingCityInput;
        let message = Outgoing::text(text)
            .with_keyboard(Keyboard::RequestLocation(self.text(&lang, "send_location")));
        self.replace_dialog_message(&mut session, message).await?;
        Ok(())
    }

    async fn search_city(
        &self,
        mut session: UserSession,
        event: &InboundEvent,
        query: CityQuery,
    ) -> Result<()> {
        self.delete_inbound(event).await;

        let lang = session.language.clone();
        let searching =
            Outgoing::text(self.text(&lang, "searching")).with_keyboard(Keyboard::Remove);
        self.replace_dialog_message(&mut session, searching).await?;

        match self.weather.resolve_city(&query, &lang).await {
            Ok(candidates) if candidates.is_empty() => {
                info!("No cities found for user {} ({:?})", session.user_id, query);
                self.ask_city(session, Some("city_not_found")).await
            }
            Ok(candidates) => self.offer_candidates(session, candidates).await,
            Err(e) => {
                warn!("City search failed for user {}: {}", session.user_id, e);
                self.ask_city(session, Some("search_failed")).await
            }
        }
    }

    async fn offer_candidates(
        &self,
        mut session: UserSession,
        candidates: Vec<CityCandidate>,
    ) -> Result<()> {
        let lang = session.language.clone();
        let mut rows: Vec<Vec<InlineButton>> = candidates
            .into_iter()
            .map(|candidate| {
                let action = CallbackAction::SelectCity(PendingCity {
                    name: candidate.local_name,
                    coordinates: candidate.coordinates,
                });
                vec![InlineButton::new(candidate.display_name, action.encode())]
            })
            .collect();
        rows.push(vec![InlineButton::new(
            self.text(&lang, "another_city"),
            CallbackAction::AnotherCity.encode(),
        )]);

        session.state = DialogState::AwaitingCitySelection;
        let message =
            Outgoing::text(self.text(&lang, "select_city")).with_keyboard(Keyboard::Inline(rows));
        self.replace_dialog_message(&mut session, message).await?;
        Ok(())
    }

    async fn ask_units(&self, mut session: UserSession, pending: PendingCity) -> Result<()> {
        let lang = session.language.clone();
        let buttons: Vec<InlineButton> = [Units::Metric, Units::Imperial]
            .into_iter()
            .map(|units| {
                InlineButton::new(
                    units.temperature_glyph(),
                    CallbackAction::SelectUnits(units).encode(),
                )
            })
            .collect();

        info!("User {} picked {}", session.user_id, pending.name);
        session.state = DialogState::AwaitingUnitsConfirm { pending };
        let message = Outgoing::text(self.text(&lang, "choose_units"))
            .with_keyboard(Keyboard::Inline(vec![buttons]));
        self.replace_dialog_message(&mut session, message).await?;
        Ok(())
    }

    async fn complete_setup(&self, mut session: UserSession, config: CityConfig) -> Result<()> {
        let lang = session.language.clone();
        self.replace_dialog_message(&mut session, Outgoing::text(self.text(&lang, "loading")))
            .await?;

        info!(
            "User {} configured {} ({})",
            session.user_id,
            config.city,
            config.units.as_str()
        );
        session.state = DialogState::Configured(config);
        self.push_weather(&mut session).await?;

        self.send_transient(
            session.user_id,
            format::setup_complete(&self.locale, &lang, self.settings.refresh_interval_hours),
            self.settings.setup_notice_ttl,
        )
        .await
    }

    /// Fetch, render and show the weather of a configured session.
    ///
    /// Provider and render failures become notices inside the message.
    async fn push_weather(&self, session: &mut UserSession) -> Result<()> {
        let Some(config) = session.config().cloned() else {
            return Ok(());
        };
        let user = session.user_id;
        let lang = session.language.clone();

        let (current, forecast) = tokio::join!(
            self.weather.current_weather(config.coordinates, config.units, &lang),
            self.weather.forecast(config.coordinates, config.units, &lang),
        );

        let mut notices = Vec::new();
        let mut body = match current {
            Ok(current) => {
                format::current_weather(&self.locale, &lang, &config.city, config.units, &current)
            }
            Err(e) => {
                warn!("Current weather for user {} unavailable: {}", user, e);
                notices.push(self.text(&lang, "current_weather_error"));
                format!("<b>{}</b>", html::escape(&config.city))
            }
        };

        let image = match forecast {
            Ok(forecast) => match self.renderer.render_to_file(&forecast, user) {
                Ok(path) => Some(path),
                Err(e) => {
                    error!("Failed to render the forecast for user {}: {}", user, e);
                    notices.push(self.text(&lang, "forecast_error"));
                    None
                }
            },
            Err(e) => {
                warn!("Forecast for user {} unavailable: {}", user, e);
                notices.push(self.text(&lang, "forecast_error"));
                None
            }
        };

        for notice in notices {
            body.push_str("\n\n");
            body.push_str(&notice);
        }

        let message = match &image {
            Some(path) => Outgoing::photo(path.clone(), body),
            None => Outgoing::text(body),
        };
        let sent = self.replace_dialog_message(session, message).await;

        if let Some(path) = image {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }

        sent.map(|_| ())
    }

    /// Re-send the weather of a configured user.
    ///
    /// Returns `false` when the user has no configured session.
    pub async fn refresh_user(&self, user: UserId) -> Result<bool> {
        let gate = self.gate(user);
        let _guard = gate.lock().await;

        let Some(mut session) = self.store.load(user).await? else {
            return Ok(false);
        };
        if session.config().is_none() {
            return Ok(false);
        }

        self.push_weather(&mut session).await?;
        Ok(true)
    }

    /// Drop the session of a user who can no longer be reached.
    pub async fn forget_user(&self, user: UserId) -> Result<()> {
        {
            let gate = self.gate(user);
            let _guard = gate.lock().await;
            self.store.delete(user).await?;
        }
        self.release_gate(user);
        Ok(())
    }

    /// Delete the live message, send `message` in its place and persist the
    /// session with the new id.
    pub async fn replace_dialog_message(
        &self,
        session: &mut UserSession,
        message: Outgoing,
    ) -> Result<MessageId> {
        if let Some(previous) = session.last_message_id {
            self.delete_message(session.user_id, previous).await?;
            session.last_message_id = None;
        }

        let id = self.transport.send(session.user_id, message).await?;
        session.last_message_id = Some(id);
        self.store.save(session).await?;

        debug!(
            "User {} is now in state '{}' with message {}",
            session.user_id,
            session.state.name(),
            id.0
        );
        Ok(id)
    }

    async fn delete_message(&self, user: UserId, message: MessageId) -> Result<()> {
        match self.transport.delete(user, message).await {
            Ok(()) => Ok(()),
            Err(TransportError::NotFound) => {
                debug!("Message {} of user {} is already gone", message.0, user);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the user's own message; failures only get logged.
    async fn delete_inbound(&self, event: &InboundEvent) {
        let Some(id) = event.message_id else {
            return;
        };
        if let Err(e) = self.delete_message(event.user, id).await {
            warn!("Failed to delete message {} of user {}: {}", id.0, event.user, e);
        }
    }

    /// Send a notice that removes itself after `ttl`.
    async fn send_transient(&self, user: UserId, text: String, ttl: Duration) -> Result<()> {
        let id = self.transport.send(user, Outgoing::text(text)).await?;
        let transport = Arc::clone(&self.transport);

        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            match transport.delete(user, id).await {
                Ok(()) | Err(TransportError::NotFound) => {}
                Err(e) => warn!("Failed to delete notice {} of user {}: {}", id.0, user, e),
            }
        });

        Ok(())
    }
}
