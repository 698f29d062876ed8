/// In-memory collaborators for controller and scheduler tests.
use crate::dialog::DialogSettings;
use crate::models::{
    CityCandidate, Coordinates, CurrentWeather, Forecast, ForecastSample, MessageId,
    MonthlyApiCounter, Units, UserId, UserSession,
};
use crate::render::{load_font, ForecastRenderer, IconSet, FONT_FILE};
use crate::store::{SettingsStore, StoreError};
use crate::transport::{ChatTransport, Content, Outgoing, TransportError};
use crate::weather::{CityQuery, WeatherClient, WeatherError};
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<UserId, UserSession>>,
    counters: Mutex<HashMap<String, u64>>,
    save_failures: Mutex<usize>,
}

impl MemoryStore {
    /// Make the next `save` call fail with a pool timeout.
    pub fn fail_next_save(&self) {
        *self.save_failures.lock().unwrap() += 1;
    }

    pub fn session(&self, user: UserId) -> Option<UserSession> {
        self.sessions.lock().unwrap().get(&user).cloned()
    }

    pub fn total_api_calls(&self) -> u64 {
        self.counters.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load(&self, user: UserId) -> Result<Option<UserSession>, StoreError> {
        Ok(self.session(user))
    }

    async fn save(&self, session: &UserSession) -> Result<(), StoreError> {
        {
            let mut failures = self.save_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
        }
        self.sessions
            .lock()
            .unwrap()
            .insert(session.user_id, session.clone());
        Ok(())
    }

    async fn delete(&self, user: UserId) -> Result<(), StoreError> {
        self.sessions.lock().unwrap().remove(&user);
        Ok(())
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        Ok(self.sessions.lock().unwrap().len() as u64)
    }

    async fn configured_sessions(&self) -> Result<Vec<UserSession>, StoreError> {
        let mut sessions: Vec<_> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|session| session.config().is_some())
            .cloned()
            .collect();
        sessions.sort_by_key(|session| session.user_id);
        Ok(sessions)
    }

    async fn increment_api_counter(&self, month: &str) -> Result<(), StoreError> {
        *self
            .counters
            .lock()
            .unwrap()
            .entry(month.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn api_counter(&self, month: &str) -> Result<MonthlyApiCounter, StoreError> {
        Ok(MonthlyApiCounter {
            month_key: month.to_string(),
            count: self.counters.lock().unwrap().get(month).copied().unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub user: UserId,
    pub id: MessageId,
    pub message: Outgoing,
}

impl SentMessage {
    /// Text or caption.
    pub fn body(&self) -> &str {
        match &self.message.content {
            Content::Text(text) => text,
            Content::Photo { caption, .. } => caption,
        }
    }
}

/// Records every chat operation. Message ids start at 1000 so they never
/// collide with the inbound ids used by tests.
pub struct FakeTransport {
    next_id: Mutex<i32>,
    sent: Mutex<Vec<SentMessage>>,
    deleted: Mutex<Vec<(UserId, MessageId)>>,
    answered: Mutex<Vec<String>>,
    send_failures: Mutex<VecDeque<TransportError>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            next_id: Mutex::new(1000),
            sent: Mutex::default(),
            deleted: Mutex::default(),
            answered: Mutex::default(),
            send_failures: Mutex::default(),
        }
    }
}

impl FakeTransport {
    /// Make the next `send` calls fail, in order.
    pub fn fail_next_send(&self, error: TransportError) {
        self.send_failures.lock().unwrap().push_back(error);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_sent(&self) -> Option<SentMessage> {
        self.sent.lock().unwrap().last().cloned()
    }

    pub fn deleted(&self) -> Vec<(UserId, MessageId)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn answered(&self) -> Vec<String> {
        self.answered.lock().unwrap().clone()
    }

    /// Bot messages sent to `user` and not deleted since.
    pub fn live(&self, user: UserId) -> Vec<SentMessage> {
        let deleted = self.deleted.lock().unwrap();
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|sent| sent.user == user && !deleted.contains(&(user, sent.id)))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn send(&self, user: UserId, message: Outgoing) -> Result<MessageId, TransportError> {
        if let Some(error) = self.send_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            MessageId(*next)
        };
        self.sent.lock().unwrap().push(SentMessage { user, id, message });
        Ok(id)
    }

    async fn delete(&self, user: UserId, message: MessageId) -> Result<(), TransportError> {
        let known = self
            .sent
            .lock()
            .unwrap()
            .iter()
            .any(|sent| sent.user == user && sent.id == message);
        let mut deleted = self.deleted.lock().unwrap();
        if known && deleted.contains(&(user, message)) {
            return Err(TransportError::NotFound);
        }
        deleted.push((user, message));
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), TransportError> {
        self.answered.lock().unwrap().push(callback_id.to_string());
        Ok(())
    }
}

/// Canned provider answers keyed by the lowercase query.
#[derive(Default)]
pub struct FakeWeather {
    pub cities: Mutex<HashMap<String, Vec<CityCandidate>>>,
    pub delays: Mutex<HashMap<String, Duration>>,
    pub fail_search: Mutex<bool>,
    pub fail_current: Mutex<bool>,
    pub fail_forecast: Mutex<bool>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeWeather {
    pub fn with_city(self, query: &str, candidates: Vec<CityCandidate>) -> Self {
        self.cities
            .lock()
            .unwrap()
            .insert(query.to_lowercase(), candidates);
        self
    }

    /// Hold the search for `query` for `delay` before answering.
    pub fn with_delay(self, query: &str, delay: Duration) -> Self {
        self.delays
            .lock()
            .unwrap()
            .insert(query.to_lowercase(), delay);
        self
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn candidate(name: &str, country: &str, latitude: f64, longitude: f64) -> CityCandidate {
    CityCandidate {
        local_name: name.to_string(),
        display_name: format!("{}, {}", name, country),
        coordinates: Coordinates::new(latitude, longitude),
    }
}

pub fn sample_forecast(units: Units) -> Forecast {
    std::array::from_fn(|i| ForecastSample {
        time_label: format!("{:02}:00", (i * 3) % 24),
        icon_code: if i % 2 == 0 { "01d" } else { "10n" }.to_string(),
        temperature: -35 + 12 * i as i32,
        wind_speed: 3 * i as i32,
        units,
    })
}

pub fn sample_current() -> CurrentWeather {
    CurrentWeather {
        temperature: 14,
        feels_like: 12,
        condition_code: 803,
        description: "broken clouds".to_string(),
        wind_speed: 4,
        gust: Some(9),
        humidity: 72,
        pressure: 1012,
        visibility: 10.0,
        precipitation: None,
        time: "14 Nov 12:00".to_string(),
        sunrise: "07:12".to_string(),
        sunset: "16:21".to_string(),
    }
}

fn unavailable() -> WeatherError {
    WeatherError::Status {
        status: 503,
        message: "unavailable".to_string(),
    }
}

#[async_trait]
impl WeatherClient for FakeWeather {
    async fn resolve_city(
        &self,
        query: &CityQuery,
        _lang: &str,
    ) -> Result<Vec<CityCandidate>, WeatherError> {
        let key = match query {
            CityQuery::Name(name) => name.to_lowercase(),
            CityQuery::Location(c) => format!("{},{}", c.latitude, c.longitude),
        };
        self.record(format!("resolve:{}", key));
        let delay = self.delays.lock().unwrap().get(&key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_search.lock().unwrap() {
            return Err(unavailable());
        }
        Ok(self
            .cities
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    async fn current_weather(
        &self,
        coordinates: Coordinates,
        units: Units,
        _lang: &str,
    ) -> Result<CurrentWeather, WeatherError> {
        self.record(format!(
            "current:{},{}:{}",
            coordinates.latitude,
            coordinates.longitude,
            units.as_str()
        ));
        if *self.fail_current.lock().unwrap() {
            return Err(unavailable());
        }
        Ok(sample_current())
    }

    async fn forecast(
        &self,
        coordinates: Coordinates,
        units: Units,
        _lang: &str,
    ) -> Result<Forecast, WeatherError> {
        self.record(format!(
            "forecast:{},{}:{}",
            coordinates.latitude,
            coordinates.longitude,
            units.as_str()
        ));
        if *self.fail_forecast.lock().unwrap() {
            return Err(unavailable());
        }
        Ok(sample_forecast(units))
    }
}

/// Renderer with the bundled font and flat icons for the codes used by
/// [`sample_forecast`], writing into `dir`.
pub fn test_renderer(dir: &Path) -> ForecastRenderer {
    let font = load_font(&Path::new(env!("CARGO_MANIFEST_DIR")).join("assets").join(FONT_FILE))
        .unwrap();
    let icon = RgbaImage::from_pixel(64, 64, Rgba([0x30, 0x30, 0x30, 0xff]));
    let icons = IconSet::from_images([("01d".to_string(), icon.clone()), ("10n".to_string(), icon)]);
    ForecastRenderer::new(font, icons, dir.to_path_buf())
}

/// User 1 is the admin; notices disappear immediately.
pub fn test_settings() -> DialogSettings {
    DialogSettings {
        admins: vec![UserId(1)],
        refresh_interval_hours: 3,
        setup_notice_ttl: Duration::ZERO,
        about_ttl: Duration::ZERO,
        stats_ttl: Duration::ZERO,
        data_deleted_ttl: Duration::ZERO,
    }
}
