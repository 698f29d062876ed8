/// Shared value types for dialog sessions, cities and forecasts.
use std::fmt;

/// Number of samples in the short forecast strip.
pub const FORECAST_POINTS: usize = 8;

/// Telegram user identity. For private chats this is also the chat id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a message inside a user's chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// Measurement system chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Metric,
    Imperial,
}

impl Units {
    /// Name used by the weather provider and the settings store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "metric" => Some(Units::Metric),
            "imperial" => Some(Units::Imperial),
            _ => None,
        }
    }

    /// Single-character tag carried in callback payloads.
    pub fn tag(&self) -> char {
        match self {
            Units::Metric => 'c',
            Units::Imperial => 'f',
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "c" => Some(Units::Metric),
            "f" => Some(Units::Imperial),
            _ => None,
        }
    }

    pub fn temperature_glyph(&self) -> &'static str {
        match self {
            Units::Metric => "°C",
            Units::Imperial => "°F",
        }
    }

    pub fn wind_glyph(&self) -> &'static str {
        match self {
            Units::Metric => "m/s",
            Units::Imperial => "mph",
        }
    }
}

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Coordinates rounded to 6 decimal places, the precision kept everywhere.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: round6(latitude),
            longitude: round6(longitude),
        }
    }
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// A geocoded city offered to the user during the search step.
#[derive(Debug, Clone, PartialEq)]
pub struct CityCandidate {
    /// City name in the user's language when the provider knows it.
    pub local_name: String,
    /// Name plus state and country, shown on the selection button.
    pub display_name: String,
    pub coordinates: Coordinates,
}

/// City picked from the candidate list but not yet confirmed with units.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCity {
    pub name: String,
    pub coordinates: Coordinates,
}

/// Confirmed weather settings of a user.
#[derive(Debug, Clone, PartialEq)]
pub struct CityConfig {
    pub city: String,
    pub coordinates: Coordinates,
    pub units: Units,
}

impl CityConfig {
    pub fn commit(pending: PendingCity, units: Units) -> Self {
        Self {
            city: pending.name,
            coordinates: pending.coordinates,
            units,
        }
    }
}

/// Position of a user in the setup dialog.
///
/// Pending and committed city data live inside the variants that own them,
/// so a pending city cannot outlive the units prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum DialogState {
    AwaitingCityInput,
    AwaitingCitySelection,
    AwaitingUnitsConfirm { pending: PendingCity },
    Configured(CityConfig),
}

impl DialogState {
    /// Short name used for the persisted `state` column and in logs.
    pub fn name(&self) -> &'static str {
        match self {
            DialogState::AwaitingCityInput => "city_input",
            DialogState::AwaitingCitySelection => "city_selection",
            DialogState::AwaitingUnitsConfirm { .. } => "units_confirm",
            DialogState::Configured(_) => "configured",
        }
    }
}

/// Per-user dialog record persisted in the settings store.
#[derive(Debug, Clone, PartialEq)]
pub struct UserSession {
    pub user_id: UserId,
    pub language: String,
    pub last_message_id: Option<MessageId>,
    pub state: DialogState,
}

impl UserSession {
    /// Fresh session at the beginning of the setup dialog.
    pub fn new(user_id: UserId, language: impl Into<String>) -> Self {
        Self {
            user_id,
            language: language.into(),
            last_message_id: None,
            state: DialogState::AwaitingCityInput,
        }
    }

    pub fn config(&self) -> Option<&CityConfig> {
        match &self.state {
            DialogState::Configured(config) => Some(config),
            _ => None,
        }
    }
}

/// One column of the forecast strip.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastSample {
    /// Local time of the sample, `HH:MM`.
    pub time_label: String,
    /// Provider icon code such as `04d`.
    pub icon_code: String,
    /// Rounded temperature in the sample's units.
    pub temperature: i32,
    /// Rounded wind speed in the sample's units.
    pub wind_speed: i32,
    pub units: Units,
}

impl ForecastSample {
    pub fn temperature_label(&self) -> String {
        format!("{}{}", self.temperature, self.units.temperature_glyph())
    }

    pub fn wind_speed_label(&self) -> String {
        format!("{} {}", self.wind_speed, self.units.wind_glyph())
    }
}

/// Short forecast in chronological order.
pub type Forecast = [ForecastSample; FORECAST_POINTS];

/// Current conditions at the user's city, already rounded for display.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentWeather {
    pub temperature: i32,
    pub feels_like: i32,
    pub condition_code: u32,
    pub description: String,
    pub wind_speed: i32,
    pub gust: Option<i32>,
    pub humidity: u8,
    pub pressure: u32,
    /// Kilometres, one decimal place.
    pub visibility: f64,
    /// Millimetres during the last hour.
    pub precipitation: Option<f64>,
    /// Observation time, `DD Mon HH:MM` in the city's local time.
    pub time: String,
    pub sunrise: String,
    pub sunset: String,
}

/// Provider calls made during one calendar month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlyApiCounter {
    /// `YYYY.MM`
    pub month_key: String,
    pub count: u64,
}

impl MonthlyApiCounter {
    pub fn month_key(now: chrono::DateTime<chrono::Utc>) -> String {
        now.format("%Y.%m").to_string()
    }
}
