/// OpenWeatherMap client: geocoding, current conditions and the short forecast.
use crate::models::{
    CityCandidate, Coordinates, CurrentWeather, Forecast, ForecastSample, MonthlyApiCounter, Units,
    FORECAST_POINTS,
};
use crate::store::SettingsStore;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

const OPENWEATHER_API_BASE: &str = "https://api.openweathermap.org";
const REQUEST_TIMEOUT_SECS: u64 = 10;
/// Candidates requested per search; also the provider's maximum.
pub const MAX_CANDIDATES: usize = 5;
/// Longest city query passed on to the geocoder.
const MAX_QUERY_CHARS: usize = 72;

#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected provider payload: {0}")]
    Malformed(String),
}

/// What the user typed or shared during the city search.
#[derive(Debug, Clone, PartialEq)]
pub enum CityQuery {
    Name(String),
    Location(Coordinates),
}

#[async_trait]
pub trait WeatherClient: Send + Sync {
    /// Ranked candidates for a query, at most [`MAX_CANDIDATES`].
    async fn resolve_city(
        &self,
        query: &CityQuery,
        lang: &str,
    ) -> Result<Vec<CityCandidate>, WeatherError>;

    async fn current_weather(
        &self,
        coordinates: Coordinates,
        units: Units,
        lang: &str,
    ) -> Result<CurrentWeather, WeatherError>;

    async fn forecast(
        &self,
        coordinates: Coordinates,
        units: Units,
        lang: &str,
    ) -> Result<Forecast, WeatherError>;
}

/// HTTP client for the OpenWeatherMap free tier.
///
/// Every request, successful or not, bumps the monthly API counter once.
pub struct OpenWeatherClient {
    client: Client,
    api_key: String,
    base_url: String,
    store: Arc<dyn SettingsStore>,
}

impl OpenWeatherClient {
    pub fn new(api_key: &str, store: Arc<dyn SettingsStore>) -> Result<Self, WeatherError> {
        Self::with_base_url(api_key, OPENWEATHER_API_BASE, store)
    }

    pub fn with_base_url(
        api_key: &str,
        base_url: &str,
        store: Arc<dyn SettingsStore>,
    ) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, WeatherError> {
        let url = format!("{}{}", self.base_url, path);
        let result = self
            .client
            .get(&url)
            .query(query)
            .query(&[("appid", self.api_key.as_str())])
            .send()
            .await;

        self.count_call().await;

        let response = result?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_else(|| status.to_string());
            error!("Error when requesting {}: {} {}", path, status.as_u16(), message);
            return Err(WeatherError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| WeatherError::Malformed(format!("{}: {}", path, e)))
    }

    async fn count_call(&self) {
        let month = MonthlyApiCounter::month_key(chrono::Utc::now());
        if let Err(e) = self.store.increment_api_counter(&month).await {
            warn!("Failed to increment the API counter for {}: {}", month, e);
        }
    }
}

#[async_trait]
impl WeatherClient for OpenWeatherClient {
    async fn resolve_city(
        &self,
        query: &CityQuery,
        lang: &str,
    ) -> Result<Vec<CityCandidate>, WeatherError> {
        let limit = MAX_CANDIDATES.to_string();
        let raw: Vec<GeoCity> = match query {
            CityQuery::Name(name) => {
                let cleaned = sanitize_city_query(name);
                if cleaned.is_empty() {
                    debug!("City query '{}' is empty after sanitizing", name);
                    return Ok(Vec::new());
                }
                self.get_json("/geo/1.0/direct", &[("q", cleaned), ("limit", limit)])
                    .await?
            }
            CityQuery::Location(coordinates) => {
                self.get_json(
                    "/geo/1.0/reverse",
                    &[
                        ("lat", coordinates.latitude.to_string()),
                        ("lon", coordinates.longitude.to_string()),
                        ("limit", limit),
                    ],
                )
                .await?
            }
        };

        Ok(raw
            .into_iter()
            .take(MAX_CANDIDATES)
            .map(|city| city.into_candidate(lang))
            .collect())
    }

    async fn current_weather(
        &self,
        coordinates: Coordinates,
        units: Units,
        lang: &str,
    ) -> Result<CurrentWeather, WeatherError> {
        let raw: CurrentResponse = self
            .get_json("/data/2.5/weather", &conditions_query(coordinates, units, lang, None))
            .await?;
        raw.into_current()
    }

    async fn forecast(
        &self,
        coordinates: Coordinates,
        units: Units,
        lang: &str,
    ) -> Result<Forecast, WeatherError> {
        let raw: ForecastResponse = self
            .get_json(
                "/data/2.5/forecast",
                &conditions_query(coordinates, units, lang, Some(FORECAST_POINTS)),
            )
            .await?;
        raw.into_forecast(units)
    }
}

fn conditions_query(
    coordinates: Coordinates,
    units: Units,
    lang: &str,
    count: Option<usize>,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("lat", coordinates.latitude.to_string()),
        ("lon", coordinates.longitude.to_string()),
        ("lang", lang.to_string()),
        ("units", units.as_str().to_string()),
    ];
    if let Some(count) = count {
        query.push(("cnt", count.to_string()));
    }
    query
}

/// Keep letters, hyphens and single spaces from the first 72 characters.
pub fn sanitize_city_query(input: &str) -> String {
    let mut cleaned = String::new();
    for ch in input.chars().take(MAX_QUERY_CHARS) {
        if ch.is_alphabetic() || ch == '-' {
            cleaned.push(ch);
        } else if ch.is_whitespace() && !cleaned.is_empty() && !cleaned.ends_with(' ') {
            cleaned.push(' ');
        }
    }
    cleaned.trim_end().to_string()
}

/// Render a unix timestamp shifted by a UTC offset in seconds.
fn local_time(timestamp: i64, offset: i64, format: &str) -> String {
    chrono::DateTime::from_timestamp(timestamp + offset, 0)
        .map(|time| time.format(format).to_string())
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeoCity {
    name: String,
    #[serde(default)]
    local_names: Option<HashMap<String, String>>,
    lat: f64,
    lon: f64,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

impl GeoCity {
    fn into_candidate(self, lang: &str) -> CityCandidate {
        let local_name = self
            .local_names
            .as_ref()
            .and_then(|names| names.get(lang))
            .cloned()
            .unwrap_or(self.name);

        let display_name = [Some(local_name.as_str()), self.state.as_deref(), self.country.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ");

        CityCandidate {
            local_name,
            display_name,
            coordinates: Coordinates::new(self.lat, self.lon),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Condition {
    id: u32,
    #[serde(default)]
    description: String,
    #[serde(default)]
    icon: String,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    temp: f64,
    #[serde(default)]
    feels_like: f64,
    #[serde(default)]
    pressure: f64,
    #[serde(default)]
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct WindBlock {
    speed: f64,
    #[serde(default)]
    gust: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PrecipitationBlock {
    #[serde(rename = "1h", default)]
    one_hour: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SunBlock {
    sunrise: i64,
    sunset: i64,
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    weather: Vec<Condition>,
    main: MainBlock,
    #[serde(default)]
    visibility: Option<f64>,
    wind: WindBlock,
    #[serde(default)]
    rain: Option<PrecipitationBlock>,
    #[serde(default)]
    snow: Option<PrecipitationBlock>,
    dt: i64,
    sys: SunBlock,
    #[serde(default)]
    timezone: i64,
}

impl CurrentResponse {
    fn into_current(self) -> Result<CurrentWeather, WeatherError> {
        let condition = self
            .weather
            .into_iter()
            .next()
            .ok_or_else(|| WeatherError::Malformed("current weather without conditions".into()))?;

        let precipitation = self
            .snow
            .and_then(|snow| snow.one_hour)
            .or_else(|| self.rain.and_then(|rain| rain.one_hour));

        Ok(CurrentWeather {
            temperature: self.main.temp.round() as i32,
            feels_like: self.main.feels_like.round() as i32,
            condition_code: condition.id,
            description: condition.description,
            wind_speed: self.wind.speed.round() as i32,
            gust: self.wind.gust.map(|gust| gust.round() as i32).filter(|g| *g > 0),
            humidity: self.main.humidity.round().clamp(0.0, 100.0) as u8,
            pressure: self.main.pressure.round().max(0.0) as u32,
            visibility: (self.visibility.unwrap_or(0.0) / 100.0).round() / 10.0,
            precipitation,
            time: local_time(self.dt, self.timezone, "%d %b %H:%M"),
            sunrise: local_time(self.sys.sunrise, self.timezone, "%H:%M"),
            sunset: local_time(self.sys.sunset, self.timezone, "%H:%M"),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ForecastItem {
    dt: i64,
    main: MainBlock,
    weather: Vec<Condition>,
    wind: WindBlock,
}

#[derive(Debug, Deserialize, Default)]
struct ForecastCity {
    #[serde(default)]
    timezone: i64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    list: Vec<ForecastItem>,
    #[serde(default)]
    city: ForecastCity,
}

impl ForecastResponse {
    fn into_forecast(self, units: Units) -> Result<Forecast, WeatherError> {
        let offset = self.city.timezone;
        let samples = self
            .list
            .into_iter()
            .take(FORECAST_POINTS)
            .map(|item| {
                let icon_code = item
                    .weather
                    .into_iter()
                    .next()
                    .map(|condition| condition.icon)
                    .ok_or_else(|| WeatherError::Malformed("forecast item without icon".into()))?;
                Ok(ForecastSample {
                    time_label: local_time(item.dt, offset, "%H:%M"),
                    icon_code,
                    temperature: item.main.temp.round() as i32,
                    wind_speed: item.wind.speed.round() as i32,
                    units,
                })
            })
            .collect::<Result<Vec<_>, WeatherError>>()?;

        let count = samples.len();
        Forecast::try_from(samples).map_err(|_| {
            WeatherError::Malformed(format!(
                "expected {} forecast points, got {}",
                FORECAST_POINTS, count
            ))
        })
    }
}
