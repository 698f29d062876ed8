/// Inline button payloads.
///
/// Telegram limits callback data to 64 bytes, so city payloads carry the
/// coordinates plus a truncated local name in a fixed `&`-separated format.
use crate::models::{Coordinates, PendingCity, Units};
use thiserror::Error;

/// Hard ceiling of Telegram's callback data field, in bytes.
pub const MAX_CALLBACK_BYTES: usize = 64;
/// Longest city name kept in a city payload, in characters.
pub const MAX_CITY_NAME_CHARS: usize = 35;

const CITY_PREFIX: &str = "city_data=";
const UNITS_PREFIX: &str = "units=";
const ANOTHER_CITY: &str = "another_city";

#[derive(Error, Debug, PartialEq)]
pub enum CallbackError {
    #[error("unknown callback payload: {0}")]
    Unknown(String),
    #[error("malformed city payload: {0}")]
    MalformedCity(String),
    #[error("unknown units tag: {0}")]
    UnknownUnits(String),
}

/// Decoded meaning of an inline button press.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackAction {
    /// Discard the candidate list and search again.
    AnotherCity,
    SelectCity(PendingCity),
    SelectUnits(Units),
}

impl CallbackAction {
    pub fn encode(&self) -> String {
        match self {
            CallbackAction::AnotherCity => ANOTHER_CITY.to_string(),
            CallbackAction::SelectCity(city) => encode_city(&city.name, city.coordinates),
            CallbackAction::SelectUnits(units) => format!("{}{}", UNITS_PREFIX, units.tag()),
        }
    }

    pub fn decode(data: &str) -> Result<Self, CallbackError> {
        if data == ANOTHER_CITY {
            return Ok(CallbackAction::AnotherCity);
        }

        if let Some(tag) = data.strip_prefix(UNITS_PREFIX) {
            return Units::from_tag(tag)
                .map(CallbackAction::SelectUnits)
                .ok_or_else(|| CallbackError::UnknownUnits(tag.to_string()));
        }

        if let Some(fields) = data.strip_prefix(CITY_PREFIX) {
            return decode_city(fields).map(CallbackAction::SelectCity);
        }

        Err(CallbackError::Unknown(data.to_string()))
    }
}

fn encode_city(name: &str, coordinates: Coordinates) -> String {
    let head = format!(
        "{}{}&{}&",
        CITY_PREFIX, coordinates.latitude, coordinates.longitude
    );
    let budget = MAX_CALLBACK_BYTES.saturating_sub(head.len());

    let mut truncated = String::with_capacity(budget);
    for ch in name.chars().take(MAX_CITY_NAME_CHARS) {
        if truncated.len() + ch.len_utf8() > budget {
            break;
        }
        truncated.push(ch);
    }

    head + &truncated
}

fn decode_city(fields: &str) -> Result<PendingCity, CallbackError> {
    let malformed = || CallbackError::MalformedCity(fields.to_string());

    // The name is last and may itself contain '&'.
    let mut parts = fields.splitn(3, '&');
    let latitude = parts
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(malformed)?;
    let longitude = parts
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(malformed)?;
    let name = parts.next().ok_or_else(malformed)?;

    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(malformed());
    }

    Ok(PendingCity {
        name: name.to_string(),
        coordinates: Coordinates::new(latitude, longitude),
    })
}
