/// HTML texts built from weather data and counters.
use crate::locale::Locale;
use crate::models::{CurrentWeather, Units};
use teloxide::utils::html;

/// Monthly request quota of the free provider plan.
pub const MONTHLY_API_QUOTA: u64 = 1_000_000;

/// Emoji for an OpenWeatherMap condition code.
pub fn weather_emoji(code: u32) -> &'static str {
    match code {
        800 => "☀",
        801 => "🌤",
        802 => "☁",
        803 | 804 => "🌥",
        500..=504 => "🌦",
        300..=321 | 520..=531 => "🌧",
        200..=232 => "⛈",
        511 | 600..=622 => "🌨",
        701..=781 => "🌫",
        _ => "🌀",
    }
}

/// Magnus approximation of the dew point. Input and result are in `units`;
/// the formula itself runs in Celsius.
pub fn dew_point(temperature: i32, humidity: u8, units: Units) -> i32 {
    const A: f64 = 17.27;
    const B: f64 = 237.7;

    let t = match units {
        Units::Metric => f64::from(temperature),
        Units::Imperial => (f64::from(temperature) - 32.0) * 5.0 / 9.0,
    };
    let h = f64::from(humidity.max(1)) / 100.0;
    let gamma = A * t / (B + t) + h.ln();
    let dew = B * gamma / (A - gamma);

    match units {
        Units::Metric => dew.round() as i32,
        Units::Imperial => (dew * 9.0 / 5.0 + 32.0).round() as i32,
    }
}

/// Caption of the weather message.
pub fn current_weather(
    locale: &Locale,
    lang: &str,
    city: &str,
    units: Units,
    weather: &CurrentWeather,
) -> String {
    let temp = units.temperature_glyph();
    let wind = units.wind_glyph();

    let precipitation = match weather.precipitation {
        Some(mm) if mm > 0.0 => format!(
            ", <b>{} mm</b> {}",
            mm,
            locale.text(lang, "precipitation")
        ),
        _ => String::new(),
    };
    let gust = match weather.gust {
        Some(gust) => format!(
            ", {}: <b>{} {}</b>",
            locale.text(lang, "gusts_to"),
            gust,
            wind
        ),
        None => String::new(),
    };

    format!(
        "<b>{city}, {time}</b>\n\
         {emoji} {description}{precipitation}\n\n\
         🌡 <b>{t}{temp}</b>, {feels_like} <b>{feels}{temp}</b>\n\n\
         💦 {humidity_label}: <b>{humidity}%</b>, {dew_label}: <b>{dew}{temp}</b>\n\
         💨 {wind_label}: <b>{speed} {wind}</b>{gust}\n\
         🌡 {pressure_label}: <b>{pressure} hPa</b>\n\
         🌫️ {visibility_label}: <b>{visibility} km</b>\n\n\
         🌅 {sunrise_label}: <b>{sunrise}</b>  🌇 {sunset_label}: <b>{sunset}</b>",
        city = html::escape(city),
        time = weather.time,
        emoji = weather_emoji(weather.condition_code),
        description = html::escape(&weather.description),
        t = weather.temperature,
        feels_like = locale.text(lang, "feels_like"),
        feels = weather.feels_like,
        humidity_label = locale.text(lang, "humidity"),
        humidity = weather.humidity,
        dew_label = locale.text(lang, "dew_point"),
        dew = dew_point(weather.temperature, weather.humidity, units),
        wind_label = locale.text(lang, "wind_speed"),
        speed = weather.wind_speed,
        pressure_label = locale.text(lang, "pressure"),
        pressure = weather.pressure,
        visibility_label = locale.text(lang, "visibility"),
        visibility = weather.visibility,
        sunrise_label = locale.text(lang, "sunrise"),
        sunrise = weather.sunrise,
        sunset_label = locale.text(lang, "sunset"),
        sunset = weather.sunset,
    )
}

/// Admin statistics: provider usage against the quota and the user count.
pub fn statistics(locale: &Locale, lang: &str, api_calls: u64, users: u64) -> String {
    let percent = (api_calls as f64 / MONTHLY_API_QUOTA as f64 * 100.0).round();
    format!(
        "ℹ️ <b>{}:</b>\n\n\
         • {}:\n  <b>{} %</b>, <b>{}</b> {} <b>{}</b>\n\n\
         • {}: <b>{}</b>",
        locale.text(lang, "stats_title"),
        locale.text(lang, "stats_api"),
        percent,
        group_thousands(api_calls),
        locale.text(lang, "stats_of"),
        group_thousands(MONTHLY_API_QUOTA),
        locale.text(lang, "stats_users"),
        users
    )
}

/// Notice sent once the setup dialog is finished.
pub fn setup_complete(locale: &Locale, lang: &str, refresh_hours: u32) -> String {
    locale
        .text(lang, "setup_complete")
        .replace("{hours}", &refresh_hours.to_string())
}

/// `1234567` -> `1 234 567`
fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }
    grouped
}
