/// Forecast strip: eight coloured columns with time, icon, temperature and wind.
use crate::models::{Forecast, ForecastSample, Units, UserId};
use ab_glyph::{FontArc, PxScale};
use image::{imageops, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CANVAS_WIDTH: u32 = 799;
pub const CANVAS_HEIGHT: u32 = 199;
pub const COLUMN_WIDTH: u32 = 99;
pub const COLUMN_STRIDE: i32 = 100;

const BACKGROUND: Rgba<u8> = Rgba([0x26, 0x26, 0x26, 0xff]);
const WHITE: Rgba<u8> = Rgba([0xff, 0xff, 0xff, 0xff]);
const BLACK: Rgba<u8> = Rgba([0x00, 0x00, 0x00, 0xff]);

const TEMPERATURE_BAND_HEIGHT: u32 = 164;
const WIND_BAND_TOP: i32 = 165;
const TIME_TEXT_Y: i32 = 15;
const ICON_OFFSET_X: i32 = 17;
const ICON_Y: i32 = 50;
const TEMPERATURE_TEXT_Y: i32 = 126;
const WIND_TEXT_Y: i32 = 173;
const LARGE_TEXT: f32 = 24.0;
const SMALL_TEXT: f32 = 18.0;

pub const FONT_FILE: &str = "font/DejaVuSans-Bold.ttf";
pub const ICONS_DIR: &str = "icons";

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to load font: {0}")]
    Font(String),
    #[error("no icon for weather code '{0}'")]
    MissingIcon(String),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Half-open colour band, `lower` inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub lower: i32,
    pub color: Rgba<u8>,
    /// Light fill, drawn with black text.
    pub light: bool,
}

const fn band(lower: i32, rgb: u32, light: bool) -> Band {
    Band {
        lower,
        color: Rgba([(rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8, 0xff]),
        light,
    }
}

/// Celsius bands, hottest first.
pub const TEMPERATURE_BANDS: [Band; 16] = [
    band(50, 0x2b0001, false),
    band(40, 0x6b1527, false),
    band(30, 0xb73466, false),
    band(25, 0xdb6c54, false),
    band(20, 0xe09f41, true),
    band(15, 0xe1ce39, true),
    band(10, 0xb8db41, true),
    band(5, 0x5ac84b, true),
    band(0, 0x4db094, true),
    band(-5, 0x4178be, false),
    band(-10, 0x5751ac, false),
    band(-15, 0x291e6a, false),
    band(-20, 0x8e108e, false),
    band(-25, 0xc45bc4, false),
    band(-30, 0xf3a5f3, true),
    band(i32::MIN, 0xe3e3e3, true),
];

/// Wind bands in m/s, strongest first.
pub const WIND_BANDS: [Band; 15] = [
    band(140, 0x2b0001, false),
    band(130, 0x631a1b, false),
    band(120, 0x901c4f, false),
    band(110, 0xa3355b, false),
    band(100, 0xc7466f, false),
    band(90, 0xd5784c, false),
    band(80, 0xd69b44, true),
    band(70, 0xd8bf3d, true),
    band(60, 0xcad63e, true),
    band(50, 0x8ec94b, true),
    band(40, 0x4abe47, true),
    band(30, 0x4ea98f, false),
    band(20, 0x4083b8, false),
    band(10, 0x5258ab, false),
    band(i32::MIN, 0x5a5673, false),
];

/// Index of the first band whose lower bound does not exceed `value`.
///
/// Tables are ordered by descending bound and end with `i32::MIN`.
pub fn bucket_index(bands: &[Band], value: i32) -> usize {
    bands
        .iter()
        .position(|band| value >= band.lower)
        .unwrap_or(bands.len().saturating_sub(1))
}

pub fn celsius_for_bucketing(sample: &ForecastSample) -> i32 {
    match sample.units {
        Units::Metric => sample.temperature,
        Units::Imperial => ((f64::from(sample.temperature) - 32.0) * 5.0 / 9.0).round() as i32,
    }
}

pub fn wind_ms_for_bucketing(sample: &ForecastSample) -> i32 {
    match sample.units {
        Units::Metric => sample.wind_speed,
        Units::Imperial => (f64::from(sample.wind_speed) / 2.237).round() as i32,
    }
}

fn text_color(band: &Band) -> Rgba<u8> {
    if band.light {
        BLACK
    } else {
        WHITE
    }
}

/// Paint every visible pixel white, keeping its alpha.
pub fn whiten(icon: &RgbaImage) -> RgbaImage {
    let mut white = icon.clone();
    for pixel in white.pixels_mut() {
        if pixel[3] > 0 {
            *pixel = Rgba([0xff, 0xff, 0xff, pixel[3]]);
        }
    }
    white
}

/// Weather icons keyed by provider code (`01d`, `10n`, ...).
#[derive(Debug, Clone, Default)]
pub struct IconSet {
    icons: HashMap<String, RgbaImage>,
}

impl IconSet {
    pub fn from_images(icons: impl IntoIterator<Item = (String, RgbaImage)>) -> Self {
        Self {
            icons: icons.into_iter().collect(),
        }
    }

    /// Load every `<code>.png` in `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self, RenderError> {
        let mut icons = HashMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("png") {
                continue;
            }
            let Some(code) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let icon = image::open(&path)?.to_rgba8();
            icons.insert(code.to_string(), icon);
        }
        debug!("Loaded {} weather icons from {}", icons.len(), dir.display());
        Ok(Self { icons })
    }

    pub fn len(&self) -> usize {
        self.icons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.icons.is_empty()
    }

    pub fn get(&self, code: &str) -> Result<&RgbaImage, RenderError> {
        self.icons
            .get(code)
            .ok_or_else(|| RenderError::MissingIcon(code.to_string()))
    }
}

pub struct ForecastRenderer {
    font: FontArc,
    icons: IconSet,
    output_dir: PathBuf,
}

impl ForecastRenderer {
    pub fn new(font: FontArc, icons: IconSet, output_dir: PathBuf) -> Self {
        Self {
            font,
            icons,
            output_dir,
        }
    }

    /// Load the font and icons from `assets_dir` and prepare `output_dir`.
    pub fn load(assets_dir: &Path, output_dir: PathBuf) -> Result<Self, RenderError> {
        let font = load_font(&assets_dir.join(FONT_FILE))?;
        let icons = IconSet::load_dir(&assets_dir.join(ICONS_DIR))?;
        if icons.is_empty() {
            warn!("No weather icons found in {}", assets_dir.join(ICONS_DIR).display());
        }
        fs::create_dir_all(&output_dir)?;
        info!(
            "Forecast renderer ready: {} icons, output in {}",
            icons.len(),
            output_dir.display()
        );
        Ok(Self::new(font, icons, output_dir))
    }

    /// Draw the strip. The result depends only on `forecast` and the assets.
    pub fn render(&self, forecast: &Forecast) -> Result<RgbaImage, RenderError> {
        let mut canvas = RgbaImage::from_pixel(CANVAS_WIDTH, CANVAS_HEIGHT, BACKGROUND);
        for (i, sample) in forecast.iter().enumerate() {
            self.draw_column(&mut canvas, i as i32 * COLUMN_STRIDE, sample)?;
        }
        Ok(canvas)
    }

    /// Render and write `<output_dir>/<user>.png`; the caller removes it.
    pub fn render_to_file(&self, forecast: &Forecast, user: UserId) -> Result<PathBuf, RenderError> {
        let image = self.render(forecast)?;
        let path = self.output_dir.join(format!("{}.png", user));
        image.save_with_format(&path, ImageFormat::Png)?;
        Ok(path)
    }

    fn draw_column(
        &self,
        canvas: &mut RgbaImage,
        x: i32,
        sample: &ForecastSample,
    ) -> Result<(), RenderError> {
        let temperature =
            TEMPERATURE_BANDS[bucket_index(&TEMPERATURE_BANDS, celsius_for_bucketing(sample))];
        let color = text_color(&temperature);

        draw_filled_rect_mut(
            canvas,
            Rect::at(x, 0).of_size(COLUMN_WIDTH, TEMPERATURE_BAND_HEIGHT),
            temperature.color,
        );
        self.draw_centered(canvas, x, TIME_TEXT_Y, LARGE_TEXT, color, &sample.time_label);

        let icon = self.icons.get(&sample.icon_code)?;
        let icon_x = i64::from(x + ICON_OFFSET_X);
        if temperature.light {
            imageops::overlay(canvas, icon, icon_x, i64::from(ICON_Y));
        } else {
            imageops::overlay(canvas, &whiten(icon), icon_x, i64::from(ICON_Y));
        }

        self.draw_centered(
            canvas,
            x,
            TEMPERATURE_TEXT_Y,
            LARGE_TEXT,
            color,
            &sample.temperature_label(),
        );

        let wind = WIND_BANDS[bucket_index(&WIND_BANDS, wind_ms_for_bucketing(sample))];
        draw_filled_rect_mut(
            canvas,
            Rect::at(x, WIND_BAND_TOP).of_size(COLUMN_WIDTH, CANVAS_HEIGHT - WIND_BAND_TOP as u32),
            wind.color,
        );
        self.draw_centered(
            canvas,
            x,
            WIND_TEXT_Y,
            SMALL_TEXT,
            text_color(&wind),
            &sample.wind_speed_label(),
        );

        Ok(())
    }

    fn draw_centered(
        &self,
        canvas: &mut RgbaImage,
        column_x: i32,
        y: i32,
        size: f32,
        color: Rgba<u8>,
        text: &str,
    ) {
        let scale = PxScale::from(size);
        let (width, _) = text_size(scale, &self.font, text);
        draw_text_mut(canvas, color, column_x + centering_offset(width), y, scale, &self.font, text);
    }
}

/// Offset that centres `text_width` pixels inside one column.
pub fn centering_offset(text_width: u32) -> i32 {
    ((f64::from(COLUMN_WIDTH) - f64::from(text_width)) / 2.0).round() as i32
}

pub fn load_font(path: &Path) -> Result<FontArc, RenderError> {
    let bytes = fs::read(path)?;
    FontArc::try_from_vec(bytes)
        .map_err(|e| RenderError::Font(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_forecast;
    use std::io::Cursor;

    fn font() -> FontArc {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets").join(FONT_FILE);
        load_font(&path).unwrap()
    }

    /// Dark ring on a transparent square.
    fn ring_icon() -> RgbaImage {
        RgbaImage::from_fn(64, 64, |x, y| {
            let dx = x as i32 - 32;
            let dy = y as i32 - 32;
            let d2 = dx * dx + dy * dy;
            if (400..900).contains(&d2) {
                Rgba([0x30, 0x30, 0x30, 0xc0])
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }

    fn renderer(dir: &Path) -> ForecastRenderer {
        let icons = IconSet::from_images([
            ("01d".to_string(), ring_icon()),
            ("10n".to_string(), ring_icon()),
        ]);
        ForecastRenderer::new(font(), icons, dir.to_path_buf())
    }

    fn sample(temperature: i32, wind_speed: i32, units: Units) -> ForecastSample {
        ForecastSample {
            time_label: "12:00".to_string(),
            icon_code: "01d".to_string(),
            temperature,
            wind_speed,
            units,
        }
    }

    fn png_bytes(image: &RgbaImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_bucket_boundaries_are_lower_inclusive() {
        assert_eq!(bucket_index(&TEMPERATURE_BANDS, 50), 0);
        assert_eq!(bucket_index(&TEMPERATURE_BANDS, 49), 1);
        assert_eq!(bucket_index(&TEMPERATURE_BANDS, 0), 8);
        assert_eq!(bucket_index(&TEMPERATURE_BANDS, -1), 9);
        assert_eq!(bucket_index(&TEMPERATURE_BANDS, -30), 14);
        assert_eq!(bucket_index(&TEMPERATURE_BANDS, -31), 15);
        assert_eq!(bucket_index(&TEMPERATURE_BANDS, i32::MIN), 15);

        assert_eq!(bucket_index(&WIND_BANDS, 0), 14);
        assert_eq!(bucket_index(&WIND_BANDS, 10), 13);
        assert_eq!(bucket_index(&WIND_BANDS, 139), 1);
        assert_eq!(bucket_index(&WIND_BANDS, 500), 0);
    }

    #[test]
    fn test_tables_are_strictly_descending() {
        for bands in [&TEMPERATURE_BANDS[..], &WIND_BANDS[..]] {
            assert!(bands.windows(2).all(|pair| pair[0].lower > pair[1].lower));
            assert_eq!(bands.last().map(|band| band.lower), Some(i32::MIN));
        }
    }

    #[test]
    fn test_fahrenheit_and_celsius_share_buckets() {
        for (celsius, fahrenheit) in [(-30, -22), (0, 32), (20, 68), (50, 122)] {
            let metric = sample(celsius, 0, Units::Metric);
            let imperial = sample(fahrenheit, 0, Units::Imperial);
            assert_eq!(celsius_for_bucketing(&imperial), celsius);
            assert_eq!(
                bucket_index(&TEMPERATURE_BANDS, celsius_for_bucketing(&metric)),
                bucket_index(&TEMPERATURE_BANDS, celsius_for_bucketing(&imperial)),
            );
        }
    }

    #[test]
    fn test_imperial_wind_conversion() {
        assert_eq!(wind_ms_for_bucketing(&sample(0, 22, Units::Imperial)), 10);
        assert_eq!(wind_ms_for_bucketing(&sample(0, 22, Units::Metric)), 22);
    }

    #[test]
    fn test_contrast_matches_light_bands() {
        assert_eq!(text_color(&TEMPERATURE_BANDS[bucket_index(&TEMPERATURE_BANDS, 22)]), BLACK);
        assert_eq!(text_color(&TEMPERATURE_BANDS[bucket_index(&TEMPERATURE_BANDS, 27)]), WHITE);
        assert_eq!(text_color(&TEMPERATURE_BANDS[bucket_index(&TEMPERATURE_BANDS, -22)]), WHITE);
        assert_eq!(text_color(&TEMPERATURE_BANDS[bucket_index(&TEMPERATURE_BANDS, -27)]), BLACK);
        assert_eq!(text_color(&TEMPERATURE_BANDS[bucket_index(&TEMPERATURE_BANDS, -40)]), BLACK);
        assert_eq!(text_color(&WIND_BANDS[bucket_index(&WIND_BANDS, 45)]), BLACK);
        assert_eq!(text_color(&WIND_BANDS[bucket_index(&WIND_BANDS, 95)]), WHITE);
    }

    #[test]
    fn test_whiten_keeps_alpha() {
        let icon = ring_icon();
        let white = whiten(&icon);
        for (before, after) in icon.pixels().zip(white.pixels()) {
            assert_eq!(before[3], after[3]);
            if before[3] > 0 {
                assert_eq!(&after.0[..3], &[0xff, 0xff, 0xff]);
            } else {
                assert_eq!(before, after);
            }
        }
    }

    #[test]
    fn test_centering_offset() {
        assert_eq!(centering_offset(99), 0);
        assert_eq!(centering_offset(50), 25);
        assert_eq!(centering_offset(40), 30);
    }

    #[test]
    fn test_render_layout() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path());
        let forecast = sample_forecast(Units::Metric);
        let image = renderer.render(&forecast).unwrap();

        assert_eq!(image.dimensions(), (CANVAS_WIDTH, CANVAS_HEIGHT));
        // Column gaps and the separator row keep the background.
        assert_eq!(*image.get_pixel(99, 5), BACKGROUND);
        assert_eq!(*image.get_pixel(5, 164), BACKGROUND);

        // First sample is -35 °C and 0 m/s.
        assert_eq!(*image.get_pixel(2, 2), TEMPERATURE_BANDS[15].color);
        assert_eq!(*image.get_pixel(2, 197), WIND_BANDS[14].color);
        // Third sample is -11 °C.
        assert_eq!(*image.get_pixel(202, 2), TEMPERATURE_BANDS[11].color);
    }

    #[test]
    fn test_icon_is_whitened_on_dark_bands() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path());
        let mut forecast = sample_forecast(Units::Metric);
        forecast[0].temperature = 27;
        forecast[1].temperature = 22;
        let image = renderer.render(&forecast).unwrap();

        // Pixel on the ring, 20 px right of the icon centre.
        let on_dark = image.get_pixel(ICON_OFFSET_X as u32 + 52, ICON_Y as u32 + 32);
        let on_light = image.get_pixel(100 + ICON_OFFSET_X as u32 + 52, ICON_Y as u32 + 32);
        assert!(on_dark[0] > TEMPERATURE_BANDS[3].color[0]);
        assert!(on_light[0] < TEMPERATURE_BANDS[4].color[0]);
    }

    #[test]
    fn test_render_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path());
        let forecast = sample_forecast(Units::Imperial);

        let first = png_bytes(&renderer.render(&forecast).unwrap());
        let second = png_bytes(&renderer.render(&forecast).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn test_render_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path());
        let path = renderer
            .render_to_file(&sample_forecast(Units::Metric), UserId(42))
            .unwrap();

        assert_eq!(path, dir.path().join("42.png"));
        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded.dimensions(), (CANVAS_WIDTH, CANVAS_HEIGHT));
    }

    #[test]
    fn test_missing_icon_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path());
        let mut forecast = sample_forecast(Units::Metric);
        forecast[3].icon_code = "99x".to_string();
        assert!(matches!(
            renderer.render(&forecast),
            Err(RenderError::MissingIcon(code)) if code == "99x"
        ));
    }

    #[test]
    fn test_icon_set_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        ring_icon().save(dir.path().join("04d.png")).unwrap();
        fs::write(dir.path().join("README"), "not an icon").unwrap();

        let icons = IconSet::load_dir(dir.path()).unwrap();
        assert_eq!(icons.len(), 1);
        assert!(icons.get("04d").is_ok());
    }
}
