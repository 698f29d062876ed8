/// Localized bot texts.
///
/// Each language is a flat JSON object of message keys embedded at compile
/// time. Lookups fall back to English for unknown languages or missing keys.
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, warn};

pub const DEFAULT_LANGUAGE: &str = "en";

const EMBEDDED: &[(&str, &str)] = &[
    ("en", include_str!("../locales/en.json")),
    ("ru", include_str!("../locales/ru.json")),
    ("uk", include_str!("../locales/uk.json")),
];

#[derive(Error, Debug)]
pub enum LocaleError {
    #[error("translation table '{lang}' is invalid: {source}")]
    Parse {
        lang: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("the default translation table '{0}' is missing")]
    MissingDefault(&'static str),
}

/// Translation tables keyed by ISO 639-1 language code.
#[derive(Debug, Clone)]
pub struct Locale {
    tables: HashMap<String, HashMap<String, String>>,
}

impl Locale {
    /// Load the tables shipped with the binary.
    pub fn embedded() -> Result<Self, LocaleError> {
        Self::from_sources(EMBEDDED.iter().copied())
    }

    pub fn from_sources<'a>(
        sources: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, LocaleError> {
        let mut tables = HashMap::new();
        for (lang, raw) in sources {
            let table: HashMap<String, String> =
                serde_json::from_str(raw).map_err(|source| LocaleError::Parse {
                    lang: lang.to_string(),
                    source,
                })?;
            tables.insert(lang.to_string(), table);
        }

        if !tables.contains_key(DEFAULT_LANGUAGE) {
            return Err(LocaleError::MissingDefault(DEFAULT_LANGUAGE));
        }

        Ok(Self { tables })
    }

    pub fn supports(&self, lang: &str) -> bool {
        self.tables.contains_key(lang)
    }

    /// Text for `key` in `lang`, or in English when unavailable.
    pub fn text<'a>(&'a self, lang: &str, key: &'a str) -> &'a str {
        if let Some(text) = self.tables.get(lang).and_then(|table| table.get(key)) {
            return text;
        }

        if lang != DEFAULT_LANGUAGE {
            warn!("No '{}' translation for language '{}', EN was used", key, lang);
        }

        match self
            .tables
            .get(DEFAULT_LANGUAGE)
            .and_then(|table| table.get(key))
        {
            Some(text) => text,
            None => {
                error!("Translation key '{}' is missing from the default table", key);
                key
            }
        }
    }
}
