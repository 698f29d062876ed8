/// Persistent per-user settings and the monthly API call counter.
use crate::models::{
    CityConfig, Coordinates, DialogState, MessageId, MonthlyApiCounter, PendingCity, Units,
    UserId, UserSession,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A row whose columns do not match its dialog state.
    #[error("corrupt session for user {user}: {reason}")]
    Corrupt { user: i64, reason: String },
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self, user: UserId) -> Result<Option<UserSession>, StoreError>;

    /// Insert or replace the whole session record in one statement.
    async fn save(&self, session: &UserSession) -> Result<(), StoreError>;

    async fn delete(&self, user: UserId) -> Result<(), StoreError>;

    async fn count_users(&self) -> Result<u64, StoreError>;

    /// Sessions that finished the setup dialog.
    async fn configured_sessions(&self) -> Result<Vec<UserSession>, StoreError>;

    /// Atomically increment the counter for `month`, creating it at 1.
    async fn increment_api_counter(&self, month: &str) -> Result<(), StoreError>;

    /// Counter for `month`, zero when nothing was recorded yet.
    async fn api_counter(&self, month: &str) -> Result<MonthlyApiCounter, StoreError>;
}

/// SQLite-backed settings store.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: i64,
    language: String,
    dialog_message_id: Option<i64>,
    state: String,
    city: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    units: Option<String>,
}

impl SqliteStore {
    /// Open the database at `url` and create the tables if needed.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init().await?;
        info!("Settings database ready at {}", url);
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                language TEXT NOT NULL,
                dialog_message_id INTEGER,
                state TEXT NOT NULL,
                city TEXT,
                latitude REAL,
                longitude REAL,
                units TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_request_counters (
                month TEXT PRIMARY KEY,
                counter INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn load(&self, user: UserId) -> Result<Option<UserSession>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT id, language, dialog_message_id, state, city, latitude, longitude, units \
             FROM users WHERE id = ?",
        )
        .bind(user.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserSession::try_from).transpose()
    }

    async fn save(&self, session: &UserSession) -> Result<(), StoreError> {
        let (city, coordinates, units) = match &session.state {
            DialogState::AwaitingCityInput | DialogState::AwaitingCitySelection => (None, None, None),
            DialogState::AwaitingUnitsConfirm { pending } => {
                (Some(pending.name.as_str()), Some(pending.coordinates), None)
            }
            DialogState::Configured(config) => (
                Some(config.city.as_str()),
                Some(config.coordinates),
                Some(config.units.as_str()),
            ),
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, language, dialog_message_id, state, city, latitude, longitude, units)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                language = excluded.language,
                dialog_message_id = excluded.dialog_message_id,
                state = excluded.state,
                city = excluded.city,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                units = excluded.units
            "#,
        )
        .bind(session.user_id.0)
        .bind(&session.language)
        .bind(session.last_message_id.map(|id| i64::from(id.0)))
        .bind(session.state.name())
        .bind(city)
        .bind(coordinates.map(|c| c.latitude))
        .bind(coordinates.map(|c| c.longitude))
        .bind(units)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, user: UserId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_users(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn configured_sessions(&self) -> Result<Vec<UserSession>, StoreError> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT id, language, dialog_message_id, state, city, latitude, longitude, units \
             FROM users WHERE state = 'configured' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UserSession::try_from).collect()
    }

    async fn increment_api_counter(&self, month: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO api_request_counters (month, counter) VALUES (?, 1)
            ON CONFLICT (month) DO UPDATE SET counter = counter + 1
            "#,
        )
        .bind(month)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn api_counter(&self, month: &str) -> Result<MonthlyApiCounter, StoreError> {
        let count: Option<i64> =
            sqlx::query_scalar("SELECT counter FROM api_request_counters WHERE month = ?")
                .bind(month)
                .fetch_optional(&self.pool)
                .await?;
        Ok(MonthlyApiCounter {
            month_key: month.to_string(),
            count: count.unwrap_or(0).max(0) as u64,
        })
    }
}

impl TryFrom<SessionRow> for UserSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: &str| StoreError::Corrupt {
            user: row.id,
            reason: reason.to_string(),
        };

        let coordinates = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates::new(latitude, longitude)),
            _ => None,
        };

        let state = match row.state.as_str() {
            "city_input" => DialogState::AwaitingCityInput,
            "city_selection" => DialogState::AwaitingCitySelection,
            "units_confirm" => DialogState::AwaitingUnitsConfirm {
                pending: PendingCity {
                    name: row.city.clone().ok_or_else(|| corrupt("pending city without name"))?,
                    coordinates: coordinates
                        .ok_or_else(|| corrupt("pending city without coordinates"))?,
                },
            },
            "configured" => DialogState::Configured(CityConfig {
                city: row.city.clone().ok_or_else(|| corrupt("configured without city"))?,
                coordinates: coordinates.ok_or_else(|| corrupt("configured without coordinates"))?,
                units: row
                    .units
                    .as_deref()
                    .and_then(Units::parse)
                    .ok_or_else(|| corrupt("configured without valid units"))?,
            }),
            other => return Err(corrupt(&format!("unknown state '{}'", other))),
        };

        let last_message_id = match row.dialog_message_id {
            Some(id) => Some(MessageId(
                i32::try_from(id).map_err(|_| corrupt("message id out of range"))?,
            )),
            None => None,
        };

        Ok(UserSession {
            user_id: UserId(row.id),
            language: row.language,
            last_message_id,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (SqliteStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("settings.db").display());
        (SqliteStore::connect(&url).await.unwrap(), dir)
    }

    fn configured(user: i64) -> UserSession {
        UserSession {
            user_id: UserId(user),
            language: "en".to_string(),
            last_message_id: Some(MessageId(10)),
            state: DialogState::Configured(CityConfig {
                city: "London".to_string(),
                coordinates: Coordinates::new(51.5074, -0.1278),
                units: Units::Metric,
            }),
        }
    }

    #[tokio::test]
    async fn test_save_and_load_every_state() {
        let (store, _dir) = store().await;

        let mut session = UserSession::new(UserId(1), "ru");
        store.save(&session).await.unwrap();
        assert_eq!(store.load(UserId(1)).await.unwrap(), Some(session.clone()));

        session.state = DialogState::AwaitingCitySelection;
        session.last_message_id = Some(MessageId(5));
        store.save(&session).await.unwrap();
        assert_eq!(store.load(UserId(1)).await.unwrap(), Some(session.clone()));

        session.state = DialogState::AwaitingUnitsConfirm {
            pending: PendingCity {
                name: "Paris".to_string(),
                coordinates: Coordinates::new(48.8566, 2.3522),
            },
        };
        store.save(&session).await.unwrap();
        assert_eq!(store.load(UserId(1)).await.unwrap(), Some(session.clone()));

        let session = configured(1);
        store.save(&session).await.unwrap();
        assert_eq!(store.load(UserId(1)).await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn test_pending_city_is_cleared_on_reset() {
        let (store, _dir) = store().await;

        store.save(&configured(1)).await.unwrap();
        store.save(&UserSession::new(UserId(1), "en")).await.unwrap();

        let loaded = store.load(UserId(1)).await.unwrap().unwrap();
        assert_eq!(loaded.state, DialogState::AwaitingCityInput);
        assert!(loaded.config().is_none());
    }

    #[tokio::test]
    async fn test_delete_and_count() {
        let (store, _dir) = store().await;
        store.save(&configured(1)).await.unwrap();
        store.save(&UserSession::new(UserId(2), "en")).await.unwrap();
        assert_eq!(store.count_users().await.unwrap(), 2);

        let configured = store.configured_sessions().await.unwrap();
        assert_eq!(configured.len(), 1);
        assert_eq!(configured[0].user_id, UserId(1));

        store.delete(UserId(1)).await.unwrap();
        assert_eq!(store.count_users().await.unwrap(), 1);
        assert!(store.load(UserId(1)).await.unwrap().is_none());

        // Deleting a missing user is not an error.
        store.delete(UserId(99)).await.unwrap();
    }

    #[tokio::test]
    async fn test_api_counter_upsert() {
        let (store, _dir) = store().await;
        assert_eq!(store.api_counter("2024.03").await.unwrap().count, 0);

        for _ in 0..3 {
            store.increment_api_counter("2024.03").await.unwrap();
        }
        store.increment_api_counter("2024.04").await.unwrap();

        let march = store.api_counter("2024.03").await.unwrap();
        assert_eq!(march.month_key, "2024.03");
        assert_eq!(march.count, 3);
        assert_eq!(store.api_counter("2024.04").await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_counter_increments() {
        let (store, _dir) = store().await;
        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment_api_counter("2024.05").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.api_counter("2024.05").await.unwrap().count, 10);
    }

    #[test]
    fn test_inconsistent_row_is_rejected() {
        let row = SessionRow {
            id: 3,
            language: "en".to_string(),
            dialog_message_id: None,
            state: "configured".to_string(),
            city: Some("Oslo".to_string()),
            latitude: Some(59.9),
            longitude: Some(10.7),
            units: None,
        };
        assert!(matches!(
            UserSession::try_from(row),
            Err(StoreError::Corrupt { user: 3, .. })
        ));
    }
}
