use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::application::{AppError, AppResult, Contribution, ListEntry, SharedStore};

/// [`SharedStore`] on a SQLite file. Several consumer processes on one host
/// can point at the same file; every operation is a single statement or a
/// single transaction whose first statement is a write.
pub struct SqliteSharedStore {
    pool: SqlitePool,
}

fn storage_err(e: sqlx::Error) -> AppError {
    AppError::Storage(e.to_string())
}

impl SqliteSharedStore {
    /// `db_url` looks like
    /// - "sqlite:/data/inboxpulse.db"
    /// - "sqlite:./inboxpulse.db"
    pub async fn new(db_url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(storage_err)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS counters (
              key TEXT PRIMARY KEY,
              value INTEGER NOT NULL
            );
          "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        // expiring keys: debounce locks and processed-id markers
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS expiring_keys (
              key TEXT PRIMARY KEY,
              expires_at_ms INTEGER NOT NULL
            );
          "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS list_entries (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              list_key TEXT NOT NULL,
              entry TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS list_entries_key ON list_entries(list_key, id)")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS expiring_keys_deadline ON expiring_keys(expires_at_ms)",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn to_u64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

const CLAIM_KEY: &str = r#"
    INSERT INTO expiring_keys(key, expires_at_ms) VALUES(?, ?)
    ON CONFLICT(key) DO UPDATE SET expires_at_ms = excluded.expires_at_ms
    WHERE expiring_keys.expires_at_ms <= ?
"#;

const ADD_TO_COUNTER: &str = r#"
    INSERT INTO counters(key, value) VALUES(?, ?)
    ON CONFLICT(key) DO UPDATE SET value = value + excluded.value
    RETURNING value
"#;

#[async_trait]
impl SharedStore for SqliteSharedStore {
    async fn incr_by(&self, key: &str, delta: u64) -> AppResult<u64> {
        let (value,): (i64,) = sqlx::query_as(ADD_TO_COUNTER)
            .bind(key)
            .bind(to_i64(delta))
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(to_u64(value))
    }

    async fn get_counter(&self, key: &str) -> AppResult<u64> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT value FROM counters WHERE key = ? LIMIT 1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map_or(0, |r| to_u64(r.0)))
    }

    async fn set_counter(&self, key: &str, value: u64) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO counters(key, value) VALUES(?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(to_i64(value))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        let now = now_ms();
        let res = sqlx::query(CLAIM_KEY)
            .bind(key)
            .bind(now.saturating_add(ttl.as_millis() as i64))
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(res.rows_affected() == 1)
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT expires_at_ms FROM expiring_keys WHERE key = ? AND expires_at_ms > ? LIMIT 1",
        )
        .bind(key)
        .bind(now_ms())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(row.is_some())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM expiring_keys WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn purge_expired(&self) -> AppResult<u64> {
        let res = sqlx::query("DELETE FROM expiring_keys WHERE expires_at_ms <= ?")
            .bind(now_ms())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(res.rows_affected())
    }

    async fn record_once(&self, c: &Contribution<'_>) -> AppResult<Option<u64>> {
        let now = now_ms();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let claimed = sqlx::query(CLAIM_KEY)
            .bind(c.marker_key)
            .bind(now.saturating_add(c.marker_ttl.as_millis() as i64))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        if claimed.rows_affected() != 1 {
            tx.rollback().await.map_err(storage_err)?;
            return Ok(None);
        }

        sqlx::query("INSERT INTO list_entries(list_key, entry) VALUES(?, ?)")
            .bind(c.batch_key)
            .bind(&c.entry)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        let (value,): (i64,) = sqlx::query_as(ADD_TO_COUNTER)
            .bind(c.counter_key)
            .bind(to_i64(c.delta))
            .fetch_one(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(Some(to_u64(value)))
    }

    async fn push_back(&self, list_key: &str, entry: String) -> AppResult<()> {
        sqlx::query("INSERT INTO list_entries(list_key, entry) VALUES(?, ?)")
            .bind(list_key)
            .bind(entry)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn list_len(&self, list_key: &str) -> AppResult<u64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM list_entries WHERE list_key = ?")
            .bind(list_key)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(to_u64(n))
    }

    async fn list_entries(&self, list_key: &str, limit: usize) -> AppResult<Vec<ListEntry>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, entry FROM list_entries WHERE list_key = ? ORDER BY id LIMIT ?",
        )
        .bind(list_key)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(rows
            .into_iter()
            .map(|(id, entry)| ListEntry {
                id: to_u64(id),
                entry,
            })
            .collect())
    }

    async fn remove_entry(&self, list_key: &str, id: u64) -> AppResult<bool> {
        let res = sqlx::query("DELETE FROM list_entries WHERE list_key = ? AND id = ?")
            .bind(list_key)
            .bind(to_i64(id))
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(res.rows_affected() == 1)
    }

    async fn replace_entry(&self, list_key: &str, id: u64, entry: String) -> AppResult<bool> {
        let res = sqlx::query("UPDATE list_entries SET entry = ? WHERE list_key = ? AND id = ?")
            .bind(entry)
            .bind(list_key)
            .bind(to_i64(id))
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(res.rows_affected() == 1)
    }

    async fn take_window(
        &self,
        counter_key: &str,
        list_key: &str,
    ) -> AppResult<(u64, Vec<String>)> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        // Adding zero makes the row exist and takes the write lock.
        let (score,): (i64,) = sqlx::query_as(ADD_TO_COUNTER)
            .bind(counter_key)
            .bind(0_i64)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage_err)?;

        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT entry FROM list_entries WHERE list_key = ? ORDER BY id")
                .bind(list_key)
                .fetch_all(&mut *tx)
                .await
                .map_err(storage_err)?;

        sqlx::query("DELETE FROM list_entries WHERE list_key = ?")
            .bind(list_key)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        sqlx::query("UPDATE counters SET value = 0 WHERE key = ?")
            .bind(counter_key)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok((to_u64(score), rows.into_iter().map(|r| r.0).collect()))
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("sqlite store closed");
    }
}
