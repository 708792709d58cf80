use crate::error::{AppError, Result, StoreError};
use crate::idempotency::record::{IdempotencyRecord, IdempotencyState};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Backing store for idempotency records.
///
/// Implementations must provide an atomic unique-key insert: under
/// concurrent `try_acquire` calls for the same key, exactly one caller
/// wins.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Attempts to claim the key by inserting `record`.
    ///
    /// Returns `None` when the caller won the insert race, otherwise the
    /// existing record. A duplicate insert is never an error.
    async fn try_acquire(&self, record: &IdempotencyRecord) -> Result<Option<IdempotencyRecord>>;

    /// Transitions an in-progress record to `Complete`, storing the
    /// response. Returns whether a matching in-progress record existed.
    async fn mark_complete(&self, key: &str, response: Option<Vec<u8>>) -> Result<bool>;

    /// Transitions an in-progress record to `Error`, storing the failure
    /// text. Returns whether a matching in-progress record existed.
    async fn mark_error(&self, key: &str, message: &str) -> Result<bool>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<()>;
}

/// PostgreSQL-backed store.
///
/// Retention is enforced by an external reaper over `expires_at` (see
/// the migration); this store never deletes rows itself.
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

const INSERT_IN_PROGRESS: &str = r#"
INSERT INTO idempotency_records (key, state, response, error_message, created_at, updated_at, expires_at)
VALUES ($1, $2, $3, $4, $5, $6, $7)
ON CONFLICT (key) DO NOTHING
RETURNING key, state, response, error_message, created_at, updated_at, expires_at
"#;

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT key, state, response, error_message, created_at, updated_at, expires_at
            FROM idempotency_records
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn try_acquire(&self, record: &IdempotencyRecord) -> Result<Option<IdempotencyRecord>> {
        // A conflicting row can be reaped between the insert and the
        // read-back, so take a second pass before giving up.
        for _ in 0..2 {
            let inserted = sqlx::query_as::<_, IdempotencyRecord>(INSERT_IN_PROGRESS)
                .bind(&record.key)
                .bind(record.state)
                .bind(&record.response)
                .bind(&record.error_message)
                .bind(record.created_at)
                .bind(record.updated_at)
                .bind(record.expires_at)
                .fetch_optional(&self.pool)
                .await?;

            if inserted.is_some() {
                return Ok(None);
            }

            if let Some(existing) = self.find(&record.key).await? {
                return Ok(Some(existing));
            }
        }

        Err(AppError::Store(StoreError::Unavailable(format!(
            "could not acquire idempotency record for key {}",
            record.key
        ))))
    }

    async fn mark_complete(&self, key: &str, response: Option<Vec<u8>>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET state = 'complete', response = $2, updated_at = NOW()
            WHERE key = $1 AND state = 'in_progress'
            "#,
        )
        .bind(key)
        .bind(response)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_error(&self, key: &str, message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET state = 'error', error_message = $2, updated_at = NOW()
            WHERE key = $1 AND state = 'in_progress'
            "#,
        )
        .bind(key)
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Redis-backed store.
///
/// `SET NX` with an `EX` retention gives the atomic unique-key insert,
/// and native key expiry is the garbage collector.
pub struct RedisIdempotencyStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisIdempotencyStore {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn encode(record: &IdempotencyRecord) -> Result<String> {
        serde_json::to_string(record)
            .map_err(|e| AppError::Internal(anyhow!("serialize idempotency record: {e}")))
    }

    fn decode(body: &str) -> Result<IdempotencyRecord> {
        serde_json::from_str(body)
            .map_err(|e| AppError::Internal(anyhow!("deserialize idempotency record: {e}")))
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let mut conn = self.connection().await?;
        let body: Option<String> = conn.get(self.make_key(key)).await?;

        body.as_deref().map(Self::decode).transpose()
    }

    async fn try_acquire(&self, record: &IdempotencyRecord) -> Result<Option<IdempotencyRecord>> {
        let mut conn = self.connection().await?;
        let key = self.make_key(&record.key);
        let body = Self::encode(record)?;
        let ttl = (record.expires_at - record.created_at).num_seconds().max(1) as usize;

        // The claimed key can expire between the failed SET NX and the
        // read-back, so take a second pass before giving up.
        for _ in 0..2 {
            let set: Option<String> = conn
                .set_options(
                    &key,
                    body.as_str(),
                    redis::SetOptions::default()
                        .conditional_set(redis::ExistenceCheck::NX)
                        .with_expiration(redis::SetExpiry::EX(ttl)),
                )
                .await?;

            if set.is_some() {
                return Ok(None);
            }

            if let Some(existing) = self.find(&record.key).await? {
                return Ok(Some(existing));
            }
        }

        Err(AppError::Store(StoreError::Unavailable(format!(
            "could not acquire idempotency record for key {}",
            record.key
        ))))
    }

    async fn mark_complete(&self, key: &str, response: Option<Vec<u8>>) -> Result<bool> {
        let Some(mut record) = self.find(key).await? else {
            return Ok(false);
        };
        if record.state != IdempotencyState::InProgress {
            return Ok(false);
        }

        record.state = IdempotencyState::Complete;
        record.response = response;
        record.updated_at = Utc::now();

        let mut conn = self.connection().await?;
        let _: () = conn
            .set_options(
                self.make_key(key),
                Self::encode(&record)?,
                redis::SetOptions::default().with_expiration(redis::SetExpiry::KEEPTTL),
            )
            .await?;

        Ok(true)
    }

    async fn mark_error(&self, key: &str, message: &str) -> Result<bool> {
        let Some(mut record) = self.find(key).await? else {
            return Ok(false);
        };
        if record.state != IdempotencyState::InProgress {
            return Ok(false);
        }

        record.state = IdempotencyState::Error;
        record.error_message = Some(message.to_string());
        record.updated_at = Utc::now();

        let mut conn = self.connection().await?;
        let _: () = conn
            .set_options(
                self.make_key(key),
                Self::encode(&record)?,
                redis::SetOptions::default().with_expiration(redis::SetExpiry::KEEPTTL),
            )
            .await?;

        Ok(true)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Mutex-protected map store for tests and local harnesses.
///
/// Expired records are treated as absent on read, mirroring store-level
/// TTL expiry.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record directly, bypassing the acquire path.
    pub async fn insert(&self, record: IdempotencyRecord) {
        let mut records = self.records.lock().await;
        records.insert(record.key.clone(), record);
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let mut records = self.records.lock().await;
        match records.get(key) {
            Some(record) if record.is_expired() => {
                records.remove(key);
                Ok(None)
            }
            Some(record) => Ok(Some(record.clone())),
            None => Ok(None),
        }
    }

    async fn try_acquire(&self, record: &IdempotencyRecord) -> Result<Option<IdempotencyRecord>> {
        let mut records = self.records.lock().await;
        match records.get(&record.key) {
            Some(existing) if !existing.is_expired() => Ok(Some(existing.clone())),
            _ => {
                records.insert(record.key.clone(), record.clone());
                Ok(None)
            }
        }
    }

    async fn mark_complete(&self, key: &str, response: Option<Vec<u8>>) -> Result<bool> {
        let mut records = self.records.lock().await;
        match records.get_mut(key) {
            Some(record)
                if record.state == IdempotencyState::InProgress && !record.is_expired() =>
            {
                record.state = IdempotencyState::Complete;
                record.response = response;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_error(&self, key: &str, message: &str) -> Result<bool> {
        let mut records = self.records.lock().await;
        match records.get_mut(key) {
            Some(record)
                if record.state == IdempotencyState::InProgress && !record.is_expired() =>
            {
                record.state = IdempotencyState::Error;
                record.error_message = Some(message.to_string());
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
