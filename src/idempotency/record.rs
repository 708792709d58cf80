use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How long records are retained before store-level expiry reclaims them.
pub const RETENTION_SECONDS: u64 = 345_600; // 4 days

/// State of an idempotency record.
///
/// Transitions are one-way: `InProgress` -> `Complete` or
/// `InProgress` -> `Error`. Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyState {
    InProgress,
    Complete,
    Error,
}

impl IdempotencyState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IdempotencyState::InProgress)
    }
}

/// Stored record for one logical unit of work, exactly one per key.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdempotencyRecord {
    pub key: String,
    pub state: IdempotencyState,
    pub response: Option<Vec<u8>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Creates a fresh in-progress record for `key`.
    pub fn in_progress(key: impl Into<String>, retention: std::time::Duration) -> Self {
        let now = Utc::now();
        let retention =
            chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::seconds(0));
        Self {
            key: key.into(),
            state: IdempotencyState::InProgress,
            response: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            expires_at: now + retention,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}
