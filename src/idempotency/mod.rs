pub mod coordinator;
pub mod record;
pub mod storage;

pub use coordinator::{
    CheckOutcome, Coordinator, CoordinatorConfig, CoordinatorMetrics, MetricsSnapshot,
};
pub use record::{IdempotencyRecord, IdempotencyState, RETENTION_SECONDS};
pub use storage::{
    IdempotencyStore, InMemoryIdempotencyStore, PostgresIdempotencyStore, RedisIdempotencyStore,
};
