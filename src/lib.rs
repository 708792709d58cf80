//! Idempotent-execution middleware for event-driven handlers.
//!
//! A generic interceptor pipeline (pre-execute / post-execute / error
//! hooks composed around a core handler) backed by an idempotency
//! coordinator that gives at-most-once processing when the same logical
//! unit of work is delivered or invoked more than once concurrently.

pub mod config;
pub mod error;
pub mod idempotency;
pub mod middleware;
pub mod observability;
pub mod pipeline;

pub use error::{AppError, Result, StoreError};
pub use idempotency::{
    CheckOutcome, Coordinator, CoordinatorConfig, CoordinatorMetrics, IdempotencyRecord,
    IdempotencyState, IdempotencyStore, InMemoryIdempotencyStore, MetricsSnapshot,
    PostgresIdempotencyStore, RedisIdempotencyStore, RETENTION_SECONDS,
};
pub use middleware::{
    BatchDedupMiddleware, BatchEnvelope, BatchRecord, DirectResponseMiddleware, LogMiddleware,
};
pub use pipeline::{
    handler_fn, CancelSource, Cancellation, ErrorHandle, Handler, InvocationContext, Middleware,
    Pipeline, PipelineBuilder, PipelineStage, PostExecute, PreExecute, PreOutcome,
};
