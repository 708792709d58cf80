use crate::error::{AppError, Result};
use crate::idempotency::coordinator::{CheckOutcome, Coordinator};
use crate::pipeline::context::InvocationContext;
use crate::pipeline::layer::{ErrorHandle, PostExecute, PreExecute, PreOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Batched-delivery envelope. Fields other than the delivery identifier
/// are carried through re-serialization untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEnvelope {
    #[serde(rename = "Records")]
    pub records: Vec<BatchRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Interceptor for at-least-once batched delivery.
///
/// Already-seen messages are stripped before the core handler runs;
/// survivors are marked complete up front, so no response is cached and
/// the post/error stages have nothing to do.
pub struct BatchDedupMiddleware {
    coordinator: Arc<Coordinator>,
}

impl BatchDedupMiddleware {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl PreExecute for BatchDedupMiddleware {
    async fn pre_execute(
        &self,
        ctx: &mut InvocationContext,
        payload: Vec<u8>,
    ) -> Result<PreOutcome> {
        let envelope: BatchEnvelope =
            serde_json::from_slice(&payload).map_err(|e| AppError::Decode(e.to_string()))?;

        let mut survivors = Vec::with_capacity(envelope.records.len());
        for record in envelope.records {
            match self
                .coordinator
                .check(ctx.cancellation(), &record.message_id)
                .await
            {
                Ok(CheckOutcome::New) => {
                    match self.coordinator.mark_complete(&record.message_id, None).await {
                        Ok(()) => survivors.push(record),
                        Err(AppError::NotFound(_)) => {
                            warn!(message_id = %record.message_id, "in-progress record vanished before mark");
                            survivors.push(record);
                        }
                        Err(err) => {
                            error!(message_id = %record.message_id, error = %err, "error marking complete");
                            return Err(err);
                        }
                    }
                }
                // Dedup ignores what the previous delivery recorded.
                Ok(CheckOutcome::Completed(_)) | Ok(CheckOutcome::Failed(_)) => {
                    info!(message_id = %record.message_id, "message already processed");
                }
                Err(err) => {
                    error!(message_id = %record.message_id, error = %err, "idempotency check failed");
                    return Err(err);
                }
            }
        }

        let filtered = BatchEnvelope { records: survivors };
        let payload =
            serde_json::to_vec(&filtered).map_err(|e| AppError::Decode(e.to_string()))?;

        Ok(PreOutcome::Continue(payload))
    }
}

#[async_trait]
impl PostExecute for BatchDedupMiddleware {
    async fn post_execute(
        &self,
        _ctx: &InvocationContext,
        _payload: &[u8],
        _response: &[u8],
    ) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ErrorHandle for BatchDedupMiddleware {
    async fn handle_error(&self, _ctx: &InvocationContext, _payload: &[u8], _error: &AppError) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip_preserves_unknown_fields() {
        let payload = br#"{"Records":[{"messageId":"m1","body":"trade","receiptHandle":"rh"}]}"#;
        let envelope: BatchEnvelope = serde_json::from_slice(payload).unwrap();

        assert_eq!(envelope.records.len(), 1);
        assert_eq!(envelope.records[0].message_id, "m1");

        let encoded = serde_json::to_vec(&envelope).unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded["Records"][0]["body"], "trade");
        assert_eq!(decoded["Records"][0]["receiptHandle"], "rh");
    }

    #[test]
    fn test_envelope_requires_records_array() {
        let err = serde_json::from_slice::<BatchEnvelope>(br#"{"Messages":[]}"#).unwrap_err();
        assert!(err.to_string().contains("Records"));
    }
}
