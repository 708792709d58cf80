use crate::error::{AppError, Result};
use crate::idempotency::coordinator::{CheckOutcome, Coordinator};
use crate::pipeline::context::InvocationContext;
use crate::pipeline::layer::{ErrorHandle, PostExecute, PreExecute, PreOutcome};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

/// Request envelope with the one recognized field, decoded once per
/// invocation.
#[derive(Debug, Deserialize)]
struct RequestEnvelope {
    #[serde(rename = "idempotencyKey")]
    idempotency_key: Option<String>,
}

fn extract_key(payload: &[u8]) -> Result<String> {
    let envelope: RequestEnvelope =
        serde_json::from_slice(payload).map_err(|e| AppError::Decode(e.to_string()))?;

    envelope
        .idempotency_key
        .ok_or_else(|| AppError::Decode("missing idempotencyKey field".into()))
}

/// Interceptor for synchronous, single request/response invocations.
///
/// A repeated key short-circuits with whatever the first invocation
/// recorded: the cached response, or the cached failure.
pub struct DirectResponseMiddleware {
    coordinator: Arc<Coordinator>,
}

impl DirectResponseMiddleware {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl PreExecute for DirectResponseMiddleware {
    async fn pre_execute(
        &self,
        ctx: &mut InvocationContext,
        payload: Vec<u8>,
    ) -> Result<PreOutcome> {
        let key = match extract_key(&payload) {
            Ok(key) => key,
            Err(err) => return Ok(PreOutcome::ShortCircuit(Err(err))),
        };

        match self.coordinator.check(ctx.cancellation(), &key).await {
            Ok(CheckOutcome::New) => Ok(PreOutcome::Continue(payload)),
            Ok(CheckOutcome::Completed(response)) => {
                info!(idempotency_key = %key, "request already processed");
                Ok(PreOutcome::ShortCircuit(Ok(response)))
            }
            Ok(CheckOutcome::Failed(message)) => {
                info!(idempotency_key = %key, "request already processed with error");
                Ok(PreOutcome::ShortCircuit(Err(AppError::Recorded(message))))
            }
            Err(err) => {
                error!(idempotency_key = %key, error = %err, "idempotency check failed");
                Ok(PreOutcome::ShortCircuit(Err(err)))
            }
        }
    }
}

#[async_trait]
impl PostExecute for DirectResponseMiddleware {
    async fn post_execute(
        &self,
        _ctx: &InvocationContext,
        payload: &[u8],
        response: &[u8],
    ) -> Result<()> {
        // Bookkeeping is best-effort: the response has already been
        // produced, so nothing here may fail the invocation.
        let key = match extract_key(payload) {
            Ok(key) => key,
            Err(err) => {
                error!(error = %err, "cannot extract idempotency key from payload");
                return Ok(());
            }
        };

        if let Err(err) = self
            .coordinator
            .mark_complete(&key, Some(response.to_vec()))
            .await
        {
            error!(idempotency_key = %key, error = %err, "error marking complete");
        }

        Ok(())
    }
}

#[async_trait]
impl ErrorHandle for DirectResponseMiddleware {
    async fn handle_error(&self, _ctx: &InvocationContext, payload: &[u8], error: &AppError) {
        let key = match extract_key(payload) {
            Ok(key) => key,
            Err(err) => {
                error!(error = %err, "cannot extract idempotency key from payload");
                return;
            }
        };

        if let Err(err) = self.coordinator.mark_error(&key, &error.to_string()).await {
            error!(idempotency_key = %key, error = %err, "error marking error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_key() {
        let key = extract_key(br#"{"idempotencyKey":"k1","amount":10}"#).unwrap();
        assert_eq!(key, "k1");
    }

    #[test]
    fn test_extract_key_missing_field() {
        let err = extract_key(br#"{"amount":10}"#).unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }

    #[test]
    fn test_extract_key_wrong_type() {
        let err = extract_key(br#"{"idempotencyKey":42}"#).unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }

    #[test]
    fn test_extract_key_malformed_payload() {
        let err = extract_key(b"not json").unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }
}
