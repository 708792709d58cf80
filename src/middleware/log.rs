use crate::error::Result;
use crate::pipeline::context::InvocationContext;
use crate::pipeline::layer::{PreExecute, PreOutcome};
use async_trait::async_trait;
use tracing::debug;

/// Pre-execute hook attaching service/function annotations to the
/// invocation context. Never short-circuits, never fails.
pub struct LogMiddleware {
    service: String,
    function: String,
}

impl LogMiddleware {
    pub fn new(service: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            function: function.into(),
        }
    }
}

#[async_trait]
impl PreExecute for LogMiddleware {
    async fn pre_execute(
        &self,
        ctx: &mut InvocationContext,
        payload: Vec<u8>,
    ) -> Result<PreOutcome> {
        ctx.annotate("service", self.service.as_str());
        ctx.annotate("function", self.function.as_str());

        debug!(
            service = %self.service,
            function = %self.function,
            invocation_id = %ctx.invocation_id(),
            "invocation started"
        );

        Ok(PreOutcome::Continue(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_middleware_annotates_and_continues() {
        let middleware = LogMiddleware::new("trader", "trade");
        let mut ctx = InvocationContext::new();

        let outcome = middleware.pre_execute(&mut ctx, vec![1]).await.unwrap();

        assert!(matches!(outcome, PreOutcome::Continue(p) if p == vec![1]));
        assert_eq!(ctx.annotation("service"), Some("trader"));
        assert_eq!(ctx.annotation("function"), Some("trade"));
    }
}
