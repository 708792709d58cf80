use crate::error::Result;
use crate::pipeline::context::InvocationContext;
use async_trait::async_trait;
use std::future::Future;

/// Core handler contract: `(context, payload bytes) -> response bytes`.
///
/// The pipeline itself is payload-format agnostic; decoding is the
/// handler's (or a middleware's) concern.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(&self, ctx: &InvocationContext, payload: Vec<u8>) -> Result<Vec<u8>>;
}

/// Adapts a plain async function over payload bytes into a [`Handler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>>> + Send,
{
    async fn invoke(&self, _ctx: &InvocationContext, payload: Vec<u8>) -> Result<Vec<u8>> {
        (self.f)(payload).await
    }
}

/// Wraps an async closure as the pipeline's core handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>>> + Send,
{
    FnHandler { f }
}
