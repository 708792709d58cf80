use crate::error::{AppError, Result};
use crate::pipeline::context::InvocationContext;
use crate::pipeline::handler::Handler;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Stage tag ordering the composition: `PreExecute < PostExecute <
/// ErrorHandle`, regardless of registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStage {
    PreExecute,
    PostExecute,
    ErrorHandle,
}

/// Control value returned by a pre-execute hook.
///
/// The short-circuit decision travels explicitly through the call chain;
/// post and error layers observe it on the way back out, so no shared
/// table of terminated invocations is needed.
#[derive(Debug)]
pub enum PreOutcome {
    /// Pass the (possibly rewritten) payload to the inner handler.
    Continue(Vec<u8>),
    /// End the invocation here with this result. The inner handler never
    /// runs, post hooks are skipped, and for an `Err` result the error
    /// hooks are skipped too.
    ShortCircuit(Result<Vec<u8>>),
}

#[async_trait]
pub trait PreExecute: Send + Sync {
    async fn pre_execute(
        &self,
        ctx: &mut InvocationContext,
        payload: Vec<u8>,
    ) -> Result<PreOutcome>;
}

#[async_trait]
pub trait PostExecute: Send + Sync {
    async fn post_execute(
        &self,
        ctx: &InvocationContext,
        payload: &[u8],
        response: &[u8],
    ) -> Result<()>;
}

#[async_trait]
pub trait ErrorHandle: Send + Sync {
    /// Side-effecting notification; the layer always re-raises the
    /// original error afterwards.
    async fn handle_error(&self, ctx: &InvocationContext, payload: &[u8], error: &AppError);
}

/// A full interceptor: hooks for all three stages.
pub trait Middleware: PreExecute + PostExecute + ErrorHandle {}

impl<T: PreExecute + PostExecute + ErrorHandle> Middleware for T {}

/// Result of an inner chain call, carrying the short-circuit flag out to
/// the wrapping layers.
pub(crate) struct Invocation {
    pub(crate) result: Result<Vec<u8>>,
    pub(crate) short_circuited: bool,
}

#[async_trait]
pub(crate) trait Layer: Send + Sync {
    async fn call(&self, ctx: &mut InvocationContext, payload: Vec<u8>) -> Invocation;
}

/// Innermost layer: the core handler.
pub(crate) struct CoreLayer {
    pub(crate) handler: Arc<dyn Handler>,
}

#[async_trait]
impl Layer for CoreLayer {
    async fn call(&self, ctx: &mut InvocationContext, payload: Vec<u8>) -> Invocation {
        Invocation {
            result: self.handler.invoke(ctx, payload).await,
            short_circuited: false,
        }
    }
}

pub(crate) struct PreLayer {
    pub(crate) hook: Arc<dyn PreExecute>,
    pub(crate) inner: Arc<dyn Layer>,
}

#[async_trait]
impl Layer for PreLayer {
    async fn call(&self, ctx: &mut InvocationContext, payload: Vec<u8>) -> Invocation {
        match self.hook.pre_execute(ctx, payload).await {
            Ok(PreOutcome::Continue(payload)) => self.inner.call(ctx, payload).await,
            Ok(PreOutcome::ShortCircuit(result)) => Invocation {
                result,
                short_circuited: true,
            },
            Err(err) => Invocation {
                result: Err(err),
                short_circuited: false,
            },
        }
    }
}

pub(crate) struct PostLayer {
    pub(crate) hook: Arc<dyn PostExecute>,
    pub(crate) inner: Arc<dyn Layer>,
}

#[async_trait]
impl Layer for PostLayer {
    async fn call(&self, ctx: &mut InvocationContext, payload: Vec<u8>) -> Invocation {
        let invocation = self.inner.call(ctx, payload.clone()).await;
        if invocation.short_circuited {
            return invocation;
        }

        match invocation.result {
            Ok(response) => {
                if let Err(err) = self.hook.post_execute(ctx, &payload, &response).await {
                    return Invocation {
                        result: Err(err),
                        short_circuited: false,
                    };
                }
                Invocation {
                    result: Ok(response),
                    short_circuited: false,
                }
            }
            Err(err) => Invocation {
                result: Err(err),
                short_circuited: false,
            },
        }
    }
}

pub(crate) struct ErrorLayer {
    pub(crate) hook: Arc<dyn ErrorHandle>,
    pub(crate) inner: Arc<dyn Layer>,
}

#[async_trait]
impl Layer for ErrorLayer {
    async fn call(&self, ctx: &mut InvocationContext, payload: Vec<u8>) -> Invocation {
        let invocation = self.inner.call(ctx, payload.clone()).await;
        if invocation.short_circuited {
            return invocation;
        }

        if let Err(err) = &invocation.result {
            self.hook.handle_error(ctx, &payload, err).await;
        }

        invocation
    }
}

/// Outermost layer: mints the invocation identifier, once per
/// invocation, and scopes a tracing span around the whole chain.
pub(crate) struct RootLayer {
    pub(crate) inner: Arc<dyn Layer>,
}

#[async_trait]
impl Layer for RootLayer {
    async fn call(&self, ctx: &mut InvocationContext, payload: Vec<u8>) -> Invocation {
        ctx.assign_invocation_id(Uuid::new_v4());
        let span = tracing::info_span!("invocation", invocation_id = %ctx.invocation_id());

        self.inner.call(ctx, payload).instrument(span).await
    }
}
