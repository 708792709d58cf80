use crate::error::Result;
use crate::pipeline::context::InvocationContext;
use crate::pipeline::handler::Handler;
use crate::pipeline::layer::{
    CoreLayer, ErrorHandle, ErrorLayer, Layer, Middleware, PipelineStage, PostExecute, PostLayer,
    PreExecute, PreLayer, RootLayer,
};
use std::sync::Arc;

#[derive(Clone)]
enum StageHook {
    Pre(Arc<dyn PreExecute>),
    Post(Arc<dyn PostExecute>),
    Error(Arc<dyn ErrorHandle>),
}

impl StageHook {
    fn stage(&self) -> PipelineStage {
        match self {
            StageHook::Pre(_) => PipelineStage::PreExecute,
            StageHook::Post(_) => PipelineStage::PostExecute,
            StageHook::Error(_) => PipelineStage::ErrorHandle,
        }
    }
}

/// Collects stage hooks around a core handler and composes them into an
/// immutable [`Pipeline`].
///
/// The builder can be kept around, extended, and rebuilt; every build
/// starts from the core handler, so previously registered hooks are
/// preserved and the identifier-minting root layer is never duplicated.
#[derive(Clone)]
pub struct PipelineBuilder {
    core: Arc<dyn Handler>,
    hooks: Vec<StageHook>,
}

impl PipelineBuilder {
    pub fn new(handler: impl Handler + 'static) -> Self {
        Self {
            core: Arc::new(handler),
            hooks: Vec::new(),
        }
    }

    pub fn with_pre_execute(self, hook: impl PreExecute + 'static) -> Self {
        self.with_pre_execute_arc(Arc::new(hook))
    }

    pub fn with_post_execute(self, hook: impl PostExecute + 'static) -> Self {
        self.with_post_execute_arc(Arc::new(hook))
    }

    pub fn with_error_handler(self, hook: impl ErrorHandle + 'static) -> Self {
        self.with_error_handler_arc(Arc::new(hook))
    }

    /// Registers a full interceptor at all three stages.
    pub fn with_middleware<M: Middleware + 'static>(self, middleware: Arc<M>) -> Self {
        self.with_pre_execute_arc(middleware.clone())
            .with_post_execute_arc(middleware.clone())
            .with_error_handler_arc(middleware)
    }

    pub fn with_pre_execute_arc(mut self, hook: Arc<dyn PreExecute>) -> Self {
        self.hooks.push(StageHook::Pre(hook));
        self
    }

    pub fn with_post_execute_arc(mut self, hook: Arc<dyn PostExecute>) -> Self {
        self.hooks.push(StageHook::Post(hook));
        self
    }

    pub fn with_error_handler_arc(mut self, hook: Arc<dyn ErrorHandle>) -> Self {
        self.hooks.push(StageHook::Error(hook));
        self
    }

    /// Composes the onion: error layers outermost, then post layers,
    /// then pre layers, core handler innermost, grouped by stage and
    /// never by registration order. Hooks sharing a stage keep
    /// registration order at execution time: pre hooks wrap
    /// first-registered outermost (first on the way in), post and error
    /// hooks wrap first-registered innermost (first on the way out).
    pub fn build(&self) -> Pipeline {
        let mut pres = Vec::new();
        let mut posts = Vec::new();
        let mut errors = Vec::new();
        for hook in &self.hooks {
            match hook.stage() {
                PipelineStage::PreExecute => pres.push(hook.clone()),
                PipelineStage::PostExecute => posts.push(hook.clone()),
                PipelineStage::ErrorHandle => errors.push(hook.clone()),
            }
        }

        let mut layer: Arc<dyn Layer> = Arc::new(CoreLayer {
            handler: Arc::clone(&self.core),
        });

        for hook in pres.iter().rev().chain(&posts).chain(&errors) {
            layer = match hook {
                StageHook::Pre(hook) => Arc::new(PreLayer {
                    hook: Arc::clone(hook),
                    inner: layer,
                }),
                StageHook::Post(hook) => Arc::new(PostLayer {
                    hook: Arc::clone(hook),
                    inner: layer,
                }),
                StageHook::Error(hook) => Arc::new(ErrorLayer {
                    hook: Arc::clone(hook),
                    inner: layer,
                }),
            };
        }

        Pipeline {
            root: Arc::new(RootLayer { inner: layer }),
        }
    }
}

/// Immutable composed handler graph.
pub struct Pipeline {
    root: Arc<dyn Layer>,
}

impl Pipeline {
    /// Runs one invocation with a fresh context.
    pub async fn invoke(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
        let mut ctx = InvocationContext::new();
        self.invoke_with_context(&mut ctx, payload).await
    }

    /// Runs one invocation with a caller-prepared context (annotations,
    /// cancellation). The invocation id is still minted internally.
    pub async fn invoke_with_context(
        &self,
        ctx: &mut InvocationContext,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>> {
        self.root.call(ctx, payload).await.result
    }
}
