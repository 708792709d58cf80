pub mod builder;
pub mod context;
pub mod handler;
pub mod layer;

pub use builder::{Pipeline, PipelineBuilder};
pub use context::{CancelSource, Cancellation, InvocationContext};
pub use handler::{handler_fn, FnHandler, Handler};
pub use layer::{ErrorHandle, Middleware, PipelineStage, PostExecute, PreExecute, PreOutcome};
