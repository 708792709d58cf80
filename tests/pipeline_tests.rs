use anyhow::anyhow;
use async_trait::async_trait;
use idempotent_pipeline::{
    handler_fn, AppError, ErrorHandle, Handler, InvocationContext, PipelineBuilder, PostExecute,
    PreExecute, PreOutcome, Result,
};
use std::sync::{Arc, Mutex};
use tokio_test::assert_ok;
use uuid::Uuid;

type CallLog = Arc<Mutex<Vec<String>>>;

fn log_call(log: &CallLog, name: &str) {
    log.lock().expect("log poisoned").push(name.to_string());
}

fn calls(log: &CallLog) -> Vec<String> {
    log.lock().expect("log poisoned").clone()
}

struct RecordingPre {
    name: &'static str,
    log: CallLog,
}

#[async_trait]
impl PreExecute for RecordingPre {
    async fn pre_execute(
        &self,
        _ctx: &mut InvocationContext,
        payload: Vec<u8>,
    ) -> Result<PreOutcome> {
        log_call(&self.log, self.name);
        Ok(PreOutcome::Continue(payload))
    }
}

struct ShortCircuitPre {
    name: &'static str,
    log: CallLog,
    result: std::result::Result<Vec<u8>, String>,
}

#[async_trait]
impl PreExecute for ShortCircuitPre {
    async fn pre_execute(
        &self,
        _ctx: &mut InvocationContext,
        _payload: Vec<u8>,
    ) -> Result<PreOutcome> {
        log_call(&self.log, self.name);
        Ok(PreOutcome::ShortCircuit(match &self.result {
            Ok(response) => Ok(response.clone()),
            Err(message) => Err(AppError::Decode(message.clone())),
        }))
    }
}

struct FailingPre {
    name: &'static str,
    log: CallLog,
}

#[async_trait]
impl PreExecute for FailingPre {
    async fn pre_execute(
        &self,
        _ctx: &mut InvocationContext,
        _payload: Vec<u8>,
    ) -> Result<PreOutcome> {
        log_call(&self.log, self.name);
        Err(AppError::Internal(anyhow!("pre hook failed")))
    }
}

struct RecordingPost {
    name: &'static str,
    log: CallLog,
    fail: bool,
}

#[async_trait]
impl PostExecute for RecordingPost {
    async fn post_execute(
        &self,
        _ctx: &InvocationContext,
        _payload: &[u8],
        _response: &[u8],
    ) -> Result<()> {
        log_call(&self.log, self.name);
        if self.fail {
            return Err(AppError::Internal(anyhow!("post hook failed")));
        }
        Ok(())
    }
}

struct RecordingErrorHook {
    name: &'static str,
    log: CallLog,
}

#[async_trait]
impl ErrorHandle for RecordingErrorHook {
    async fn handle_error(&self, _ctx: &InvocationContext, _payload: &[u8], _error: &AppError) {
        log_call(&self.log, self.name);
    }
}

fn recording_core(log: CallLog) -> impl Handler {
    handler_fn(move |payload: Vec<u8>| {
        let log = log.clone();
        async move {
            log.lock().expect("log poisoned").push("core".to_string());
            Ok(payload)
        }
    })
}

fn failing_core(log: CallLog) -> impl Handler {
    handler_fn(move |_payload: Vec<u8>| {
        let log = log.clone();
        async move {
            log.lock().expect("log poisoned").push("core".to_string());
            Err(AppError::Internal(anyhow!("core failed")))
        }
    })
}

#[tokio::test]
async fn test_hooks_run_in_stage_then_registration_order() {
    let log: CallLog = Arc::default();

    // Deliberately scrambled registration order.
    let pipeline = PipelineBuilder::new(recording_core(log.clone()))
        .with_post_execute(RecordingPost {
            name: "post-c",
            log: log.clone(),
            fail: false,
        })
        .with_pre_execute(RecordingPre {
            name: "pre-a",
            log: log.clone(),
        })
        .with_error_handler(RecordingErrorHook {
            name: "error-d",
            log: log.clone(),
        })
        .with_pre_execute(RecordingPre {
            name: "pre-b",
            log: log.clone(),
        })
        .build();

    let response = pipeline.invoke(vec![1]).await.unwrap();

    assert_eq!(response, vec![1]);
    assert_eq!(calls(&log), vec!["pre-a", "pre-b", "core", "post-c"]);
}

#[tokio::test]
async fn test_multiple_post_hooks_run_in_registration_order() {
    let log: CallLog = Arc::default();

    let pipeline = PipelineBuilder::new(recording_core(log.clone()))
        .with_post_execute(RecordingPost {
            name: "post-1",
            log: log.clone(),
            fail: false,
        })
        .with_post_execute(RecordingPost {
            name: "post-2",
            log: log.clone(),
            fail: false,
        })
        .build();

    pipeline.invoke(vec![1]).await.unwrap();

    assert_eq!(calls(&log), vec!["core", "post-1", "post-2"]);
}

#[tokio::test]
async fn test_error_hook_fires_on_core_failure_and_reraises() {
    let log: CallLog = Arc::default();

    let pipeline = PipelineBuilder::new(failing_core(log.clone()))
        .with_pre_execute(RecordingPre {
            name: "pre-a",
            log: log.clone(),
        })
        .with_post_execute(RecordingPost {
            name: "post-c",
            log: log.clone(),
            fail: false,
        })
        .with_error_handler(RecordingErrorHook {
            name: "error-d",
            log: log.clone(),
        })
        .build();

    let err = pipeline.invoke(vec![1]).await.unwrap_err();

    assert!(err.to_string().contains("core failed"));
    assert_eq!(calls(&log), vec!["pre-a", "core", "error-d"]);
}

#[tokio::test]
async fn test_short_circuit_skips_core_and_later_stages() {
    let log: CallLog = Arc::default();

    let pipeline = PipelineBuilder::new(recording_core(log.clone()))
        .with_pre_execute(RecordingPre {
            name: "pre-a",
            log: log.clone(),
        })
        .with_pre_execute(ShortCircuitPre {
            name: "pre-b",
            log: log.clone(),
            result: Ok(vec![9]),
        })
        .with_post_execute(RecordingPost {
            name: "post-c",
            log: log.clone(),
            fail: false,
        })
        .with_error_handler(RecordingErrorHook {
            name: "error-d",
            log: log.clone(),
        })
        .build();

    let response = pipeline.invoke(vec![1]).await.unwrap();

    assert_eq!(response, vec![9], "short-circuit payload is the final result");
    assert_eq!(calls(&log), vec!["pre-a", "pre-b"]);
}

#[tokio::test]
async fn test_short_circuit_failure_suppresses_error_hooks() {
    let log: CallLog = Arc::default();

    let pipeline = PipelineBuilder::new(recording_core(log.clone()))
        .with_pre_execute(ShortCircuitPre {
            name: "pre-b",
            log: log.clone(),
            result: Err("bad payload".to_string()),
        })
        .with_error_handler(RecordingErrorHook {
            name: "error-d",
            log: log.clone(),
        })
        .build();

    let err = pipeline.invoke(vec![1]).await.unwrap_err();

    assert!(matches!(err, AppError::Decode(_)));
    assert_eq!(calls(&log), vec!["pre-b"]);
}

#[tokio::test]
async fn test_plain_pre_failure_is_visible_to_error_hooks() {
    let log: CallLog = Arc::default();

    let pipeline = PipelineBuilder::new(recording_core(log.clone()))
        .with_pre_execute(FailingPre {
            name: "pre-b",
            log: log.clone(),
        })
        .with_error_handler(RecordingErrorHook {
            name: "error-d",
            log: log.clone(),
        })
        .build();

    let err = pipeline.invoke(vec![1]).await.unwrap_err();

    assert!(err.to_string().contains("pre hook failed"));
    assert_eq!(calls(&log), vec!["pre-b", "error-d"]);
}

#[tokio::test]
async fn test_post_hook_error_replaces_result() {
    let log: CallLog = Arc::default();

    let pipeline = PipelineBuilder::new(recording_core(log.clone()))
        .with_post_execute(RecordingPost {
            name: "post-c",
            log: log.clone(),
            fail: true,
        })
        .with_error_handler(RecordingErrorHook {
            name: "error-d",
            log: log.clone(),
        })
        .build();

    let err = pipeline.invoke(vec![1]).await.unwrap_err();

    assert!(err.to_string().contains("post hook failed"));
    // The post failure happens inside the error layer's inner chain, so
    // the error hook observes it.
    assert_eq!(calls(&log), vec!["core", "post-c", "error-d"]);
}

#[tokio::test]
async fn test_rebuilding_preserves_registered_hooks() {
    let log: CallLog = Arc::default();

    let builder = PipelineBuilder::new(recording_core(log.clone())).with_pre_execute(
        RecordingPre {
            name: "pre-a",
            log: log.clone(),
        },
    );

    let first = builder.build();
    let second = builder
        .clone()
        .with_pre_execute(RecordingPre {
            name: "pre-b",
            log: log.clone(),
        })
        .build();

    tokio_test::assert_ok!(first.invoke(vec![1]).await);
    assert_eq!(calls(&log), vec!["pre-a", "core"]);

    log.lock().expect("log poisoned").clear();
    tokio_test::assert_ok!(second.invoke(vec![1]).await);
    assert_eq!(calls(&log), vec!["pre-a", "pre-b", "core"]);
}

struct IdCapture {
    ids: Arc<Mutex<Vec<Uuid>>>,
}

#[async_trait]
impl Handler for IdCapture {
    async fn invoke(&self, ctx: &InvocationContext, payload: Vec<u8>) -> Result<Vec<u8>> {
        self.ids
            .lock()
            .expect("ids poisoned")
            .push(ctx.invocation_id());
        Ok(payload)
    }
}

#[tokio::test]
async fn test_each_invocation_gets_a_fresh_identifier() {
    let ids: Arc<Mutex<Vec<Uuid>>> = Arc::default();
    let pipeline = PipelineBuilder::new(IdCapture { ids: ids.clone() }).build();

    pipeline.invoke(vec![]).await.unwrap();
    pipeline.invoke(vec![]).await.unwrap();

    let ids = ids.lock().expect("ids poisoned");
    assert_eq!(ids.len(), 2);
    assert!(!ids[0].is_nil());
    assert!(!ids[1].is_nil());
    assert_ne!(ids[0], ids[1]);
}
