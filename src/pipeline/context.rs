use std::collections::HashMap;
use tokio::sync::watch;
use uuid::Uuid;

/// Cancellation handle observed by suspending operations.
///
/// A default handle never fires; one obtained from a [`CancelSource`]
/// resolves once the source is cancelled.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A handle that never fires.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves when the source is cancelled; pends forever for a
    /// detached handle or one whose source was dropped uncancelled.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };

        let mut rx = rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Owning side of a cancellation signal.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn cancel(&self) {
        // send_replace updates the value even with no live handles, so a
        // handle taken after cancellation still observes it.
        self.tx.send_replace(true);
    }

    pub fn handle(&self) -> Cancellation {
        Cancellation {
            rx: Some(self.tx.subscribe()),
        }
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-invocation state threaded through the pipeline.
///
/// Created at pipeline entry and dropped at exit; the invocation id is
/// minted by the outermost layer, once per invocation.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    invocation_id: Uuid,
    annotations: HashMap<String, String>,
    cancellation: Cancellation,
}

impl InvocationContext {
    pub fn new() -> Self {
        Self {
            invocation_id: Uuid::nil(),
            annotations: HashMap::new(),
            cancellation: Cancellation::none(),
        }
    }

    pub fn with_cancellation(cancellation: Cancellation) -> Self {
        Self {
            cancellation,
            ..Self::new()
        }
    }

    pub fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }

    pub(crate) fn assign_invocation_id(&mut self, id: Uuid) {
        self.invocation_id = id;
    }

    /// Attaches a caller-supplied annotation, e.g. a logging field.
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn annotations(&self) -> &HashMap<String, String> {
        &self.annotations
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::new()
    }
}
