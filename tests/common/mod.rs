use idempotent_pipeline::{Coordinator, CoordinatorConfig, InMemoryIdempotencyStore};
use std::sync::Arc;

pub async fn coordinator() -> (Arc<Coordinator>, Arc<InMemoryIdempotencyStore>) {
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let coordinator = Coordinator::connect(store.clone(), CoordinatorConfig::default())
        .await
        .expect("Failed to build coordinator");

    (Arc::new(coordinator), store)
}
