use std::sync::Arc;

use crate::backend::memory::InMemoryDispatchBackend;
use crate::collaborators::navigation::MapsLinkNavigator;
use crate::engine::lifecycle::{Collaborators, DeliveryManager, LifecycleSettings};
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub manager: DeliveryManager,
    pub backend: Arc<InMemoryDispatchBackend>,
    pub navigator: Arc<MapsLinkNavigator>,
    pub metrics: Metrics,
}

impl AppState {
    /// Wires the manager to the in-process backend, which serves as both the
    /// lookup and the status sync collaborator.
    pub fn new(settings: LifecycleSettings, event_buffer_size: usize) -> Self {
        let backend = Arc::new(InMemoryDispatchBackend::new());
        let navigator = Arc::new(MapsLinkNavigator::new());
        let metrics = Metrics::new();

        let manager = DeliveryManager::with_metrics(
            Collaborators {
                lookup: backend.clone(),
                sync: backend.clone(),
                navigator: navigator.clone(),
            },
            settings,
            metrics.clone(),
            event_buffer_size,
        );

        Self {
            manager,
            backend,
            navigator,
            metrics,
        }
    }
}
