use std::sync::Arc;

use crate::application::ports::resource_layer::ResourceLayer;

/// Capability set the HTTP layer depends on. Business operations are added
/// here (and implemented on [`Service`]) without touching the handler or the
/// application wiring.
pub trait BusinessService: Send + Sync {}

pub struct Service {
    repository: Option<Arc<dyn ResourceLayer>>,
}

impl Service {
    pub fn new(repository: Option<Arc<dyn ResourceLayer>>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> Option<&Arc<dyn ResourceLayer>> {
        self.repository.as_ref()
    }
}

impl BusinessService for Service {}
