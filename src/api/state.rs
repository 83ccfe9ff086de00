//! API shared state

use std::sync::Arc;

use crate::collector::Porter;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Every porter of this process, replicas included
    pub porters: Arc<Vec<Arc<dyn Porter>>>,
}

impl ApiState {
    pub fn new(porters: Vec<Arc<dyn Porter>>) -> Self {
        Self {
            porters: Arc::new(porters),
        }
    }

    /// First porter (replica) registered under `name`
    pub fn find(&self, name: &str) -> Option<&Arc<dyn Porter>> {
        self.porters.iter().find(|porter| porter.name() == name)
    }
}
