use nudgeroom_core::Services;
use std::time::Duration;

use crate::correlation::CorrelationTable;
use crate::registry::ConnectionRegistry;

/// Shared handler state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    pub services: Services,
    pub registry: ConnectionRegistry,
    pub correlations: CorrelationTable,
    /// How long a task request waits for its rule results before answering
    /// 202.
    pub dispatch_timeout: Duration,
}

impl AppState {
    pub fn new(services: Services, dispatch_timeout: Duration) -> Self {
        Self {
            services,
            registry: ConnectionRegistry::new(),
            correlations: CorrelationTable::new(),
            dispatch_timeout,
        }
    }
}
