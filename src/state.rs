use std::sync::Arc;

use crate::metrics::MetricsRegistry;
use crate::services::Supervisor;

pub struct AppStateInner {
    pub supervisor: Arc<Supervisor>,
    pub metrics: MetricsRegistry,
}

pub type AppState = Arc<AppStateInner>;

pub fn new_state(supervisor: Arc<Supervisor>) -> prometheus::Result<AppState> {
    Ok(Arc::new(AppStateInner {
        supervisor,
        metrics: MetricsRegistry::new()?,
    }))
}
