use crate::config::SupervisorConfig;
use crate::error::SupervisorResult;
use crate::services::{AnalyticsCounter, LogHub, ShareRegistry, Supervisor};
use std::sync::Arc;

/// Everything the command handlers need, wired once at startup.
pub struct AppState {
    pub supervisor: Supervisor,
    pub shares: ShareRegistry,
    pub hub: Arc<LogHub>,
    pub analytics: Arc<AnalyticsCounter>,
}

impl AppState {
    pub fn new(config: SupervisorConfig) -> SupervisorResult<Self> {
        config.validate()?;

        let hub = Arc::new(LogHub::new(config.log_capacity, config.subscriber_queue));
        let analytics = Arc::new(AnalyticsCounter::new());
        let shares = ShareRegistry::new(chrono::Duration::seconds(config.share_ttl_secs));
        let supervisor = Supervisor::new(config, hub.clone(), analytics.clone())?;

        Ok(Self {
            supervisor,
            shares,
            hub,
            analytics,
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        self.supervisor.config()
    }

    /// Stop every project. Called once when the host goes down.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
