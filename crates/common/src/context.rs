use std::sync::Arc;

use crate::AppConfig;

/// Immutable per-run context shared by every component of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: Arc<AppConfig>,
    /// Tags persisted rows when several processes share one store.
    pub bot_name: String,
}

impl RunContext {
    pub fn new(config: AppConfig) -> Self {
        let bot_name = config.paper.bot_name.clone();
        Self { config: Arc::new(config), bot_name }
    }

    pub fn with_bot_name(mut self, bot_name: impl Into<String>) -> Self {
        self.bot_name = bot_name.into();
        self
    }
}
