//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::report::ResultsReporter;
use crate::session::SessionManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let reporter = ResultsReporter::new(
            config.results_service_url.clone(),
            config.results_service_token.clone(),
        );

        let sessions = Arc::new(SessionManager::new(reporter));

        Self { config, sessions }
    }
}
