use std::sync::Arc;

use crate::chat::engine::IntakeEngine;
use crate::chat::store::MessageStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub engine: Arc<IntakeEngine>,
}
