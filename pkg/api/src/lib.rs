pub mod handlers;
pub mod request_id;
pub mod server;

use std::sync::Arc;

use pkg_state::leader::LeaseElector;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub elector: Arc<LeaseElector>,
}
