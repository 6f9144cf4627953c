use std::sync::Arc;

use crate::config::HubConfig;
use crate::db::ChatStore;
use crate::hub::HubHandle;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Message and user storage
    pub store: Arc<dyn ChatStore>,
    /// Front door to the hub dispatcher task
    pub hub: HubHandle,
    /// Connection tuning applied to every upgraded socket
    pub hub_config: HubConfig,
    /// Session signing key shared with the admin panel
    pub jwt_secret: Arc<Vec<u8>>,
}
