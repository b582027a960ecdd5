use delaydesk_order::DelayDesk;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub desk: Arc<DelayDesk>,
    pub auth: AuthConfig,
}
