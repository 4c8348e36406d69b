pub mod api;
pub mod auth;
pub mod codec;
pub mod config;
pub mod error;
pub mod gc;
pub mod input;
pub mod store;
pub mod upstream;

use std::sync::Arc;

use regex::Regex;

use crate::config::Config;
use crate::store::CacheStore;
use crate::upstream::UpstreamClient;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn CacheStore>,
    pub upstream: Arc<UpstreamClient>,
    /// Compiled `auth.api_key_pattern`; `None` disables the shape check.
    pub key_pattern: Option<Regex>,
}
