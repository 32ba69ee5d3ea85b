//! HTTP handlers and the shared router state.

pub mod health_handlers;
pub mod object_handlers;

use std::path::PathBuf;

use crate::services::{metadata::MetadataStore, proxy::StreamProxy};

/// Shared state carried by the router to every handler.
#[derive(Clone)]
pub struct AppState {
    pub metadata: MetadataStore,
    pub proxy: StreamProxy,
    pub cache_dir: PathBuf,
    pub api_token: String,
}
