//! Shared state handed to every handler.

use crate::services::{
    coordinator::{Coordinator, StoreContext},
    object_store::LocalObjectStore,
    search::SearchEngine,
};
use std::{sync::Arc, time::Duration};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
    pub search: SearchEngine,
    /// Serves signed blob URLs directly.
    pub blobs: Arc<LocalObjectStore>,
    /// TTL for attachment URLs when the request does not give one.
    pub signed_url_ttl: Duration,
}

impl AppState {
    pub fn new(ctx: StoreContext, blobs: Arc<LocalObjectStore>, signed_url_ttl: Duration) -> Self {
        Self {
            search: SearchEngine::new(ctx.notes.clone()),
            coordinator: Coordinator::new(ctx),
            blobs,
            signed_url_ttl,
        }
    }

    pub fn stores(&self) -> &StoreContext {
        self.coordinator.stores()
    }
}
