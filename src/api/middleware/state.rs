use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::Config;
use crate::services::{CodeSource, RandomCodeSource, TokenGenerator, TransitionEngine};
use crate::store::SharedStore;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub engine: TransitionEngine,
    pub generator: TokenGenerator,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: SharedStore, config: Config) -> Self {
        Self::with_code_source(store, config, Arc::new(RandomCodeSource::new()))
    }

    pub fn with_code_source(
        store: SharedStore,
        config: Config,
        codes: Arc<dyn CodeSource>,
    ) -> Self {
        let generator = TokenGenerator::new(store.clone(), codes, config.max_batch_size);

        Self {
            engine: TransitionEngine::new(store.clone()),
            generator,
            store,
            config: Arc::new(config),
        }
    }
}

impl FromRef<AppState> for SharedStore {
    fn from_ref(state: &AppState) -> SharedStore {
        state.store.clone()
    }
}
