//! Wiring from resolved configuration to a store and a turn coordinator.

use std::sync::Arc;

use anyhow::Result;

use plansmith_core::service::{
    CompletionResearcher, CompletionService, NoRetrieval, OpenAiCompletion,
};
use plansmith_core::session::{FileSessionStore, InMemorySessionStore, SessionStore};
use plansmith_core::turn::{TurnConfig, TurnCoordinator};
use plansmith_db::PgSessionStore;
use plansmith_db::pool;

use crate::config::{PlansmithConfig, StoreBackend};

pub async fn open_store(config: &PlansmithConfig) -> Result<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match &config.store {
        StoreBackend::File(path) => {
            tracing::debug!(path = %path.display(), "using file session store");
            Arc::new(FileSessionStore::open(path)?)
        }
        StoreBackend::Postgres => {
            let pool = pool::create_pool(&config.db_config).await?;
            Arc::new(PgSessionStore::new(pool))
        }
        StoreBackend::Memory => Arc::new(InMemorySessionStore::new()),
    };
    Ok(store)
}

pub fn build_coordinator(config: &PlansmithConfig) -> TurnCoordinator {
    let settings = &config.completion;
    let mut client = OpenAiCompletion::new(&settings.base_url, &settings.model);
    match &settings.api_key {
        Some(key) => client = client.with_api_key(key),
        None => tracing::warn!(
            base_url = %settings.base_url,
            "no API key configured; requests are sent unauthenticated"
        ),
    }
    if let Some(temperature) = settings.temperature {
        client = client.with_temperature(temperature);
    }

    let completion: Arc<dyn CompletionService> = Arc::new(client);
    let researcher = Arc::new(CompletionResearcher::new(completion.clone()));

    TurnCoordinator::new(completion, researcher, Arc::new(NoRetrieval)).with_config(TurnConfig {
        max_research_steps: config.max_research_steps,
        ..TurnConfig::default()
    })
}
