use std::sync::{Arc, Mutex, MutexGuard};

use bloom_contracts::selections::SelectionJournal;
use bloom_engine::{AnalyticsClient, BloomEngine};

/// Handler state. The engine mutex is the only thing serializing access to
/// the content store.
pub struct AppState {
    engine: Mutex<BloomEngine>,
    pub analytics: AnalyticsClient,
    pub journal: Option<SelectionJournal>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn shared(
        engine: BloomEngine,
        analytics: AnalyticsClient,
        journal: Option<SelectionJournal>,
    ) -> SharedState {
        Arc::new(Self {
            engine: Mutex::new(engine),
            analytics,
            journal,
        })
    }

    pub fn engine(&self) -> anyhow::Result<MutexGuard<'_, BloomEngine>> {
        self.engine
            .lock()
            .map_err(|_| anyhow::anyhow!("engine lock poisoned"))
    }
}
