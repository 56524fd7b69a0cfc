pub mod analytics;
pub mod catalog;
pub mod error;
pub mod selector;

use std::path::PathBuf;

use anyhow::Result;
use bloom_contracts::requests::ChatRequest;
use bloom_contracts::{BloomApp, ContentStore};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::info;

pub use ab_test::SynthesizedApps;
pub use analytics::{AnalyticsClient, AnalyticsSettings};
pub use catalog::CatalogSummary;
pub use error::SelectionError;

pub const DEFAULT_BASELINE_PIPELINE: &str = "old";
pub const DEFAULT_CANDIDATE_PIPELINE: &str = "new";
pub const DEFAULT_MAX_SYNTHESIZED_APPS: usize = 256;

/// Where apps come from when a pipeline is asked for one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Random catalog entry, synthesizing only when the pipeline has none.
    #[default]
    Catalog,
    /// Fresh app from a random image on disk for every request.
    Synthesize,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub resource_root: PathBuf,
    pub baseline_pipeline: String,
    pub candidate_pipeline: String,
    pub selection_mode: SelectionMode,
    /// Synthesized apps kept in the catalog before the oldest is dropped.
    pub max_synthesized_apps: usize,
}

impl EngineSettings {
    pub fn new(resource_root: impl Into<PathBuf>) -> Self {
        Self {
            resource_root: resource_root.into(),
            baseline_pipeline: DEFAULT_BASELINE_PIPELINE.to_string(),
            candidate_pipeline: DEFAULT_CANDIDATE_PIPELINE.to_string(),
            selection_mode: SelectionMode::default(),
            max_synthesized_apps: DEFAULT_MAX_SYNTHESIZED_APPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOutcome {
    pub ab_test: bool,
    pub apps: Vec<BloomApp>,
}

/// Owns the content store and the random source. Callers serialize access.
pub struct BloomEngine {
    settings: EngineSettings,
    store: ContentStore,
    summary: CatalogSummary,
    synthesized: SynthesizedApps,
    rng: Box<dyn RngCore + Send>,
}

impl BloomEngine {
    /// Loads the catalog from `settings.resource_root`. A missing root is an
    /// error; nothing is served until this returns.
    pub fn bootstrap(settings: EngineSettings) -> Result<Self> {
        Self::bootstrap_with_rng(settings, Box::new(StdRng::from_entropy()))
    }

    pub fn bootstrap_with_rng(
        settings: EngineSettings,
        rng: Box<dyn RngCore + Send>,
    ) -> Result<Self> {
        let (store, summary) = catalog::load_catalog(&settings.resource_root)?;
        let synthesized = SynthesizedApps::new(settings.max_synthesized_apps);
        Ok(Self {
            settings,
            store,
            summary,
            synthesized,
            rng,
        })
    }

    pub fn summary(&self) -> &CatalogSummary {
        &self.summary
    }

    pub fn pipeline_ids(&self) -> Vec<String> {
        catalog::pipeline_ids(&self.store)
    }

    pub fn catalog_len(&self) -> usize {
        catalog::catalog_len(&self.store)
    }

    pub fn pipeline_of(&self, app_id: &str) -> Option<String> {
        catalog::pipeline_of(&self.store, app_id)
    }

    pub fn is_ab_test(&mut self) -> bool {
        ab_test::classify(self.rng.as_mut())
    }

    /// A single app for a non-A/B request.
    pub fn select_single(&mut self, message: &str) -> Result<BloomApp, SelectionError> {
        match self.settings.selection_mode {
            SelectionMode::Catalog => catalog::catalog(&self.store)
                .and_then(|rows| selector::select_random(rows, self.rng.as_mut()))
                .ok_or(SelectionError::CatalogEmpty),
            SelectionMode::Synthesize => ab_test::select_for_pipeline(
                &mut self.store,
                &mut self.synthesized,
                &self.settings,
                message,
                &self.settings.baseline_pipeline,
                self.rng.as_mut(),
            ),
        }
    }

    pub fn ab_test_apps(&mut self, message: &str) -> Result<Vec<BloomApp>, SelectionError> {
        ab_test::build_ab_response(
            &mut self.store,
            &mut self.synthesized,
            &self.settings,
            message,
            self.rng.as_mut(),
        )
    }

    /// Flips the A/B coin and serves one or two apps for `request`.
    pub fn handle_chat(&mut self, request: &ChatRequest) -> Result<ChatOutcome, SelectionError> {
        let ab_test = self.is_ab_test();
        info!(message = %request.message, ab_test, "chat message received");
        let apps = if ab_test {
            self.ab_test_apps(&request.message)?
        } else {
            vec![self.select_single(&request.message)?]
        };
        Ok(ChatOutcome { ab_test, apps })
    }
}
