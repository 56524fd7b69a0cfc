use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use bloom_engine::{
    AnalyticsSettings, EngineSettings, SelectionMode, DEFAULT_BASELINE_PIPELINE,
    DEFAULT_CANDIDATE_PIPELINE, DEFAULT_MAX_SYNTHESIZED_APPS,
};
use clap::{Args, Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "bloom-server", version, about = "Bloom chat A/B backend")]
pub struct Cli {
    /// Address to bind
    #[arg(long, env = "BLOOM_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 5328)]
    pub port: u16,

    /// Directory whose subdirectories are image pipelines
    #[arg(long, env = "BLOOM_RESOURCE_DIR", default_value = "resource")]
    pub resource_dir: PathBuf,

    #[arg(long, env = "BLOOM_BASELINE_PIPELINE", default_value = DEFAULT_BASELINE_PIPELINE)]
    pub baseline_pipeline: String,

    #[arg(long, env = "BLOOM_CANDIDATE_PIPELINE", default_value = DEFAULT_CANDIDATE_PIPELINE)]
    pub candidate_pipeline: String,

    #[arg(long, env = "BLOOM_SELECTION_MODE", value_enum, default_value = "catalog")]
    pub selection_mode: SelectionModeArg,

    /// Synthesized apps kept for selection lookups; the oldest are dropped
    #[arg(long, env = "BLOOM_MAX_SYNTHESIZED_APPS", default_value_t = DEFAULT_MAX_SYNTHESIZED_APPS)]
    pub max_synthesized_apps: usize,

    /// Append every selection to this JSONL file
    #[arg(long, env = "BLOOM_SELECTION_LOG")]
    pub selection_log: Option<PathBuf>,

    /// Seed for the random source (reproducible assignment)
    #[arg(long, env = "BLOOM_SEED")]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub analytics: AnalyticsArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SelectionModeArg {
    Catalog,
    Synthesize,
}

impl From<SelectionModeArg> for SelectionMode {
    fn from(value: SelectionModeArg) -> Self {
        match value {
            SelectionModeArg::Catalog => SelectionMode::Catalog,
            SelectionModeArg::Synthesize => SelectionMode::Synthesize,
        }
    }
}

#[derive(Debug, Args)]
pub struct AnalyticsArgs {
    #[arg(long, env = "PRIVATE_POSTHOG_KEY", hide_env_values = true)]
    pub private_posthog_key: Option<String>,

    #[arg(long, env = "PRIVATE_POSTHOG_DOMAIN")]
    pub private_posthog_domain: Option<String>,

    #[arg(long, env = "POSTHOG_PERSONAL_API_KEY", hide_env_values = true)]
    pub posthog_personal_api_key: Option<String>,

    #[arg(long, env = "POSTHOG_PROJECT_ID")]
    pub posthog_project_id: Option<String>,

    #[arg(long, env = "PUBLIC_POSTHOG_KEY", hide_env_values = true)]
    pub public_posthog_key: Option<String>,

    #[arg(long, env = "PUBLIC_POSTHOG_DOMAIN")]
    pub public_posthog_domain: Option<String>,
}

impl Cli {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            resource_root: self.resource_dir.clone(),
            baseline_pipeline: self.baseline_pipeline.clone(),
            candidate_pipeline: self.candidate_pipeline.clone(),
            selection_mode: self.selection_mode.into(),
            max_synthesized_apps: self.max_synthesized_apps,
        }
    }

    pub fn analytics_settings(&self) -> AnalyticsSettings {
        let args = &self.analytics;
        AnalyticsSettings {
            private_key: non_empty(&args.private_posthog_key),
            private_host: non_empty(&args.private_posthog_domain),
            personal_api_key: non_empty(&args.posthog_personal_api_key),
            project_id: non_empty(&args.posthog_project_id),
            public_key: non_empty(&args.public_posthog_key),
            public_host: non_empty(&args.public_posthog_domain),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
