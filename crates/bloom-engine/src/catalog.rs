use std::fs;
use std::path::{Component, Path};

use anyhow::{bail, Context, Result};
use bloom_contracts::apps::{BloomApp, CATALOG_KEY, PIPELINE_IDS_KEY, UNKNOWN_PIPELINE};
use bloom_contracts::ContentStore;
use indexmap::IndexSet;
use serde_json::{Map, Value};
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSummary {
    pub files_scanned: usize,
    pub apps_loaded: usize,
    pub pipelines: Vec<String>,
}

/// Builds a fresh store holding every file under `root` as a content-addressed
/// app, plus the pipeline index in first-seen order.
///
/// Directories are walked in file-name order so repeated loads of the same tree
/// produce the same store.
pub fn load_catalog(root: &Path) -> Result<(ContentStore, CatalogSummary)> {
    if !root.is_dir() {
        bail!("resource directory does not exist: {}", root.display());
    }

    let mut store = ContentStore::new();
    store.create(CATALOG_KEY, Value::Object(Map::new()));
    let mut pipelines = IndexSet::new();
    let mut files_scanned = 0usize;

    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("failed walking {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let origin_pipeline = origin_pipeline_for(root, path);
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let app = BloomApp::from_image_bytes(&bytes, origin_pipeline.clone());
        debug!(
            file = %path.display(),
            id = %app.id,
            pipeline = %origin_pipeline,
            "loaded app"
        );
        store.insert_into(CATALOG_KEY, &app.id, app.to_value());
        pipelines.insert(origin_pipeline);
        files_scanned += 1;
    }

    let pipelines: Vec<String> = pipelines.into_iter().collect();
    store.create(
        PIPELINE_IDS_KEY,
        Value::Array(pipelines.iter().cloned().map(Value::String).collect()),
    );
    let summary = CatalogSummary {
        files_scanned,
        apps_loaded: catalog_len(&store),
        pipelines,
    };
    info!(
        root = %root.display(),
        files = summary.files_scanned,
        apps = summary.apps_loaded,
        pipelines = ?summary.pipelines,
        "catalog loaded"
    );
    Ok((store, summary))
}

/// First path segment below `root`, or `unknown` for files directly in it.
pub fn origin_pipeline_for(root: &Path, path: &Path) -> String {
    let Ok(relative) = path.strip_prefix(root) else {
        return UNKNOWN_PIPELINE.to_string();
    };
    let parts: Vec<_> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    if parts.len() > 1 {
        parts[0].to_string_lossy().to_string()
    } else {
        UNKNOWN_PIPELINE.to_string()
    }
}

pub fn catalog(store: &ContentStore) -> Option<&Map<String, Value>> {
    store.table(CATALOG_KEY)
}

pub fn catalog_len(store: &ContentStore) -> usize {
    catalog(store).map(Map::len).unwrap_or(0)
}

pub fn pipeline_ids(store: &ContentStore) -> Vec<String> {
    store
        .get(PIPELINE_IDS_KEY)
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Pipeline of a served app id, if the catalog knows it.
pub fn pipeline_of(store: &ContentStore, app_id: &str) -> Option<String> {
    catalog(store)?
        .get(app_id)?
        .get("origin_pipeline")?
        .as_str()
        .map(str::to_string)
}
