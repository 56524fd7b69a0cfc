use std::fs;
use std::path::{Path, PathBuf};

use bloom_contracts::apps::image_data_url;
use bloom_contracts::BloomApp;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;
use serde_json::{Map, Value};
use uuid::Builder as UuidBuilder;

use crate::error::SelectionError;

/// Uniform pick over the whole catalog; `None` when it is empty.
pub fn select_random<R: Rng + ?Sized>(
    catalog: &Map<String, Value>,
    rng: &mut R,
) -> Option<BloomApp> {
    catalog
        .values()
        .filter(|value| value.is_object())
        .choose(rng)
        .and_then(BloomApp::from_value)
}

/// Uniform pick over the catalog rows whose `origin_pipeline` is `pipeline`.
pub fn select_random_from_pipeline<R: Rng + ?Sized>(
    catalog: &Map<String, Value>,
    pipeline: &str,
    rng: &mut R,
) -> Result<BloomApp, SelectionError> {
    catalog
        .values()
        .filter(|value| value.get("origin_pipeline").and_then(Value::as_str) == Some(pipeline))
        .choose(rng)
        .and_then(BloomApp::from_value)
        .ok_or_else(|| SelectionError::NoAppsForPipeline(pipeline.to_string()))
}

/// Builds a fresh app from a random PNG inside `<resource_root>/<pipeline>`.
///
/// The id is a v4 UUID drawn from `rng`, not a content address. `_message` is
/// accepted for content-aware selection later and is currently ignored.
pub fn synthesize<R: Rng + ?Sized>(
    resource_root: &Path,
    _message: &str,
    pipeline: &str,
    rng: &mut R,
) -> Result<BloomApp, SelectionError> {
    let pipeline_dir = resource_root.join(pipeline);
    let images = list_pipeline_images(&pipeline_dir)
        .ok_or_else(|| SelectionError::NoImagesForPipeline(pipeline.to_string()))?;
    let chosen = images
        .choose(rng)
        .ok_or_else(|| SelectionError::NoImagesForPipeline(pipeline.to_string()))?;

    let bytes = fs::read(chosen).map_err(|source| SelectionError::Io {
        path: chosen.clone(),
        source,
    })?;
    let id = UuidBuilder::from_random_bytes(rng.gen()).into_uuid();

    Ok(BloomApp {
        id: id.to_string(),
        image: image_data_url(&bytes),
        origin_pipeline: pipeline.to_string(),
    })
}

/// PNG files directly inside `dir`, sorted by name. `None` when the directory
/// cannot be listed.
fn list_pipeline_images(dir: &Path) -> Option<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).ok()?;
    let mut images: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext == "png")
                .unwrap_or(false)
        })
        .collect();
    images.sort();
    Some(images)
}
