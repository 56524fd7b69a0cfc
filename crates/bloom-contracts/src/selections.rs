use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::requests::AppSelectionRequest;

/// Append-only JSONL journal of app selections.
#[derive(Debug, Clone)]
pub struct SelectionJournal {
    path: PathBuf,
}

impl SelectionJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(
        &self,
        request: &AppSelectionRequest,
        selected_pipeline: Option<&str>,
    ) -> anyhow::Result<Map<String, Value>> {
        let mut payload = Map::new();
        payload.insert("ts".to_string(), Value::String(selection_timestamp()));
        payload.insert(
            "selected_id".to_string(),
            request
                .selected_id
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        payload.insert(
            "selected_pipeline".to_string(),
            selected_pipeline
                .map(|value| Value::String(value.to_string()))
                .unwrap_or(Value::Null),
        );
        payload.insert(
            "choices".to_string(),
            serde_json::to_value(&request.choices)?,
        );
        payload.insert(
            "app_selections".to_string(),
            serde_json::to_value(&request.app_selections)?,
        );
        payload.insert(
            "user_id".to_string(),
            Value::String(request.distinct_id().to_string()),
        );

        self.append(&payload)?;
        Ok(payload)
    }

    fn append(&self, payload: &Map<String, Value>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(payload)?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("failed appending to {}", self.path.display()))
    }
}

fn selection_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
