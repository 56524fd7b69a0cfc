use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("no apps in catalog")]
    CatalogEmpty,
    #[error("no apps for pipeline: {0}")]
    NoAppsForPipeline(String),
    #[error("no images found for pipeline: {0}")]
    NoImagesForPipeline(String),
    #[error("failed reading {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SelectionError {
    /// True for the "nothing to serve" family, as opposed to I/O failures.
    pub fn is_empty_result(&self) -> bool {
        matches!(
            self,
            Self::CatalogEmpty | Self::NoAppsForPipeline(_) | Self::NoImagesForPipeline(_)
        )
    }
}
