use std::path::PathBuf;

/// error type for imgsquash operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    #[error("archive contains {0} tagged images; re-export a single image and try again")]
    MultiImageArchive(usize),

    #[error("layer {parent} has more than one child; branched histories cannot be squashed")]
    MultiBranch { parent: String },

    #[error("{prefix} is ambiguous: {matches} layers matched")]
    AmbiguousPrefix { prefix: String, matches: usize },

    #[error("no layer matches {0}")]
    UnknownLayer(String),

    #[error("bad tag format: {0} (expected repo:tag)")]
    MalformedTag(String),

    #[error("layer {0} has no child to squash into")]
    NoChild(String),

    #[error("interrupted")]
    Interrupted,

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
