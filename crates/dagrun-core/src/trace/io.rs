//! Trace persistence: pretty-printed JSON on disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use super::ExecutionTrace;

#[derive(Debug, Error)]
pub enum TraceIoError {
    #[error("trace: {operation} {path:?}: {source}")]
    Io {
        operation: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("trace: encode: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("trace: decode {path:?}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Writes `trace` to `path` as indented JSON.
pub fn save_to_file(path: impl AsRef<Path>, trace: &ExecutionTrace) -> Result<(), TraceIoError> {
    let path = path.as_ref();
    let encoded = serde_json::to_vec_pretty(trace).map_err(TraceIoError::Encode)?;
    fs::write(path, encoded).map_err(|source| TraceIoError::Io {
        operation: "write",
        path: path.display().to_string(),
        source,
    })
}

/// Loads a trace previously written with [`save_to_file`].
pub fn load_from_file(path: impl AsRef<Path>) -> Result<ExecutionTrace, TraceIoError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| TraceIoError::Io {
        operation: "read",
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| TraceIoError::Decode {
        path: path.display().to_string(),
        source,
    })
}
