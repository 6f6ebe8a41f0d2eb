use std::path::PathBuf;

use thiserror::Error;

/// Failures reading or writing the command document and history file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn yaml(path: impl Into<PathBuf>, source: serde_yaml::Error) -> Self {
        Self::Yaml { path: path.into(), source }
    }
}

/// Failures that prevent a socket from even being started.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid request: {0}")]
    Request(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("tls setup: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("{0}")]
    Refused(String),
}
