use std::{io, path::PathBuf};

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Terminal failure of a testnet bootstrap run.
///
/// Every variant corresponds to a phase of the coordinator; the node name is
/// carried wherever the failure belongs to a single node.
#[derive(Debug, Error)]
pub enum TestnetError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to provision {node}: {source}")]
    Provisioning {
        node: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to build gentx for {node}: {source}")]
    Signing {
        node: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to compose genesis template: {0}")]
    Composition(#[source] BoxError),

    #[error("failed to collect genesis for {node}: {source}")]
    Collection {
        node: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to render deployment descriptor: {0}")]
    Templating(#[source] BoxError),
}

impl TestnetError {
    pub fn provisioning(node: &str, source: impl Into<BoxError>) -> Self {
        Self::Provisioning { node: node.to_string(), source: source.into() }
    }

    pub fn signing(node: &str, source: impl Into<BoxError>) -> Self {
        Self::Signing { node: node.to_string(), source: source.into() }
    }

    pub fn composition(source: impl Into<BoxError>) -> Self {
        Self::Composition(source.into())
    }

    pub fn collection(node: &str, source: impl Into<BoxError>) -> Self {
        Self::Collection { node: node.to_string(), source: source.into() }
    }

    pub fn templating(source: impl Into<BoxError>) -> Self {
        Self::Templating(source.into())
    }

    /// Whether partial output should stay on disk after this failure.
    pub fn keeps_partial_output(&self) -> bool {
        matches!(self, Self::Collection { .. })
    }
}

/// Filesystem failure annotated with the path that was touched.
#[derive(Debug, Error)]
#[error("{action} {path}: {source}")]
pub struct PathError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl PathError {
    pub fn new(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self { action, path: path.into(), source }
    }
}
