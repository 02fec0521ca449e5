use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ResourceError {
    pub fn path(&self) -> &str {
        match self {
            Self::NotFound(path) => path,
            Self::Io { path, .. } => path,
        }
    }
}

/// Turns a prompt or reminder reference into its text.
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<String, ResourceError>;
}

/// Reads references as filesystem paths, relative ones against `root` when set.
#[derive(Debug, Clone, Default)]
pub struct FsResolver {
    root: Option<PathBuf>,
}

impl FsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn locate(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl ResourceResolver for FsResolver {
    async fn resolve(&self, reference: &str) -> Result<String, ResourceError> {
        let path = self.locate(reference);
        debug!(path = %path.display(), "reading prompt resource");

        tokio::fs::read_to_string(&path).await.map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ResourceError::NotFound(reference.to_string())
            } else {
                ResourceError::Io {
                    path: reference.to_string(),
                    source,
                }
            }
        })
    }
}

/// Serves references from a fixed map; anything else is not found.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResolver {
    entries: HashMap<String, String>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, reference: impl Into<String>, text: impl Into<String>) -> Self {
        self.entries.insert(reference.into(), text.into());
        self
    }
}

#[async_trait]
impl ResourceResolver for InMemoryResolver {
    async fn resolve(&self, reference: &str) -> Result<String, ResourceError> {
        self.entries
            .get(reference)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(reference.to_string()))
    }
}
