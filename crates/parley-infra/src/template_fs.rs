//! Filesystem template source.
//!
//! Reads prompt templates from a root directory laid out as
//! `_system/config/{default,custom/<scheme>}/<key>_v1.md`.

use std::path::{Component, Path, PathBuf};

use parley_core::template::{TemplateError, TemplateSource};

#[derive(Debug, Clone)]
pub struct FsTemplateSource {
    root: PathBuf,
}

impl FsTemplateSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join `relative` onto the root, refusing anything that could escape it.
    fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let rel = Path::new(relative);
        let safe = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        safe.then(|| self.root.join(rel))
    }
}

impl TemplateSource for FsTemplateSource {
    async fn read_template(&self, path: &str) -> Result<Option<String>, TemplateError> {
        let Some(full) = self.resolve(path) else {
            tracing::warn!(path, "rejected template path outside the template root");
            return Ok(None);
        };

        match tokio::fs::read_to_string(&full).await {
            Ok(content) => {
                tracing::trace!(path = %full.display(), "read template");
                Ok(Some(content))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(TemplateError::Io {
                path: full.display().to_string(),
                message: err.to_string(),
            }),
        }
    }
}
