//! Template storage abstraction and two-layer lookup.
//!
//! A [`TemplateSource`] only knows how to read a template by relative path.
//! [`TemplateResolver`] layers the custom/default override rules on top:
//!
//! 1. `_system/config/custom/{scheme}/{key}_v1.md` when a scheme is set
//! 2. `_system/config/default/{key}_v1.md` otherwise, or when 1 is missing
//!
//! A missing default template is an error.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const CUSTOM_DIR: &str = "_system/config/custom";
const DEFAULT_DIR: &str = "_system/config/default";

#[derive(Debug, Error)]
pub enum TemplateError {
    /// Neither layer has the template.
    #[error("default template not found: {path}")]
    NotFound { path: String },

    /// The backing store failed.
    #[error("template I/O error at {path}: {message}")]
    Io { path: String, message: String },
}

/// Which layer a template was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateLayer {
    Custom,
    Default,
}

impl fmt::Display for TemplateLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateLayer::Custom => write!(f, "custom"),
            TemplateLayer::Default => write!(f, "default"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTemplate {
    pub content: String,
    /// Relative path the content was read from.
    pub path: String,
    pub layer: TemplateLayer,
    /// Only set for the custom layer.
    pub scheme: Option<String>,
}

/// Read-only template storage.
pub trait TemplateSource: Send + Sync {
    /// Read the template at `path`. `Ok(None)` means it does not exist.
    fn read_template(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<String>, TemplateError>> + Send;
}

/// Object-safe version of [`TemplateSource`].
pub trait TemplateSourceDyn: Send + Sync {
    fn read_template_boxed<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, TemplateError>> + Send + 'a>>;
}

impl<T: TemplateSource> TemplateSourceDyn for T {
    fn read_template_boxed<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, TemplateError>> + Send + 'a>> {
        Box::pin(self.read_template(path))
    }
}

/// Two-layer resolver over a type-erased [`TemplateSource`].
pub struct TemplateResolver {
    source: Box<dyn TemplateSourceDyn + Send + Sync>,
}

impl TemplateResolver {
    pub fn new<T: TemplateSource + 'static>(source: T) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    pub fn custom_path(scheme: &str, template_key: &str) -> String {
        format!("{CUSTOM_DIR}/{scheme}/{template_key}_v1.md")
    }

    pub fn default_path(template_key: &str) -> String {
        format!("{DEFAULT_DIR}/{template_key}_v1.md")
    }

    /// Resolve `template_key` (e.g. `ai_ask`), honouring `scheme` if set.
    pub async fn resolve(
        &self,
        template_key: &str,
        scheme: Option<&str>,
    ) -> Result<ResolvedTemplate, TemplateError> {
        if let Some(scheme) = scheme.filter(|s| !s.is_empty()) {
            let path = Self::custom_path(scheme, template_key);
            if let Some(content) = self.source.read_template_boxed(&path).await? {
                return Ok(ResolvedTemplate {
                    content,
                    path,
                    layer: TemplateLayer::Custom,
                    scheme: Some(scheme.to_string()),
                });
            }
            tracing::warn!(
                template = template_key,
                scheme,
                path = %path,
                "custom template not found, falling back to default"
            );
        }

        let path = Self::default_path(template_key);
        match self.source.read_template_boxed(&path).await? {
            Some(content) => Ok(ResolvedTemplate {
                content,
                path,
                layer: TemplateLayer::Default,
                scheme: None,
            }),
            None => Err(TemplateError::NotFound { path }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::memory::InMemoryTemplateSource;

    #[tokio::test]
    async fn test_default_layer_without_scheme() {
        let source = InMemoryTemplateSource::new()
            .with_template(TemplateResolver::default_path("ai_say"), "default say");
        let resolver = TemplateResolver::new(source);

        let resolved = resolver.resolve("ai_say", None).await.unwrap();
        assert_eq!(resolved.layer, TemplateLayer::Default);
        assert_eq!(resolved.path, "_system/config/default/ai_say_v1.md");
        assert_eq!(resolved.content, "default say");
        assert!(resolved.scheme.is_none());
    }

    #[tokio::test]
    async fn test_custom_layer_wins_when_present() {
        let source = InMemoryTemplateSource::new()
            .with_template(TemplateResolver::default_path("ai_ask"), "default ask")
            .with_template(TemplateResolver::custom_path("cbt", "ai_ask"), "cbt ask");
        let resolver = TemplateResolver::new(source);

        let resolved = resolver.resolve("ai_ask", Some("cbt")).await.unwrap();
        assert_eq!(resolved.layer, TemplateLayer::Custom);
        assert_eq!(resolved.scheme.as_deref(), Some("cbt"));
        assert_eq!(resolved.content, "cbt ask");
    }

    #[tokio::test]
    async fn test_missing_custom_falls_back() {
        let source = InMemoryTemplateSource::new()
            .with_template(TemplateResolver::default_path("ai_ask"), "default ask");
        let resolver = TemplateResolver::new(source);

        let resolved = resolver.resolve("ai_ask", Some("unknown")).await.unwrap();
        assert_eq!(resolved.layer, TemplateLayer::Default);
        assert_eq!(resolved.content, "default ask");
    }

    #[tokio::test]
    async fn test_missing_default_is_an_error() {
        let resolver = TemplateResolver::new(InMemoryTemplateSource::new());
        let err = resolver.resolve("ai_say", Some("x")).await.unwrap_err();
        assert!(matches!(err, TemplateError::NotFound { path } if path.ends_with("ai_say_v1.md")));
    }
}
