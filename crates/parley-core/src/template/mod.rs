//! Prompt templates: storage, two-layer resolution, and substitution.

pub mod memory;
pub mod source;
pub mod substitute;

pub use memory::InMemoryTemplateSource;
pub use source::{ResolvedTemplate, TemplateError, TemplateLayer, TemplateResolver, TemplateSource};
