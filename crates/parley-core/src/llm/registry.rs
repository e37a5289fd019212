//! Provider registry for runtime provider lookup.
//!
//! A name-indexed registry of boxed LLM providers with a designated default.

use std::collections::HashMap;

use super::box_provider::BoxLlmProvider;

/// Registry of available LLM providers, indexed by name.
///
/// The first provider registered becomes the default unless
/// [`ProviderRegistry::set_default`] picks another one.
pub struct ProviderRegistry {
    providers: HashMap<String, BoxLlmProvider>,
    default_name: Option<String>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a provider under the given name.
    ///
    /// If a provider with this name already exists, it is replaced.
    pub fn register(&mut self, name: impl Into<String>, provider: BoxLlmProvider) {
        let name = name.into();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.providers.insert(name, provider);
    }

    /// Make `name` the default. Returns false if no such provider exists.
    pub fn set_default(&mut self, name: &str) -> bool {
        if self.providers.contains_key(name) {
            self.default_name = Some(name.to_string());
            true
        } else {
            false
        }
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Option<&BoxLlmProvider> {
        self.providers.get(name)
    }

    /// The default provider, if any is registered.
    pub fn default_provider(&self) -> Option<&BoxLlmProvider> {
        self.default_name.as_deref().and_then(|n| self.providers.get(n))
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// List all registered provider names, sorted.
    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
