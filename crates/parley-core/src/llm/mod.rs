//! LLM provider abstractions for Parley.
//!
//! - `LlmProvider`: RPITIT trait for concrete provider implementations
//! - `BoxLlmProvider`: object-safe wrapper for dynamic dispatch
//! - `GenerationService`: named providers, defaults, prompt building
//! - `structured`: JSON extraction from model output

pub mod box_provider;
pub mod generation;
pub mod provider;
pub mod registry;
pub mod structured;

#[cfg(test)]
pub(crate) mod mock;
