//! Infrastructure layer for Parley.
//!
//! Implements the ports defined in `parley-core`: the OpenAI-compatible
//! LLM provider and the filesystem template source, plus loading of the
//! global `config.toml`.

pub mod config;
pub mod llm;
pub mod template_fs;
