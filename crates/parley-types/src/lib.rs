//! Shared domain types for Parley.
//!
//! This crate contains the data shapes used across the Parley workspace:
//! the script tree, the four-bucket variable store, exit decisions, action
//! results, and the serializable execution state.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod action;
pub mod config;
pub mod execution;
pub mod exit;
pub mod llm;
pub mod script;
pub mod session;
pub mod variable;
