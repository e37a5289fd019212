//! Execution engine for Parley conversation scripts.
//!
//! A script is a tree of phases, topics and actions. The executor walks it
//! one user turn at a time, drives the LLM-backed actions, and leaves all
//! resumable state in a serializable `ExecutionState`.
//!
//! This crate defines the ports (`LlmProvider`, `TemplateSource`) that the
//! infrastructure layer implements. It depends only on `parley-types`,
//! never on `parley-infra` or any network/IO crate.

pub mod action;
pub mod execution;
pub mod llm;
pub mod script;
pub mod session;
pub mod template;
pub mod variable;
