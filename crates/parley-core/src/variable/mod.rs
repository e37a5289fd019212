//! Variable scoping: the resolver every read and write goes through.

pub mod scope;

pub use scope::{ScopeResolver, ScopeWriteError, StoreValidation};
