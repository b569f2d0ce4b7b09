//! Sieve mail filtering over a defensively parsed MIME model.
//!
//! Rule scripts are compiled by [`sieve::parser`], cached per account by
//! [`cache::CompiledScriptCache`] and run against a [`message::ParsedMessage`]
//! by [`engine`]. [`manager::RuleManager`] ties these together.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod message;
pub mod mime;
pub mod model;
pub mod sieve;
pub mod store;

pub use error::{Error, Result};
