//! Domain types and pure functions shared by every `genpipe` crate.
//!
//! Nothing in here performs network or database I/O. Theme definitions,
//! prompt combinatorics and workflow templating live here so the
//! pipeline, the store and the binary agree on one vocabulary.

pub mod error;
pub mod prompts;
pub mod theme;
pub mod types;
pub mod workflow;
