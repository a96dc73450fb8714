//! Domain layer types and invariants.

pub mod collection;
pub mod document;
pub mod error;
pub mod projects;
