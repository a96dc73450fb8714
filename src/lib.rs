//! Folio: content persistence for a portfolio admin console.
//!
//! Documents are whole JSON blobs stored in a Git-backed file host. Writes
//! are compare-and-swap against the host's version token, wrapped by a
//! bounded retry loop, mirrored in an optimistic read-through cache, and
//! followed by an independent deploy trigger that rebuilds the public site.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
