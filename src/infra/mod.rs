//! Infrastructure adapters and runtime bootstrap.

pub mod deploy_hook;
pub mod error;
pub mod github;
pub mod local;
pub mod memory;
pub mod preferences;
pub mod telemetry;

pub(crate) fn user_agent() -> &'static str {
    concat!("folio/", env!("CARGO_PKG_VERSION"))
}
