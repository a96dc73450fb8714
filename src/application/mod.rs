//! Use cases over the content host: consistent writes, speculative
//! mutations, batch edits, deploys and the project collection.

pub mod bulk;
pub mod deploy;
pub mod error;
pub mod mutation;
pub mod preferences;
pub mod projects;
pub mod repos;
pub mod retry;
pub mod sync;
pub mod writer;
