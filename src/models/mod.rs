//! Core data models for the attachment uploader.
//!
//! These describe the remote store's containers (bucket and collections) and
//! the records it returns. They serialize to and from the server's JSON via
//! `serde`.

pub mod bucket;
pub mod record;
