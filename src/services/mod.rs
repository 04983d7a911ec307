//! Client-side services: the record store client and the upload workflow
//! built on top of it.

pub mod download;
pub mod file_loader;
pub mod initializer;
pub mod kinto_client;
pub mod renderer;
pub mod workflow;
