//! Drop-folder document conversion server.
//!
//! Coordination layer between a watched input directory, an external
//! conversion command and a small web surface: uploads land in the input
//! directory, progress is streamed live from per-job debug logs, completion
//! is signalled by `.success` markers, and results are served for download.
//! All job state lives on the filesystem; see [`names`] for the contract.

pub mod cleanup;
pub mod config;
pub mod names;
pub mod processor;
pub mod server;
pub mod tail;
pub mod watcher;
