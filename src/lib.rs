//! `jira-vault` mirrors Jira tickets into a Markdown knowledge vault and
//! offers a handful of write-back operations (status transitions, comments,
//! links). Thin client: fetch, normalize, render, write.

/// CLI definitions, dispatch, and command handlers.
pub mod cli;
/// Layered configuration loading and validation.
pub mod config;
/// Jira REST client and raw payload types.
pub mod jira;
/// Logging helpers used throughout the crate.
pub mod logging;
/// Wiki-markup translation and filename/size helpers.
pub mod markup;
/// Markdown renderers for ticket notes and index documents.
pub mod render;
/// Sync orchestration onto the vault filesystem.
pub mod sync;
/// Canonical ticket model and normalization.
pub mod ticket;
