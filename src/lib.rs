//! cover-runner library crate
//!
//! Resolves per-file settings, prepares an isolated cover-agent install, and
//! supervises the tool while streaming its output to a host.

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod keyring;
pub mod lock;
pub mod orchestrator;
pub mod placeholder;
pub mod supervisor;
