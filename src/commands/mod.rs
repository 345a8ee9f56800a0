//! Subcommand implementations.

pub mod build;
pub mod spec;
pub mod targets;
pub mod worker;
