//! Subcommand handlers for the `tether` binary.

pub mod chat;
pub mod config;
