//! gridsync - collaborative table sessions.
//!
//! The algorithms live in `gridsync-engine`, sessions and rooms in
//! `gridsync-core`. This crate adds configuration loading, logging setup and
//! the scenario replay used by the binary.

pub mod config;
pub mod replay;
pub mod telemetry;
