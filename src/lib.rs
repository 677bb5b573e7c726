//! nodewatch: a per-node health daemon.
//!
//! Watches log sources and runs diagnostic plugins, turns what they report
//! into structured health conditions and events, and hands snapshots to
//! exporters.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod engine;
pub mod rules;

pub mod plugin;
pub mod source;

pub mod exporter;
pub mod monitor;
