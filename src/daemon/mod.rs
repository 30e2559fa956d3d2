//! Daemon Process Module
//!
//! Process control for the CockroachDB daemon and rendering of its
//! systemd unit file.

mod control;
pub mod service;

pub use control::{CockroachControl, CommandOutput, ProcessControl};

#[cfg(test)]
pub(crate) use control::testing;
