//! Composition root of the AuraTranscribe batch client.
//!
//! [`config::RunnerConfig`] reads the environment; [`session::run`] wires
//! the event channel to a batch controller and drives one batch from
//! upload to export.

pub mod config;
pub mod session;
