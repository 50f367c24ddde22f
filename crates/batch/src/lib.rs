//! Batch job orchestration for the AuraTranscribe client.
//!
//! [`controller::BatchController`] drives one batch of uploaded files
//! from upload to export. It issues HTTP commands through the
//! [`backend::JobBackend`] seam, consumes server events from an
//! [`aura_client::channel::EventChannel`], and keeps the aggregate
//! state the presentation layer renders from.

pub mod backend;
pub mod controller;
pub mod error;
pub mod events;
pub mod export;
pub mod state;
