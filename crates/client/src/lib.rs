//! Transport layer for the AuraTranscribe batch client.
//!
//! Provides typed server-event parsing, the WebSocket connector, the
//! fixed-interval reconnect policy, the reconnecting event channel with
//! typed subscriptions, and the HTTP API wrapper for the transcription
//! server.

pub mod api;
pub mod channel;
pub mod client;
pub mod events;
pub mod messages;
pub mod reconnect;
