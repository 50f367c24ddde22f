//! Connection lifecycle notifications emitted by the event channel.
//!
//! These are about the connection itself, never about jobs. The
//! presentation layer uses them to show a connection indicator.

use std::fmt;

use serde::Serialize;

/// Connection state of the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no pending attempt (initial state, after a
    /// caller-initiated shutdown, or while waiting out a reconnect delay).
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect budget spent; only an explicit `connect()` restarts.
    Exhausted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// A lifecycle event of the channel's connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// A connection attempt started.
    Connecting,

    /// The connection opened.
    Connected,

    /// The connection was lost (or an attempt failed).
    Disconnected,

    /// A reconnect attempt will be made after `delay_ms`.
    ReconnectScheduled { attempt: u32, delay_ms: u64 },

    /// The reconnect budget is spent.
    Exhausted { attempts: u32 },

    /// The caller shut the channel down.
    Closed,
}
