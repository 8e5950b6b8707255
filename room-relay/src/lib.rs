//! Multi-room, line-oriented chat relay over TCP.
//!
//! Clients connect, pick a display name, join a room, and every chat line
//! they send is relayed to all members of that room (sender included).
//! Each module focuses on a concrete responsibility:
//!
//! - [`connection`] holds per-connection handles and the registry of live
//!   connections with their display names.
//! - [`room`] tracks which rooms exist and who is in them. Rooms are created
//!   on first join and removed when the last member leaves.
//! - [`dispatcher`] is the bounded message queue and its single broadcaster
//!   task, which fans lines out without ever blocking on a slow recipient.
//! - [`session`] is the per-connection state machine that turns input lines
//!   into registry operations, replies, and queued chat messages.
//! - [`server`] accepts TCP connections and wires sessions to the shared
//!   [`state::RelayState`].
//! - [`protocol`] defines the command syntax, banner, and reply text.
//! - [`cli`], [`config`], and [`client`] cover the binary's command line,
//!   queue sizing, and the interactive terminal client.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod room;
pub mod server;
pub mod session;
pub mod state;
