//! codedrop: P2P file drop paired by a 6-digit session code.
//!
//! Two peers pair through a shared key-value signaling store, negotiate a
//! direct WebRTC data channel (offer/answer/ICE through the store), then
//! stream files over the channel with chunking, optional on-the-fly ZIP
//! archiving, and send-side backpressure.
//!
//! Layout:
//! - [`core::signaling`] — the store abstraction and its two backends
//! - [`core::session`] — session-code lifecycle
//! - [`core::connection`] — negotiation and the established peer session
//! - [`core::transfer`] — wire protocol, send flows, receive state machine
//! - [`core::flow`] — outbound flow control
//! - [`workers`] — CLI-facing orchestration (presentation, not core)

pub mod core;
pub mod utils;
pub mod workers;
