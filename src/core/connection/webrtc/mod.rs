//! WebRTC peer connection: negotiation over the signaling store and the
//! established data channel.
//!
//! # Protocol overview
//!
//! - One data channel per session, ordered + fully reliable (SCTP
//!   defaults, no partial reliability): transfer framing depends on
//!   in-order delivery.
//! - Offer and answer are write-once/read-many fields in the signaling
//!   store: one round trip, no renegotiation.
//! - ICE candidates trickle through append-only per-role lists; consumers
//!   apply them idempotently and tolerate unusable candidates.
//! - Inbound frames are dispatched to the transfer state machine and
//!   surface to the application as [`PeerEvent`]s.

mod initializer;
mod negotiator;
mod peer;

pub use negotiator::{connect_as_initiator, connect_as_responder, NegotiationGuards};
pub use peer::{PeerEvent, PeerSession, SessionCleanup, DATA_CHANNEL_LABEL};
