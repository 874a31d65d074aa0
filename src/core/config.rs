//! Centralized configuration constants for codedrop.
//!
//! All tunable parameters live here so they can be reviewed and adjusted
//! in a single place. Wire-format details (control message tags, the store
//! JSON schema) stay in their respective modules.

use std::time::Duration;

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Maximum bytes per outbound binary data-channel message (64 KiB).
///
/// Every outbound slice is split to this cap regardless of source size,
/// keeping per-message overhead and peak buffering predictable. Sized to
/// fit the 64 KiB SCTP receive buffer used by webrtc-rs peers.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// High water mark for the data channel's SCTP send buffer (bytes).
/// When `buffered_amount` exceeds this value after a send, the sender
/// pauses until the buffer drains below [`BUFFERED_AMOUNT_LOW`].
pub const BUFFERED_AMOUNT_HIGH: usize = 1024 * 1024; // 1 MiB

/// Low water mark: the buffered-amount-low notification fires once the
/// send buffer drains to this level or below.
pub const BUFFERED_AMOUNT_LOW: usize = 256 * 1024; // 256 KiB

/// Fallback wait when the transport never delivers a buffered-amount-low
/// notification. Bounds each drain wait so a missing event cannot
/// deadlock the sender.
pub const DRAIN_FALLBACK_TIMEOUT: Duration = Duration::from_millis(200);

/// Emit a progress event every this many received chunks (and always on
/// completion). Keeps the event channel quiet on large files.
pub const PROGRESS_EVERY_CHUNKS: u64 = 16;

// ── Sessions / Signaling ─────────────────────────────────────────────────────

/// Attempts at generating an unused 6-digit session code before giving up.
/// With a 900 000-code space, exhausting this is practically unreachable.
pub const SESSION_CODE_RETRIES: u32 = 5;

/// Poll interval for the HTTP signaling store's change feed.
pub const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long the initiator waits for the responder's answer, and the
/// responder for the initiator's offer, before abandoning negotiation.
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout waiting for the data channel to reach the open state after
/// the SDP exchange completed.
pub const DATA_CHANNEL_TIMEOUT: Duration = Duration::from_secs(30);
