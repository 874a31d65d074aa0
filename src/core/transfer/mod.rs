//! File transfer over the data channel.
//!
//! # Protocol overview
//!
//! - Control messages are JSON text frames tagged by `type`; binary
//!   frames carry raw payload of the open transfer unit (no envelope).
//! - Simple protocol per file: `file-header` → ≤ 64 KiB chunks →
//!   `file-end`. Completion is by byte count; the end marker is advisory.
//! - Archive protocol per batch: `zip-begin` (names, sizes, compress
//!   flags) → one continuous ZIP container as chunks → `zip-end`, at
//!   which point the receiver decodes the accumulated container.
//! - At most one unit is in flight per channel; units carry explicit ids
//!   and open/close are unambiguous transitions.
//! - Reliable in-order delivery is delegated to the channel's SCTP layer.

pub mod archive;
pub mod protocol;
pub mod receiver;
pub mod sender;
