//! Signaling store abstraction: the out-of-band relay both peers use to
//! exchange session descriptions and ICE candidates.
//!
//! The store is a key-value tree keyed by session code. The core never
//! assumes a concrete notification transport; it consumes an abstract
//! change feed per key path ([`Subscription`]) that always emits the
//! current value immediately on subscribe and again on every change.
//!
//! Two implementations ship: [`memory::MemoryStore`] (loopback, tests) and
//! [`http::HttpStore`] (REST key-value service with a polling feed).
//!
//! Write discipline: each peer writes only its own role's sub-fields
//! (offer and caller candidates by the initiator, answer and callee
//! candidates by the responder), so no field is ever concurrently written
//! by both peers and the store needs no transactions.

pub mod http;
pub mod memory;

use crate::core::error::SignalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ── Session record ───────────────────────────────────────────────────────────

/// Lifecycle states of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Connecting,
    Connected,
    Closed,
}

/// An SDP session description as stored and relayed: `{type, sdp}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpDescription {
    /// `"offer"` or `"answer"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl SdpDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: "offer".into(), sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: "answer".into(), sdp: sdp.into() }
    }
}

/// One ICE candidate in the browser JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Stable key for idempotent application: candidates may be observed
    /// more than once (list re-notifications) and must apply only once.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            self.candidate,
            self.sdp_mid.as_deref().unwrap_or(""),
            self.sdp_mline_index.map(|i| i as i32).unwrap_or(-1),
        )
    }
}

/// The two candidate lists, one per peer role. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateLists {
    #[serde(default)]
    pub caller: Vec<IceCandidate>,
    #[serde(default)]
    pub callee: Vec<IceCandidate>,
}

/// Which side of the session a peer is on. The initiator (sender) is the
/// caller; the session creator (receiver) is the callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Caller,
    Callee,
}

impl PeerRole {
    pub fn key(self) -> &'static str {
        match self {
            PeerRole::Caller => "caller",
            PeerRole::Callee => "callee",
        }
    }

    /// The list this role consumes (the other side's list).
    pub fn remote(self) -> PeerRole {
        match self {
            PeerRole::Caller => PeerRole::Callee,
            PeerRole::Callee => PeerRole::Caller,
        }
    }
}

/// Full session record under `sessions/{code}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<u64>,
    /// Null until the initiator publishes it. Defaulted on read: stores
    /// that drop null-valued keys return records without the field.
    #[serde(default)]
    pub offer: Option<SdpDescription>,
    /// Null until the responder publishes it.
    #[serde(default)]
    pub answer: Option<SdpDescription>,
    #[serde(default)]
    pub candidates: CandidateLists,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<u64>,
}

impl SessionRecord {
    /// Fresh record in the `waiting` state with empty signaling fields.
    pub fn new(created_at: u64) -> Self {
        Self {
            created_at,
            joined_at: None,
            offer: None,
            answer: None,
            candidates: CandidateLists::default(),
            status: SessionStatus::Waiting,
            closed_at: None,
        }
    }
}

/// Milliseconds since the unix epoch, saturating on clock skew.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

// ── Change feed ──────────────────────────────────────────────────────────────

/// Handle to one change feed. Dropping it (or calling [`cancel`]) stops
/// the backing watcher task; that is the unsubscribe operation.
///
/// [`cancel`]: Subscription::cancel
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    task: JoinHandle<()>,
}

impl<T> Subscription<T> {
    /// Pair a receiver with the watcher task feeding it.
    pub(crate) fn new(rx: mpsc::Receiver<T>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// Next observed value. `None` once the feed is cancelled or the
    /// backing store is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Stop the watcher task. Idempotent.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Buffer depth for change-feed channels. A full buffer backpressures the
/// watcher task, never drops a notification.
pub(crate) const FEED_BUFFER: usize = 32;

// ── Store trait ──────────────────────────────────────────────────────────────

/// Key-value signaling relay. All methods are keyed by session code.
///
/// `watch_*` feeds emit the current value immediately, then every change
/// of the watched field. Values may be re-observed (e.g. a whole-list
/// notification after an append); consumers must apply idempotently.
#[async_trait]
pub trait SignalingStore: Send + Sync {
    async fn create_session(&self, code: &str, record: SessionRecord) -> Result<(), SignalError>;

    async fn read_session(&self, code: &str) -> Result<Option<SessionRecord>, SignalError>;

    /// Record a join: status `connecting` plus the join timestamp.
    /// No-op when the session is absent.
    async fn mark_joined(&self, code: &str, joined_at: u64) -> Result<(), SignalError>;

    /// Soft close: status `closed` plus the close timestamp. Idempotent;
    /// closing an absent session is not an error.
    async fn mark_closed(&self, code: &str, closed_at: u64) -> Result<(), SignalError>;

    /// Hard delete. Idempotent; deleting an absent session is not an error.
    async fn delete_session(&self, code: &str) -> Result<(), SignalError>;

    async fn publish_offer(&self, code: &str, offer: SdpDescription) -> Result<(), SignalError>;

    /// Publishing the answer also flips the session status to `connected`.
    async fn publish_answer(&self, code: &str, answer: SdpDescription) -> Result<(), SignalError>;

    /// Append one candidate to `role`'s list. Lists are append-only and
    /// each peer only ever appends to its own role's list.
    async fn append_candidate(
        &self,
        code: &str,
        role: PeerRole,
        candidate: IceCandidate,
    ) -> Result<(), SignalError>;

    async fn watch_offer(
        &self,
        code: &str,
    ) -> Result<Subscription<Option<SdpDescription>>, SignalError>;

    async fn watch_answer(
        &self,
        code: &str,
    ) -> Result<Subscription<Option<SdpDescription>>, SignalError>;

    async fn watch_candidates(
        &self,
        code: &str,
        role: PeerRole,
    ) -> Result<Subscription<Vec<IceCandidate>>, SignalError>;
}
