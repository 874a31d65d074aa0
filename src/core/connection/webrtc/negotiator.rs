//! Offer/answer/ICE negotiation driven through the signaling store.
//!
//! Two roles, one function each:
//!
//! - Initiator (the sender): create the channel, publish the offer under
//!   `offer`, publish local candidates under `candidates/caller`, apply
//!   the first non-null answer, consume `candidates/callee`.
//! - Responder (the receiver): wait for the first non-null offer, publish
//!   the answer (which also flips the session to `connected`), publish
//!   under `candidates/callee`, consume `candidates/caller`.
//!
//! All store notifications are idempotent to apply: [`NegotiationGuards`]
//! makes a duplicate offer/answer notification a no-op and deduplicates
//! candidates by fingerprint. An individual candidate that fails to apply
//! is logged and skipped; a peer connection tolerates unusable candidates.

use crate::core::config::{DATA_CHANNEL_TIMEOUT, NEGOTIATION_TIMEOUT};
use crate::core::error::SignalError;
use crate::core::signaling::{
    IceCandidate, PeerRole, SdpDescription, SignalingStore, Subscription,
};
use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::initializer;
use super::peer::{monitor_connection_state, PeerEvent, PeerSession, DATA_CHANNEL_LABEL};

// ── Idempotence guards ───────────────────────────────────────────────────────

/// Apply-once bookkeeping for remote description and candidates.
///
/// Change feeds may re-deliver: the answer field after an unrelated record
/// write, a whole candidate list after each append. Negotiation state must
/// be unchanged by any second delivery.
pub struct NegotiationGuards {
    remote_applied: std::sync::Mutex<bool>,
    seen_candidates: std::sync::Mutex<HashSet<String>>,
}

impl NegotiationGuards {
    pub fn new() -> Self {
        Self {
            remote_applied: std::sync::Mutex::new(false),
            seen_candidates: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// True exactly once: the first caller applies the remote description.
    pub fn try_apply_remote(&self) -> bool {
        let mut applied = self.remote_applied.lock().unwrap_or_else(|e| e.into_inner());
        if *applied {
            return false;
        }
        *applied = true;
        true
    }

    /// True the first time a candidate fingerprint is seen.
    pub fn try_apply_candidate(&self, fingerprint: &str) -> bool {
        let mut seen = self.seen_candidates.lock().unwrap_or_else(|e| e.into_inner());
        seen.insert(fingerprint.to_string())
    }
}

impl Default for NegotiationGuards {
    fn default() -> Self {
        Self::new()
    }
}

// ── Candidate conversions ────────────────────────────────────────────────────
// The signaling layer stays webrtc-free; the bridge lives here.

fn to_store_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_rtc_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

// ── Shared plumbing ──────────────────────────────────────────────────────────

/// Publish every locally discovered candidate under `role`'s list.
/// Store failures here are logged, not fatal: losing one candidate only
/// narrows connectivity options.
fn publish_local_candidates(
    pc: &Arc<RTCPeerConnection>,
    store: Arc<dyn SignalingStore>,
    code: &str,
    role: PeerRole,
) {
    let code = code.to_string();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let store = store.clone();
        let code = code.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                // End-of-gathering marker.
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    if let Err(e) = store
                        .append_candidate(&code, role, to_store_candidate(init))
                        .await
                    {
                        warn!(event = "candidate_publish_failed", role = role.key(), %e, "Could not publish local candidate");
                    }
                }
                Err(e) => {
                    warn!(event = "candidate_encode_failed", %e, "Could not encode local candidate");
                }
            }
        })
    }));
}

/// Drain the remote candidate feed, applying each unseen candidate.
/// Runs until the subscription is cancelled at teardown.
fn spawn_candidate_pump(
    mut feed: Subscription<Vec<IceCandidate>>,
    pc: Arc<RTCPeerConnection>,
    guards: Arc<NegotiationGuards>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(list) = feed.recv().await {
            for candidate in list {
                if !guards.try_apply_candidate(&candidate.fingerprint()) {
                    continue;
                }
                if let Err(e) = pc.add_ice_candidate(to_rtc_init(candidate)).await {
                    warn!(event = "candidate_rejected", %e, "Skipping unusable remote candidate");
                }
            }
        }
    })
}

/// Await the first non-null value on a description feed.
async fn first_description(
    feed: &mut Subscription<Option<SdpDescription>>,
    what: &'static str,
) -> Result<SdpDescription, SignalError> {
    let wait = async {
        while let Some(value) = feed.recv().await {
            if let Some(desc) = value {
                return Some(desc);
            }
        }
        None
    };
    timeout(NEGOTIATION_TIMEOUT, wait)
        .await
        .map_err(|_| SignalError::NegotiationTimeout(what))?
        .ok_or_else(|| SignalError::SignalingFailure(format!("{what} feed closed")))
}

/// Poll the channel into the open state, bounded by the channel timeout.
async fn wait_channel_open(dc: &Arc<RTCDataChannel>) -> Result<()> {
    let deadline = tokio::time::Instant::now() + DATA_CHANNEL_TIMEOUT;
    loop {
        match dc.ready_state() {
            RTCDataChannelState::Open => return Ok(()),
            RTCDataChannelState::Closed => {
                return Err(anyhow!("data channel '{}' closed before opening", dc.label()));
            }
            _ => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(SignalError::NegotiationTimeout("data channel open").into());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ── Roles ────────────────────────────────────────────────────────────────────

/// Initiator: `Idle → OfferCreated → OfferPublished → AwaitingAnswer →
/// Connected`. Returns once the data channel is open.
pub async fn connect_as_initiator(
    store: Arc<dyn SignalingStore>,
    code: &str,
    events: mpsc::UnboundedSender<PeerEvent>,
) -> Result<PeerSession> {
    let pc = initializer::new_peer_connection().await?;
    let guards = Arc::new(NegotiationGuards::new());

    let dc = pc
        .create_data_channel(DATA_CHANNEL_LABEL, Some(initializer::data_channel_init()))
        .await?;
    super::peer::attach_message_handler(&dc, events.clone());
    monitor_connection_state(&pc, events);

    publish_local_candidates(&pc, store.clone(), code, PeerRole::Caller);

    let offer = pc.create_offer(None).await?;
    let offer_sdp = offer.sdp.clone();
    pc.set_local_description(offer).await?;
    store
        .publish_offer(code, SdpDescription::offer(offer_sdp))
        .await?;
    info!(event = "offer_published", code = %code, "Offer published, awaiting answer");

    // Remote candidates may arrive before or after the answer; the pump
    // keeps applying them for the lifetime of the session.
    let candidate_feed = store.watch_candidates(code, PeerRole::Callee).await?;
    let candidate_task = spawn_candidate_pump(candidate_feed, pc.clone(), guards.clone());

    let mut answers = store.watch_answer(code).await?;
    let answer = first_description(&mut answers, "answer").await?;
    if guards.try_apply_remote() {
        let desc = RTCSessionDescription::answer(answer.sdp)?;
        pc.set_remote_description(desc).await?;
        info!(event = "answer_applied", code = %code, "Remote answer applied");
    }
    drop(answers);

    wait_channel_open(&dc).await?;
    info!(event = "channel_open", code = %code, "Data channel open");

    PeerSession::establish(pc, dc, store, code, vec![candidate_task]).await
}

/// Responder: `Idle → AwaitingOffer → AnswerCreated → AnswerPublished →
/// Connected`. Returns once the initiator's data channel is open.
pub async fn connect_as_responder(
    store: Arc<dyn SignalingStore>,
    code: &str,
    events: mpsc::UnboundedSender<PeerEvent>,
) -> Result<PeerSession> {
    let pc = initializer::new_peer_connection().await?;
    let guards = Arc::new(NegotiationGuards::new());

    // The data channel is created by the initiator and announced to us.
    let (dc_tx, mut dc_rx) = mpsc::channel::<Arc<RTCDataChannel>>(1);
    {
        let events = events.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let dc_tx = dc_tx.clone();
            let events = events.clone();
            Box::pin(async move {
                super::peer::attach_message_handler(&dc, events);
                let _ = dc_tx.send(dc).await;
            })
        }));
    }
    monitor_connection_state(&pc, events);

    publish_local_candidates(&pc, store.clone(), code, PeerRole::Callee);

    let candidate_feed = store.watch_candidates(code, PeerRole::Caller).await?;
    let candidate_task = spawn_candidate_pump(candidate_feed, pc.clone(), guards.clone());

    let mut offers = store.watch_offer(code).await?;
    let offer = first_description(&mut offers, "offer").await?;
    if guards.try_apply_remote() {
        let desc = RTCSessionDescription::offer(offer.sdp)?;
        pc.set_remote_description(desc).await?;

        let answer = pc.create_answer(None).await?;
        let answer_sdp = answer.sdp.clone();
        pc.set_local_description(answer).await?;
        store
            .publish_answer(code, SdpDescription::answer(answer_sdp))
            .await?;
        info!(event = "answer_published", code = %code, "Answer published");
    }
    drop(offers);

    let dc = timeout(DATA_CHANNEL_TIMEOUT, dc_rx.recv())
        .await
        .map_err(|_| SignalError::NegotiationTimeout("data channel announcement"))?
        .ok_or_else(|| anyhow!("peer connection dropped before announcing a channel"))?;

    wait_channel_open(&dc).await?;
    info!(event = "channel_open", code = %code, "Data channel open");

    PeerSession::establish(pc, dc, store, code, vec![candidate_task]).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_description_applies_exactly_once() {
        let guards = NegotiationGuards::new();
        assert!(guards.try_apply_remote());
        assert!(!guards.try_apply_remote());
        assert!(!guards.try_apply_remote());
    }

    #[test]
    fn candidates_deduplicate_by_fingerprint() {
        let guards = NegotiationGuards::new();
        let a = IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 9 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        let b = IceCandidate {
            candidate: "candidate:2 1 udp 1 10.0.0.2 9 typ host".into(),
            ..a.clone()
        };

        assert!(guards.try_apply_candidate(&a.fingerprint()));
        // Same candidate re-observed in a later whole-list notification.
        assert!(!guards.try_apply_candidate(&a.fingerprint()));
        assert!(guards.try_apply_candidate(&b.fingerprint()));
        assert!(!guards.try_apply_candidate(&b.fingerprint()));
    }

    #[test]
    fn store_candidate_conversion_is_lossless() {
        let init = RTCIceCandidateInit {
            candidate: "candidate:1 1 udp 1 10.0.0.1 9 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some("ufrag".into()),
        };
        let stored = to_store_candidate(init.clone());
        let back = to_rtc_init(stored);
        assert_eq!(back.candidate, init.candidate);
        assert_eq!(back.sdp_mid, init.sdp_mid);
        assert_eq!(back.sdp_mline_index, init.sdp_mline_index);
        assert_eq!(back.username_fragment, init.username_fragment);
    }
}
