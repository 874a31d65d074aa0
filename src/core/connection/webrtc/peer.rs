//! Established peer session: event surface, message dispatch, teardown.

use crate::core::flow::FlowController;
use crate::core::signaling::{unix_millis, SignalingStore};
use crate::core::transfer::receiver::{InboundEvent, TransferReceiver};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

/// Label of the single data channel the initiator creates.
pub const DATA_CHANNEL_LABEL: &str = "data";

/// Events delivered from the connection layer to the application.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A transfer-protocol event produced by an inbound frame.
    Inbound(InboundEvent),
    /// The data channel (or the whole connection) is gone.
    Disconnected,
}

/// What to do with the session record at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCleanup {
    /// Leave the record for external expiry.
    Keep,
    /// Soft close: mark `closed`.
    Close,
    /// Hard delete the record.
    Delete,
}

/// An established connection: the peer connection, its open data channel
/// wrapped in the flow controller, and the background tasks that keep
/// consuming the candidate feeds.
pub struct PeerSession {
    pc: Arc<RTCPeerConnection>,
    flow: FlowController,
    store: Arc<dyn SignalingStore>,
    code: String,
    tasks: Vec<JoinHandle<()>>,
}

impl PeerSession {
    pub(crate) async fn establish(
        pc: Arc<RTCPeerConnection>,
        dc: Arc<RTCDataChannel>,
        store: Arc<dyn SignalingStore>,
        code: &str,
        tasks: Vec<JoinHandle<()>>,
    ) -> Result<Self> {
        let flow = FlowController::new(dc).await;
        Ok(Self {
            pc,
            flow,
            store,
            code: code.to_string(),
            tasks,
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn flow(&self) -> &FlowController {
        &self.flow
    }

    pub fn channel(&self) -> &Arc<RTCDataChannel> {
        self.flow.channel()
    }

    /// Best-effort teardown. Every step runs regardless of earlier
    /// failures: (1) cancel store subscriptions, (2) close the peer
    /// connection, (3) close or delete the session record. Failures are
    /// collected and logged, never propagated.
    pub async fn shutdown(mut self, cleanup: SessionCleanup) {
        let mut failures: Vec<String> = Vec::new();

        for task in self.tasks.drain(..) {
            task.abort();
        }

        if let Err(e) = self.pc.close().await {
            failures.push(format!("closing peer connection: {e}"));
        }

        let record_result = match cleanup {
            SessionCleanup::Keep => Ok(()),
            SessionCleanup::Close => self.store.mark_closed(&self.code, unix_millis()).await,
            SessionCleanup::Delete => self.store.delete_session(&self.code).await,
        };
        if let Err(e) = record_result {
            failures.push(format!("cleaning up session record: {e}"));
        }

        if failures.is_empty() {
            info!(event = "session_teardown", code = %self.code, "Session torn down");
        } else {
            for failure in &failures {
                warn!(event = "teardown_step_failed", code = %self.code, step = %failure, "Teardown step failed");
            }
        }
    }
}

/// Wire the data channel's message callback into a fresh transfer state
/// machine, forwarding produced events to the application channel.
pub(crate) fn attach_message_handler(
    dc: &Arc<RTCDataChannel>,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    let receiver = Arc::new(Mutex::new(TransferReceiver::new()));

    {
        let receiver = receiver.clone();
        let events = events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let receiver = receiver.clone();
            let events = events.clone();
            Box::pin(async move {
                let produced = {
                    let mut state = receiver.lock().await;
                    if msg.is_string {
                        match std::str::from_utf8(&msg.data) {
                            Ok(text) => state.handle_text(text),
                            // Invalid UTF-8 in a text frame: drop like any
                            // other malformed control message.
                            Err(_) => Vec::new(),
                        }
                    } else {
                        state.handle_binary(msg.data.clone())
                    }
                };
                for event in produced {
                    let _ = events.send(PeerEvent::Inbound(event));
                }
            })
        }));
    }

    let label = dc.label().to_string();
    dc.on_close(Box::new(move || {
        let events = events.clone();
        let label = label.clone();
        Box::pin(async move {
            info!(event = "channel_closed", channel = %label, "Data channel closed");
            let _ = events.send(PeerEvent::Disconnected);
        })
    }));
}

/// Log connection state transitions and surface terminal states.
pub(crate) fn monitor_connection_state(
    pc: &Arc<RTCPeerConnection>,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    pc.on_peer_connection_state_change(Box::new(move |state| {
        let events = events.clone();
        Box::pin(async move {
            match state {
                RTCPeerConnectionState::Connected => {
                    info!(event = "webrtc_connected", "Peer connection established");
                }
                RTCPeerConnectionState::Failed => {
                    error!(event = "webrtc_failed", "Peer connection failed");
                    let _ = events.send(PeerEvent::Disconnected);
                }
                RTCPeerConnectionState::Disconnected => {
                    warn!(event = "webrtc_disconnected", "Transient disconnect (ICE may recover)");
                }
                RTCPeerConnectionState::Closed => {
                    info!(event = "webrtc_closed", "Peer connection closed");
                }
                _ => {}
            }
        })
    }));
}
