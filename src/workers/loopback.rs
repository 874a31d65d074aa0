//! Loopback worker: both peers in one process, wired through the
//! in-memory signaling store. Exercises the whole path end to end
//! (session lifecycle, negotiation, transfer, teardown) with no external
//! signaling service.

use crate::core::connection::webrtc::{
    connect_as_initiator, connect_as_responder, PeerEvent, SessionCleanup,
};
use crate::core::session::SessionManager;
use crate::core::signaling::memory::MemoryStore;
use crate::core::signaling::SignalingStore;
use crate::core::transfer::sender::{load_outbound_file, send_archive, send_files};
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Ample bound for an in-process transfer; loopback never legitimately
/// takes this long.
const LOOPBACK_TIMEOUT: Duration = Duration::from_secs(120);

pub async fn run(files: Vec<PathBuf>, out: PathBuf, zip: bool) -> Result<()> {
    let store: Arc<dyn SignalingStore> = Arc::new(MemoryStore::new());
    let manager = SessionManager::new(store.clone());

    let code = manager.create_session().await?;
    println!("Loopback session {code}");

    // Receiver first: it must be subscribed to the offer before the
    // sender publishes it (matching the real deployment order).
    let (recv_tx, mut recv_rx) = mpsc::unbounded_channel();
    let responder = {
        let store = store.clone();
        let code = code.clone();
        tokio::spawn(async move { connect_as_responder(store, &code, recv_tx).await })
    };

    if !manager.join_session(&code).await? {
        return Err(anyhow!("loopback session vanished before join"));
    }

    let (send_tx, _send_rx) = mpsc::unbounded_channel();
    let initiator = connect_as_initiator(store.clone(), &code, send_tx).await?;
    let responder = responder
        .await
        .context("responder task panicked")??;

    let mut outbound = Vec::with_capacity(files.len());
    for path in &files {
        outbound.push(load_outbound_file(path).await?);
    }
    let expected_units = if zip { 1 } else { outbound.len() };

    if zip {
        send_archive(initiator.flow(), &outbound).await?;
    } else {
        send_files(initiator.flow(), &outbound).await?;
    }
    initiator.flow().flush().await;

    // Drain receiver events until every unit has landed.
    let drain = async {
        let mut completed = 0usize;
        while completed < expected_units {
            match recv_rx.recv().await {
                None | Some(PeerEvent::Disconnected) => {
                    return Err(anyhow!("receiver disconnected mid-transfer"));
                }
                Some(PeerEvent::Inbound(event)) => {
                    if super::receive::handle_inbound(event, &out).await {
                        completed += 1;
                    }
                }
            }
        }
        Ok(())
    };
    tokio::time::timeout(LOOPBACK_TIMEOUT, drain)
        .await
        .map_err(|_| anyhow!("loopback transfer timed out"))??;

    initiator.shutdown(SessionCleanup::Close).await;
    responder.shutdown(SessionCleanup::Delete).await;
    println!("Loopback transfer complete.");
    Ok(())
}
