//! Send worker: join by code, negotiate, push the files, tear down.

use crate::core::connection::webrtc::{connect_as_initiator, SessionCleanup};
use crate::core::session::SessionManager;
use crate::core::signaling::SignalingStore;
use crate::core::transfer::sender::{load_outbound_file, send_archive, send_files};
use crate::utils::fmt::format_file_size;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

pub async fn run(
    store: Arc<dyn SignalingStore>,
    code: String,
    files: Vec<PathBuf>,
    zip: bool,
) -> Result<()> {
    let manager = SessionManager::new(store.clone());
    if !manager.join_session(&code).await? {
        bail!("no session found for code {code}");
    }

    let mut outbound = Vec::with_capacity(files.len());
    for path in &files {
        outbound.push(load_outbound_file(path).await?);
    }
    let total: u64 = outbound.iter().map(|f| f.size).sum();
    println!(
        "Sending {} file(s), {} total{}",
        outbound.len(),
        format_file_size(total),
        if zip { " (archived)" } else { "" }
    );

    // Sender side consumes no inbound transfer events; the channel only
    // has to stay open so disconnects are not reported as send errors.
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let session = connect_as_initiator(store, &code, events_tx).await?;
    println!("Connected to receiver.");

    let result = if zip {
        send_archive(session.flow(), &outbound).await
    } else {
        send_files(session.flow(), &outbound).await
    };

    // Let the queued tail reach the wire before the connection goes away.
    session.flow().flush().await;
    session.shutdown(SessionCleanup::Close).await;

    result?;
    println!("Done.");
    Ok(())
}
