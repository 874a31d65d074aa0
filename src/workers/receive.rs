//! Receive worker: create a session, answer the first sender, write
//! whatever arrives into the download directory.

use crate::core::connection::webrtc::{connect_as_responder, PeerEvent, SessionCleanup};
use crate::core::session::SessionManager;
use crate::core::signaling::SignalingStore;
use crate::core::transfer::receiver::InboundEvent;
use crate::utils::fmt::format_file_size;
use crate::utils::paths::sanitize_relative_path;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

pub async fn run(
    store: Arc<dyn SignalingStore>,
    out: PathBuf,
    delete_session: bool,
) -> Result<()> {
    let manager = SessionManager::new(store.clone());
    let code = manager.create_session().await?;

    println!("Session code: {code}");
    println!("Waiting for sender to connect...");

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let session = tokio::select! {
        result = connect_as_responder(store, &code, events_tx) => {
            match result {
                Ok(session) => session,
                Err(e) => {
                    // Negotiation abandoned: don't leave the record behind.
                    manager.delete_session(&code).await.ok();
                    return Err(e);
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            manager.delete_session(&code).await.ok();
            return Ok(());
        }
    };

    println!("Sender connected.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events_rx.recv() => match event {
                None | Some(PeerEvent::Disconnected) => {
                    println!("Peer disconnected.");
                    break;
                }
                Some(PeerEvent::Inbound(inbound)) => {
                    handle_inbound(inbound, &out).await;
                }
            },
        }
    }

    let cleanup = if delete_session {
        SessionCleanup::Delete
    } else {
        SessionCleanup::Close
    };
    session.shutdown(cleanup).await;
    Ok(())
}

/// Print and persist one inbound event. Returns true when a transfer unit
/// finished (one file, or one whole archive batch).
pub(crate) async fn handle_inbound(event: InboundEvent, out: &Path) -> bool {
    match event {
        InboundEvent::FileStarted { name, size, .. } => {
            println!("Receiving {name} ({})", format_file_size(size));
            false
        }
        InboundEvent::FileProgress { name, received, size, .. } => {
            println!("  {name}: {} / {}", format_file_size(received), format_file_size(size));
            false
        }
        InboundEvent::FileCompleted(file) => {
            match save_bytes(out, &file.name, &file.data).await {
                Ok(path) => println!(
                    "Saved {} ({})",
                    path.display(),
                    format_file_size(file.data.len() as u64)
                ),
                Err(e) => eprintln!("Could not save {}: {e:#}", file.name),
            }
            true
        }
        InboundEvent::UnitAbandoned { name, received, expected, .. } => {
            warn!(
                event = "unit_abandoned",
                name = %name,
                received,
                expected,
                "Incomplete transfer displaced by a new one"
            );
            false
        }
        InboundEvent::ArchiveStarted { files, .. } => {
            println!("Receiving archive of {} files", files.len());
            false
        }
        InboundEvent::ArchiveProgress { received, .. } => {
            println!("  archive: {}", format_file_size(received));
            false
        }
        InboundEvent::ArchiveCompleted { entries, .. } => {
            for entry in &entries {
                match save_bytes(out, &entry.name, &entry.data).await {
                    Ok(path) => println!(
                        "Extracted {} ({})",
                        path.display(),
                        format_file_size(entry.data.len() as u64)
                    ),
                    Err(e) => eprintln!("Could not save {}: {e:#}", entry.name),
                }
            }
            true
        }
        InboundEvent::ArchiveFailed { reason, .. } => {
            eprintln!("Received archive could not be decoded: {reason}");
            true
        }
    }
}

/// Write received bytes under the download directory, sanitized.
async fn save_bytes(out: &Path, name: &str, data: &[u8]) -> Result<PathBuf> {
    let path = out.join(sanitize_relative_path(name));
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    tokio::fs::write(&path, data)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transfer::receiver::ReceivedFile;
    use uuid::Uuid;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("codedrop_test").join("receive").join(name);
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    fn cleanup(path: &Path) {
        let _ = std::fs::remove_dir_all(path);
    }

    #[tokio::test]
    async fn completed_file_lands_in_the_out_dir() {
        let dir = test_dir("save");
        let event = InboundEvent::FileCompleted(ReceivedFile {
            id: Uuid::new_v4(),
            name: "a.bin".into(),
            mime_type: "application/octet-stream".into(),
            size: 4,
            data: vec![1, 2, 3, 4],
        });

        assert!(handle_inbound(event, &dir).await);
        assert_eq!(std::fs::read(dir.join("a.bin")).unwrap(), vec![1, 2, 3, 4]);

        cleanup(&dir);
    }

    #[tokio::test]
    async fn hostile_names_cannot_escape_the_out_dir() {
        let dir = test_dir("hostile");
        let event = InboundEvent::FileCompleted(ReceivedFile {
            id: Uuid::new_v4(),
            name: "../../escape.bin".into(),
            mime_type: "application/octet-stream".into(),
            size: 1,
            data: vec![9],
        });

        handle_inbound(event, &dir).await;
        assert!(dir.join("escape.bin").exists());
        assert!(!dir.parent().unwrap().join("escape.bin").exists());

        cleanup(&dir);
    }
}
