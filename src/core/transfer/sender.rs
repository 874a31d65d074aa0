//! Send-side transfer flows: the simple per-file protocol and the
//! archive batch protocol.
//!
//! Files are sent strictly one after another; a file's header, chunks,
//! and end marker all complete before the next header goes out. All
//! binary payload goes through the [`FlowController`], so no call here
//! can queue unbounded data.

use crate::core::config::MAX_CHUNK_SIZE;
use crate::core::flow::FlowController;
use crate::core::transfer::archive::{is_compressible, ArchiveEncoder};
use crate::core::transfer::protocol::{send_control, ArchiveEntryMeta, ControlMessage};
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::info;

/// Source-file metadata gathered before sending.
#[derive(Debug, Clone)]
pub struct OutboundFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// Stat a path and guess its MIME type from the extension.
pub async fn load_outbound_file(path: &Path) -> Result<OutboundFile> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("reading metadata of {}", path.display()))?;
    if !metadata.is_file() {
        return Err(anyhow!("{} is not a regular file", path.display()));
    }
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("invalid file name: {}", path.display()))?
        .to_string();
    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    Ok(OutboundFile {
        path: path.to_path_buf(),
        name,
        size: metadata.len(),
        mime_type,
    })
}

// ── Simple protocol ──────────────────────────────────────────────────────────

/// Send every file with the simple per-file protocol, sequentially.
pub async fn send_files(flow: &FlowController, files: &[OutboundFile]) -> Result<()> {
    for file in files {
        send_single_file(flow, file).await?;
    }
    Ok(())
}

/// One file: header, chunked bytes, advisory end marker.
async fn send_single_file(flow: &FlowController, outbound: &OutboundFile) -> Result<()> {
    info!(
        event = "file_send_start",
        name = %outbound.name,
        size = outbound.size,
        mime = %outbound.mime_type,
        "Sending file"
    );

    send_control(
        flow.channel(),
        &ControlMessage::FileHeader {
            name: outbound.name.clone(),
            size: outbound.size,
            mime_type: outbound.mime_type.clone(),
        },
    )
    .await?;

    let mut file = File::open(&outbound.path)
        .await
        .with_context(|| format!("opening {}", outbound.path.display()))?;
    let mut buffer = vec![0u8; MAX_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        flow.send(&buffer[..n]).await?;
    }

    send_control(
        flow.channel(),
        &ControlMessage::FileEnd {
            name: outbound.name.clone(),
        },
    )
    .await?;

    info!(event = "file_send_complete", name = %outbound.name, "File sent");
    Ok(())
}

// ── Archive protocol ─────────────────────────────────────────────────────────

/// Batch metadata for `zip-begin`, with the per-file compress flag.
pub fn archive_manifest(files: &[OutboundFile]) -> Vec<ArchiveEntryMeta> {
    files
        .iter()
        .map(|f| ArchiveEntryMeta {
            name: f.name.clone(),
            size: f.size,
            mime_type: f.mime_type.clone(),
            compress: is_compressible(&f.name, &f.mime_type),
        })
        .collect()
}

/// Send the whole batch as one ZIP container: begin marker, the encoded
/// container as chunked binary, end marker.
///
/// The encoder is fed file by file and finished before the end marker
/// goes out; the receiver decodes only on `zip-end`, so a fully flushed
/// container is the correctness boundary here.
pub async fn send_archive(flow: &FlowController, files: &[OutboundFile]) -> Result<()> {
    let manifest = archive_manifest(files);
    info!(
        event = "archive_send_start",
        files = manifest.len(),
        total = manifest.iter().map(|f| f.size).sum::<u64>(),
        "Sending archive batch"
    );

    send_control(
        flow.channel(),
        &ControlMessage::ZipBegin {
            files: manifest.clone(),
        },
    )
    .await?;

    let mut encoder = ArchiveEncoder::new();
    for (outbound, meta) in files.iter().zip(&manifest) {
        encoder.begin_entry(&meta.name, meta.compress)?;
        let mut file = File::open(&outbound.path)
            .await
            .with_context(|| format!("opening {}", outbound.path.display()))?;
        let mut buffer = vec![0u8; MAX_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            encoder.feed(&buffer[..n])?;
        }
    }
    let container = encoder.finish()?;

    flow.send(&container).await?;
    send_control(flow.channel(), &ControlMessage::ZipEnd).await?;

    info!(
        event = "archive_send_complete",
        bytes = container.len(),
        "Archive batch sent"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("codedrop_test").join("sender").join(name);
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    fn cleanup(path: &Path) {
        let _ = std::fs::remove_dir_all(path);
    }

    #[tokio::test]
    async fn outbound_file_guesses_mime_from_extension() {
        let dir = test_dir("mime");
        let path = dir.join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();

        let outbound = load_outbound_file(&path).await.unwrap();
        assert_eq!(outbound.name, "notes.txt");
        assert_eq!(outbound.size, 5);
        assert_eq!(outbound.mime_type, "text/plain");

        let unknown = dir.join("blob.qqq");
        std::fs::write(&unknown, b"x").unwrap();
        let outbound = load_outbound_file(&unknown).await.unwrap();
        assert_eq!(outbound.mime_type, "application/octet-stream");

        cleanup(&dir);
    }

    #[tokio::test]
    async fn load_outbound_file_rejects_directories() {
        let dir = test_dir("dirs");
        assert!(load_outbound_file(&dir).await.is_err());
        cleanup(&dir);
    }

    #[test]
    fn manifest_flags_follow_the_compressibility_policy() {
        let files = vec![
            OutboundFile {
                path: PathBuf::from("notes.txt"),
                name: "notes.txt".into(),
                size: 10,
                mime_type: "text/plain".into(),
            },
            OutboundFile {
                path: PathBuf::from("photo.jpg"),
                name: "photo.jpg".into(),
                size: 20,
                mime_type: "image/jpeg".into(),
            },
        ];
        let manifest = archive_manifest(&files);
        assert!(manifest[0].compress);
        assert!(!manifest[1].compress);
        assert_eq!(manifest[1].mime_type, "image/jpeg");
    }
}
