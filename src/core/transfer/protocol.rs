//! Data-channel wire protocol: tagged JSON control messages.
//!
//! Two message kinds multiplex over the one channel: control messages
//! (text frames carrying a JSON object tagged by `type`) and binary
//! frames (raw payload bytes of whichever transfer unit is open).
//! Binary framing needs no envelope at all; ordering and reliability are
//! delegated to the channel (SCTP, ordered + reliable).
//!
//! A text frame that does not parse as a known control message is ignored
//! by receivers, never fatal.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use webrtc::data_channel::RTCDataChannel;

/// Control messages, JSON-encoded as text frames. The `type` tag and the
/// field names are the wire contract shared with any compatible peer;
/// changing either breaks interop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Opens a simple file transfer unit. Binary frames that follow carry
    /// the file's bytes until `size` of them have arrived.
    #[serde(rename_all = "camelCase")]
    FileHeader {
        name: String,
        size: u64,
        mime_type: String,
    },
    /// Advisory end marker for a simple transfer. Completion is detected
    /// by byte count; this only enables validation.
    FileEnd { name: String },
    /// Opens an archive transfer unit and enumerates the batch.
    ZipBegin { files: Vec<ArchiveEntryMeta> },
    /// Closes the archive unit: the accumulated stream is a complete ZIP
    /// container, decode it now.
    ZipEnd,
}

/// Per-file metadata inside `zip-begin`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntryMeta {
    pub name: String,
    pub size: u64,
    /// Declared MIME type.
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Whether the entry is Deflate-compressed inside the container.
    pub compress: bool,
}

impl ControlMessage {
    /// Parse a received text frame. `None` for anything that is not a
    /// well-formed control message (dropped silently by receivers).
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Serialize and send a control message as a text frame.
pub async fn send_control(dc: &Arc<RTCDataChannel>, msg: &ControlMessage) -> Result<()> {
    let json = serde_json::to_string(msg)?;
    dc.send_text(json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_header_matches_wire_contract() {
        let msg = ControlMessage::FileHeader {
            name: "a.bin".into(),
            size: 200_000,
            mime_type: "application/octet-stream".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "file-header");
        assert_eq!(json["name"], "a.bin");
        assert_eq!(json["size"], 200_000);
        assert_eq!(json["mimeType"], "application/octet-stream");
    }

    #[test]
    fn zip_begin_lists_entries_with_type_and_compress_keys() {
        let msg = ControlMessage::ZipBegin {
            files: vec![
                ArchiveEntryMeta {
                    name: "notes.txt".into(),
                    size: 10,
                    mime_type: "text/plain".into(),
                    compress: true,
                },
                ArchiveEntryMeta {
                    name: "photo.jpg".into(),
                    size: 20,
                    mime_type: "image/jpeg".into(),
                    compress: false,
                },
            ],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "zip-begin");
        assert_eq!(json["files"][0]["type"], "text/plain");
        assert_eq!(json["files"][0]["compress"], true);
        assert_eq!(json["files"][1]["compress"], false);
    }

    #[test]
    fn zip_end_is_bare_tag() {
        let json = serde_json::to_string(&ControlMessage::ZipEnd).unwrap();
        assert_eq!(json, r#"{"type":"zip-end"}"#);
    }

    #[test]
    fn parse_roundtrips_and_rejects_garbage() {
        let wire = r#"{"type":"file-end","name":"a.bin"}"#;
        assert_eq!(
            ControlMessage::parse(wire),
            Some(ControlMessage::FileEnd { name: "a.bin".into() })
        );

        assert_eq!(ControlMessage::parse("not json"), None);
        assert_eq!(ControlMessage::parse(r#"{"type":"unknown"}"#), None);
        assert_eq!(ControlMessage::parse(r#"{"no":"tag"}"#), None);
    }
}
