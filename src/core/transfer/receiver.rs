//! Receive-side transfer state machine.
//!
//! Exactly one transfer unit is open at a time, tracked by an explicit
//! identifier. Unit open and close are unambiguous transitions: a header
//! or begin marker while an incomplete unit is open abandons that unit
//! (surfaced as an event, never fatal) before opening the new one.
//!
//! Dispatch rule: text frames parse as tagged control messages (malformed
//! ones are ignored), binary frames append to the open unit's buffer.
//! Simple-file completion is authoritative on byte count reaching the
//! declared size; `file-end` is advisory and only validates.

use crate::core::config::PROGRESS_EVERY_CHUNKS;
use crate::core::transfer::archive::{decode_archive, ArchiveEntry};
use crate::core::transfer::protocol::{ArchiveEntryMeta, ControlMessage};
use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

// ── Events ───────────────────────────────────────────────────────────────────

/// A fully reassembled simple-protocol file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub id: Uuid,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub data: Vec<u8>,
}

/// Events delivered to the application as frames are processed.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    FileStarted {
        id: Uuid,
        name: String,
        size: u64,
    },
    FileProgress {
        id: Uuid,
        name: String,
        received: u64,
        size: u64,
    },
    FileCompleted(ReceivedFile),
    /// An incomplete unit was displaced by a new header or begin marker.
    UnitAbandoned {
        id: Uuid,
        name: String,
        received: u64,
        expected: u64,
    },
    ArchiveStarted {
        id: Uuid,
        files: Vec<ArchiveEntryMeta>,
    },
    ArchiveProgress {
        id: Uuid,
        received: u64,
    },
    ArchiveCompleted {
        id: Uuid,
        entries: Vec<ArchiveEntry>,
    },
    /// The accumulated stream did not decode as a ZIP container.
    ArchiveFailed {
        id: Uuid,
        reason: String,
    },
}

// ── Open units ───────────────────────────────────────────────────────────────

struct InboundFile {
    id: Uuid,
    name: String,
    mime_type: String,
    size: u64,
    chunks: Vec<Bytes>,
    received: u64,
    chunk_count: u64,
}

struct InboundArchive {
    id: Uuid,
    files: Vec<ArchiveEntryMeta>,
    parts: Vec<Bytes>,
    received: u64,
    chunk_count: u64,
}

enum OpenUnit {
    File(InboundFile),
    Archive(InboundArchive),
}

impl OpenUnit {
    fn id(&self) -> Uuid {
        match self {
            OpenUnit::File(f) => f.id,
            OpenUnit::Archive(a) => a.id,
        }
    }
}

fn concat(parts: &[Bytes], total: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(total as usize);
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

// ── State machine ────────────────────────────────────────────────────────────

/// Per-channel receive state. Feed it every inbound frame; it returns the
/// application events that frame produced.
pub struct TransferReceiver {
    open: Option<OpenUnit>,
}

impl TransferReceiver {
    pub fn new() -> Self {
        Self { open: None }
    }

    /// Handle a text frame.
    pub fn handle_text(&mut self, text: &str) -> Vec<InboundEvent> {
        let Some(msg) = ControlMessage::parse(text) else {
            debug!(event = "control_unparsed", len = text.len(), "Ignoring non-control text frame");
            return Vec::new();
        };

        let mut events = Vec::new();
        match msg {
            ControlMessage::FileHeader { name, size, mime_type } => {
                self.abandon_open(&mut events);
                let id = Uuid::new_v4();
                debug!(event = "file_started", %id, name = %name, size, "Opened file unit");
                events.push(InboundEvent::FileStarted {
                    id,
                    name: name.clone(),
                    size,
                });
                self.open = Some(OpenUnit::File(InboundFile {
                    id,
                    name,
                    mime_type,
                    size,
                    chunks: Vec::new(),
                    received: 0,
                    chunk_count: 0,
                }));
                // A zero-byte file is complete the moment its header lands.
                events.extend(self.try_complete_file());
            }
            ControlMessage::FileEnd { name } => match &self.open {
                Some(OpenUnit::File(file)) if file.name == name => {
                    // Ordered delivery means every chunk already arrived;
                    // an incomplete unit here is a declared-size mismatch.
                    warn!(
                        event = "file_end_before_complete",
                        name = %name,
                        received = file.received,
                        expected = file.size,
                        "End marker arrived before declared size was reached"
                    );
                }
                _ => {
                    debug!(event = "file_end_advisory", name = %name, "Advisory end marker");
                }
            },
            ControlMessage::ZipBegin { files } => {
                self.abandon_open(&mut events);
                let id = Uuid::new_v4();
                debug!(event = "archive_started", %id, files = files.len(), "Opened archive unit");
                events.push(InboundEvent::ArchiveStarted {
                    id,
                    files: files.clone(),
                });
                self.open = Some(OpenUnit::Archive(InboundArchive {
                    id,
                    files,
                    parts: Vec::new(),
                    received: 0,
                    chunk_count: 0,
                }));
            }
            ControlMessage::ZipEnd => match self.open.take() {
                Some(OpenUnit::Archive(archive)) => {
                    let bytes = concat(&archive.parts, archive.received);
                    match decode_archive(&bytes) {
                        Ok(entries) => {
                            debug!(
                                event = "archive_completed",
                                id = %archive.id,
                                entries = entries.len(),
                                bytes = bytes.len(),
                                "Archive decoded"
                            );
                            events.push(InboundEvent::ArchiveCompleted {
                                id: archive.id,
                                entries,
                            });
                        }
                        Err(e) => {
                            warn!(event = "archive_decode_failed", id = %archive.id, %e, "Dropping undecodable archive");
                            events.push(InboundEvent::ArchiveFailed {
                                id: archive.id,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                other => {
                    debug!(event = "zip_end_without_archive", "Ignoring stray end marker");
                    self.open = other;
                }
            },
        }
        events
    }

    /// Handle a binary frame: payload of the open unit.
    pub fn handle_binary(&mut self, payload: Bytes) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        match &mut self.open {
            None => {
                debug!(event = "chunk_without_unit", len = payload.len(), "Dropping binary frame with no open unit");
            }
            Some(OpenUnit::File(file)) => {
                file.received += payload.len() as u64;
                file.chunk_count += 1;
                file.chunks.push(payload);
                if file.received < file.size && file.chunk_count % PROGRESS_EVERY_CHUNKS == 0 {
                    events.push(InboundEvent::FileProgress {
                        id: file.id,
                        name: file.name.clone(),
                        received: file.received,
                        size: file.size,
                    });
                }
            }
            Some(OpenUnit::Archive(archive)) => {
                archive.received += payload.len() as u64;
                archive.chunk_count += 1;
                archive.parts.push(payload);
                if archive.chunk_count % PROGRESS_EVERY_CHUNKS == 0 {
                    events.push(InboundEvent::ArchiveProgress {
                        id: archive.id,
                        received: archive.received,
                    });
                }
            }
        }
        events.extend(self.try_complete_file());
        events
    }

    /// Identifier of the currently open unit, if any.
    pub fn open_unit(&self) -> Option<Uuid> {
        self.open.as_ref().map(OpenUnit::id)
    }

    /// Close the open file unit if its byte count reached the declared size.
    fn try_complete_file(&mut self) -> Vec<InboundEvent> {
        let complete = matches!(&self.open, Some(OpenUnit::File(f)) if f.received >= f.size);
        if !complete {
            return Vec::new();
        }
        let Some(OpenUnit::File(file)) = self.open.take() else {
            unreachable!();
        };
        debug!(event = "file_completed", id = %file.id, name = %file.name, bytes = file.received, "File unit complete");
        vec![InboundEvent::FileCompleted(ReceivedFile {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            size: file.size,
            data: concat(&file.chunks, file.received),
        })]
    }

    /// Displace an incomplete open unit before opening a new one.
    fn abandon_open(&mut self, events: &mut Vec<InboundEvent>) {
        if let Some(unit) = self.open.take() {
            let (id, name, received, expected) = match unit {
                OpenUnit::File(f) => (f.id, f.name, f.received, f.size),
                OpenUnit::Archive(a) => {
                    let expected: u64 = a.files.iter().map(|f| f.size).sum();
                    (a.id, format!("archive[{}]", a.files.len()), a.received, expected)
                }
            };
            warn!(
                event = "unit_abandoned",
                %id,
                name = %name,
                received,
                expected,
                "New unit opened while previous was incomplete"
            );
            events.push(InboundEvent::UnitAbandoned {
                id,
                name,
                received,
                expected,
            });
        }
    }
}

impl Default for TransferReceiver {
    fn default() -> Self {
        Self::new()
    }
}
