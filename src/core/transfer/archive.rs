//! Archive path: incremental ZIP encoding, whole-buffer decoding, and the
//! per-file compressibility policy.
//!
//! The encoder is pull-based: callers `begin_entry`, `feed` bytes as they
//! read them, and `finish` to obtain the complete container. The finished
//! bytes are then streamed through the flow controller, which is where
//! backpressure lives; nothing here touches the network.
//!
//! The receiver side decodes only complete containers: per the protocol,
//! everything between `zip-begin` and `zip-end` is one contiguous buffer
//! and partial decode is not required.

use anyhow::{Context, Result};
use std::io::{Cursor, Read, Write};
use zip::write::{FileOptions, ZipWriter};
use zip::{CompressionMethod, ZipArchive};

// ── Compressibility policy ───────────────────────────────────────────────────

/// Extensions that are already entropy-coded; recompressing them wastes
/// CPU for no size win, so such entries are stored verbatim.
const NO_COMPRESS_EXTS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "gif", // image
    "mp4", "mkv", "mov", "avi", // video
    "mp3", "aac", "wav", // audio
    "zip", "rar", "7z", // archives
    "pdf",
];

/// Whether a file should be Deflate-compressed inside the archive.
///
/// A heuristic, not a correctness requirement: extension first, then the
/// declared MIME type's top-level category.
pub fn is_compressible(name: &str, mime_type: &str) -> bool {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    if NO_COMPRESS_EXTS.contains(&ext.as_str()) {
        return false;
    }
    if mime_type.starts_with("image/")
        || mime_type.starts_with("audio/")
        || mime_type.starts_with("video/")
    {
        return false;
    }
    if mime_type == "application/pdf" {
        return false;
    }
    true
}

// ── Encoder ──────────────────────────────────────────────────────────────────

/// Incremental ZIP encoder over an in-memory container.
///
/// One entry is open at a time; `begin_entry` closes the previous one.
pub struct ArchiveEncoder {
    writer: ZipWriter<Cursor<Vec<u8>>>,
}

impl ArchiveEncoder {
    pub fn new() -> Self {
        Self {
            writer: ZipWriter::new(Cursor::new(Vec::new())),
        }
    }

    /// Open the next entry, Deflated or Stored per the compress flag.
    pub fn begin_entry(&mut self, name: &str, compress: bool) -> Result<()> {
        let method = if compress {
            CompressionMethod::Deflated
        } else {
            CompressionMethod::Stored
        };
        let options = FileOptions::default().compression_method(method);
        self.writer
            .start_file(name, options)
            .with_context(|| format!("starting archive entry {name}"))?;
        Ok(())
    }

    /// Append bytes to the open entry.
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data).context("writing archive entry data")?;
        Ok(())
    }

    /// Close the container and return the complete archive bytes.
    /// Nothing may be sent on the wire as archive payload after the end
    /// marker, so the container must be fully flushed here.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let cursor = self.writer.finish().context("finalizing archive")?;
        Ok(cursor.into_inner())
    }
}

impl Default for ArchiveEncoder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Decoder ──────────────────────────────────────────────────────────────────

/// One extracted archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
}

/// Decode a complete ZIP container into its named entries.
/// Directory entries are skipped.
pub fn decode_archive(bytes: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("reading archive")?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .with_context(|| format!("reading archive entry {index}"))?;
        if file.is_dir() {
            continue;
        }
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)
            .with_context(|| format!("extracting archive entry {index}"))?;
        entries.push(ArchiveEntry {
            name: file.name().to_string(),
            data,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_skips_already_compressed_formats() {
        assert!(is_compressible("notes.txt", "text/plain"));
        assert!(is_compressible("data.csv", ""));
        assert!(is_compressible("report.TXT", "text/plain"));

        assert!(!is_compressible("photo.jpg", "image/jpeg"));
        assert!(!is_compressible("photo.JPG", "image/jpeg"));
        assert!(!is_compressible("clip.mp4", "video/mp4"));
        assert!(!is_compressible("song.mp3", "audio/mpeg"));
        assert!(!is_compressible("bundle.zip", "application/zip"));
        assert!(!is_compressible("doc.pdf", "application/pdf"));

        // MIME category wins even with an unknown extension.
        assert!(!is_compressible("photo.raw2", "image/x-raw"));
        assert!(!is_compressible("doc.bin", "application/pdf"));
    }

    #[test]
    fn encode_decode_roundtrip_preserves_names_and_bytes() {
        let text = b"hello hello hello hello hello".repeat(100);
        let jpeg = vec![0xFFu8, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4];

        let mut enc = ArchiveEncoder::new();
        enc.begin_entry("notes.txt", true).unwrap();
        // Feed in pieces: the encoder must accept arbitrary split points.
        for piece in text.chunks(7) {
            enc.feed(piece).unwrap();
        }
        enc.begin_entry("photo.jpg", false).unwrap();
        enc.feed(&jpeg).unwrap();
        let bytes = enc.finish().unwrap();

        let entries = decode_archive(&bytes).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "notes.txt");
        assert_eq!(entries[0].data, text);
        assert_eq!(entries[1].name, "photo.jpg");
        assert_eq!(entries[1].data, jpeg);
    }

    #[test]
    fn compress_flag_selects_the_entry_method() {
        let mut enc = ArchiveEncoder::new();
        enc.begin_entry("a.txt", true).unwrap();
        enc.feed(&b"aaaaaaaa".repeat(512)).unwrap();
        enc.begin_entry("b.jpg", false).unwrap();
        enc.feed(&[1, 2, 3]).unwrap();
        let bytes = enc.finish().unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(
            archive.by_index(0).unwrap().compression(),
            CompressionMethod::Deflated
        );
        assert_eq!(
            archive.by_index(1).unwrap().compression(),
            CompressionMethod::Stored
        );
    }

    #[test]
    fn empty_entry_and_empty_archive_are_valid() {
        let mut enc = ArchiveEncoder::new();
        enc.begin_entry("empty.txt", true).unwrap();
        let bytes = enc.finish().unwrap();
        let entries = decode_archive(&bytes).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].data.is_empty());

        let none = ArchiveEncoder::new().finish().unwrap();
        assert!(decode_archive(&none).unwrap().is_empty());
    }

    #[test]
    fn truncated_container_fails_to_decode() {
        let mut enc = ArchiveEncoder::new();
        enc.begin_entry("a.txt", true).unwrap();
        enc.feed(b"payload").unwrap();
        let bytes = enc.finish().unwrap();

        assert!(decode_archive(&bytes[..bytes.len() / 2]).is_err());
    }
}
