//! Compression and checksum utilities for backup artifacts.
//!
//! Dumps are gzip-compressed streaming, with a SHA-256 checksum
//! calculated over the compressed bytes as they are written.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use vaultsync_core::Result;

/// Default compression level (6 = balanced speed/ratio).
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Compresses a file with gzip and returns the SHA-256 of the
/// compressed output.
pub fn compress_file(source: &Path, dest: &Path, level: Option<u32>) -> Result<String> {
    let compression_level = level.unwrap_or(DEFAULT_COMPRESSION_LEVEL).clamp(1, 9);

    let mut source_file = File::open(source)?;
    let dest_file = File::create(dest)?;

    let encoder = GzEncoder::new(
        ChecksumWriter::new(dest_file),
        Compression::new(compression_level),
    );
    let mut writer = io::BufWriter::new(encoder);

    io::copy(&mut source_file, &mut writer)?;

    let encoder = writer
        .into_inner()
        .map_err(|e| io::Error::other(e.to_string()))?;
    let checksum_writer = encoder.finish()?;
    Ok(checksum_writer.checksum())
}

/// Calculates the SHA-256 checksum of a file.
pub fn calculate_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex_encode(&hasher.finalize()))
}

/// Streaming read pass over a gzip file without materializing its
/// contents. Returns the uncompressed byte count; any decode error
/// means the artifact is unreadable.
pub fn gzip_readable(path: &Path) -> Result<u64> {
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(io::BufReader::new(file));
    let mut buffer = [0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        let read = decoder.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        total += read as u64;
    }

    Ok(total)
}

/// Writer that hashes everything passing through it.
struct ChecksumWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> ChecksumWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn checksum(self) -> String {
        hex_encode(&self.hasher.finalize())
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_compress_then_checksum_matches() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("dump.sql");
        let dest = dir.path().join("dump.sql.gz");
        fs::write(&source, "SELECT 1;\n".repeat(1000)).unwrap();

        let streamed = compress_file(&source, &dest, None).unwrap();
        let recomputed = calculate_checksum(&dest).unwrap();
        assert_eq!(streamed, recomputed);
        assert_eq!(streamed.len(), 64);
    }

    #[test]
    fn test_gzip_readable_counts_uncompressed_bytes() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("dump.sql");
        let dest = dir.path().join("dump.sql.gz");
        let content = "INSERT INTO t VALUES (1);\n".repeat(100);
        fs::write(&source, &content).unwrap();
        compress_file(&source, &dest, None).unwrap();

        let total = gzip_readable(&dest).unwrap();
        assert_eq!(total, content.len() as u64);
    }

    #[test]
    fn test_gzip_readable_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("bad.gz");
        fs::write(&bad, "this is not gzip data").unwrap();
        assert!(gzip_readable(&bad).is_err());
    }

    #[test]
    fn test_gzip_readable_rejects_empty_file() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty.gz");
        fs::write(&empty, "").unwrap();
        assert!(gzip_readable(&empty).is_err());
    }
}
