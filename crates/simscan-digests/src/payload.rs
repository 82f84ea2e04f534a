//! The compressed digest payload crossing the pool boundary.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::Result;

/// A stored digest payload.
///
/// `Absent` records that extraction ran but produced nothing for this digest
/// type; it is stored as a null column so the file is not picked up again on
/// the next cycle. Absent payloads are never compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestPayload {
    Absent,
    /// gzip-compressed digest bytes.
    Compressed(Vec<u8>),
}

impl DigestPayload {
    /// Compress raw digest bytes. Level 9: digests are written once and read
    /// many times, and latency is not critical on the worker pool.
    pub fn compress(raw: &[u8]) -> Result<Self> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(raw)?;
        Ok(Self::Compressed(encoder.finish()?))
    }

    /// Decompress back to the raw bytes a plugin can work with.
    ///
    /// # Errors
    ///
    /// An `Absent` payload (or corrupt gzip data) is an error: callers must
    /// filter absent digests out before handing work to a comparer.
    pub fn decompress(&self) -> Result<Vec<u8>> {
        match self {
            Self::Absent => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "no digest content to decompress",
            )
            .into()),
            Self::Compressed(bytes) => {
                let mut decoder = GzDecoder::new(bytes.as_slice());
                let mut raw = Vec::new();
                decoder.read_to_end(&mut raw)?;
                Ok(raw)
            }
        }
    }

    /// The stored column value: `None` for absent, compressed bytes otherwise.
    pub fn as_column(&self) -> Option<&[u8]> {
        match self {
            Self::Absent => None,
            Self::Compressed(bytes) => Some(bytes),
        }
    }

    /// Rebuild from a stored column value.
    pub fn from_column(column: Option<Vec<u8>>) -> Self {
        match column {
            None => Self::Absent,
            Some(bytes) => Self::Compressed(bytes),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn compress_then_decompress_round_trips() {
        let raw = b"hello\nworld\n".repeat(100);
        let payload = DigestPayload::compress(&raw).unwrap();
        match &payload {
            DigestPayload::Compressed(bytes) => {
                // Repetitive input must actually shrink at level 9.
                assert!(bytes.len() < raw.len());
                // Stored bytes are well-formed gzip (magic header).
                assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
            }
            DigestPayload::Absent => panic!("expected compressed payload"),
        }
        assert_eq!(payload.decompress().unwrap(), raw);
    }

    #[test]
    fn empty_input_still_round_trips() {
        let payload = DigestPayload::compress(b"").unwrap();
        assert_eq!(payload.decompress().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn absent_payload_has_no_column_value_and_cannot_be_decompressed() {
        assert_eq!(DigestPayload::Absent.as_column(), None);
        assert!(DigestPayload::Absent.decompress().is_err());
        assert_eq!(DigestPayload::from_column(None), DigestPayload::Absent);
    }
}
