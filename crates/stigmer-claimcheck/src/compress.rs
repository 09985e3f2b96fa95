// Payload compression for offloaded objects.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::store::ClaimCheckError;

/// Compressor applied before Put. The reference's `compressed` flag, not
/// this configuration, decides whether Get decompresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compressor {
    Gzip,
    NoOp,
}

impl Compressor {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Compressor::Gzip)
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, ClaimCheckError> {
        match self {
            Compressor::NoOp => Ok(data.to_vec()),
            Compressor::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(data)
                    .map_err(|e| ClaimCheckError::Compression(e.to_string()))?;
                encoder
                    .finish()
                    .map_err(|e| ClaimCheckError::Compression(e.to_string()))
            }
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, ClaimCheckError> {
        match self {
            Compressor::NoOp => Ok(data.to_vec()),
            Compressor::Gzip => {
                let mut decoder = GzDecoder::new(data);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| ClaimCheckError::Compression(e.to_string()))?;
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_round_trip() {
        let data = vec![42u8; 100_000];
        let compressed = Compressor::Gzip.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(Compressor::Gzip.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_noop_passes_through() {
        let data = b"small payload".to_vec();
        assert_eq!(Compressor::NoOp.compress(&data).unwrap(), data);
        assert_eq!(Compressor::NoOp.decompress(&data).unwrap(), data);
    }

    #[test]
    fn test_gzip_rejects_garbage() {
        assert!(Compressor::Gzip.decompress(b"not gzip").is_err());
    }
}
