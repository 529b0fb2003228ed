// src/cache/compress.rs

//! Artifact compression, chosen per region bandwidth.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

/// Compression applied to an artifact bundle before upload.
///
/// Fast links skip compression entirely; slow links trade CPU for bytes on
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionChoice {
    #[default]
    None,
    Gzip,
    GzipMax,
}

impl CompressionChoice {
    /// Pick a level from the measured bandwidth to the target region.
    pub fn for_bandwidth(bandwidth_mbps: f64) -> Self {
        if bandwidth_mbps >= 100.0 {
            CompressionChoice::None
        } else if bandwidth_mbps >= 50.0 {
            CompressionChoice::Gzip
        } else {
            CompressionChoice::GzipMax
        }
    }

    pub fn compress(self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let level = match self {
            CompressionChoice::None => return Ok(data.to_vec()),
            CompressionChoice::Gzip => Compression::default(),
            CompressionChoice::GzipMax => Compression::best(),
        };
        let mut encoder = GzEncoder::new(Vec::new(), level);
        encoder.write_all(data)?;
        encoder.finish()
    }

    pub fn decompress(self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            CompressionChoice::None => Ok(data.to_vec()),
            CompressionChoice::Gzip | CompressionChoice::GzipMax => {
                let mut decoder = GzDecoder::new(data);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}
