//! Compression strategies and the in-process image recompressor.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// How an attached image is compressed and placed in storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionStrategy {
    /// Store the bytes as submitted
    Raw,
    /// Recompress in-process, then upload
    #[default]
    Client,
    /// Stateless HTTP function compresses and stores the blob itself
    RemoteFunction,
    /// Named edge procedure compresses and stores the blob itself
    RemoteEdge,
}

impl CompressionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionStrategy::Raw => "raw",
            CompressionStrategy::Client => "client",
            CompressionStrategy::RemoteFunction => "remote-function",
            CompressionStrategy::RemoteEdge => "remote-edge",
        }
    }
}

impl std::fmt::Display for CompressionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file attached to an upload request
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub bytes: Vec<u8>,
    /// Original filename as submitted
    pub filename: String,
    /// Size the client declared
    pub declared_size: u64,
    pub content_type: Option<String>,
}

impl UploadFile {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        let declared_size = bytes.len() as u64;
        Self {
            bytes,
            filename: filename.into(),
            declared_size,
            content_type: None,
        }
    }

    /// Size checked against the limit; a client understating its size gains nothing
    pub fn size(&self) -> u64 {
        self.declared_size.max(self.bytes.len() as u64)
    }
}

/// Result of running a strategy
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// Bytes are ready but not yet stored; the pipeline must upload them
    Staged {
        bytes: Vec<u8>,
        path: String,
        content_type: String,
    },
    /// The strategy already stored the blob under `path`
    Stored { path: String },
}

impl Placement {
    pub fn path(&self) -> &str {
        match self {
            Placement::Staged { path, .. } | Placement::Stored { path } => path,
        }
    }
}

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Compression task failed: {0}")]
    Task(String),
}

/// In-process recompressor used by the `client` strategy.
///
/// Keeps the format family: JPEG is re-encoded at the configured quality, PNG
/// is re-encoded losslessly with maximum deflate effort.
#[derive(Debug, Clone, Copy)]
pub struct ImageCompressor {
    jpeg_quality: u8,
}

impl ImageCompressor {
    /// `quality_factor` is 0.0 - 1.0
    pub fn new(quality_factor: f32) -> Self {
        let jpeg_quality = (quality_factor * 100.0).round().clamp(1.0, 100.0) as u8;
        Self { jpeg_quality }
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    /// Recompress `bytes`. If the result is not smaller the input is returned.
    pub fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let format = image::guess_format(bytes)
            .map_err(|e| CompressionError::UnsupportedFormat(e.to_string()))?;

        let mut output = Vec::new();
        match format {
            ImageFormat::Jpeg => {
                let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
                    .map_err(CompressionError::Decode)?;
                image
                    .write_with_encoder(JpegEncoder::new_with_quality(
                        &mut output,
                        self.jpeg_quality,
                    ))
                    .map_err(CompressionError::Encode)?;
            }
            ImageFormat::Png => {
                let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)
                    .map_err(CompressionError::Decode)?;
                image
                    .write_with_encoder(PngEncoder::new_with_quality(
                        &mut output,
                        CompressionType::Best,
                        FilterType::Adaptive,
                    ))
                    .map_err(CompressionError::Encode)?;
            }
            other => {
                return Err(CompressionError::UnsupportedFormat(format!("{other:?}")));
            }
        }

        debug!(
            format = ?format,
            original_bytes = bytes.len(),
            compressed_bytes = output.len(),
            "Image recompressed"
        );

        if output.len() >= bytes.len() {
            return Ok(bytes.to_vec());
        }

        Ok(output)
    }

    /// Run [`compress`](Self::compress) on the blocking pool
    pub async fn compress_blocking(&self, bytes: Vec<u8>) -> Result<Vec<u8>, CompressionError> {
        let compressor = *self;
        tokio::task::spawn_blocking(move || compressor.compress(&bytes))
            .await
            .map_err(|e| CompressionError::Task(e.to_string()))?
    }
}
