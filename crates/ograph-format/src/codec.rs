use serde::{Deserialize, Serialize};

use crate::error::{FormatError, FormatResult};

/// How a buffer body is stored on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferCodec {
    Raw = 0,
    Zstd = 1,
}

impl BufferCodec {
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Self::Raw),
            1 => Some(Self::Zstd),
            _ => None,
        }
    }
}

/// Compression applied to buffers at save time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    None,
    Zstd,
}

impl Default for CompressionMode {
    fn default() -> Self {
        Self::Zstd
    }
}

/// Buffer compression settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub mode: CompressionMode,
    /// zstd level.
    pub level: i32,
    /// Keep the raw bytes when the compressed size reaches this percentage of
    /// the original.
    pub threshold_percent: u8,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            mode: CompressionMode::default(),
            level: 3,
            threshold_percent: 90,
        }
    }
}

impl CompressionSettings {
    /// Store every buffer raw.
    pub fn disabled() -> Self {
        Self {
            mode: CompressionMode::None,
            ..Self::default()
        }
    }

    /// Returns `true` if a buffer of `raw_len` bytes that compresses to
    /// `compressed_len` bytes should be stored compressed.
    pub fn worth_compressing(&self, raw_len: u64, compressed_len: u64) -> bool {
        compressed_len * 100 < raw_len * self.threshold_percent as u64
    }
}

/// Buffer body ready to be written.
#[derive(Clone, Debug)]
pub struct EncodedBuffer {
    pub codec: BufferCodec,
    pub bytes: Vec<u8>,
}

/// Encode a buffer body according to `settings`.
pub fn encode_buffer(data: &[u8], settings: &CompressionSettings) -> FormatResult<EncodedBuffer> {
    if settings.mode == CompressionMode::None || data.is_empty() {
        return Ok(EncodedBuffer {
            codec: BufferCodec::Raw,
            bytes: data.to_vec(),
        });
    }
    let compressed = zstd::encode_all(data, settings.level)
        .map_err(|e| FormatError::CompressionFailed(e.to_string()))?;
    if settings.worth_compressing(data.len() as u64, compressed.len() as u64) {
        Ok(EncodedBuffer {
            codec: BufferCodec::Zstd,
            bytes: compressed,
        })
    } else {
        Ok(EncodedBuffer {
            codec: BufferCodec::Raw,
            bytes: data.to_vec(),
        })
    }
}

/// Decode a buffer body read from disk.
pub fn decode_buffer(codec: BufferCodec, stored: &[u8], size_in_memory: u32) -> FormatResult<Vec<u8>> {
    match codec {
        BufferCodec::Raw => Ok(stored.to_vec()),
        BufferCodec::Zstd => {
            let data = zstd::decode_all(stored)
                .map_err(|e| FormatError::DecompressionFailed(e.to_string()))?;
            if data.len() != size_in_memory as usize {
                return Err(FormatError::DecompressionFailed(format!(
                    "expected {size_in_memory} bytes, got {}",
                    data.len()
                )));
            }
            Ok(data)
        }
    }
}
