use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use bytes::Bytes;
use ograph_format::codec::decode_buffer;
use ograph_format::{BufferCodec, BufferRecord};
use ograph_object::{LatentBuffer, StreamError, StreamResult};
use ograph_types::ContentKey;
use tracing::{debug, warn};

use crate::config::IntegrityPolicy;
use crate::source::FileSource;

// ---------------------------------------------------------------------------
// BufferCache
// ---------------------------------------------------------------------------

/// Buffer payloads already in memory, keyed by content.
///
/// Shared between loads: a buffer whose key is resident is bound directly
/// and never read from the file.
pub struct BufferCache {
    entries: RwLock<HashMap<ContentKey, Bytes>>,
}

impl BufferCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &ContentKey) -> Option<Bytes> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    pub fn insert(&self, key: ContentKey, data: Bytes) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        debug!(key = %key, size = data.len(), "buffer made resident");
        entries.insert(key, data);
    }

    pub fn contains(&self, key: &ContentKey) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BufferCache {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// FileBackedBuffer
// ---------------------------------------------------------------------------

/// Latent buffer over a region of a loaded file.
///
/// Nothing is read until the first [`LatentBuffer::load`]. The body is then
/// read, decoded and checked against its content key once, kept, and
/// published to the attached [`BufferCache`] if there is one.
pub struct FileBackedBuffer {
    source: Arc<dyn FileSource>,
    record: BufferRecord,
    /// Absolute offset of the stored body.
    offset: u64,
    integrity: IntegrityPolicy,
    cache: Option<Arc<BufferCache>>,
    data: Mutex<Option<Bytes>>,
}

impl FileBackedBuffer {
    /// Create a new buffer over the body described by `record`, stored at
    /// absolute `offset` in `source`.
    pub fn new(source: Arc<dyn FileSource>, record: BufferRecord, offset: u64, integrity: IntegrityPolicy) -> Self {
        Self {
            source,
            record,
            offset,
            integrity,
            cache: None,
            data: Mutex::new(None),
        }
    }

    /// Publish the bytes to `cache` once they are loaded.
    pub fn with_cache(mut self, cache: Arc<BufferCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Whether the body has been read.
    pub fn is_loaded(&self) -> bool {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl LatentBuffer for FileBackedBuffer {
    fn content_key(&self) -> ContentKey {
        self.record.content_key
    }

    fn size(&self) -> u64 {
        self.record.size_in_memory as u64
    }

    fn load(&self) -> StreamResult<Bytes> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bytes) = data.as_ref() {
            return Ok(bytes.clone());
        }
        let stored = self.source.read_at(self.offset, self.record.size_on_disk as usize)?;
        let bytes = decode_and_verify(&self.record, &stored, self.integrity)
            .map_err(|reason| StreamError::BufferUnavailable(format!("offset {}: {reason}", self.offset)))?;
        debug!(offset = self.offset, size = bytes.len(), "buffer materialized");
        if let Some(cache) = &self.cache {
            cache.insert(self.record.content_key, bytes.clone());
        }
        *data = Some(bytes.clone());
        Ok(bytes)
    }
}

impl fmt::Debug for FileBackedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBackedBuffer")
            .field("key", &self.record.content_key)
            .field("offset", &self.offset)
            .field("size_on_disk", &self.record.size_on_disk)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Decode a stored body and check it against its record. A content key
/// mismatch is an error under [`IntegrityPolicy::Strict`] and a warning
/// otherwise; a body that cannot be decoded is always an error.
pub(crate) fn decode_and_verify(
    record: &BufferRecord,
    stored: &[u8],
    integrity: IntegrityPolicy,
) -> Result<Bytes, String> {
    let codec = BufferCodec::from_id(record.codec).ok_or_else(|| format!("unknown codec {}", record.codec))?;
    let data = decode_buffer(codec, stored, record.size_in_memory).map_err(|e| e.to_string())?;
    if data.len() != record.size_in_memory as usize {
        return Err(format!("{} bytes decoded, {} expected", data.len(), record.size_in_memory));
    }
    if integrity.is_enabled() {
        let actual = ContentKey::of(&data);
        if actual != record.content_key {
            let reason = format!("content key {actual} does not match stored {}", record.content_key);
            if integrity == IntegrityPolicy::Strict {
                return Err(reason);
            }
            warn!(%reason, "buffer integrity check failed");
        }
    }
    Ok(Bytes::from(data))
}
