use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use ograph_types::ContentKey;

use crate::error::StreamResult;

/// Deferred access to a buffer's bytes.
///
/// Loaders hand these out instead of raw bytes so that deciding to keep a
/// payload is separate from a consumer actually touching it.
pub trait LatentBuffer: Send + Sync + fmt::Debug {
    fn content_key(&self) -> ContentKey;

    /// Size of the materialized bytes.
    fn size(&self) -> u64;

    fn load(&self) -> StreamResult<Bytes>;
}

/// Latent buffer whose bytes were already read and verified.
#[derive(Clone)]
pub struct PreloadedBuffer {
    key: ContentKey,
    data: Bytes,
}

impl PreloadedBuffer {
    pub fn new(key: ContentKey, data: Bytes) -> Self {
        Self { key, data }
    }
}

impl LatentBuffer for PreloadedBuffer {
    fn content_key(&self) -> ContentKey {
        self.key
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn load(&self) -> StreamResult<Bytes> {
        Ok(self.data.clone())
    }
}

impl fmt::Debug for PreloadedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PreloadedBuffer({:?}, {} bytes)", self.key, self.data.len())
    }
}

/// A raw binary payload held by an object (texture pixels, vertex data, ...).
#[derive(Clone, Debug, Default)]
pub enum DataBuffer {
    #[default]
    Empty,
    Resident(Bytes),
    Latent(Arc<dyn LatentBuffer>),
}

impl DataBuffer {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        if data.is_empty() {
            Self::Empty
        } else {
            Self::Resident(data)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Resident(data) => data.len() as u64,
            Self::Latent(latent) => latent.size(),
        }
    }

    /// Content key of the payload, `None` when empty.
    pub fn content_key(&self) -> Option<ContentKey> {
        match self {
            Self::Empty => None,
            Self::Resident(data) if data.is_empty() => None,
            Self::Resident(data) => Some(ContentKey::of(data)),
            Self::Latent(latent) => Some(latent.content_key()),
        }
    }

    /// Bring the bytes into memory, `None` when empty.
    pub fn materialize(&self) -> StreamResult<Option<Bytes>> {
        match self {
            Self::Empty => Ok(None),
            Self::Resident(data) if data.is_empty() => Ok(None),
            Self::Resident(data) => Ok(Some(data.clone())),
            Self::Latent(latent) => latent.load().map(Some),
        }
    }
}
