use ograph_types::ResourceKey;
use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum ResourceError {
    #[error("resource not found: {0}")]
    NotFound(ResourceKey),

    #[error("resource {key} has class {actual}, expected {expected}")]
    ClassMismatch {
        key: ResourceKey,
        expected: String,
        actual: String,
    },

    #[error("import cycle: {0} is already being loaded by a load that waits on this one")]
    Cycle(ResourceKey),

    #[error("failed to load {key}: {reason}")]
    Load { key: ResourceKey, reason: String },

    #[error("loading cancelled")]
    Cancelled,
}

pub type ResourceResult<T> = Result<T, ResourceError>;
