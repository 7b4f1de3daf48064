use thiserror::Error;

use field_registry::RegistryError;
use state_store::StoreError;
use unknown_fields::TrackerError;

#[derive(Debug, Error)]
pub enum MappingError {
    /// The suggestion sample is not a JSON object or a non-empty array of
    /// objects. No state is mutated.
    #[error("invalid sample payload: {0}")]
    InvalidSample(String),

    /// Ingestion and confirmation need a source-scoped context.
    #[error("operation requires a context with a source id")]
    MissingSource,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type MappingResult<T> = std::result::Result<T, MappingError>;
