use thiserror::Error;

use leadforge_core::UnknownFieldStatus;
use state_store::StoreError;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("unknown field not tracked: {source_id}/{field_name}")]
    NotFound {
        source_id: String,
        field_name: String,
    },

    #[error(
        "invalid status transition for {source_id}/{field_name}: \
         {from} -> {to}"
    )]
    InvalidTransition {
        source_id: String,
        field_name: String,
        from: UnknownFieldStatus,
        to: UnknownFieldStatus,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
