//! Error types for registry mutations.
//!
//! All of these are local and recoverable: the caller may retry with
//! corrected input, and a failed call leaves both the in-memory index and
//! the store untouched.

use thiserror::Error;

use leadforge_core::AliasScope;
use state_store::StoreError;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Attempted creation of a field whose key already exists.
    #[error("system field already exists: {field_key}")]
    DuplicateKey { field_key: String },

    /// The alias's normalized form already resolves to a different field
    /// at an equal-or-broader scope.
    #[error(
        "alias '{raw}' (normalized '{normalized}') already resolves to \
         field '{existing_field}' at {scope} scope"
    )]
    Conflict {
        raw: String,
        normalized: String,
        existing_field: String,
        scope: AliasScope,
    },

    #[error("no such system field: {field_key}")]
    NoSuchField { field_key: String },

    /// A vendor- or source-scoped alias was registered without naming its
    /// vendor or source.
    #[error("{scope}-scoped alias requires a {scope} id")]
    MissingQualifier { scope: AliasScope },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
