//! Error taxonomy for the capture worker.
//!
//! Mirrors the error-kind table in the design: each kind carries its own
//! disposition logic in [`crate::coordinator`], rather than being collapsed
//! into a single opaque error.

use thiserror::Error as ThisError;

/// Errors a [`crate::record_store::RecordStore`] implementation can return.
///
/// Kept small and closed so callers can match on it directly, the way
/// `dwctl::db::errors::DbError` is matched on by its callers.
#[derive(ThisError, Debug)]
pub enum RecordStoreError {
    /// `create(.., only_if_absent: true)` raced against an existing row.
    #[error("record already exists")]
    AlreadyExists,

    /// No record with that id.
    #[error("record not found")]
    NotFound,

    /// Backend is overloaded; caller may retry with backoff.
    #[error("record store throttled: {0}")]
    Throttled(String),

    /// Anything else - not retriable.
    #[error("record store error: {0}")]
    Fatal(#[from] anyhow::Error),
}

/// Errors a [`crate::renderer::Renderer`] implementation can return.
#[derive(ThisError, Debug)]
#[error("render failed: {0}")]
pub struct RenderError(#[from] pub anyhow::Error);

/// Errors an [`crate::object_store::ObjectStore`] implementation can return.
#[derive(ThisError, Debug)]
#[error("upload failed: {0}")]
pub struct UploadError(#[from] pub anyhow::Error);

/// Top-level error returned by [`crate::coordinator::Coordinator::handle`].
///
/// Each variant corresponds to one row of the error-kind table: origin and
/// disposition are documented on the variant, not re-derived by callers.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid JSON / missing `url` / missing `requestId`. Disposition:
    /// `Nack`, the DLQ eventually catches it.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A render attempt failed. Disposition: write a `failed` record, `Nack`.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// An upload attempt failed. Disposition: write a `failed` record, `Nack`.
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// Record store kept throttling through the bounded retry. Disposition:
    /// `Nack`.
    #[error("record store unavailable after retry: {0}")]
    RecordStoreTransient(String),

    /// Any other record-store failure that isn't one of the skip/takeover
    /// cases the Coordinator already branches on.
    #[error(transparent)]
    RecordStore(#[from] RecordStoreError),

    /// Engine init or configuration failure. Disposition: exit non-zero, the
    /// orchestrator restarts the process.
    #[error("fatal: {0}")]
    Fatal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
