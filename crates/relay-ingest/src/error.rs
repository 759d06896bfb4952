use relay_store::RemoteStoreError;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur in the ingestion layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Failure talking to the remote store.
    #[error(transparent)]
    Remote(#[from] RemoteStoreError),

    /// An overwrite was attempted without a conditional header, or the
    /// stored ETag had to be backfilled first. Carries the ETag the client
    /// must present on retry (HTTP 428).
    #[error("precondition required; current etag is {etag}")]
    PreconditionRequired { etag: String },

    /// The supplied conditional header does not match the stored ETag
    /// (HTTP 412). Carries the current ETag.
    #[error("precondition failed; current etag is {etag}")]
    PreconditionFailed { etag: String },

    /// The upload's declared type differs from the existing file's type
    /// (HTTP 409).
    #[error("mime type mismatch: existing {existing}, uploaded {uploaded}")]
    TypeMismatch { existing: String, uploaded: String },

    /// The target file or directory does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// A directory could not be created and provably does not exist.
    #[error("directory creation failed: {0}")]
    CreateDenied(String),

    /// Failure from the metadata store collaborator.
    #[error("metadata store error: {0}")]
    Metadata(String),

    /// Local temp-file, merge, or hash I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure observed from a concurrent attempt on the same path
    /// (single-flight joiners share the leader's outcome).
    #[error("{0}")]
    Shared(Arc<Error>),
}

impl Error {
    /// HTTP status the routing layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Remote(RemoteStoreError::NotFound(_)) | Error::NotFound(_) => 404,
            Error::Remote(RemoteStoreError::Unavailable(_)) => 502,
            Error::Remote(_) => 500,
            Error::PreconditionRequired { .. } => 428,
            Error::PreconditionFailed { .. } => 412,
            Error::TypeMismatch { .. } => 409,
            Error::CreateDenied(_) | Error::Metadata(_) | Error::Io(_) => 500,
            Error::Shared(inner) => inner.http_status(),
        }
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(
            Error::PreconditionRequired {
                etag: "v1-a".into()
            }
            .http_status(),
            428
        );
        assert_eq!(
            Error::PreconditionFailed {
                etag: "v1-a".into()
            }
            .http_status(),
            412
        );
        assert_eq!(
            Error::TypeMismatch {
                existing: "application/pdf".into(),
                uploaded: "text/plain".into()
            }
            .http_status(),
            409
        );
        assert_eq!(Error::NotFound("x".into()).http_status(), 404);
        assert_eq!(
            Error::Remote(RemoteStoreError::Unavailable("down".into())).http_status(),
            502
        );
        let shared = Error::Shared(Arc::new(Error::NotFound("x".into())));
        assert_eq!(shared.http_status(), 404);
    }
}
