use thiserror::Error;

/// Failure taxonomy for batch conversion.
///
/// Batch-level preconditions (authorization, output directory, zero resolvable
/// assets) abort the whole run; every other kind is caught at the item
/// boundary and turned into a per-item failure outcome.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Media library access denied: {0}")]
    AuthorizationDenied(String),

    #[error("Asset fetch failed: {0}")]
    AssetFetchFailed(String),

    #[error("No capture date on {0}")]
    MissingCaptureDate(String),

    #[error("Payload fetch failed: {0}")]
    PayloadFetchFailed(String),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Encode failed: {0}")]
    EncodeFailed(String),

    #[error("Timestamp update failed: {0}")]
    TimestampUpdateFailed(String),

    #[error("Output directory invalid: {0}")]
    OutputDirectoryInvalid(String),

    #[error("Video export failed: {0}")]
    VideoExportFailed(String),

    #[error("Video metadata update failed: {0}")]
    VideoMetadataUpdateFailed(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, ConvertError>;
