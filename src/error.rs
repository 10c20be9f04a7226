use thiserror::Error;

/// Why a texture could not be produced for a key.
///
/// Failures are sticky: the cache keeps returning the same error for a key
/// until the entry is evicted or invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TextureError {
    /// The image source has nothing stored under the key.
    #[error("image not found: {0}")]
    NotFound(String),

    /// The bytes were read but could not be decoded.
    #[error("failed to decode image: {0}")]
    DecodeFailure(String),

    /// The container format is not one the decoder understands.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// The GPU refused the decoded pixels.
    #[error("failed to upload texture: {0}")]
    UploadFailure(String),
}

impl TextureError {
    /// Stable kebab-case name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not-found",
            Self::DecodeFailure(_) => "decode-failure",
            Self::UnsupportedFormat(_) => "unsupported-format",
            Self::UploadFailure(_) => "upload-failure",
        }
    }
}

/// Library error type for everything outside the per-texture path.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured photo directory is missing or unreadable.
    #[error("invalid photo directory: {0}")]
    BadDir(String),

    /// The scan completed but found no images.
    #[error("no images found in {0}")]
    EmptyLibrary(String),

    /// GPU adapter, device or surface setup failed.
    #[error("gpu error: {0}")]
    Gpu(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_kebab_case() {
        let cases = [
            (TextureError::NotFound("a".into()), "not-found"),
            (TextureError::DecodeFailure("b".into()), "decode-failure"),
            (TextureError::UnsupportedFormat("c".into()), "unsupported-format"),
            (TextureError::UploadFailure("d".into()), "upload-failure"),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }
}
