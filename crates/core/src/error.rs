use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy for the upscaling core.
///
/// Nothing here is fatal to the process; callers decide whether a failure
/// aborts the current operation (single run) or is recorded and skipped
/// (batch orchestration).
#[derive(Debug, Error)]
pub enum UpscaleError {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("download failed for model {model}: {reason}")]
    DownloadFailed { model: String, reason: String },

    #[error("failed to decode input image {}: {reason}", path.display())]
    DecodeFailed { path: PathBuf, reason: String },

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("failed to encode output image {}: {reason}", path.display())]
    EncodeFailed { path: PathBuf, reason: String },

    #[error("an upscale operation is already running on this session")]
    SessionBusy,

    #[error("session has been disposed")]
    SessionDisposed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_failing_item() {
        let err = UpscaleError::UnknownModel("NotAModel".into());
        assert!(err.to_string().contains("NotAModel"));

        let err = UpscaleError::DownloadFailed {
            model: "RealESRGAN_x4plus".into(),
            reason: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("RealESRGAN_x4plus"));
        assert!(msg.contains("connection refused"));

        let err = UpscaleError::DecodeFailed {
            path: PathBuf::from("/tmp/missing.png"),
            reason: "no such file".into(),
        };
        assert!(err.to_string().contains("missing.png"));
    }

    #[test]
    fn test_busy_and_disposed_are_distinct() {
        assert_ne!(
            UpscaleError::SessionBusy.to_string(),
            UpscaleError::SessionDisposed.to_string()
        );
    }
}
