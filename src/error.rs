use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),
}

/// Errors raised by the camera capture path.
///
/// Everything here is recoverable: the session surfaces these as state values
/// and stays usable for a retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Camera acquisition denied: {details}")]
    AcquisitionDenied { details: String },

    #[error("Camera device is busy")]
    DeviceBusy,

    #[error("Camera device was revoked while in use")]
    DeviceRevoked,

    #[error("Frame encoding failed: {details}")]
    EncodingFailure { details: String },
}

/// Errors raised by the playback path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("Playback start rejected: {details}")]
    StartRejected { details: String },

    #[error("Playback pipeline acquisition failed: {details}")]
    AcquisitionFailed { details: String },
}

pub type Result<T> = std::result::Result<T, MediaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_folds_into_media_error() {
        let err: MediaError = CaptureError::DeviceBusy.into();
        assert!(matches!(err, MediaError::Capture(CaptureError::DeviceBusy)));
        assert_eq!(err.to_string(), "Capture error: Camera device is busy");
    }

    #[test]
    fn test_playback_error_folds_into_media_error() {
        let err: MediaError = PlaybackError::StartRejected {
            details: "autoplay blocked".to_string(),
        }
        .into();
        assert!(matches!(err, MediaError::Playback(_)));
    }

    #[test]
    fn test_io_error_folds_into_media_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: MediaError = io.into();
        assert!(matches!(err, MediaError::Io(_)));
    }
}
