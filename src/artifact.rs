use crate::device::RawFrame;
use crate::error::CaptureError;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Encoding of a frozen still frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Jpeg,
}

/// Immutable encoded still frame produced by a freeze.
///
/// The pixel data is shared so the artifact can be handed to the host
/// callback without copying.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    /// Session that produced the artifact
    pub session_id: Uuid,
    /// Encoded image bytes
    pub data: Arc<Vec<u8>>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Encoding of `data`
    pub encoding: ImageEncoding,
    /// When the frame was frozen
    pub captured_at: DateTime<Utc>,
}

impl ImageArtifact {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Encode a raw RGB24 frame into a JPEG artifact.
///
/// `quality` is in (0, 1] and maps onto the encoder's 1-100 scale. A frame
/// with zero dimensions or a short buffer is an [`CaptureError::EncodingFailure`];
/// the stream simply was not ready yet and the caller may try again.
pub fn encode_jpeg(
    session_id: Uuid,
    frame: &RawFrame,
    quality: f32,
) -> Result<ImageArtifact, CaptureError> {
    if frame.width == 0 || frame.height == 0 {
        warn!("Refusing to encode zero-sized frame");
        return Err(CaptureError::EncodingFailure {
            details: "stream resolution is zero".to_string(),
        });
    }

    if frame.data.len() < frame.expected_size() {
        warn!(
            "Frame buffer too small: {} bytes for {}x{}",
            frame.data.len(),
            frame.width,
            frame.height
        );
        return Err(CaptureError::EncodingFailure {
            details: format!(
                "frame buffer holds {} bytes, expected {}",
                frame.data.len(),
                frame.expected_size()
            ),
        });
    }

    let quality = (quality.clamp(0.01, 1.0) * 100.0).round() as u8;
    let mut encoded = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, quality);

    encoder
        .encode(&frame.data, frame.width, frame.height, ColorType::Rgb8)
        .map_err(|e| CaptureError::EncodingFailure {
            details: e.to_string(),
        })?;

    debug!(
        "Encoded {}x{} frame to {} JPEG bytes (quality {})",
        frame.width,
        frame.height,
        encoded.len(),
        quality
    );

    Ok(ImageArtifact {
        session_id,
        data: Arc::new(encoded),
        width: frame.width,
        height: frame.height,
        encoding: ImageEncoding::Jpeg,
        captured_at: Utc::now(),
    })
}
