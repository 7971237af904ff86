mod replay;
mod snapshot;

use bytes::Bytes;
use futures::future::BoxFuture;
use std::time::Instant;

pub use replay::{DirectoryReplayCamera, DirectoryReplayProvider};
pub use snapshot::{HttpSnapshotCamera, HttpSnapshotProvider};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameEncoding {
    Jpeg,
    Png,
    /// Packed 8-bit RGB, row-major.
    Rgb8 { width: u32, height: u32 },
}

impl FrameEncoding {
    pub fn content_type(&self) -> &'static str {
        match self {
            FrameEncoding::Jpeg => "image/jpeg",
            FrameEncoding::Png => "image/png",
            FrameEncoding::Rgb8 { .. } => "application/octet-stream",
        }
    }

    pub fn from_content_type(value: &str) -> Option<Self> {
        let mime = value.split(';').next().unwrap_or_default().trim();
        match mime.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(FrameEncoding::Jpeg),
            "image/png" => Some(FrameEncoding::Png),
            _ => None,
        }
    }
}

/// One captured camera frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub data: Bytes,
    pub encoding: FrameEncoding,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(data: Bytes, encoding: FrameEncoding, captured_at: Instant) -> Self {
        Self {
            data,
            encoding,
            captured_at,
        }
    }

    /// Checks the frame is non-empty and, for raw frames, that the buffer
    /// matches the declared dimensions.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.data.is_empty() {
            return Err(FrameError::Empty);
        }
        if let FrameEncoding::Rgb8 { width, height } = self.encoding {
            let expected = u64::from(width) * u64::from(height) * 3;
            if expected == 0 || expected != self.data.len() as u64 {
                return Err(FrameError::SizeMismatch {
                    expected,
                    actual: self.data.len(),
                });
            }
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is empty")]
    Empty,
    #[error("raw frame has {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http error {0}: {1}")]
    HttpStatus(u16, String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("camera released")]
    Released,
}

/// Opens the camera for a session.
pub trait CameraProvider: Send + Sync {
    fn acquire(&self) -> BoxFuture<'_, Result<Box<dyn FrameSource>, CaptureError>>;
}

/// An acquired camera. Owned by the perception loop for the session lifetime.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Frame, CaptureError>>;

    fn release(&mut self) -> BoxFuture<'_, ()>;
}
