use crate::camera::{Frame, FrameError};
use crate::emotion::{EmotionError, Observation};
use futures::future::BoxFuture;

#[derive(thiserror::Error, Debug)]
pub enum ClassifyError {
    #[error("rejected frame: {0}")]
    InvalidFrame(#[from] FrameError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http error {0}: {1}")]
    HttpStatus(u16, String),

    #[error("invalid classifier response: {0}")]
    InvalidResponse(String),

    #[error("classifier returned an unusable sample: {0}")]
    Sample(#[from] EmotionError),
}

/// Wraps the facial-emotion model. A frame without a detectable face yields
/// [`Observation::NoFace`], never an error.
pub trait FrameClassifier: Send + Sync {
    fn classify(&self, frame: Frame) -> BoxFuture<'_, Result<Observation, ClassifyError>>;
}
