mod classifier;
mod remote;
mod tracker;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

pub use classifier::{ClassifyError, FrameClassifier};
pub use remote::HttpEmotionClassifier;
pub use tracker::{EmotionTracker, FoldOutcome, TrackerConfig};

/// The closed set of facial emotions the classifier can report.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 7] = [
        EmotionLabel::Neutral,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Angry,
        EmotionLabel::Fearful,
        EmotionLabel::Disgusted,
        EmotionLabel::Surprised,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Angry => "angry",
            EmotionLabel::Fearful => "fearful",
            EmotionLabel::Disgusted => "disgusted",
            EmotionLabel::Surprised => "surprised",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            EmotionLabel::Neutral => 0,
            EmotionLabel::Happy => 1,
            EmotionLabel::Sad => 2,
            EmotionLabel::Angry => 3,
            EmotionLabel::Fearful => 4,
            EmotionLabel::Disgusted => 5,
            EmotionLabel::Surprised => 6,
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmotionLabel {
    type Err = EmotionError;

    /// Accepts both the adjective form and the FER-style class names
    /// (`fear`, `disgust`, `surprise`) emitted by common CNN checkpoints.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neutral" => Ok(EmotionLabel::Neutral),
            "happy" | "happiness" | "joy" => Ok(EmotionLabel::Happy),
            "sad" | "sadness" => Ok(EmotionLabel::Sad),
            "angry" | "anger" => Ok(EmotionLabel::Angry),
            "fear" | "fearful" => Ok(EmotionLabel::Fearful),
            "disgust" | "disgusted" => Ok(EmotionLabel::Disgusted),
            "surprise" | "surprised" => Ok(EmotionLabel::Surprised),
            other => Err(EmotionError::UnknownLabel(other.to_owned())),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EmotionError {
    #[error("unknown emotion label: {0:?}")]
    UnknownLabel(String),
    #[error("confidence must be within [0, 1], got {0}")]
    ConfidenceOutOfRange(f32),
}

/// One classified frame. Immutable once built.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmotionSample {
    label: EmotionLabel,
    confidence: f32,
    captured_at: Instant,
}

impl EmotionSample {
    pub fn new(
        label: EmotionLabel,
        confidence: f32,
        captured_at: Instant,
    ) -> Result<Self, EmotionError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(EmotionError::ConfidenceOutOfRange(confidence));
        }
        Ok(Self {
            label,
            confidence,
            captured_at,
        })
    }

    pub fn label(&self) -> EmotionLabel {
        self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

/// Result of classifying a single frame.
///
/// `NoFace` is a valid observation, not an error: it carries no evidence and
/// must never overwrite the tracked state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Observation {
    Emotion(EmotionSample),
    NoFace,
}

/// Read-only view of the tracked emotion at a point in time.
///
/// `label == None` is the explicit `unknown` state: nothing observed yet, or
/// the last sample is older than `staleness_window`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmotionState {
    pub label: Option<EmotionLabel>,
    pub confidence: f32,
    pub last_updated_at: Option<Instant>,
    pub staleness_window: Duration,
}

impl EmotionState {
    pub fn unknown(staleness_window: Duration) -> Self {
        Self {
            label: None,
            confidence: 0.0,
            last_updated_at: None,
            staleness_window,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.label.is_none()
    }

    pub fn label_name(&self) -> &'static str {
        self.label.map(|l| l.as_str()).unwrap_or("unknown")
    }

    /// Age of the underlying evidence relative to `now`.
    pub fn age_at(&self, now: Instant) -> Option<Duration> {
        self.last_updated_at
            .map(|t| now.saturating_duration_since(t))
    }
}

impl fmt::Display for EmotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2})", self.label_name(), self.confidence)
    }
}
