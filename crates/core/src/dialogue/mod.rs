mod controller;
mod conversation;
mod gemini;
mod prompt;
mod template;
mod tone;

use crate::emotion::{EmotionLabel, EmotionState};
use crate::speech::DeliveryHint;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;

pub use controller::{ControllerConfig, TurnController, TurnStats};
pub use conversation::{
    extract_name, parse_yes_no, run_conversation, ConversationConfig, ConversationReport,
};
pub use gemini::GeminiGenerator;
pub use prompt::{build_inference_prompt, build_prompt, COMPANION_SYSTEM_INSTRUCTION};
pub use template::TemplateGenerator;
pub use tone::{delivery_for, tone_for};

/// What the language model is conditioned on for one turn.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub utterance: String,
    /// Camera reading for the turn. `None` is the `unknown` state.
    pub label: Option<EmotionLabel>,
    pub confidence: f32,
    /// Read from the utterance when the camera showed nothing but neutral.
    pub inferred: Option<EmotionLabel>,
    pub tone: &'static str,
}

impl GenerationRequest {
    pub fn label_name(&self) -> &'static str {
        self.label.map(|l| l.as_str()).unwrap_or("unknown")
    }

    /// The label the reply is adapted to.
    pub fn conditioning_label(&self) -> Option<EmotionLabel> {
        self.inferred.or(self.label)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum GenerateError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http error {0}: {1}")]
    HttpStatus(u16, String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("model returned an empty reply")]
    EmptyReply,
}

impl GenerateError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerateError::Http(e) => e.is_timeout() || e.is_connect(),
            GenerateError::HttpStatus(status, _) => crate::util::is_http_retryable(*status),
            GenerateError::InvalidResponse(_) | GenerateError::EmptyReply => false,
        }
    }
}

/// Text-generation endpoint. Callers impose their own timeout.
pub trait ReplyGenerator: Send + Sync {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String, GenerateError>>;

    /// Guesses the emotion behind `utterance`. `Ok(None)` when the generator
    /// cannot tell.
    fn infer_emotion<'a>(
        &'a self,
        _utterance: &'a str,
    ) -> BoxFuture<'a, Result<Option<EmotionLabel>, GenerateError>> {
        async { Ok(None) }.boxed()
    }

    /// Drops any conversation context carried between turns.
    fn reset(&self) {}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FallbackReason {
    Timeout,
    Failed(String),
    Cancelled,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Timeout => f.write_str("timeout"),
            FallbackReason::Failed(e) => write!(f, "failed: {e}"),
            FallbackReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyOutcome {
    Generated,
    Fallback(FallbackReason),
}

/// One completed exchange. Not persisted past the session.
#[derive(Clone, Debug, PartialEq)]
pub struct DialogueTurn {
    pub user_utterance: String,
    pub emotion_snapshot_used: EmotionState,
    /// Set when the camera reading was unknown or neutral and the words
    /// suggested something else.
    pub inferred_emotion: Option<EmotionLabel>,
    pub generated_reply: String,
    pub delivery_hint: DeliveryHint,
    pub outcome: ReplyOutcome,
}

impl DialogueTurn {
    pub fn used_fallback(&self) -> bool {
        matches!(self.outcome, ReplyOutcome::Fallback(_))
    }
}
