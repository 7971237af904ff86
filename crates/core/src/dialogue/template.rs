use crate::dialogue::{GenerateError, GenerationRequest, ReplyGenerator};
use crate::emotion::EmotionLabel;
use futures::future::BoxFuture;
use futures::FutureExt;

/// Offline generator answering with a fixed companion reply per emotion.
/// Never fails; useful without an API key and as a deterministic stand-in.
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn reply_for(label: Option<EmotionLabel>) -> &'static str {
        match label {
            Some(EmotionLabel::Sad) => {
                "I'm sorry that you're feeling sad, and it is completely okay to feel this way. \
                 Would you like some music recommendations to help you feel a bit better?"
            }
            Some(EmotionLabel::Angry) => {
                "It seems you're upset. Would you like a quick reset, like a calming breath?"
            }
            Some(EmotionLabel::Fearful) => {
                "You look worried. Would you like a quick grounding exercise to feel better?"
            }
            Some(EmotionLabel::Happy) => {
                "Oh, how wonderful! I am glad that you are happy! \
                 Would you like to write down your thoughts to remember this day?"
            }
            Some(EmotionLabel::Surprised) => {
                "Oh my, that is surprising! Would you like to settle down with a slow breath together?"
            }
            Some(EmotionLabel::Disgusted) => {
                "That seems really unpleasant, and it is fine to feel unsettled. \
                 Would you like to take a moment to reset with a calming breath?"
            }
            Some(EmotionLabel::Neutral) | None => {
                "I'm here with you. Tell me what's on your mind."
            }
        }
    }
}

impl ReplyGenerator for TemplateGenerator {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String, GenerateError>> {
        async move { Ok(Self::reply_for(request.conditioning_label()).to_owned()) }.boxed()
    }
}
