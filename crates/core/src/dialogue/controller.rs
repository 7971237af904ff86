use crate::dialogue::{
    delivery_for, tone_for, DialogueTurn, FallbackReason, GenerationRequest, ReplyGenerator,
    ReplyOutcome,
};
use crate::emotion::{EmotionLabel, EmotionTracker};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "dialogue::controller";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    pub generation_timeout: Duration,
    /// Spoken when generation fails. Deliberately emotion-agnostic.
    pub fallback_reply: String,
    /// Ask the generator for the emotion behind the words when the camera
    /// reading is unknown or neutral.
    pub infer_from_text: bool,
    pub inference_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_millis(crate::config::DEFAULT_GENERATION_TIMEOUT_MS),
            fallback_reply: crate::config::DEFAULT_FALLBACK_REPLY.to_owned(),
            infer_from_text: true,
            inference_timeout: Duration::from_millis(crate::config::DEFAULT_INFERENCE_TIMEOUT_MS),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TurnStats {
    pub turns: u64,
    pub fallbacks: u64,
}

#[derive(Default)]
struct Counters {
    turns: AtomicU64,
    fallbacks: AtomicU64,
}

/// Turns one user utterance into one emotion-conditioned reply.
///
/// The emotion snapshot is taken once when the turn starts; samples folded
/// while the generator is running do not affect the turn. Every failure of
/// the generator degrades to the fallback reply instead of an error.
pub struct TurnController {
    tracker: EmotionTracker,
    generator: Arc<dyn ReplyGenerator>,
    config: ControllerConfig,
    cancel: CancellationToken,
    counters: Counters,
}

impl TurnController {
    /// `cancel` aborts an in-flight generation; the turn then falls back.
    pub fn new(
        tracker: EmotionTracker,
        generator: Arc<dyn ReplyGenerator>,
        config: ControllerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tracker,
            generator,
            config,
            cancel,
            counters: Counters::default(),
        }
    }

    pub async fn handle_turn(&self, utterance: &str) -> DialogueTurn {
        let snapshot = self.tracker.snapshot();
        let inferred = match snapshot.label {
            None | Some(EmotionLabel::Neutral) if self.config.infer_from_text => {
                self.infer_from_text(utterance.trim()).await
            }
            _ => None,
        };
        let label = inferred.or(snapshot.label);
        let request = GenerationRequest {
            utterance: utterance.trim().to_owned(),
            label: snapshot.label,
            confidence: snapshot.confidence,
            inferred,
            tone: tone_for(label),
        };
        tracing::debug!(
            target: LOG_TARGET,
            emotion = snapshot.label_name(),
            confidence = snapshot.confidence,
            inferred = inferred.map(|l| l.as_str()),
            "turn started"
        );

        let generated = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FallbackReason::Cancelled),
            result = tokio::time::timeout(
                self.config.generation_timeout,
                self.generator.generate(request),
            ) => match result {
                Err(_) => Err(FallbackReason::Timeout),
                Ok(Err(e)) => Err(FallbackReason::Failed(e.to_string())),
                Ok(Ok(reply)) if reply.trim().is_empty() => {
                    Err(FallbackReason::Failed("empty reply".to_owned()))
                }
                Ok(Ok(reply)) => Ok(reply.trim().to_owned()),
            },
        };

        self.counters.turns.fetch_add(1, Ordering::Relaxed);
        let (generated_reply, outcome) = match generated {
            Ok(reply) => (reply, ReplyOutcome::Generated),
            Err(reason) => {
                self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target: LOG_TARGET,
                    reason = %reason,
                    emotion = snapshot.label_name(),
                    "reply generation failed; using fallback"
                );
                (
                    self.config.fallback_reply.clone(),
                    ReplyOutcome::Fallback(reason),
                )
            }
        };

        DialogueTurn {
            user_utterance: utterance.to_owned(),
            emotion_snapshot_used: snapshot,
            inferred_emotion: inferred,
            generated_reply,
            delivery_hint: delivery_for(label),
            outcome,
        }
    }

    /// A neutral guess is dropped; it adds nothing to the camera reading.
    async fn infer_from_text(&self, utterance: &str) -> Option<EmotionLabel> {
        if utterance.is_empty() {
            return None;
        }
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            result = tokio::time::timeout(
                self.config.inference_timeout,
                self.generator.infer_emotion(utterance),
            ) => result,
        };
        match result {
            Ok(Ok(label)) => label.filter(|l| *l != EmotionLabel::Neutral),
            Ok(Err(e)) => {
                tracing::warn!(target: LOG_TARGET, error = %e, "emotion inference failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    timeout_ms = self.config.inference_timeout.as_millis() as u64,
                    "emotion inference timed out"
                );
                None
            }
        }
    }

    pub fn stats(&self) -> TurnStats {
        TurnStats {
            turns: self.counters.turns.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
        }
    }

    pub fn tracker(&self) -> &EmotionTracker {
        &self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::GenerateError;
    use crate::emotion::{EmotionLabel, EmotionSample, Observation, TrackerConfig};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingGenerator {
        requests: Mutex<Vec<GenerationRequest>>,
        reply: String,
    }

    impl ReplyGenerator for RecordingGenerator {
        fn generate(
            &self,
            request: GenerationRequest,
        ) -> BoxFuture<'_, Result<String, GenerateError>> {
            async move {
                self.requests.lock().expect("lock").push(request);
                Ok(self.reply.clone())
            }
            .boxed()
        }
    }

    struct HangingGenerator;

    impl ReplyGenerator for HangingGenerator {
        fn generate(&self, _: GenerationRequest) -> BoxFuture<'_, Result<String, GenerateError>> {
            futures::future::pending().boxed()
        }
    }

    /// Reads a fixed emotion out of any text, or never answers when `guess`
    /// is `None`.
    struct GuessingGenerator {
        guess: Option<EmotionLabel>,
        asked: std::sync::atomic::AtomicUsize,
        inner: RecordingGenerator,
    }

    impl GuessingGenerator {
        fn new(guess: Option<EmotionLabel>) -> Self {
            Self {
                guess,
                asked: Default::default(),
                inner: RecordingGenerator {
                    reply: "I'm listening.".to_owned(),
                    ..Default::default()
                },
            }
        }

        fn asked(&self) -> usize {
            self.asked.load(Ordering::SeqCst)
        }
    }

    impl ReplyGenerator for GuessingGenerator {
        fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String, GenerateError>> {
            self.inner.generate(request)
        }

        fn infer_emotion<'a>(
            &'a self,
            _: &'a str,
        ) -> BoxFuture<'a, Result<Option<EmotionLabel>, GenerateError>> {
            async move {
                self.asked.fetch_add(1, Ordering::SeqCst);
                match self.guess {
                    Some(label) => Ok(Some(label)),
                    None => futures::future::pending().await,
                }
            }
            .boxed()
        }
    }

    struct FailingGenerator;

    impl ReplyGenerator for FailingGenerator {
        fn generate(&self, _: GenerationRequest) -> BoxFuture<'_, Result<String, GenerateError>> {
            async { Err(GenerateError::HttpStatus(503, "overloaded".to_owned())) }.boxed()
        }
    }

    /// Folds a new sample into the tracker while "generating".
    struct InterferingGenerator {
        tracker: EmotionTracker,
    }

    impl ReplyGenerator for InterferingGenerator {
        fn generate(&self, _: GenerationRequest) -> BoxFuture<'_, Result<String, GenerateError>> {
            async move {
                for _ in 0..5 {
                    self.tracker.fold(observe(EmotionLabel::Happy, 0.95));
                }
                Ok("Glad to hear it.".to_owned())
            }
            .boxed()
        }
    }

    fn observe(label: EmotionLabel, confidence: f32) -> Observation {
        Observation::Emotion(
            EmotionSample::new(label, confidence, Instant::now()).expect("valid sample"),
        )
    }

    fn sad_tracker() -> EmotionTracker {
        let tracker = EmotionTracker::new(TrackerConfig::default());
        tracker.fold(observe(EmotionLabel::Sad, 0.8));
        tracker
    }

    fn controller(tracker: EmotionTracker, generator: Arc<dyn ReplyGenerator>) -> TurnController {
        TurnController::new(
            tracker,
            generator,
            ControllerConfig::default(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn request_carries_snapshot_label_and_confidence() {
        let generator = Arc::new(RecordingGenerator {
            reply: "  That sounds exhausting. Want to rest a bit?  ".to_owned(),
            ..Default::default()
        });
        let ctl = controller(sad_tracker(), generator.clone());

        let turn = ctl.handle_turn("I feel tired today").await;

        let requests = generator.requests.lock().expect("lock");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].utterance, "I feel tired today");
        assert_eq!(requests[0].label, Some(EmotionLabel::Sad));
        assert!((requests[0].confidence - 0.8).abs() < 1e-6);
        assert_eq!(requests[0].tone, tone_for(Some(EmotionLabel::Sad)));

        assert_eq!(turn.generated_reply, "That sounds exhausting. Want to rest a bit?");
        assert_eq!(turn.outcome, ReplyOutcome::Generated);
        assert_eq!(turn.delivery_hint, delivery_for(Some(EmotionLabel::Sad)));
        assert_eq!(ctl.stats(), TurnStats { turns: 1, fallbacks: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_falls_back_and_is_recorded() {
        let ctl = controller(sad_tracker(), Arc::new(HangingGenerator));

        let turn = ctl.handle_turn("I feel tired today").await;

        assert_eq!(turn.generated_reply, crate::config::DEFAULT_FALLBACK_REPLY);
        assert_eq!(turn.outcome, ReplyOutcome::Fallback(FallbackReason::Timeout));
        assert_eq!(turn.emotion_snapshot_used.label, Some(EmotionLabel::Sad));
        // Prosody still follows the emotion even though the text is generic.
        assert_eq!(turn.delivery_hint, delivery_for(Some(EmotionLabel::Sad)));
        assert_eq!(ctl.stats(), TurnStats { turns: 1, fallbacks: 1 });
    }

    #[tokio::test]
    async fn generator_error_and_empty_reply_fall_back() {
        let ctl = controller(sad_tracker(), Arc::new(FailingGenerator));
        let turn = ctl.handle_turn("hello").await;
        assert!(turn.used_fallback());
        assert!(matches!(turn.outcome, ReplyOutcome::Fallback(FallbackReason::Failed(ref e)) if e.contains("503")));

        let blank = Arc::new(RecordingGenerator {
            reply: "   ".to_owned(),
            ..Default::default()
        });
        let ctl = controller(sad_tracker(), blank);
        let turn = ctl.handle_turn("hello").await;
        assert_eq!(turn.generated_reply, crate::config::DEFAULT_FALLBACK_REPLY);
        assert!(turn.used_fallback());
    }

    #[tokio::test]
    async fn cancellation_interrupts_generation() {
        let cancel = CancellationToken::new();
        let ctl = TurnController::new(
            sad_tracker(),
            Arc::new(HangingGenerator),
            ControllerConfig::default(),
            cancel.clone(),
        );
        cancel.cancel();

        let turn = ctl.handle_turn("are you there?").await;
        assert_eq!(turn.outcome, ReplyOutcome::Fallback(FallbackReason::Cancelled));
        assert_eq!(ctl.stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn snapshot_is_fixed_for_the_turn() {
        let tracker = sad_tracker();
        let generator = Arc::new(InterferingGenerator {
            tracker: tracker.clone(),
        });
        let ctl = controller(tracker.clone(), generator);

        let turn = ctl.handle_turn("I had a good morning").await;

        assert_eq!(turn.emotion_snapshot_used.label, Some(EmotionLabel::Sad));
        assert_eq!(turn.delivery_hint, delivery_for(Some(EmotionLabel::Sad)));
        assert_eq!(tracker.snapshot().label, Some(EmotionLabel::Happy));
    }

    #[tokio::test]
    async fn unknown_state_uses_neutral_baseline() {
        let generator = Arc::new(RecordingGenerator {
            reply: "Hello there.".to_owned(),
            ..Default::default()
        });
        let ctl = controller(EmotionTracker::new(TrackerConfig::default()), generator.clone());

        let turn = ctl.handle_turn("hi").await;

        assert!(turn.emotion_snapshot_used.is_unknown());
        assert_eq!(generator.requests.lock().expect("lock")[0].tone, tone_for(None));
        assert_eq!(turn.delivery_hint, crate::speech::DeliveryHint::neutral());
    }

    #[tokio::test]
    async fn words_fill_in_for_an_unknown_reading() {
        let generator = Arc::new(GuessingGenerator::new(Some(EmotionLabel::Sad)));
        let ctl = controller(EmotionTracker::new(TrackerConfig::default()), generator.clone());

        let turn = ctl.handle_turn("my cat died last week").await;

        assert!(turn.emotion_snapshot_used.is_unknown());
        assert_eq!(turn.inferred_emotion, Some(EmotionLabel::Sad));
        assert_eq!(turn.delivery_hint, delivery_for(Some(EmotionLabel::Sad)));
        let requests = generator.inner.requests.lock().expect("lock");
        assert_eq!(requests[0].label, None);
        assert_eq!(requests[0].inferred, Some(EmotionLabel::Sad));
        assert_eq!(requests[0].tone, tone_for(Some(EmotionLabel::Sad)));
    }

    #[tokio::test]
    async fn camera_reading_skips_text_inference() {
        let generator = Arc::new(GuessingGenerator::new(Some(EmotionLabel::Happy)));
        let ctl = controller(sad_tracker(), generator.clone());

        let turn = ctl.handle_turn("I feel tired today").await;

        assert_eq!(generator.asked(), 0);
        assert_eq!(turn.inferred_emotion, None);
        assert_eq!(turn.delivery_hint, delivery_for(Some(EmotionLabel::Sad)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_inference_is_abandoned_and_the_turn_goes_on() {
        let generator = Arc::new(GuessingGenerator::new(None));
        let ctl = controller(EmotionTracker::new(TrackerConfig::default()), generator.clone());

        let turn = ctl.handle_turn("hm").await;

        assert_eq!(generator.asked(), 1);
        assert_eq!(turn.inferred_emotion, None);
        assert_eq!(turn.outcome, ReplyOutcome::Generated);
        assert_eq!(turn.generated_reply, "I'm listening.");
        assert_eq!(ctl.stats(), TurnStats { turns: 1, fallbacks: 0 });
    }
}
