//! Live, decaying estimate of the user's facial emotion.
//!
//! The perception loop folds samples in; the dialogue loop reads snapshots.
//! Folds are serialized behind a mutex and every completed fold publishes a
//! whole [`EmotionState`] through a `watch` channel, so readers only ever copy
//! the last complete state and never wait on the fold arithmetic.

use crate::emotion::{EmotionLabel, EmotionSample, EmotionState, Observation};
use crate::util::RingBuffer;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;

const LOG_TARGET: &str = "emotion::tracker";
const LABEL_COUNT: usize = EmotionLabel::ALL.len();
/// Weights at or below this carry no evidence.
const NEGLIGIBLE_WEIGHT: f32 = 1e-4;

pub const DEFAULT_STALENESS_WINDOW: Duration = Duration::from_secs(5);
pub const DEFAULT_HALF_LIFE: Duration = Duration::from_millis(1500);
pub const DEFAULT_SMOOTHING: f32 = 0.35;
pub const DEFAULT_TIE_EPSILON: f32 = 0.05;
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.20;
pub const DEFAULT_HISTORY_LEN: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackerConfig {
    /// Maximum age of the last accepted sample before snapshots report `unknown`.
    pub staleness_window: Duration,
    /// Time for an unrefreshed label weight to halve.
    pub half_life: Duration,
    /// EWMA factor applied per sample, in (0, 1].
    pub smoothing: f32,
    /// Labels whose weights differ by less than this are tied; the most recent wins.
    pub tie_epsilon: f32,
    /// Samples below this confidence are treated as a sensing gap.
    pub min_confidence: f32,
    /// Number of accepted samples kept for status reporting.
    pub history_len: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            staleness_window: DEFAULT_STALENESS_WINDOW,
            half_life: DEFAULT_HALF_LIFE,
            smoothing: DEFAULT_SMOOTHING,
            tie_epsilon: DEFAULT_TIE_EPSILON,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            history_len: DEFAULT_HISTORY_LEN,
        }
    }
}

/// What a fold did with an observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FoldOutcome {
    Applied,
    NoFace,
    BelowThreshold,
}

#[derive(Clone)]
pub struct EmotionTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    config: TrackerConfig,
    fold: Mutex<FoldState>,
    published: watch::Sender<EmotionState>,
}

struct FoldState {
    weights: [f32; LABEL_COUNT],
    last_seen: [Option<Instant>; LABEL_COUNT],
    last_fold_at: Option<Instant>,
    recent: RingBuffer<EmotionSample>,
}

impl EmotionTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let (published, _) = watch::channel(EmotionState::unknown(config.staleness_window));
        Self {
            inner: Arc::new(TrackerInner {
                config,
                fold: Mutex::new(FoldState {
                    weights: [0.0; LABEL_COUNT],
                    last_seen: [None; LABEL_COUNT],
                    last_fold_at: None,
                    recent: RingBuffer::new(config.history_len),
                }),
                published,
            }),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Incorporates one observation. `NoFace` and low-confidence samples leave
    /// the state untouched so it ages out through the staleness window.
    pub fn fold(&self, observation: Observation) -> FoldOutcome {
        let sample = match observation {
            Observation::NoFace => return FoldOutcome::NoFace,
            Observation::Emotion(sample) => sample,
        };
        if sample.confidence() < self.inner.config.min_confidence {
            tracing::trace!(
                target: LOG_TARGET,
                label = %sample.label(),
                confidence = sample.confidence(),
                "sample below confidence threshold"
            );
            return FoldOutcome::BelowThreshold;
        }

        let mut state = self
            .inner
            .fold
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let next = state.apply(&sample, &self.inner.config);
        let previous = self.inner.published.send_replace(next);
        drop(state);

        if previous.label != next.label {
            tracing::debug!(
                target: LOG_TARGET,
                from = previous.label_name(),
                to = next.label_name(),
                confidence = next.confidence,
                "dominant emotion changed"
            );
        }
        FoldOutcome::Applied
    }

    pub fn snapshot(&self) -> EmotionState {
        self.snapshot_at(Instant::now())
    }

    /// State as seen at `now`; stale evidence degrades to `unknown`.
    pub fn snapshot_at(&self, now: Instant) -> EmotionState {
        let stored = *self.inner.published.borrow();
        match stored.age_at(now) {
            Some(age) if age <= stored.staleness_window => stored,
            _ => EmotionState::unknown(stored.staleness_window),
        }
    }

    /// Notified after every applied fold. Staleness is not pushed; apply
    /// [`EmotionTracker::snapshot_at`] semantics on the receiving side.
    pub fn subscribe(&self) -> watch::Receiver<EmotionState> {
        self.inner.published.subscribe()
    }

    /// The most recent accepted samples, oldest first.
    pub fn recent(&self) -> Vec<EmotionSample> {
        self.inner
            .fold
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recent
            .to_vec()
    }
}

impl FoldState {
    fn apply(&mut self, sample: &EmotionSample, config: &TrackerConfig) -> EmotionState {
        let at = sample.captured_at();
        let elapsed = self
            .last_fold_at
            .map(|t| at.saturating_duration_since(t))
            .unwrap_or(Duration::ZERO);
        let decay = half_life_decay(elapsed, config.half_life);
        let keep = 1.0 - config.smoothing.clamp(0.0, 1.0);
        let idx = sample.label().index();

        for w in self.weights.iter_mut() {
            *w *= decay;
        }
        let fresh = self.weights.iter().all(|w| *w <= NEGLIGIBLE_WEIGHT);
        for (i, w) in self.weights.iter_mut().enumerate() {
            if i != idx {
                *w *= keep;
            }
        }
        self.weights[idx] = if fresh {
            sample.confidence()
        } else {
            keep * self.weights[idx] + (1.0 - keep) * sample.confidence()
        };

        self.last_seen[idx] = Some(self.last_seen[idx].map_or(at, |t| t.max(at)));
        let last_updated = self.last_fold_at.map_or(at, |t| t.max(at));
        self.last_fold_at = Some(last_updated);
        self.recent.push(*sample);

        let (label, weight) = self.dominant(config.tie_epsilon).unwrap_or((sample.label(), 0.0));
        EmotionState {
            label: Some(label),
            confidence: weight.clamp(0.0, 1.0),
            last_updated_at: Some(last_updated),
            staleness_window: config.staleness_window,
        }
    }

    /// Highest-weight observed label; near-ties go to the most recently seen.
    fn dominant(&self, epsilon: f32) -> Option<(EmotionLabel, f32)> {
        let observed = EmotionLabel::ALL.iter().filter_map(|label| {
            let i = label.index();
            self.last_seen[i].map(|seen| (*label, self.weights[i], seen))
        });
        let max = observed
            .clone()
            .map(|(_, w, _)| w)
            .fold(f32::NEG_INFINITY, f32::max);
        if !max.is_finite() {
            return None;
        }

        observed
            .filter(|(_, w, _)| *w > NEGLIGIBLE_WEIGHT && *w >= max - epsilon)
            .max_by(|a, b| {
                a.2.cmp(&b.2)
                    .then_with(|| a.1.total_cmp(&b.1))
            })
            .map(|(label, w, _)| (label, w))
    }
}

fn half_life_decay(elapsed: Duration, half_life: Duration) -> f32 {
    if half_life.is_zero() {
        return if elapsed.is_zero() { 1.0 } else { 0.0 };
    }
    0.5f32.powf(elapsed.as_secs_f32() / half_life.as_secs_f32())
}
