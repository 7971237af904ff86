//! Frame-rate loop feeding camera frames through the classifier into the
//! tracker. Capture and classification failures are sensing gaps: they are
//! counted and logged, and the tracker is left to age out.

use crate::camera::{CaptureError, FrameSource};
use crate::emotion::{EmotionTracker, FoldOutcome, FrameClassifier};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "perception";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PerceptionConfig {
    pub frame_interval: Duration,
    pub classify_timeout: Duration,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(crate::config::DEFAULT_FRAME_INTERVAL_MS),
            classify_timeout: Duration::from_millis(crate::config::DEFAULT_CLASSIFY_TIMEOUT_MS),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PerceptionReport {
    pub frames: u64,
    pub applied: u64,
    pub no_face: u64,
    pub below_threshold: u64,
    pub capture_errors: u64,
    pub classify_errors: u64,
}

/// Runs until `cancel` fires or the camera goes away. The frame being
/// processed when `cancel` fires is finished before the loop exits; the
/// source is always released.
pub async fn run_perception(
    mut source: Box<dyn FrameSource>,
    classifier: Arc<dyn FrameClassifier>,
    tracker: EmotionTracker,
    config: PerceptionConfig,
    cancel: CancellationToken,
) -> PerceptionReport {
    let mut report = PerceptionReport::default();
    let mut ticker = tokio::time::interval(config.frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        target: LOG_TARGET,
        interval_ms = config.frame_interval.as_millis() as u64,
        "perception loop started"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let frame = match source.next_frame().await {
            Ok(frame) => frame,
            Err(CaptureError::Released) => {
                tracing::warn!(target: LOG_TARGET, "camera released underneath the loop");
                break;
            }
            Err(e) => {
                report.capture_errors += 1;
                tracing::warn!(target: LOG_TARGET, error = %e, "frame capture failed");
                continue;
            }
        };
        report.frames += 1;

        match tokio::time::timeout(config.classify_timeout, classifier.classify(frame)).await {
            Ok(Ok(observation)) => match tracker.fold(observation) {
                FoldOutcome::Applied => report.applied += 1,
                FoldOutcome::NoFace => report.no_face += 1,
                FoldOutcome::BelowThreshold => report.below_threshold += 1,
            },
            Ok(Err(e)) => {
                report.classify_errors += 1;
                tracing::warn!(target: LOG_TARGET, error = %e, "classification failed");
            }
            Err(_) => {
                report.classify_errors += 1;
                tracing::warn!(
                    target: LOG_TARGET,
                    timeout_ms = config.classify_timeout.as_millis() as u64,
                    "classification timed out"
                );
            }
        }
    }

    source.release().await;
    tracing::info!(
        target: LOG_TARGET,
        frames = report.frames,
        applied = report.applied,
        no_face = report.no_face,
        "perception loop stopped"
    );
    report
}
