//! Session lifecycle: `Idle -> Running -> Stopping -> Idle`.
//!
//! Start and Stop are serialized by one async lock, so a Start that arrives
//! while a Stop is in progress waits for it and then starts a fresh session.
//! The current phase is published through a `watch` channel and can be read
//! without touching that lock.

use crate::camera::{CameraProvider, CaptureError};
use crate::config::AppConfig;
use crate::dialogue::{
    run_conversation, ControllerConfig, ConversationConfig, ConversationReport, ReplyGenerator,
    TurnController, TurnStats,
};
use crate::emotion::{EmotionTracker, FrameClassifier, TrackerConfig};
use crate::perception::{run_perception, PerceptionConfig, PerceptionReport};
use crate::speech::{RobotProvider, SpeechError, SpeechIo};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "session";

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("failed to acquire camera: {0}")]
    CameraUnavailable(#[source] CaptureError),

    #[error("failed to connect to robot: {0}")]
    RobotUnavailable(#[source] SpeechError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Running,
    Stopping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StopOutcome {
    Stopped(SessionSummary),
    NotRunning,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSummary {
    pub duration_ms: u64,
    pub turns: TurnStats,
    pub perception: PerceptionReport,
    /// `None` when the dialogue task had to be torn down forcibly.
    pub conversation: Option<ConversationReport>,
    /// True when the grace period ran out and in-flight waits were cancelled.
    pub interrupted: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecentSample {
    pub label: &'static str,
    pub confidence: f32,
    pub age_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub uptime_ms: Option<u64>,
    pub emotion: &'static str,
    pub confidence: f32,
    pub emotion_age_ms: Option<u64>,
    pub recent: Vec<RecentSample>,
    pub turns: TurnStats,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub tracker: TrackerConfig,
    pub controller: ControllerConfig,
    pub conversation: ConversationConfig,
    pub perception: PerceptionConfig,
    /// Bounds camera acquisition and robot connection at Start.
    pub connect_timeout: Duration,
    /// How long Stop lets the in-flight turn finish before cancelling it.
    pub stop_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            controller: ControllerConfig::default(),
            conversation: ConversationConfig::default(),
            perception: PerceptionConfig::default(),
            connect_timeout: Duration::from_millis(crate::config::DEFAULT_CONNECT_TIMEOUT_MS),
            stop_grace: Duration::from_millis(crate::config::DEFAULT_STOP_GRACE_MS),
        }
    }
}

impl SessionConfig {
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            tracker: app.tracker,
            controller: ControllerConfig {
                generation_timeout: app.timeouts.generation,
                fallback_reply: app.fallback_reply.clone(),
                infer_from_text: app.infer_from_text,
                inference_timeout: app.timeouts.inference,
            },
            conversation: ConversationConfig {
                listen_timeout: app.timeouts.listen,
                speak_timeout: app.timeouts.speak,
                ask_name: app.ask_name,
                ask_to_continue: app.ask_to_continue,
            },
            perception: PerceptionConfig {
                frame_interval: app.frame_interval,
                classify_timeout: app.timeouts.classify,
            },
            connect_timeout: app.timeouts.connect,
            stop_grace: app.timeouts.stop_grace,
        }
    }
}

/// External boundaries a session is wired to.
pub struct SessionDeps {
    pub camera: Arc<dyn CameraProvider>,
    pub classifier: Arc<dyn FrameClassifier>,
    pub robot: Arc<dyn RobotProvider>,
    pub generator: Arc<dyn ReplyGenerator>,
}

struct RunningSession {
    speech: Arc<dyn SpeechIo>,
    perception_cancel: CancellationToken,
    shutdown: CancellationToken,
    abort: CancellationToken,
    perception: JoinHandle<PerceptionReport>,
    dialogue: JoinHandle<ConversationReport>,
    controller: Arc<TurnController>,
    started_at: Instant,
}

/// What `status` reads while a session is live.
#[derive(Clone)]
struct LiveView {
    tracker: EmotionTracker,
    controller: Arc<TurnController>,
    started_at: Instant,
    /// Cancelled once the dialogue task has returned.
    conversation_done: CancellationToken,
}

pub struct SessionManager {
    deps: SessionDeps,
    config: SessionConfig,
    lifecycle: tokio::sync::Mutex<Option<RunningSession>>,
    live: Mutex<Option<LiveView>>,
    phase: watch::Sender<SessionPhase>,
}

impl SessionManager {
    pub fn new(deps: SessionDeps, config: SessionConfig) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Idle);
        Self {
            deps,
            config,
            lifecycle: tokio::sync::Mutex::new(None),
            live: Mutex::new(None),
            phase,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    /// Acquires the camera, then the robot, and launches both loops.
    /// Anything already acquired is released again if a later step fails.
    pub async fn start(&self) -> Result<StartOutcome, SessionError> {
        let mut slot = self.lifecycle.lock().await;
        if slot.is_some() {
            tracing::info!(target: LOG_TARGET, "start requested while running; ignoring");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let limit = self.config.connect_timeout;
        let acquired = tokio::time::timeout(limit, self.deps.camera.acquire())
            .await
            .unwrap_or_else(|_| Err(CaptureError::Unavailable(timed_out(limit))));
        let mut source = acquired.map_err(|e| {
            tracing::error!(target: LOG_TARGET, error = %e, "camera acquisition failed");
            SessionError::CameraUnavailable(e)
        })?;

        let connected = tokio::time::timeout(limit, self.deps.robot.connect())
            .await
            .unwrap_or_else(|_| Err(SpeechError::Unavailable(timed_out(limit))));
        let speech = match connected {
            Ok(speech) => speech,
            Err(e) => {
                tracing::error!(target: LOG_TARGET, error = %e, "robot connection failed");
                source.release().await;
                return Err(SessionError::RobotUnavailable(e));
            }
        };
        self.deps.generator.reset();

        let tracker = EmotionTracker::new(self.config.tracker);
        let perception_cancel = CancellationToken::new();
        let shutdown = CancellationToken::new();
        let abort = CancellationToken::new();
        let controller = Arc::new(TurnController::new(
            tracker.clone(),
            self.deps.generator.clone(),
            self.config.controller.clone(),
            abort.clone(),
        ));

        let perception = tokio::spawn(run_perception(
            source,
            self.deps.classifier.clone(),
            tracker.clone(),
            self.config.perception,
            perception_cancel.clone(),
        ));
        let conversation_done = CancellationToken::new();
        let conversation = run_conversation(
            controller.clone(),
            speech.clone(),
            self.config.conversation.clone(),
            shutdown.clone(),
            abort.clone(),
        );
        let done = conversation_done.clone();
        let dialogue = tokio::spawn(async move {
            let report = conversation.await;
            done.cancel();
            report
        });

        let started_at = Instant::now();
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = Some(LiveView {
            tracker,
            controller: controller.clone(),
            started_at,
            conversation_done,
        });
        *slot = Some(RunningSession {
            speech,
            perception_cancel,
            shutdown,
            abort,
            perception,
            dialogue,
            controller,
            started_at,
        });
        self.phase.send_replace(SessionPhase::Running);
        tracing::info!(target: LOG_TARGET, "session started");
        Ok(StartOutcome::Started)
    }

    /// Winds the session down: perception stops after its current frame, the
    /// dialogue stops taking turns and gets `stop_grace` to finish the one in
    /// flight, after which outstanding waits are cancelled. Resources are
    /// released before the phase returns to `Idle`.
    pub async fn stop(&self) -> StopOutcome {
        let mut slot = self.lifecycle.lock().await;
        let Some(mut running) = slot.take() else {
            tracing::info!(target: LOG_TARGET, "stop requested while idle; ignoring");
            return StopOutcome::NotRunning;
        };
        self.phase.send_replace(SessionPhase::Stopping);
        tracing::info!(target: LOG_TARGET, "stopping session");

        running.perception_cancel.cancel();
        running.shutdown.cancel();

        let grace = self.config.stop_grace;
        let mut interrupted = false;
        let conversation = match tokio::time::timeout(grace, &mut running.dialogue).await {
            Ok(joined) => joined_or_log(joined, "dialogue"),
            Err(_) => {
                interrupted = true;
                tracing::warn!(
                    target: LOG_TARGET,
                    grace_ms = grace.as_millis() as u64,
                    "turn still in flight after grace period; cancelling"
                );
                running.abort.cancel();
                match tokio::time::timeout(grace, &mut running.dialogue).await {
                    Ok(joined) => joined_or_log(joined, "dialogue"),
                    Err(_) => {
                        tracing::error!(target: LOG_TARGET, "dialogue task unresponsive; aborting");
                        running.dialogue.abort();
                        None
                    }
                }
            }
        };

        let perception = match tokio::time::timeout(grace, &mut running.perception).await {
            Ok(joined) => joined_or_log(joined, "perception").unwrap_or_default(),
            Err(_) => {
                tracing::error!(target: LOG_TARGET, "perception task unresponsive; aborting");
                running.perception.abort();
                PerceptionReport::default()
            }
        };

        running.speech.release().await;
        self.deps.generator.reset();
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let summary = SessionSummary {
            duration_ms: running.started_at.elapsed().as_millis() as u64,
            turns: running.controller.stats(),
            perception,
            conversation,
            interrupted,
        };
        self.phase.send_replace(SessionPhase::Idle);
        tracing::info!(
            target: LOG_TARGET,
            duration_ms = summary.duration_ms,
            turns = summary.turns.turns,
            fallbacks = summary.turns.fallbacks,
            interrupted,
            "session ended"
        );
        StopOutcome::Stopped(summary)
    }

    /// Resolves once the user has ended the conversation (or the robot went
    /// away) while the session is still running. Stop is still needed to
    /// release the camera and the robot. Never resolves while idle.
    pub async fn conversation_finished(&self) {
        let done = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|live| live.conversation_done.clone());
        match done {
            Some(done) => done.cancelled().await,
            None => std::future::pending().await,
        }
    }

    /// Snapshot of the session for display; never waits on Start or Stop.
    pub fn status(&self) -> SessionStatus {
        let phase = self.phase();
        let live = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(live) = live else {
            return SessionStatus {
                phase,
                uptime_ms: None,
                emotion: "unknown",
                confidence: 0.0,
                emotion_age_ms: None,
                recent: Vec::new(),
                turns: TurnStats::default(),
            };
        };

        let now = Instant::now();
        let state = live.tracker.snapshot_at(now);
        let recent = live
            .tracker
            .recent()
            .into_iter()
            .map(|s| RecentSample {
                label: s.label().as_str(),
                confidence: s.confidence(),
                age_ms: now.saturating_duration_since(s.captured_at()).as_millis() as u64,
            })
            .collect();
        SessionStatus {
            phase,
            uptime_ms: Some(now.saturating_duration_since(live.started_at).as_millis() as u64),
            emotion: state.label_name(),
            confidence: state.confidence,
            emotion_age_ms: state.age_at(now).map(|a| a.as_millis() as u64),
            recent,
            turns: live.controller.stats(),
        }
    }
}

fn timed_out(limit: Duration) -> String {
    format!("no answer within {} ms", limit.as_millis())
}

fn joined_or_log<T>(joined: Result<T, tokio::task::JoinError>, task: &'static str) -> Option<T> {
    match joined {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(target: LOG_TARGET, task, error = %e, "task failed");
            None
        }
    }
}
