#![deny(warnings)]

use anyhow::Context;
use clap::{ArgGroup, Parser};
use emoconnect_core::camera::{CameraProvider, DirectoryReplayProvider, HttpSnapshotProvider};
use emoconnect_core::config::{
    nonzero_ms, resolve_api_key, resolve_endpoint, resolve_optional_endpoint, validate_tracker,
    AppConfig, CameraSource, Endpoint, FurhatConfig, GeneratorTarget, RobotTarget, StdEnv,
    Timeouts, DEFAULT_CLASSIFIER_URL, DEFAULT_CLASSIFY_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS,
    DEFAULT_FALLBACK_REPLY, DEFAULT_FRAME_INTERVAL_MS, DEFAULT_FURHAT_CHARACTER,
    DEFAULT_FURHAT_MASK, DEFAULT_FURHAT_URL, DEFAULT_FURHAT_VOICE, DEFAULT_GEMINI_BASE_URL,
    DEFAULT_GEMINI_MODEL, DEFAULT_GENERATION_TIMEOUT_MS, DEFAULT_HISTORY_TURNS,
    DEFAULT_INFERENCE_TIMEOUT_MS, DEFAULT_LISTEN_LANGUAGE, DEFAULT_LISTEN_TIMEOUT_MS,
    DEFAULT_SPEAK_TIMEOUT_MS, DEFAULT_STOP_GRACE_MS, ENV_CAMERA_URL, ENV_CLASSIFIER_URL,
    ENV_FURHAT_URL, ENV_GEMINI_API_KEY,
};
use emoconnect_core::dialogue::{GeminiGenerator, ReplyGenerator, TemplateGenerator};
use emoconnect_core::emotion::{HttpEmotionClassifier, TrackerConfig};
use emoconnect_core::session::{
    SessionConfig, SessionDeps, SessionManager, StartOutcome, StopOutcome,
};
use emoconnect_core::speech::{ConsoleRobot, FurhatRobot, RobotProvider};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "emoconnect")]
#[command(about = "Emotion-aware companion dialogue for a social robot")]
#[command(group(
    ArgGroup::new("camera")
        .required(false)
        .multiple(false)
        .args(["camera_url", "camera_dir"])
))]
struct Args {
    /// Still-image URL polled once per frame.
    #[arg(long)]
    camera_url: Option<String>,

    /// Replay .jpg/.png files from a directory instead of a live camera.
    #[arg(long)]
    camera_dir: Option<PathBuf>,

    #[arg(long)]
    classifier_url: Option<String>,

    #[arg(long, conflicts_with = "console")]
    furhat_url: Option<String>,

    /// Talk through the terminal instead of a robot.
    #[arg(long)]
    console: bool,

    #[arg(long, default_value = DEFAULT_FURHAT_VOICE)]
    furhat_voice: String,

    #[arg(long, default_value = DEFAULT_FURHAT_CHARACTER)]
    furhat_character: String,

    #[arg(long, default_value = DEFAULT_FURHAT_MASK)]
    furhat_mask: String,

    #[arg(long, default_value = DEFAULT_LISTEN_LANGUAGE)]
    language: String,

    #[arg(long)]
    gemini_api_key: Option<String>,

    #[arg(long, default_value = DEFAULT_GEMINI_MODEL)]
    gemini_model: String,

    #[arg(long, default_value = DEFAULT_GEMINI_BASE_URL)]
    gemini_base_url: String,

    /// Earlier exchanges sent along as context; 0 disables.
    #[arg(long, default_value_t = DEFAULT_HISTORY_TURNS)]
    history_turns: usize,

    /// Use canned per-emotion replies; no language model.
    #[arg(long, conflicts_with = "gemini_api_key")]
    offline: bool,

    #[arg(long, default_value = DEFAULT_FALLBACK_REPLY)]
    fallback_reply: String,

    /// Skip asking for the user's name at the start.
    #[arg(long)]
    no_ask_name: bool,

    /// Never ask "Would you like to continue the chat?".
    #[arg(long)]
    no_continue_prompt: bool,

    /// Do not guess the emotion from the user's words when the face reads neutral.
    #[arg(long)]
    no_text_emotion: bool,

    #[arg(long, default_value_t = DEFAULT_GENERATION_TIMEOUT_MS)]
    generation_timeout_ms: u64,

    #[arg(long, default_value_t = DEFAULT_LISTEN_TIMEOUT_MS)]
    listen_timeout_ms: u64,

    #[arg(long, default_value_t = DEFAULT_SPEAK_TIMEOUT_MS)]
    speak_timeout_ms: u64,

    #[arg(long, default_value_t = DEFAULT_CLASSIFY_TIMEOUT_MS)]
    classify_timeout_ms: u64,

    #[arg(long, default_value_t = DEFAULT_FRAME_INTERVAL_MS)]
    frame_interval_ms: u64,

    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    connect_timeout_ms: u64,

    #[arg(long, default_value_t = DEFAULT_INFERENCE_TIMEOUT_MS)]
    inference_timeout_ms: u64,

    #[arg(long, default_value_t = DEFAULT_STOP_GRACE_MS)]
    stop_grace_ms: u64,

    /// Age after which the tracked emotion reads as unknown.
    #[arg(long)]
    staleness_ms: Option<u64>,

    #[arg(long)]
    half_life_ms: Option<u64>,

    #[arg(long)]
    smoothing: Option<f32>,

    #[arg(long)]
    tie_epsilon: Option<f32>,

    #[arg(long)]
    min_confidence: Option<f32>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let cfg = build_config(args, &env)?;

    tracing::info!(
        classifier = %cfg.classifier_url,
        offline = matches!(cfg.generator, GeneratorTarget::Offline),
        console = matches!(cfg.robot, RobotTarget::Console),
        "config loaded"
    );

    run_session(cfg).await
}

async fn run_session(cfg: AppConfig) -> anyhow::Result<()> {
    let camera: Arc<dyn CameraProvider> = match &cfg.camera {
        CameraSource::Snapshot(url) => Arc::new(
            HttpSnapshotProvider::new(url.clone()).with_request_timeout(cfg.timeouts.classify),
        ),
        CameraSource::Directory(dir) => Arc::new(DirectoryReplayProvider::new(dir.clone())),
    };
    let robot: Arc<dyn RobotProvider> = match &cfg.robot {
        RobotTarget::Furhat(furhat) => Arc::new(FurhatRobot::new(furhat.clone())),
        RobotTarget::Console => Arc::new(ConsoleRobot::new()),
    };
    let generator: Arc<dyn ReplyGenerator> = match &cfg.generator {
        GeneratorTarget::Gemini {
            api_key,
            model,
            base_url,
            history_turns,
        } => Arc::new(
            GeminiGenerator::new(api_key.clone(), base_url.clone(), model.clone())
                .with_history_turns(*history_turns),
        ),
        GeneratorTarget::Offline => Arc::new(TemplateGenerator::new()),
    };

    let session = SessionManager::new(
        SessionDeps {
            camera,
            classifier: Arc::new(HttpEmotionClassifier::new(cfg.classifier_url.clone())),
            robot,
            generator,
        },
        SessionConfig::from_app(&cfg),
    );

    match session.start().await.context("failed to start session")? {
        StartOutcome::Started => tracing::info!("session running; press Ctrl-C to stop"),
        StartOutcome::AlreadyRunning => tracing::warn!("session already running"),
    }

    let mut heartbeat = tokio::time::interval(STATUS_INTERVAL);
    heartbeat.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            _ = session.conversation_finished() => {
                tracing::info!("conversation over");
                break;
            }
            _ = heartbeat.tick() => {
                let status = session.status();
                tracing::info!(
                    phase = ?status.phase,
                    emotion = status.emotion,
                    confidence = status.confidence,
                    turns = status.turns.turns,
                    fallbacks = status.turns.fallbacks,
                    "status"
                );
            }
        }
    }

    match session.stop().await {
        StopOutcome::Stopped(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        StopOutcome::NotRunning => tracing::warn!("session was not running"),
    }
    Ok(())
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn build_config(
    args: Args,
    env: &impl emoconnect_core::config::Env,
) -> anyhow::Result<AppConfig> {
    let camera = match (
        args.camera_dir,
        resolve_optional_endpoint(args.camera_url, ENV_CAMERA_URL, env)?,
    ) {
        (Some(dir), _) => CameraSource::Directory(dir),
        (None, Some(url)) => CameraSource::Snapshot(url),
        (None, None) => anyhow::bail!(
            "no camera configured: pass --camera-url, --camera-dir or set {ENV_CAMERA_URL}"
        ),
    };

    let classifier_url = resolve_endpoint(
        args.classifier_url,
        ENV_CLASSIFIER_URL,
        env,
        DEFAULT_CLASSIFIER_URL,
    )?;

    let connect = nonzero_ms("connect timeout", args.connect_timeout_ms)?;
    let robot = if args.console {
        RobotTarget::Console
    } else {
        let url = resolve_endpoint(args.furhat_url, ENV_FURHAT_URL, env, DEFAULT_FURHAT_URL)?;
        RobotTarget::Furhat(FurhatConfig {
            voice: Some(args.furhat_voice),
            character: Some(args.furhat_character),
            mask: Some(args.furhat_mask),
            language: args.language,
            connect_timeout: connect,
            ..FurhatConfig::new(url)
        })
    };

    let generator = if args.offline {
        GeneratorTarget::Offline
    } else {
        let api_key = resolve_api_key(args.gemini_api_key, ENV_GEMINI_API_KEY, env)?
            .with_context(|| {
                format!("no Gemini API key: pass --gemini-api-key, set {ENV_GEMINI_API_KEY} or use --offline")
            })?;
        GeneratorTarget::Gemini {
            api_key,
            model: args.gemini_model,
            base_url: Endpoint::parse(&args.gemini_base_url)?,
            history_turns: args.history_turns,
        }
    };

    let defaults = TrackerConfig::default();
    let tracker = TrackerConfig {
        staleness_window: match args.staleness_ms {
            Some(ms) => nonzero_ms("staleness window", ms)?,
            None => defaults.staleness_window,
        },
        half_life: match args.half_life_ms {
            Some(ms) => nonzero_ms("decay half-life", ms)?,
            None => defaults.half_life,
        },
        smoothing: args.smoothing.unwrap_or(defaults.smoothing),
        tie_epsilon: args.tie_epsilon.unwrap_or(defaults.tie_epsilon),
        min_confidence: args.min_confidence.unwrap_or(defaults.min_confidence),
        ..defaults
    };
    validate_tracker(&tracker)?;

    let timeouts = Timeouts {
        generation: nonzero_ms("generation timeout", args.generation_timeout_ms)?,
        listen: nonzero_ms("listen timeout", args.listen_timeout_ms)?,
        speak: nonzero_ms("speak timeout", args.speak_timeout_ms)?,
        classify: nonzero_ms("classify timeout", args.classify_timeout_ms)?,
        connect,
        inference: nonzero_ms("inference timeout", args.inference_timeout_ms)?,
        stop_grace: Duration::from_millis(args.stop_grace_ms),
    };

    let fallback_reply = args.fallback_reply.trim().to_owned();
    if fallback_reply.is_empty() {
        return Err(emoconnect_core::config::ConfigError::EmptyFallbackReply.into());
    }

    Ok(AppConfig {
        camera,
        classifier_url,
        robot,
        generator,
        tracker,
        timeouts,
        frame_interval: nonzero_ms("frame interval", args.frame_interval_ms)?,
        fallback_reply,
        ask_name: !args.no_ask_name,
        ask_to_continue: !args.no_continue_prompt,
        infer_from_text: !args.no_text_emotion,
    })
}
