//! The spoken conversation driven over a connected robot.
//!
//! Two tokens control the loop. `shutdown` stops it from taking new turns
//! (an idle `listen` is abandoned at once); `abort` interrupts whatever
//! external wait is still in flight, including speech already in progress.

use crate::dialogue::TurnController;
use crate::speech::{DeliveryHint, SpeechError, SpeechIo};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "dialogue::conversation";
const DEFAULT_USER_NAME: &str = "Friend";
const NAME_FILLER_WORDS: [&str; 7] = ["my", "name", "is", "i'm", "im", "call", "me"];
const LISTEN_ERROR_BACKOFF: Duration = Duration::from_secs(1);

const GREETING: &str = "Hello! I'm your companion Furhat.";
const ASK_NAME: &str = "May I know your name?";
const OPENING_QUESTION: &str = "How are you feeling today?";
const CONTINUE_QUESTION: &str = "Would you like to continue the chat?";
const YES_NO_REPROMPT: &str = "Sorry, is that a yes or a no?";

const YES_CUES: [&str; 15] = [
    "yes", "yeah", "yep", "sure", "ok", "okay", "please", "alright", "continue", "i want",
    "i would", "i'd like", "let's", "lets", "go ahead",
];
const NO_CUES: [&str; 11] = [
    "no", "nah", "nope", "not", "don't", "dont", "do not", "stop", "enough", "bye", "goodbye",
];
const UNSURE_CUES: [&str; 4] = ["don't know", "dont know", "not sure", "no idea"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationConfig {
    pub listen_timeout: Duration,
    pub speak_timeout: Duration,
    pub ask_name: bool,
    /// Ask after every reply whether to go on; "no" ends the conversation.
    pub ask_to_continue: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            listen_timeout: Duration::from_millis(crate::config::DEFAULT_LISTEN_TIMEOUT_MS),
            speak_timeout: Duration::from_millis(crate::config::DEFAULT_SPEAK_TIMEOUT_MS),
            ask_name: true,
            ask_to_continue: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConversationReport {
    pub turns: u64,
    pub fallbacks: u64,
    pub user_name: String,
    /// False when the loop ended without a farewell (aborted or device lost).
    pub said_goodbye: bool,
    /// The user answered "no" to carrying on.
    pub ended_by_user: bool,
}

/// Picks a name out of answers like "my name is anna" or "call me Bob".
pub fn extract_name(text: &str) -> Option<String> {
    let word = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
        .map(str::to_lowercase)
        .find(|w| !w.is_empty() && !NAME_FILLER_WORDS.contains(&w.as_str()))?;

    let mut chars = word.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}

/// Reads a yes or a no out of a spoken answer. `None` when the answer has
/// neither, or both ("yes, but not now").
pub fn parse_yes_no(text: &str) -> Option<bool> {
    let text = text.replace('\u{2019}', "'");
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    if has_cue(&words, &UNSURE_CUES) {
        return None;
    }
    match (has_cue(&words, &YES_CUES), has_cue(&words, &NO_CUES)) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

fn has_cue(words: &[String], cues: &[&str]) -> bool {
    cues.iter().any(|cue| {
        let cue: Vec<&str> = cue.split(' ').collect();
        words
            .windows(cue.len())
            .any(|window| window.iter().zip(&cue).all(|(w, c)| w == c))
    })
}

enum Heard {
    Utterance(String),
    Nothing,
    Stopped,
    DeviceLost,
}

enum Spoken {
    Done,
    Aborted,
}

enum Carry {
    On,
    Finish,
    Stopped,
    Aborted,
    DeviceLost,
}

pub async fn run_conversation(
    controller: Arc<TurnController>,
    speech: Arc<dyn SpeechIo>,
    config: ConversationConfig,
    shutdown: CancellationToken,
    abort: CancellationToken,
) -> ConversationReport {
    let speech = speech.as_ref();
    let neutral = DeliveryHint::neutral();
    let mut user_name = DEFAULT_USER_NAME.to_owned();
    let mut device_lost = false;
    let mut ended_by_user = false;

    let mut script = vec![GREETING];
    if config.ask_name {
        script.push(ASK_NAME);
    }
    let mut aborted = false;
    for line in script {
        if let Spoken::Aborted = speak(speech, line, &neutral, &config, &abort).await {
            aborted = true;
            break;
        }
    }

    if !aborted && config.ask_name {
        match listen(speech, &config, &shutdown, &abort).await {
            Heard::Utterance(answer) => {
                if let Some(name) = extract_name(&answer) {
                    user_name = name;
                }
            }
            Heard::DeviceLost => device_lost = true,
            Heard::Nothing | Heard::Stopped => {}
        }
        if !device_lost && !shutdown.is_cancelled() {
            let line = format!("Nice to meet you, {user_name}.");
            aborted = matches!(speak(speech, &line, &neutral, &config, &abort).await, Spoken::Aborted);
        }
    }

    if !aborted && !device_lost && !shutdown.is_cancelled() {
        aborted = matches!(
            speak(speech, OPENING_QUESTION, &neutral, &config, &abort).await,
            Spoken::Aborted
        );
    }

    while !aborted && !device_lost {
        let utterance = match listen(speech, &config, &shutdown, &abort).await {
            Heard::Utterance(text) => text,
            Heard::Nothing => continue,
            Heard::Stopped => break,
            Heard::DeviceLost => {
                device_lost = true;
                break;
            }
        };

        let turn = controller.handle_turn(&utterance).await;
        tracing::info!(
            target: LOG_TARGET,
            emotion = %turn.emotion_snapshot_used,
            inferred = turn.inferred_emotion.map(|l| l.as_str()),
            fallback = turn.used_fallback(),
            "replying"
        );
        if let Spoken::Aborted = speak(
            speech,
            &turn.generated_reply,
            &turn.delivery_hint,
            &config,
            &abort,
        )
        .await
        {
            aborted = true;
            break;
        }

        if !config.ask_to_continue || shutdown.is_cancelled() {
            continue;
        }
        match ask_to_continue(speech, &config, &shutdown, &abort).await {
            Carry::On => {
                aborted = matches!(
                    speak(speech, OPENING_QUESTION, &neutral, &config, &abort).await,
                    Spoken::Aborted
                );
            }
            Carry::Finish => {
                ended_by_user = true;
                break;
            }
            Carry::Stopped => break,
            Carry::Aborted => aborted = true,
            Carry::DeviceLost => device_lost = true,
        }
    }

    let mut said_goodbye = false;
    if !aborted && !device_lost {
        let farewell = format!("It was nice talking to you, {user_name}. Take care.");
        said_goodbye = matches!(
            speak(speech, &farewell, &neutral, &config, &abort).await,
            Spoken::Done
        );
    }

    let stats = controller.stats();
    tracing::info!(
        target: LOG_TARGET,
        turns = stats.turns,
        fallbacks = stats.fallbacks,
        said_goodbye,
        ended_by_user,
        "conversation ended"
    );
    ConversationReport {
        turns: stats.turns,
        fallbacks: stats.fallbacks,
        user_name,
        said_goodbye,
        ended_by_user,
    }
}

/// Asks once, and once more if the answer was unclear. Silence or two
/// unclear answers keep the conversation going.
async fn ask_to_continue(
    speech: &dyn SpeechIo,
    config: &ConversationConfig,
    shutdown: &CancellationToken,
    abort: &CancellationToken,
) -> Carry {
    let neutral = DeliveryHint::neutral();
    for question in [CONTINUE_QUESTION, YES_NO_REPROMPT] {
        if let Spoken::Aborted = speak(speech, question, &neutral, config, abort).await {
            return Carry::Aborted;
        }
        match listen(speech, config, shutdown, abort).await {
            Heard::Utterance(answer) => match parse_yes_no(&answer) {
                Some(true) => return Carry::On,
                Some(false) => return Carry::Finish,
                None => tracing::debug!(target: LOG_TARGET, answer = %answer, "unclear answer"),
            },
            Heard::Nothing => {}
            Heard::Stopped => return Carry::Stopped,
            Heard::DeviceLost => return Carry::DeviceLost,
        }
    }
    Carry::On
}

async fn listen(
    speech: &dyn SpeechIo,
    config: &ConversationConfig,
    shutdown: &CancellationToken,
    abort: &CancellationToken,
) -> Heard {
    let result = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return Heard::Stopped,
        _ = abort.cancelled() => return Heard::Stopped,
        result = tokio::time::timeout(config.listen_timeout, speech.listen()) => result,
    };

    match result {
        Err(_) => {
            tracing::debug!(target: LOG_TARGET, "listen timed out");
            Heard::Nothing
        }
        Ok(Ok(Some(utterance))) if !utterance.is_blank() => Heard::Utterance(utterance.text),
        Ok(Ok(_)) => Heard::Nothing,
        Ok(Err(e @ (SpeechError::Unavailable(_) | SpeechError::Released))) => {
            tracing::warn!(target: LOG_TARGET, error = %e, "speech input lost");
            Heard::DeviceLost
        }
        Ok(Err(e)) => {
            tracing::warn!(target: LOG_TARGET, error = %e, "listen failed");
            tokio::select! {
                _ = shutdown.cancelled() => Heard::Stopped,
                _ = tokio::time::sleep(LISTEN_ERROR_BACKOFF) => Heard::Nothing,
            }
        }
    }
}

/// Speaks one line. Speech errors are logged and skipped; only `abort` ends
/// the conversation, after telling the robot to stop talking.
async fn speak(
    speech: &dyn SpeechIo,
    text: &str,
    hint: &DeliveryHint,
    config: &ConversationConfig,
    abort: &CancellationToken,
) -> Spoken {
    let result = tokio::select! {
        biased;
        _ = abort.cancelled() => None,
        result = tokio::time::timeout(config.speak_timeout, speech.say(text, hint)) => Some(result),
    };

    match result {
        None => {
            interrupt(speech).await;
            Spoken::Aborted
        }
        Some(Ok(Ok(()))) => Spoken::Done,
        Some(Ok(Err(e))) => {
            tracing::warn!(target: LOG_TARGET, error = %e, "say failed");
            Spoken::Done
        }
        Some(Err(_)) => {
            tracing::warn!(
                target: LOG_TARGET,
                timeout_ms = config.speak_timeout.as_millis() as u64,
                "say timed out"
            );
            interrupt(speech).await;
            Spoken::Done
        }
    }
}

async fn interrupt(speech: &dyn SpeechIo) {
    if let Err(e) = speech.stop_speaking().await {
        tracing::warn!(target: LOG_TARGET, error = %e, "failed to stop speech");
    }
}
