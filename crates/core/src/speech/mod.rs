mod console;
mod furhat;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use console::{ConsoleRobot, ConsoleSpeech};
pub use furhat::{FurhatRobot, FurhatSpeech};

/// Non-textual delivery modulation, applied by the speech device on top of
/// the reply text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DeliveryHint {
    /// Speaking-rate multiplier; 1.0 is the voice default.
    pub rate: f32,
    /// Pitch shift in percent relative to the voice default.
    pub pitch_percent: i8,
    /// Robot gestures to play before speaking.
    pub gestures: Vec<String>,
}

impl DeliveryHint {
    pub fn neutral() -> Self {
        Self {
            rate: 1.0,
            pitch_percent: 0,
            gestures: Vec::new(),
        }
    }

    pub fn has_prosody(&self) -> bool {
        (self.rate - 1.0).abs() > f32::EPSILON || self.pitch_percent != 0
    }

    /// Wraps `text` in SSML prosody markup; plain text when the hint is neutral.
    pub fn to_ssml(&self, text: &str) -> String {
        let escaped = escape_markup(text);
        if !self.has_prosody() {
            return escaped;
        }
        let rate = (self.rate * 100.0).round() as i32;
        format!(
            "<prosody rate=\"{rate}%\" pitch=\"{:+}%\">{escaped}</prosody>",
            self.pitch_percent
        )
    }
}

impl Default for DeliveryHint {
    fn default() -> Self {
        Self::neutral()
    }
}

fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

/// A recognized user utterance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
}

impl Utterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SpeechError {
    #[error("robot runtime unavailable: {0}")]
    Unavailable(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http error {0}: {1}")]
    HttpStatus(u16, String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("speech device released")]
    Released,
}

/// Speech I/O of a connected robot. `listen` resolves when the user finishes
/// a turn; `None` means the turn ended without recognized speech.
pub trait SpeechIo: Send + Sync {
    fn listen(&self) -> BoxFuture<'_, Result<Option<Utterance>, SpeechError>>;

    fn say<'a>(&'a self, text: &'a str, hint: &'a DeliveryHint)
        -> BoxFuture<'a, Result<(), SpeechError>>;

    /// Cuts the current utterance short.
    fn stop_speaking(&self) -> BoxFuture<'_, Result<(), SpeechError>>;

    fn release(&self) -> BoxFuture<'_, ()>;
}

/// Connects to the robot runtime for a session.
pub trait RobotProvider: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn SpeechIo>, SpeechError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_hint_is_plain_text() {
        assert_eq!(DeliveryHint::neutral().to_ssml("Hi <there>"), "Hi &lt;there&gt;");
    }

    #[test]
    fn prosody_markup_carries_rate_and_pitch() {
        let hint = DeliveryHint {
            rate: 0.85,
            pitch_percent: -5,
            gestures: vec![],
        };
        assert_eq!(
            hint.to_ssml("It's okay & normal."),
            "<prosody rate=\"85%\" pitch=\"-5%\">It's okay &amp; normal.</prosody>"
        );

        let up = DeliveryHint {
            rate: 1.1,
            pitch_percent: 5,
            gestures: vec![],
        };
        assert!(up.to_ssml("Yay").contains("pitch=\"+5%\""));
    }

    #[test]
    fn blank_utterance_detection() {
        assert!(Utterance::new("  \n").is_blank());
        assert!(!Utterance::new("hello").is_blank());
    }
}
