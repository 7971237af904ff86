use crate::speech::{DeliveryHint, RobotProvider, SpeechError, SpeechIo, Utterance};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

/// Terminal stand-in for the robot: reads turns from stdin, prints replies.
#[derive(Clone, Debug, Default)]
pub struct ConsoleRobot;

impl ConsoleRobot {
    pub fn new() -> Self {
        Self
    }
}

impl RobotProvider for ConsoleRobot {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn SpeechIo>, SpeechError>> {
        async move {
            let speech = ConsoleSpeech {
                lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
                closed: AtomicBool::new(false),
            };
            Ok(Arc::new(speech) as Arc<dyn SpeechIo>)
        }
        .boxed()
    }
}

pub struct ConsoleSpeech {
    lines: Mutex<Lines<BufReader<Stdin>>>,
    closed: AtomicBool,
}

impl SpeechIo for ConsoleSpeech {
    fn listen(&self) -> BoxFuture<'_, Result<Option<Utterance>, SpeechError>> {
        async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(SpeechError::Released);
            }
            let mut lines = self.lines.lock().await;
            match lines.next_line().await? {
                Some(line) => {
                    let utterance = Utterance::new(line);
                    Ok((!utterance.is_blank()).then_some(utterance))
                }
                None => {
                    self.closed.store(true, Ordering::Release);
                    Err(SpeechError::Unavailable("stdin closed".to_owned()))
                }
            }
        }
        .boxed()
    }

    fn say<'a>(
        &'a self,
        text: &'a str,
        hint: &'a DeliveryHint,
    ) -> BoxFuture<'a, Result<(), SpeechError>> {
        async move {
            let mut line = String::new();
            if !hint.gestures.is_empty() {
                line.push_str(&format!("*{}* ", hint.gestures.join(", ")));
            }
            if hint.has_prosody() {
                line.push_str(&format!(
                    "[rate {:.2} pitch {:+}%] ",
                    hint.rate, hint.pitch_percent
                ));
            }
            line.push_str("robot: ");
            line.push_str(text);
            line.push('\n');

            let mut out = tokio::io::stdout();
            out.write_all(line.as_bytes()).await?;
            out.flush().await?;
            Ok(())
        }
        .boxed()
    }

    fn stop_speaking(&self) -> BoxFuture<'_, Result<(), SpeechError>> {
        async { Ok(()) }.boxed()
    }

    fn release(&self) -> BoxFuture<'_, ()> {
        async move {
            self.closed.store(true, Ordering::Release);
        }
        .boxed()
    }
}
