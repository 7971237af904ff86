//! Client for the Furhat Remote API (`/furhat/...` on port 54321 by default).

use crate::config::{Endpoint, FurhatConfig};
use crate::speech::{DeliveryHint, RobotProvider, SpeechError, SpeechIo, Utterance};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

const LOG_TARGET: &str = "speech::furhat";

#[derive(Clone)]
pub struct FurhatRobot {
    client: Client,
    config: FurhatConfig,
}

impl FurhatRobot {
    pub fn new(config: FurhatConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

impl RobotProvider for FurhatRobot {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn SpeechIo>, SpeechError>> {
        async move {
            let speech = FurhatSpeech {
                client: self.client.clone(),
                base: self.config.url.clone(),
                language: self.config.language.clone(),
                released: AtomicBool::new(false),
            };
            let limit = self.config.connect_timeout;

            let voices = self.client.get(speech.url(&["furhat", "voices"], &[])).timeout(limit);
            speech
                .send(voices)
                .await
                .map_err(|e| SpeechError::Unavailable(format!("{}: {e}", self.config.url)))?;

            // Appearance is cosmetic; a robot that rejects it is still usable.
            if let Some(voice) = &self.config.voice {
                let url = speech.url(&["furhat", "voice"], &[("name", voice.as_str())]);
                if let Err(e) = speech.send(self.client.post(url).timeout(limit)).await {
                    tracing::warn!(target: LOG_TARGET, voice = %voice, "failed to set voice: {e}");
                }
            }
            if let (Some(character), Some(mask)) = (&self.config.character, &self.config.mask) {
                let url = speech.url(&["furhat", "face"], &[("character", character.as_str()), ("mask", mask.as_str())]);
                if let Err(e) = speech.send(self.client.post(url).timeout(limit)).await {
                    tracing::warn!(target: LOG_TARGET, character = %character, "failed to set face: {e}");
                }
            }

            tracing::info!(target: LOG_TARGET, url = %self.config.url, "connected to furhat");
            Ok(Arc::new(speech) as Arc<dyn SpeechIo>)
        }
        .boxed()
    }
}

pub struct FurhatSpeech {
    client: Client,
    base: Endpoint,
    language: String,
    released: AtomicBool,
}

#[derive(Deserialize)]
struct ListenResponse {
    #[serde(default)]
    message: String,
}

impl FurhatSpeech {
    fn url(&self, path: &[&str], query: &[(&str, &str)]) -> Url {
        let mut url = self.base.join_path(path);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    fn ensure_live(&self) -> Result<(), SpeechError> {
        if self.released.load(Ordering::Acquire) {
            return Err(SpeechError::Released);
        }
        Ok(())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SpeechError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::HttpStatus(status.as_u16(), body));
        }
        Ok(response)
    }

    async fn post(&self, url: Url) -> Result<(), SpeechError> {
        self.send(self.client.post(url)).await.map(drop)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, SpeechError> {
        Ok(self.send(self.client.get(url)).await?.json().await?)
    }
}

impl SpeechIo for FurhatSpeech {
    fn listen(&self) -> BoxFuture<'_, Result<Option<Utterance>, SpeechError>> {
        async move {
            self.ensure_live()?;
            let url = self.url(&["furhat", "listen"], &[("language", self.language.as_str())]);
            let heard: ListenResponse = self.get_json(url).await?;
            let utterance = Utterance::new(heard.message);
            Ok((!utterance.is_blank()).then_some(utterance))
        }
        .boxed()
    }

    fn say<'a>(
        &'a self,
        text: &'a str,
        hint: &'a DeliveryHint,
    ) -> BoxFuture<'a, Result<(), SpeechError>> {
        async move {
            self.ensure_live()?;
            for gesture in &hint.gestures {
                let url = self.url(
                    &["furhat", "gesture"],
                    &[("name", gesture.as_str()), ("blocking", "false")],
                );
                if let Err(e) = self.post(url).await {
                    tracing::debug!(target: LOG_TARGET, gesture = %gesture, "gesture rejected: {e}");
                }
            }
            let markup = hint.to_ssml(text);
            let url = self.url(
                &["furhat", "say"],
                &[("text", markup.as_str()), ("blocking", "true")],
            );
            self.post(url).await
        }
        .boxed()
    }

    fn stop_speaking(&self) -> BoxFuture<'_, Result<(), SpeechError>> {
        async move { self.post(self.url(&["furhat", "say", "stop"], &[])).await }.boxed()
    }

    fn release(&self) -> BoxFuture<'_, ()> {
        async move {
            if !self.released.swap(true, Ordering::AcqRel) {
                tracing::info!(target: LOG_TARGET, url = %self.base, "furhat released");
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speech() -> FurhatSpeech {
        FurhatSpeech {
            client: Client::new(),
            base: Endpoint::parse("http://robot.local:54321").expect("url"),
            language: "en-US".to_owned(),
            released: AtomicBool::new(false),
        }
    }

    #[test]
    fn say_url_encodes_markup() {
        let s = speech();
        let url = s.url(
            &["furhat", "say"],
            &[("text", "<prosody rate=\"85%\">Hi</prosody>"), ("blocking", "true")],
        );
        assert_eq!(url.path(), "/furhat/say");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0].1, "<prosody rate=\"85%\">Hi</prosody>");
        assert_eq!(pairs[1], ("blocking".to_owned(), "true".to_owned()));
    }

    #[test]
    fn stop_url_path() {
        assert_eq!(speech().url(&["furhat", "say", "stop"], &[]).path(), "/furhat/say/stop");
    }

    #[tokio::test]
    async fn connect_gives_up_on_a_silent_host() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let accepted = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let url = Endpoint::parse(&format!("http://{addr}")).expect("url");
        let robot = FurhatRobot::new(FurhatConfig {
            connect_timeout: std::time::Duration::from_millis(200),
            ..FurhatConfig::new(url)
        });

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), robot.connect())
            .await
            .expect("connect must be bounded");
        assert!(matches!(result, Err(SpeechError::Unavailable(_))));
        accepted.abort();
    }

    #[tokio::test]
    async fn released_device_refuses_io() {
        let s = speech();
        s.release().await;
        assert!(matches!(s.listen().await, Err(SpeechError::Released)));
        assert!(matches!(
            s.say("hi", &DeliveryHint::neutral()).await,
            Err(SpeechError::Released)
        ));
    }
}
