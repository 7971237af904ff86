use crate::config::{ApiKey, Endpoint};
use crate::dialogue::{
    build_inference_prompt, build_prompt, GenerateError, GenerationRequest, ReplyGenerator,
};
use crate::emotion::EmotionLabel;
use crate::util::{retry_with_backoff, RetryConfig, RingBuffer};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

const LOG_TARGET: &str = "dialogue::gemini";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 256;
const INFERENCE_MAX_OUTPUT_TOKENS: u32 = 8;

#[derive(Clone, Debug, PartialEq)]
struct Exchange {
    prompt: String,
    reply: String,
}

/// Google Gemini `generateContent` client. Keeps the last few exchanges of
/// the running session and replays them as chat context.
#[derive(Clone)]
pub struct GeminiGenerator {
    client: Client,
    api_key: ApiKey,
    base_url: Endpoint,
    model: String,
    system_instruction: String,
    retry: RetryConfig,
    /// `None` when history is disabled.
    history: Option<Arc<Mutex<RingBuffer<Exchange>>>>,
}

impl GeminiGenerator {
    pub fn new(api_key: ApiKey, base_url: Endpoint, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            model: model.into(),
            system_instruction: crate::dialogue::COMPANION_SYSTEM_INSTRUCTION.to_owned(),
            retry: RetryConfig::default(),
            history: None,
        }
        .with_history_turns(crate::config::DEFAULT_HISTORY_TURNS)
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Zero turns sends every turn on its own.
    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history = (turns > 0).then(|| Arc::new(Mutex::new(RingBuffer::new(turns))));
        self
    }

    fn history(&self) -> Vec<Exchange> {
        self.history
            .as_ref()
            .map(|h| h.lock().unwrap_or_else(PoisonError::into_inner).to_vec())
            .unwrap_or_default()
    }

    fn remember(&self, prompt: String, reply: &str) {
        if let Some(history) = &self.history {
            history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Exchange {
                    prompt,
                    reply: reply.to_owned(),
                });
        }
    }

    fn body(
        &self,
        prompt: String,
        history: &[Exchange],
        system_instruction: Option<&str>,
        generation_config: GenerationConfig,
    ) -> GeminiRequest {
        let mut contents = Vec::with_capacity(history.len() * 2 + 1);
        for exchange in history {
            contents.push(Content::text("user", exchange.prompt.clone()));
            contents.push(Content::text("model", exchange.reply.clone()));
        }
        contents.push(Content::text("user", prompt));
        GeminiRequest {
            system_instruction: system_instruction.map(|text| Content {
                role: None,
                parts: vec![Part {
                    text: text.to_owned(),
                }],
            }),
            contents,
            generation_config,
        }
    }

    async fn send_once(&self, body: &GeminiRequest) -> Result<String, GenerateError> {
        let url = self
            .base_url
            .join_path(&["models", &format!("{}:generateContent", self.model)]);
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.api_key.expose())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GenerateError::HttpStatus(status.as_u16(), error_text));
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| GenerateError::InvalidResponse(format!("failed to parse JSON: {e}")))?;
        extract_text(parsed)
    }

    async fn send(&self, body: &GeminiRequest) -> Result<String, GenerateError> {
        retry_with_backoff(&self.retry, || self.send_once(body), GenerateError::is_retryable).await
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: &str, text: String) -> Self {
        Self {
            role: Some(role.to_owned()),
            parts: vec![Part { text }],
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

impl GenerationConfig {
    fn reply() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    fn classification() -> Self {
        Self {
            temperature: 0.0,
            max_output_tokens: INFERENCE_MAX_OUTPUT_TOKENS,
        }
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    finish_reason: Option<String>,
}

fn extract_text(response: GeminiResponse) -> Result<String, GenerateError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GenerateError::InvalidResponse("no candidates in response".to_owned()))?;
    let text: String = candidate
        .content
        .parts
        .into_iter()
        .map(|p| p.text)
        .collect::<Vec<_>>()
        .join("");
    let text = text.trim();
    if text.is_empty() {
        tracing::warn!(
            target: LOG_TARGET,
            finish_reason = candidate.finish_reason.as_deref().unwrap_or("none"),
            "empty candidate"
        );
        return Err(GenerateError::EmptyReply);
    }
    Ok(text.to_owned())
}

/// First word of a classification answer, e.g. `"Sad."`.
fn parse_emotion_word(answer: &str) -> Option<EmotionLabel> {
    answer
        .split(|c: char| !c.is_alphabetic())
        .find(|w| !w.is_empty())
        .and_then(|w| w.parse().ok())
}

impl ReplyGenerator for GeminiGenerator {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String, GenerateError>> {
        async move {
            let prompt = build_prompt(&request);
            let history = self.history();
            tracing::debug!(
                target: LOG_TARGET,
                model = %self.model,
                emotion = request.label_name(),
                confidence = request.confidence,
                history = history.len(),
                "requesting reply"
            );
            let body = self.body(
                prompt.clone(),
                &history,
                Some(self.system_instruction.as_str()),
                GenerationConfig::reply(),
            );
            let reply = self.send(&body).await?;
            self.remember(prompt, &reply);
            Ok(reply)
        }
        .boxed()
    }

    fn infer_emotion<'a>(
        &'a self,
        utterance: &'a str,
    ) -> BoxFuture<'a, Result<Option<EmotionLabel>, GenerateError>> {
        async move {
            let body = self.body(
                build_inference_prompt(utterance),
                &[],
                None,
                GenerationConfig::classification(),
            );
            let answer = self.send(&body).await?;
            let label = parse_emotion_word(&answer);
            tracing::debug!(
                target: LOG_TARGET,
                answer = %answer,
                label = label.map(|l| l.as_str()),
                "emotion read from text"
            );
            Ok(label)
        }
        .boxed()
    }

    fn reset(&self) {
        if let Some(history) = &self.history {
            history.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::tone_for;

    fn generator() -> GeminiGenerator {
        GeminiGenerator::new(
            ApiKey::new("k").expect("key"),
            Endpoint::parse(crate::config::DEFAULT_GEMINI_BASE_URL).expect("url"),
            "gemini-test",
        )
    }

    fn reply_body(g: &GeminiGenerator, prompt: &str) -> serde_json::Value {
        let body = g.body(
            prompt.to_owned(),
            &g.history(),
            Some(g.system_instruction.as_str()),
            GenerationConfig::reply(),
        );
        serde_json::to_value(body).expect("serialize")
    }

    #[test]
    fn request_body_uses_wire_field_names() {
        let request = GenerationRequest {
            utterance: "I feel tired today".to_owned(),
            label: Some(EmotionLabel::Sad),
            confidence: 0.8,
            inferred: None,
            tone: tone_for(Some(EmotionLabel::Sad)),
        };
        let json = reply_body(&generator(), &build_prompt(&request));
        assert!(json["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .expect("system text")
            .contains("companion robot"));
        assert_eq!(json["contents"][0]["role"], "user");
        assert!(json["contents"][0]["parts"][0]["text"]
            .as_str()
            .expect("prompt text")
            .contains("sad (confidence 0.80)"));
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 256);
        assert!(json["systemInstruction"].get("role").is_none());
    }

    #[test]
    fn earlier_exchanges_are_replayed_until_reset() {
        let g = generator().with_history_turns(2);
        g.remember("first".to_owned(), "one");
        g.remember("second".to_owned(), "two");
        g.remember("third".to_owned(), "three");

        let json = reply_body(&g, "now");
        let contents = json["contents"].as_array().expect("contents");
        let turns: Vec<(&str, &str)> = contents
            .iter()
            .map(|c| {
                (
                    c["role"].as_str().expect("role"),
                    c["parts"][0]["text"].as_str().expect("text"),
                )
            })
            .collect();
        assert_eq!(
            turns,
            vec![
                ("user", "second"),
                ("model", "two"),
                ("user", "third"),
                ("model", "three"),
                ("user", "now"),
            ]
        );

        g.reset();
        assert_eq!(reply_body(&g, "again")["contents"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn zero_history_turns_keeps_nothing() {
        let g = generator().with_history_turns(0);
        g.remember("first".to_owned(), "one");
        assert!(g.history().is_empty());
    }

    #[test]
    fn inference_request_is_bare_and_deterministic() {
        let g = generator();
        g.remember("earlier".to_owned(), "reply");
        let body = g.body(
            build_inference_prompt("my cat died"),
            &[],
            None,
            GenerationConfig::classification(),
        );
        let json = serde_json::to_value(body).expect("serialize");
        assert!(json.get("systemInstruction").is_none());
        assert_eq!(json["contents"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["generationConfig"]["temperature"], 0.0);
        assert!(json["contents"][0]["parts"][0]["text"]
            .as_str()
            .expect("text")
            .contains("\"my cat died\""));
    }

    #[test]
    fn parses_one_word_emotion_answers() {
        assert_eq!(parse_emotion_word("Sad."), Some(EmotionLabel::Sad));
        assert_eq!(parse_emotion_word("  fear\n"), Some(EmotionLabel::Fearful));
        assert_eq!(parse_emotion_word("surprise"), Some(EmotionLabel::Surprised));
        assert_eq!(parse_emotion_word("I think bored"), None);
        assert_eq!(parse_emotion_word(""), None);
    }

    #[test]
    fn extracts_joined_candidate_text() {
        let raw = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"That sounds "},{"text":"exhausting. "}]},"finishReason":"STOP"}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).expect("json");
        assert_eq!(extract_text(parsed).expect("text"), "That sounds exhausting.");
    }

    #[test]
    fn blocked_candidate_is_empty_reply() {
        let raw = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).expect("json");
        assert!(matches!(extract_text(parsed), Err(GenerateError::EmptyReply)));

        let none: GeminiResponse = serde_json::from_str("{}").expect("json");
        assert!(matches!(extract_text(none), Err(GenerateError::InvalidResponse(_))));
    }
}
