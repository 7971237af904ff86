use crate::camera::{Frame, FrameEncoding};
use crate::config::Endpoint;
use crate::emotion::{ClassifyError, EmotionLabel, EmotionSample, FrameClassifier, Observation};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use std::time::Instant;

const HEADER_FRAME_WIDTH: &str = "x-frame-width";
const HEADER_FRAME_HEIGHT: &str = "x-frame-height";

/// Posts frames to an HTTP model server that owns face detection, resizing
/// and normalization.
#[derive(Clone)]
pub struct HttpEmotionClassifier {
    client: Client,
    url: Endpoint,
}

impl HttpEmotionClassifier {
    pub fn new(url: Endpoint) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }
}

#[derive(Deserialize, Debug)]
struct ClassifierResponse {
    emotion: Option<String>,
    #[serde(default)]
    confidence: f32,
    face: Option<bool>,
}

impl FrameClassifier for HttpEmotionClassifier {
    fn classify(&self, frame: Frame) -> BoxFuture<'_, Result<Observation, ClassifyError>> {
        async move {
            frame.validate()?;

            let mut request = self
                .client
                .post(self.url.as_url().clone())
                .header(CONTENT_TYPE, frame.encoding.content_type());
            if let FrameEncoding::Rgb8 { width, height } = frame.encoding {
                request = request
                    .header(HEADER_FRAME_WIDTH, width.to_string())
                    .header(HEADER_FRAME_HEIGHT, height.to_string());
            }

            let response = request.body(frame.data).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClassifyError::HttpStatus(status.as_u16(), body));
            }

            let parsed: ClassifierResponse = response
                .json()
                .await
                .map_err(|e| ClassifyError::InvalidResponse(format!("failed to parse JSON: {e}")))?;
            interpret(parsed, frame.captured_at)
        }
        .boxed()
    }
}

/// Maps the server's reply to an observation. Servers that predate the
/// `face` flag report a missing face as confidence 0.
fn interpret(resp: ClassifierResponse, captured_at: Instant) -> Result<Observation, ClassifyError> {
    if resp.face == Some(false) || resp.confidence <= 0.0 {
        return Ok(Observation::NoFace);
    }
    let Some(raw) = resp.emotion else {
        return Ok(Observation::NoFace);
    };
    let label: EmotionLabel = raw.parse()?;
    let sample = EmotionSample::new(label, resp.confidence, captured_at)?;
    Ok(Observation::Emotion(sample))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::EmotionError;

    fn resp(json: &str) -> ClassifierResponse {
        serde_json::from_str(json).expect("valid json")
    }

    #[test]
    fn parses_model_class_name() {
        let now = Instant::now();
        let obs = interpret(resp(r#"{"emotion":"fear","confidence":0.71}"#), now).expect("ok");
        match obs {
            Observation::Emotion(s) => {
                assert_eq!(s.label(), EmotionLabel::Fearful);
                assert!((s.confidence() - 0.71).abs() < 1e-6);
                assert_eq!(s.captured_at(), now);
            }
            Observation::NoFace => panic!("expected a sample"),
        }
    }

    #[test]
    fn zero_confidence_neutral_means_no_face() {
        let obs = interpret(
            resp(r#"{"emotion":"neutral","confidence":0.0}"#),
            Instant::now(),
        )
        .expect("ok");
        assert_eq!(obs, Observation::NoFace);
    }

    #[test]
    fn explicit_face_flag_or_null_label_means_no_face() {
        let now = Instant::now();
        let a = interpret(resp(r#"{"emotion":"happy","confidence":0.9,"face":false}"#), now);
        let b = interpret(resp(r#"{"emotion":null,"confidence":0.9}"#), now);
        assert_eq!(a.expect("ok"), Observation::NoFace);
        assert_eq!(b.expect("ok"), Observation::NoFace);
    }

    #[test]
    fn unknown_label_is_an_error() {
        let err = interpret(resp(r#"{"emotion":"contempt","confidence":0.5}"#), Instant::now())
            .expect_err("unknown label");
        assert!(matches!(
            err,
            ClassifyError::Sample(EmotionError::UnknownLabel(_))
        ));
    }

    #[test]
    fn out_of_range_confidence_is_an_error() {
        let err = interpret(resp(r#"{"emotion":"sad","confidence":7.5}"#), Instant::now())
            .expect_err("bad confidence");
        assert!(matches!(
            err,
            ClassifyError::Sample(EmotionError::ConfidenceOutOfRange(_))
        ));
    }

    #[tokio::test]
    async fn empty_frame_rejected_before_network() {
        let classifier =
            HttpEmotionClassifier::new(Endpoint::parse("http://127.0.0.1:9/classify").expect("url"));
        let frame = Frame::new(bytes::Bytes::new(), FrameEncoding::Jpeg, Instant::now());
        let err = classifier.classify(frame).await.expect_err("empty frame");
        assert!(matches!(err, ClassifyError::InvalidFrame(_)));
    }
}
