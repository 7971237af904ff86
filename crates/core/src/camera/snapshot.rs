use crate::camera::{CameraProvider, CaptureError, Frame, FrameEncoding, FrameSource};
use crate::config::Endpoint;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::{Duration, Instant};

const LOG_TARGET: &str = "camera::snapshot";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Camera exposed as a still-image URL (IP cameras, capture sidecars).
#[derive(Clone)]
pub struct HttpSnapshotProvider {
    client: Client,
    url: Endpoint,
    request_timeout: Duration,
}

impl HttpSnapshotProvider {
    pub fn new(url: Endpoint) -> Self {
        Self {
            client: Client::new(),
            url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl CameraProvider for HttpSnapshotProvider {
    fn acquire(&self) -> BoxFuture<'_, Result<Box<dyn FrameSource>, CaptureError>> {
        async move {
            let mut camera = HttpSnapshotCamera {
                client: self.client.clone(),
                url: self.url.clone(),
                request_timeout: self.request_timeout,
                released: false,
            };
            // Fetch once so an unreachable camera fails Start instead of the loop.
            camera
                .fetch()
                .await
                .map_err(|e| CaptureError::Unavailable(format!("{}: {e}", self.url)))?;
            tracing::info!(target: LOG_TARGET, url = %self.url, "snapshot camera acquired");
            Ok(Box::new(camera) as Box<dyn FrameSource>)
        }
        .boxed()
    }
}

pub struct HttpSnapshotCamera {
    client: Client,
    url: Endpoint,
    request_timeout: Duration,
    released: bool,
}

impl HttpSnapshotCamera {
    async fn fetch(&mut self) -> Result<Frame, CaptureError> {
        if self.released {
            return Err(CaptureError::Released);
        }
        let response = self
            .client
            .get(self.url.as_url().clone())
            .timeout(self.request_timeout)
            .send()
            .await?;
        let captured_at = Instant::now();

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CaptureError::HttpStatus(status.as_u16(), body));
        }
        let encoding = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(FrameEncoding::from_content_type)
            .unwrap_or(FrameEncoding::Jpeg);
        let data = response.bytes().await?;
        Ok(Frame::new(data, encoding, captured_at))
    }
}

impl FrameSource for HttpSnapshotCamera {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Frame, CaptureError>> {
        self.fetch().boxed()
    }

    fn release(&mut self) -> BoxFuture<'_, ()> {
        async move {
            if !self.released {
                self.released = true;
                tracing::info!(target: LOG_TARGET, url = %self.url, "snapshot camera released");
            }
        }
        .boxed()
    }
}
