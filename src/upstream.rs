//! HTTP client for the OpenAI-compatible provider.
//!
//! One POST per inbound request to `{base_url}/chat/completions`. Non-streaming calls
//! return the parsed body; streaming calls return a lazy, single-use stream of parsed
//! chunks that ends on `[DONE]` or when the provider closes the connection. Dropping the
//! stream drops the response body, which closes the upstream connection.

use crate::config::{ProxyConfig, TimeoutConfig};
use crate::error::{ProxyError, Result, TimeoutPhase};
use crate::translate::openai_types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatErrorResponse,
};

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk>> + Send>>;

const DONE_MARKER: &str = "[DONE]";

#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    timeouts: TimeoutConfig,
}

impl UpstreamClient {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connect())
            .build()?;

        Ok(Self {
            http,
            url: config.chat_completions_url(),
            api_key: config.provider.api_key.clone(),
            timeouts: config.timeouts.clone(),
        })
    }

    /// Send the request and wait for response headers; non-2xx becomes `ProxyError::Upstream`.
    async fn send(&self, req: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let pending = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(req)
            .send();

        let response = match tokio::time::timeout(self.timeouts.first_byte(), pending).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_connect() && e.is_timeout() => {
                return Err(ProxyError::timeout(TimeoutPhase::Connect))
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ProxyError::timeout(TimeoutPhase::FirstByte)),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %crate::error::truncate(&body, 300), "Provider error");
            return Err(ProxyError::upstream(status.as_u16(), body));
        }

        Ok(response)
    }

    pub async fn complete(&self, req: &ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        let response = self.send(req).await?;

        let body = tokio::time::timeout(self.timeouts.stream_idle(), response.text())
            .await
            .map_err(|_| ProxyError::timeout(TimeoutPhase::StreamIdle))??;

        serde_json::from_str(&body).map_err(|e| {
            ProxyError::protocol(format!("Failed to parse provider response: {e}"), body)
        })
    }

    pub async fn stream(&self, req: &ChatCompletionRequest) -> Result<ChunkStream> {
        let response = self.send(req).await?;
        Ok(Box::pin(parse_chunks(
            response.bytes_stream(),
            self.timeouts.stream_idle(),
        )))
    }
}

/// Parse an SSE byte stream into chat completion chunks.
///
/// Ends after `[DONE]`, at end of input, or after yielding the first error. Each wait for
/// the next event is bounded by `idle`.
pub fn parse_chunks<S, B, E>(
    bytes: S,
    idle: Duration,
) -> impl Stream<Item = Result<ChatCompletionChunk>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let events = bytes.eventsource();
        tokio::pin!(events);

        loop {
            let next = match tokio::time::timeout(idle, events.next()).await {
                Ok(next) => next,
                Err(_) => {
                    yield Err(ProxyError::timeout(TimeoutPhase::StreamIdle));
                    break;
                }
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    yield Err(ProxyError::protocol(
                        format!("Provider event stream failed: {e}"),
                        String::new(),
                    ));
                    break;
                }
                None => break,
            };

            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == DONE_MARKER {
                break;
            }

            // Some providers report failures in-band after a 200
            if let Ok(err) = serde_json::from_str::<ChatErrorResponse>(data) {
                tracing::warn!(message = %err.error.message, "Provider error inside stream");
                yield Err(ProxyError::upstream(502, data));
                break;
            }

            match serde_json::from_str::<ChatCompletionChunk>(data) {
                Ok(chunk) => yield Ok(chunk),
                Err(e) => {
                    yield Err(ProxyError::protocol(
                        format!("Unparseable stream chunk: {e}"),
                        data,
                    ));
                    break;
                }
            }
        }
    }
}
