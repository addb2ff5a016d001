//! Generation Streamer: prompt in, ordered text chunks out.
//!
//! The HTTP body is read by a spawned task that pushes chunks into a bounded
//! channel. The task exits as soon as the receiving [`ChunkStream`] is
//! dropped or the request's token is cancelled, releasing the connection.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::GenerationError;
use crate::models::{AugmentedPrompt, GenerationConfig};
use crate::utils::is_blank;

/// One text fragment of the answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseChunk {
    pub text: String,
}

impl ResponseChunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

pub type ChunkResult = Result<ResponseChunk, GenerationError>;

/// Receiving half of a generation. Finite and not restartable.
#[derive(Debug)]
pub struct ChunkStream {
    rx: mpsc::Receiver<ChunkResult>,
}

impl ChunkStream {
    /// A connected sender/stream pair.
    pub fn channel(capacity: usize) -> (mpsc::Sender<ChunkResult>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }

    /// Build a finished stream from pre-computed items.
    pub fn from_items(items: Vec<ChunkResult>) -> Self {
        let (tx, stream) = Self::channel(items.len().max(1));
        for item in items {
            // capacity covers every item
            let _ = tx.try_send(item);
        }
        stream
    }
}

impl Stream for ChunkStream {
    type Item = ChunkResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Turns an [`AugmentedPrompt`] into a live [`ChunkStream`].
#[async_trait]
pub trait Generator: Send + Sync {
    /// Issue a new generation request.
    ///
    /// Errors returned here happen before any chunk exists; errors after
    /// that arrive as the final item of the stream.
    async fn stream(
        &self,
        prompt: &AugmentedPrompt,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, GenerationError>;

    async fn health_check(&self) -> Result<(), GenerationError>;

    fn model(&self) -> &str;
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>, GenerationError> {
    Ok(Arc::new(GeminiGenerator::new(config)?))
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: [RequestContent<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamEvent {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

/// Decode one `data:` payload into the text it carries.
fn parse_event(data: &str) -> Result<Option<String>, GenerationError> {
    let event: StreamEvent =
        serde_json::from_str(data).map_err(|e| GenerationError::InvalidEvent(e.to_string()))?;

    if let Some(error) = event.error {
        return Err(GenerationError::StreamError(match error.code {
            Some(code) => format!("{code}: {}", error.message),
            None => error.message,
        }));
    }
    if let Some(reason) = event.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GenerationError::Blocked(reason));
    }

    let Some(candidate) = event.candidates.into_iter().next() else {
        return Ok(None);
    };
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() && candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(GenerationError::Blocked("SAFETY".to_string()));
    }
    Ok(Some(text))
}

/// Incremental server-sent-events splitter. Works on bytes so multi-byte
/// characters split across network reads survive.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed bytes, returning the `data:` payloads of every completed line.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a trailing line that had no newline.
    fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == "[DONE]" {
        None
    } else {
        Some(data.to_string())
    }
}

/// Send one item unless the consumer is gone or the token fired.
async fn forward(
    tx: &mpsc::Sender<ChunkResult>,
    cancel: &CancellationToken,
    item: ChunkResult,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

/// Forward the payloads of one read; false once the stream must stop.
async fn forward_payloads(
    tx: &mpsc::Sender<ChunkResult>,
    cancel: &CancellationToken,
    payloads: Vec<String>,
) -> bool {
    for data in payloads {
        match parse_event(&data) {
            Ok(Some(text)) if !is_blank(&text) => {
                if !forward(tx, cancel, Ok(ResponseChunk::new(text))).await {
                    return false;
                }
            }
            Ok(_) => {}
            Err(e) => {
                forward(tx, cancel, Err(e)).await;
                return false;
            }
        }
    }
    true
}

/// Google Generative Language `streamGenerateContent` adapter.
#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    channel_capacity: usize,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            GenerationError::ConnectionError(
                "missing API key (set GEMINI_API_KEY or API_KEY)".to_string(),
            )
        })?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            channel_capacity: config.channel_capacity,
        })
    }

    async fn open(&self, prompt: &AugmentedPrompt) -> Result<reqwest::Response, GenerationError> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        );
        let request = GenerateRequest {
            contents: [RequestContent {
                role: "user",
                parts: prompt
                    .segments()
                    .iter()
                    .map(|segment| RequestPart {
                        text: &segment.text,
                    })
                    .collect(),
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::ServerError(format!(
                "status {}: {}",
                status, body
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn stream(
        &self,
        prompt: &AugmentedPrompt,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, GenerationError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            response = self.open(prompt) => response?,
        };

        let (tx, stream) = ChunkStream::channel(self.channel_capacity);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut body = Box::pin(response.bytes_stream());
            let mut decoder = SseDecoder::default();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!("generation cancelled, closing stream");
                        let _ = tx.try_send(Err(GenerationError::Cancelled));
                        return;
                    }
                    _ = tx.closed() => {
                        tracing::debug!("consumer dropped, closing stream");
                        return;
                    }
                    next = body.next() => next,
                };

                match next {
                    Some(Ok(bytes)) => {
                        if !forward_payloads(&tx, &cancel, decoder.push(&bytes)).await {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        forward(&tx, &cancel, Err(GenerationError::StreamError(e.to_string())))
                            .await;
                        return;
                    }
                    None => {
                        forward_payloads(&tx, &cancel, decoder.finish().into_iter().collect())
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(stream)
    }

    async fn health_check(&self) -> Result<(), GenerationError> {
        let url = format!("{}/v1beta/models/{}", self.base_url, self.model);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| GenerationError::ConnectionError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GenerationError::ServerError(format!(
                "status {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PromptSegment, SegmentKind};
    use mockito::Matcher;
    use serde_json::json;
    use std::io::Write;

    const STREAM_PATH: &str = "/v1beta/models/gemini-pro:streamGenerateContent";

    fn config(url: &str) -> GenerationConfig {
        GenerationConfig {
            url: url.to_string(),
            api_key: Some("test-key".to_string()),
            ..Default::default()
        }
    }

    fn prompt() -> AugmentedPrompt {
        AugmentedPrompt::from_segments(vec![
            PromptSegment {
                kind: SegmentKind::Instructions,
                text: "be helpful".to_string(),
            },
            PromptSegment {
                kind: SegmentKind::Query,
                text: "best physics professors".to_string(),
            },
        ])
    }

    fn event(text: &str) -> String {
        let payload = json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
        });
        format!("data: {payload}\r\n\r\n")
    }

    async fn collect(stream: ChunkStream) -> Vec<ChunkResult> {
        stream.collect().await
    }

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push(b":1}\n\ndata: [DONE]\n"), vec!["{\"a\":1}".to_string()]);
        assert!(decoder.push(b": keep-alive\n").is_empty());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_decoder_keeps_multibyte_characters() {
        let mut decoder = SseDecoder::default();
        let line = "data: \"Ünïcode\"\n".as_bytes();
        let (head, tail) = line.split_at(8);
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec!["\"Ünïcode\"".to_string()]);
    }

    #[test]
    fn test_parse_event_variants() {
        let text = parse_event(r#"{"candidates":[{"content":{"parts":[{"text":"Hi "},{"text":"there"}]}}]}"#)
            .unwrap();
        assert_eq!(text.as_deref(), Some("Hi there"));

        assert!(matches!(
            parse_event(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#),
            Err(GenerationError::Blocked(reason)) if reason == "SAFETY"
        ));
        assert!(matches!(
            parse_event(r#"{"error":{"code":429,"message":"quota"}}"#),
            Err(GenerationError::StreamError(msg)) if msg == "429: quota"
        ));
        assert!(matches!(parse_event("not json"), Err(GenerationError::InvalidEvent(_))));
        assert_eq!(parse_event(r#"{"candidates":[]}"#).unwrap(), None);
    }

    #[tokio::test]
    async fn test_stream_forwards_chunks_in_order() {
        let mut server = mockito::Server::new_async().await;
        let body = [event("Title: Top 3"), event("  "), event(" Professors"), event("\n")].concat();
        let mock = server
            .mock("POST", STREAM_PATH)
            .match_query(Matcher::UrlEncoded("alt".into(), "sse".into()))
            .match_header("x-goog-api-key", "test-key")
            .match_body(Matcher::PartialJson(json!({
                "contents": [{"role": "user", "parts": [{"text": "be helpful"}, {"text": "best physics professors"}]}]
            })))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let generator = GeminiGenerator::new(&config(&server.url())).unwrap();
        let stream = generator.stream(&prompt(), &CancellationToken::new()).await.unwrap();
        let chunks: Vec<String> = collect(stream)
            .await
            .into_iter()
            .map(|c| c.unwrap().text)
            .collect();

        assert_eq!(chunks, vec!["Title: Top 3", " Professors"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_long_answer_outlives_timeout_while_data_flows() {
        let mut server = mockito::Server::new_async().await;
        let events: Vec<String> = ["one", " two", " three", " four"]
            .iter()
            .map(|text| event(text))
            .collect();
        server
            .mock("POST", STREAM_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_chunked_body(move |writer| {
                for event in &events {
                    writer.write_all(event.as_bytes())?;
                    writer.flush()?;
                    std::thread::sleep(Duration::from_millis(400));
                }
                Ok(())
            })
            .create_async()
            .await;

        let generator = GeminiGenerator::new(&GenerationConfig {
            timeout_secs: 1,
            ..config(&server.url())
        })
        .unwrap();
        let stream = generator.stream(&prompt(), &CancellationToken::new()).await.unwrap();
        let items = collect(stream).await;

        assert!(items.iter().all(Result::is_ok));
        let text: String = items.into_iter().map(|c| c.unwrap().text).collect();
        assert_eq!(text, "one two three four");
    }

    #[tokio::test]
    async fn test_error_event_terminates_after_partial_output() {
        let mut server = mockito::Server::new_async().await;
        let body = format!(
            "{}data: {}\n\n{}",
            event("partial"),
            json!({"error": {"code": 500, "message": "internal"}}),
            event("never sent")
        );
        server
            .mock("POST", STREAM_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let generator = GeminiGenerator::new(&config(&server.url())).unwrap();
        let items = collect(generator.stream(&prompt(), &CancellationToken::new()).await.unwrap()).await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().text, "partial");
        assert!(matches!(items[1], Err(GenerationError::StreamError(_))));
    }

    #[tokio::test]
    async fn test_http_error_before_stream() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", STREAM_PATH)
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let generator = GeminiGenerator::new(&config(&server.url())).unwrap();
        let err = generator
            .stream(&prompt(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::ServerError(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let server = mockito::Server::new_async().await;
        let generator = GeminiGenerator::new(&config(&server.url())).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = generator.stream(&prompt(), &cancel).await.unwrap_err();
        assert!(matches!(err, GenerationError::Cancelled));
    }

    #[test]
    fn test_requires_api_key() {
        assert!(GeminiGenerator::new(&GenerationConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_from_items() {
        let stream = ChunkStream::from_items(vec![
            Ok(ResponseChunk::new("a")),
            Err(GenerationError::StreamError("x".to_string())),
        ]);
        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
    }
}
