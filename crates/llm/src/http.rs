//! HTTP text-generation backend.
//!
//! Speaks the Ollama-style `/api/generate` protocol: a single JSON object for
//! non-streaming calls, newline-delimited JSON objects when streaming.

use crate::provider::{
    GenerateOptions, GenerateRequest, InferenceBackend, LlmError, TokenStream,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

impl<'a> WireRequest<'a> {
    fn from_request(request: &'a GenerateRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            prompt: &request.prompt,
            stream,
            keep_alive: request.keep_alive.as_deref(),
            options: request.options,
        }
    }
}

/// One decoded response object. Streaming replies carry one per line.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Parse one NDJSON line. Blank or malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<GenerateChunk> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<GenerateChunk>(line) {
        Ok(chunk) => Some(chunk),
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed stream line");
            None
        }
    }
}

/// Splits a byte stream into complete lines, holding partial tails between chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append bytes; returns every line completed by this chunk.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Remaining unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

struct NdjsonState<S> {
    inner: Pin<Box<S>>,
    lines: LineBuffer,
    pending: VecDeque<Result<String, LlmError>>,
    finished: bool,
}

impl<S> NdjsonState<S> {
    fn absorb(&mut self, line: &str) {
        if self.finished {
            return;
        }
        let Some(chunk) = parse_line(line) else {
            return;
        };
        if let Some(err) = chunk.error {
            self.pending.push_back(Err(LlmError::Backend(err)));
            self.finished = true;
            return;
        }
        if !chunk.response.is_empty() {
            self.pending.push_back(Ok(chunk.response));
        }
        if chunk.done {
            self.finished = true;
        }
    }
}

/// Turn a raw NDJSON byte stream into a stream of response tokens.
pub fn ndjson_tokens<S, B, E>(bytes: S) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = NdjsonState {
        inner: Box::pin(bytes),
        lines: LineBuffer::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    for line in st.lines.push(chunk.as_ref()) {
                        st.absorb(&line);
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(LlmError::RequestFailed(e.to_string())), st));
                }
                None => {
                    if let Some(rest) = st.lines.finish() {
                        st.absorb(&rest);
                    }
                    st.finished = true;
                }
            }
        }
    });
    Box::pin(stream)
}

/// HTTP text-generation backend.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Build from an optional base URL override.
    pub fn new(base_url: Option<String>) -> Self {
        let base = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        Self {
            client: reqwest::Client::new(),
            base_url: base.trim_end_matches('/').to_owned(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    async fn post(
        &self,
        request: &GenerateRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let body = WireRequest::from_request(request, stream);
        let resp = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    LlmError::Unavailable(e.to_string())
                } else {
                    LlmError::RequestFailed(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed(format!("{status}: {text}")));
        }
        Ok(resp)
    }

    async fn generate_once(&self, request: GenerateRequest) -> Result<String, LlmError> {
        let resp = self.post(&request, false).await?;
        let chunk: GenerateChunk = resp
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        if let Some(err) = chunk.error {
            return Err(LlmError::Backend(err));
        }
        Ok(chunk.response)
    }

    async fn open_stream(&self, request: GenerateRequest) -> Result<TokenStream, LlmError> {
        let resp = self.post(&request, true).await?;
        Ok(ndjson_tokens(resp.bytes_stream()))
    }
}

impl InferenceBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    fn generate(
        &self,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + '_>> {
        Box::pin(self.generate_once(request))
    }

    fn generate_stream(
        &self,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TokenStream, LlmError>> + Send + '_>> {
        Box::pin(self.open_stream(request))
    }
}
