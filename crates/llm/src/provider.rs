use futures::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sampling options forwarded to the backend verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub num_ctx: u32,
}

/// Text generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    /// How long the backend should keep the model resident (e.g. "30m").
    pub keep_alive: Option<String>,
    pub options: Option<GenerateOptions>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            keep_alive: None,
            options: None,
        }
    }

    pub fn keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.keep_alive = Some(keep_alive.into());
        self
    }

    pub fn options(mut self, options: GenerateOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Error type for inference operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("backend reported: {0}")]
    Backend(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Incremental tokens from a streaming generation.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Trait for text-generation backends (Ollama-style HTTP, mocks).
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Single-shot generation; resolves to the whole response text.
    fn generate(
        &self,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + '_>>;

    /// Streaming generation; resolves once the backend accepted the request.
    fn generate_stream(
        &self,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TokenStream, LlmError>> + Send + '_>>;
}

/// Scripted backend for tests. Replays a fixed token sequence.
#[derive(Debug, Clone)]
pub struct MockBackend {
    pub tokens: Vec<String>,
    /// Delay before each streamed token, and before a single-shot reply.
    pub token_delay: Duration,
    pub fail: bool,
    /// Streams end with a backend error after this many tokens.
    pub interrupt_after: Option<usize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    pub fn new(response: impl Into<String>) -> Self {
        Self::with_tokens(vec![response.into()], Duration::ZERO)
    }

    pub fn with_tokens(tokens: Vec<String>, token_delay: Duration) -> Self {
        Self {
            tokens,
            token_delay,
            fail: false,
            interrupt_after: None,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A backend whose every call fails with `Unavailable`.
    pub fn failing() -> Self {
        let mut mock = Self::with_tokens(Vec::new(), Duration::ZERO);
        mock.fail = true;
        mock
    }

    /// Break every stream with `LlmError::Backend` once `after` tokens were sent.
    pub fn interrupted(mut self, after: usize) -> Self {
        self.interrupt_after = Some(after);
        self
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, request: &GenerateRequest) {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.prompt.clone());
    }
}

impl InferenceBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn generate(
        &self,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + '_>> {
        self.record(&request);
        let text = self.tokens.concat();
        let delay = self.token_delay;
        let fail = self.fail;
        Box::pin(async move {
            if fail {
                return Err(LlmError::Unavailable("mock failure".into()));
            }
            tokio::time::sleep(delay).await;
            Ok(text)
        })
    }

    fn generate_stream(
        &self,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TokenStream, LlmError>> + Send + '_>> {
        use futures::StreamExt;

        self.record(&request);
        let items: Vec<Result<String, LlmError>> = match self.interrupt_after {
            Some(after) => self
                .tokens
                .iter()
                .take(after)
                .cloned()
                .map(Ok)
                .chain(std::iter::once(Err(LlmError::Backend(
                    "mock stream interrupted".into(),
                ))))
                .collect(),
            None => self.tokens.iter().cloned().map(Ok).collect(),
        };
        let delay = self.token_delay;
        let fail = self.fail;
        Box::pin(async move {
            if fail {
                return Err(LlmError::Unavailable("mock failure".into()));
            }
            let stream = futures::stream::iter(items).then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            });
            Ok(Box::pin(stream) as TokenStream)
        })
    }
}
