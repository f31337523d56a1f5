use std::time::Duration;

use percept_llm::provider::LlmError;

/// Error type for the pipeline core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("output channel closed")]
    OutputClosed,
    #[error("inference gate closed")]
    GateClosed,
    #[error("inference failed: {0}")]
    Inference(#[from] LlmError),
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
}
