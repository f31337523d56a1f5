use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CoreError;

/// How the operator console should render a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// A complete human-readable line.
    Line,
    /// A streamed reasoning token; no framing guarantee.
    Token,
    /// The control channel is waiting for the next command.
    Prompt,
}

/// An outbound message for the remote operator.
#[derive(Debug, Clone)]
pub struct OutputMessage {
    pub content: String,
    pub kind: OutputKind,
}

impl OutputMessage {
    pub fn line(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: OutputKind::Line,
        }
    }

    pub fn token(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: OutputKind::Token,
        }
    }

    pub fn prompt(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: OutputKind::Prompt,
        }
    }
}

/// Destination for all operator-visible progress text.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn emit(&self, msg: OutputMessage) -> Result<(), CoreError>;
}

/// Output channel sender. The pipeline pushes messages here.
pub type OutputSender = mpsc::Sender<OutputMessage>;
/// Output channel receiver, drained by the operator console.
pub type OutputReceiver = mpsc::Receiver<OutputMessage>;

/// Create an output channel with the given buffer size.
pub fn channel(buffer: usize) -> (OutputSender, OutputReceiver) {
    mpsc::channel(buffer)
}

/// Sink backed by the outbound side of the control channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: OutputSender,
}

impl ChannelSink {
    pub fn new(tx: OutputSender) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl OutputSink for ChannelSink {
    async fn emit(&self, msg: OutputMessage) -> Result<(), CoreError> {
        self.tx.send(msg).await.map_err(|_| CoreError::OutputClosed)
    }
}
