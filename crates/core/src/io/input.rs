use tokio::sync::mpsc;

/// Inbound command sender. The operator console pushes raw text here.
pub type CommandSender = mpsc::Sender<String>;
/// Inbound command receiver, consumed by the control channel.
pub type CommandReceiver = mpsc::Receiver<String>;

/// Create an inbound command channel with the given buffer size.
pub fn channel(buffer: usize) -> (CommandSender, CommandReceiver) {
    mpsc::channel(buffer)
}

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Continue,
    Exit,
    Unrecognized(String),
}

impl Command {
    /// Case-insensitive, whitespace-trimmed parse of free-form inbound text.
    pub fn parse(raw: &str) -> Self {
        let text = raw.trim();
        match text.to_lowercase().as_str() {
            "continue" | "c" => Self::Continue,
            "exit" | "stop" | "quit" => Self::Exit,
            _ => Self::Unrecognized(text.to_owned()),
        }
    }
}
