use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::cognition::coordinator::ReasoningCoordinator;
use crate::error::CoreError;
use crate::io::input::{Command, CommandReceiver};
use crate::io::output::{OutputMessage, OutputSink};
use crate::sensory::sensors::SensorHub;
use crate::types::ControlState;

pub const COMMAND_PROMPT: &str = "Type 'continue' to run the next reasoning cycle or 'exit' to stop.";

/// Why the control loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlExit {
    /// Operator sent an exit command.
    Command,
    /// Inbound or outbound channel closed.
    Disconnected,
    /// Shutdown token fired.
    Cancelled,
}

/// Operator command loop. Each `continue` runs exactly one reasoning cycle;
/// cycles never overlap because the loop awaits each one before reading again.
pub struct ControlChannel {
    inbound: CommandReceiver,
    sink: Arc<dyn OutputSink>,
    coordinator: Arc<ReasoningCoordinator>,
    sensors: Arc<SensorHub>,
    state_tx: watch::Sender<ControlState>,
    cycles: u64,
    cancel: CancellationToken,
}

impl ControlChannel {
    pub fn new(
        inbound: CommandReceiver,
        sink: Arc<dyn OutputSink>,
        coordinator: Arc<ReasoningCoordinator>,
        sensors: Arc<SensorHub>,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ControlState::AwaitingCommand);
        Self {
            inbound,
            sink,
            coordinator,
            sensors,
            state_tx,
            cycles: 0,
            cancel,
        }
    }

    pub fn state(&self) -> ControlState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ControlState> {
        self.state_tx.subscribe()
    }

    /// Cycles run so far, including the startup cycle.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn set_state(&self, next: ControlState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            tracing::debug!(from = %prev, to = %next, "control state");
        }
    }

    /// Snapshot sensors, run one cycle, return to awaiting.
    pub async fn run_cycle(&mut self) -> Result<(), CoreError> {
        self.set_state(ControlState::RunningCycle);
        self.cycles += 1;
        let n = self.cycles;
        let snapshot = self.sensors.snapshot();
        self.sink
            .emit(OutputMessage::line(format!(
                "[Main] Sensor snapshot:\n{}",
                snapshot.fields_json()
            )))
            .await?;
        tracing::info!(cycle = n, "reasoning cycle started");
        self.coordinator.step(n, snapshot).await;
        self.set_state(ControlState::AwaitingCommand);
        self.sink.emit(OutputMessage::prompt(COMMAND_PROMPT)).await
    }

    /// Apply one inbound command. Returns `true` when the loop should stop.
    pub async fn handle(&mut self, raw: &str) -> Result<bool, CoreError> {
        match Command::parse(raw) {
            Command::Continue => {
                self.run_cycle().await?;
                Ok(false)
            }
            Command::Exit => {
                tracing::info!(cycles = self.cycles, "exit requested");
                self.set_state(ControlState::Terminated);
                self.sink
                    .emit(OutputMessage::line("[Main] Exiting."))
                    .await
                    .ok();
                Ok(true)
            }
            Command::Unrecognized(text) => {
                tracing::debug!(command = %text, "unrecognized command");
                self.sink
                    .emit(OutputMessage::line(format!("Unrecognized command: '{text}'")))
                    .await?;
                self.sink.emit(OutputMessage::prompt(COMMAND_PROMPT)).await?;
                Ok(false)
            }
        }
    }

    /// Drive the loop until exit, disconnect or cancellation. When
    /// `initial_cycle` is set one cycle runs before the first command is read.
    pub async fn run(&mut self, initial_cycle: bool) -> ControlExit {
        if initial_cycle {
            if let Err(e) = self.run_cycle().await {
                tracing::warn!(error = %e, "output closed during startup cycle");
                self.set_state(ControlState::Terminated);
                return ControlExit::Disconnected;
            }
        } else if self.sink.emit(OutputMessage::prompt(COMMAND_PROMPT)).await.is_err() {
            self.set_state(ControlState::Terminated);
            return ControlExit::Disconnected;
        }

        let exit = loop {
            let raw = tokio::select! {
                _ = self.cancel.cancelled() => break ControlExit::Cancelled,
                raw = self.inbound.recv() => raw,
            };
            let Some(raw) = raw else {
                tracing::info!("command channel closed");
                break ControlExit::Disconnected;
            };
            match self.handle(&raw).await {
                Ok(true) => break ControlExit::Command,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "output closed, stopping control loop");
                    break ControlExit::Disconnected;
                }
            }
        };
        self.set_state(ControlState::Terminated);
        tracing::info!(?exit, cycles = self.cycles, "control loop stopped");
        exit
    }
}
