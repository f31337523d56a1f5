use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::control::{ControlChannel, ControlExit};
use super::shutdown::ShutdownGuard;
use crate::cognition::bridge::{ActionBridge, ActionReceiver};
use crate::cognition::coordinator::{ReasoningCoordinator, ReasoningSettings};
use crate::cognition::summarizer::{Summarizer, SummarizerSettings};
use crate::config::PerceptCfg;
use crate::io::input::{self, CommandSender};
use crate::io::output::{self, ChannelSink, OutputReceiver, OutputSink};
use crate::memory::embedding::HashEmbedder;
use crate::memory::store::MemoryStore;
use crate::resource_space::gate::InferenceGate;
use crate::sensory::sensors::SensorHub;
use crate::types::ControlState;
use percept_llm::provider::InferenceBackend;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub exit: ControlExit,
    pub cycles: u64,
    pub memories: usize,
}

/// Wires the pipeline together and owns its background tasks.
pub struct Runtime {
    cfg: Arc<PerceptCfg>,
    shutdown: ShutdownGuard,
    control: ControlChannel,
    summarizer: Arc<Summarizer>,
    memory: Arc<MemoryStore>,
    actions: ActionReceiver,
    gate: InferenceGate,
}

impl Runtime {
    /// Create a runtime. Feed operator text into the returned sender and
    /// consume progress from the returned receiver.
    pub fn new(
        cfg: Arc<PerceptCfg>,
        backend: Arc<dyn InferenceBackend>,
        sensors: Arc<SensorHub>,
    ) -> (Self, CommandSender, OutputReceiver) {
        Self::with_gate(cfg, backend, sensors, InferenceGate::new())
    }

    /// Same as [`Runtime::new`] with a caller-supplied gate.
    pub fn with_gate(
        cfg: Arc<PerceptCfg>,
        backend: Arc<dyn InferenceBackend>,
        sensors: Arc<SensorHub>,
        gate: InferenceGate,
    ) -> (Self, CommandSender, OutputReceiver) {
        let shutdown = ShutdownGuard::new();
        let (command_tx, command_rx) = input::channel(cfg.command_buffer);
        let (output_tx, output_rx) = output::channel(cfg.output_buffer);
        let sink: Arc<dyn OutputSink> = Arc::new(ChannelSink::new(output_tx));

        let summarizer = Arc::new(Summarizer::new(
            Arc::clone(&backend),
            gate.clone(),
            SummarizerSettings::from_cfg(&cfg),
        ));
        let memory = Arc::new(MemoryStore::new(Arc::new(HashEmbedder::new(
            cfg.embedding_dim,
        ))));
        let (bridge, actions) = ActionBridge::new();
        let coordinator = Arc::new(ReasoningCoordinator::new(
            backend,
            gate.clone(),
            Arc::clone(&summarizer),
            Arc::clone(&memory),
            bridge,
            Arc::clone(&sink),
            ReasoningSettings::from_cfg(&cfg),
        ));
        let control = ControlChannel::new(command_rx, sink, coordinator, sensors, shutdown.token());

        let runtime = Self {
            cfg,
            shutdown,
            control,
            summarizer,
            memory,
            actions,
            gate,
        };
        (runtime, command_tx, output_rx)
    }

    pub fn token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    /// Cancel the runtime on SIGTERM or SIGINT.
    pub fn listen_for_signals(&self) {
        self.shutdown.spawn_signal_listener();
    }

    pub fn memory(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.memory)
    }

    pub fn summarizer(&self) -> Arc<Summarizer> {
        Arc::clone(&self.summarizer)
    }

    pub fn gate(&self) -> InferenceGate {
        self.gate.clone()
    }

    /// Hand a caller-spawned task to the shutdown guard. It should exit once
    /// [`Runtime::token`] is cancelled; stragglers are aborted at shutdown.
    pub fn track(&mut self, name: &'static str, handle: tokio::task::JoinHandle<()>) {
        self.shutdown.track(name, handle);
    }

    pub fn state(&self) -> tokio::sync::watch::Receiver<ControlState> {
        self.control.subscribe()
    }

    /// Run until the operator exits, the console disconnects, or the token is
    /// cancelled. Background tasks are stopped before this returns.
    pub async fn run(self) -> RunReport {
        let Self {
            cfg,
            mut shutdown,
            mut control,
            summarizer,
            memory,
            actions,
            ..
        } = self;

        let token = shutdown.token();
        shutdown.track("summarizer", summarizer.spawn(token.child_token()));
        shutdown.track("actuator", spawn_actuator(actions, token.child_token()));
        tracing::info!(
            initial_cycle = cfg.run_initial_cycle,
            tasks = shutdown.tracked(),
            "runtime started"
        );

        let exit = control.run(cfg.run_initial_cycle).await;
        shutdown.shutdown(cfg.shutdown_timeout()).await;

        let report = RunReport {
            exit,
            cycles: control.cycles(),
            memories: memory.len().await,
        };
        tracing::info!(
            exit = ?report.exit,
            cycles = report.cycles,
            memories = report.memories,
            "runtime stopped"
        );
        report
    }
}

/// Consume dispatched actions until cancelled or every bridge is gone.
fn spawn_actuator(
    mut actions: ActionReceiver,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sent: u64 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                action = actions.recv() => {
                    let Some(action) = action else { break };
                    sent += 1;
                    tracing::info!(command = action.command(), sent, "actuator command");
                }
            }
        }
        tracing::debug!(sent, "actuator stopped");
    })
}
