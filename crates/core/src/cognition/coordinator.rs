//! One reasoning cycle: snapshot, summary, retrieval, streamed reasoning,
//! memory write, action dispatch.
//!
//! A cycle never aborts. Backend failures degrade the output to an empty
//! string and the remaining steps still run with it.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

use super::bridge::ActionBridge;
use super::context;
use super::summarizer::Summarizer;
use crate::config::PerceptCfg;
use crate::error::CoreError;
use crate::io::output::{OutputMessage, OutputSink};
use crate::memory::store::{self, MemoryStore};
use crate::resource_space::gate::InferenceGate;
use crate::types::{Reading, ReasoningCycle};
use percept_llm::provider::{GenerateRequest, InferenceBackend};

/// Reasoning tuning, usually derived from [`PerceptCfg`].
#[derive(Debug, Clone)]
pub struct ReasoningSettings {
    pub model: String,
    /// Soft timeout: tokens arriving later are discarded.
    pub timeout: Duration,
    /// Extra time allowed to drain a timed-out stream before it is dropped.
    pub drain_grace: Duration,
    pub top_k: usize,
}

impl ReasoningSettings {
    pub fn from_cfg(cfg: &PerceptCfg) -> Self {
        Self {
            model: cfg.reasoning_model.clone(),
            timeout: cfg.reasoning_timeout(),
            drain_grace: cfg.reasoning_drain_grace(),
            top_k: cfg.memory_top_k,
        }
    }
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        Self::from_cfg(&PerceptCfg::default())
    }
}

/// How a streamed reasoning call ended.
#[derive(Debug, Default)]
struct StreamOutcome {
    text: String,
    timed_out: bool,
    discarded: usize,
}

pub struct ReasoningCoordinator {
    backend: Arc<dyn InferenceBackend>,
    gate: InferenceGate,
    summarizer: Arc<Summarizer>,
    memory: Arc<MemoryStore>,
    bridge: ActionBridge,
    sink: Arc<dyn OutputSink>,
    settings: ReasoningSettings,
}

impl ReasoningCoordinator {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        gate: InferenceGate,
        summarizer: Arc<Summarizer>,
        memory: Arc<MemoryStore>,
        bridge: ActionBridge,
        sink: Arc<dyn OutputSink>,
        settings: ReasoningSettings,
    ) -> Self {
        Self {
            backend,
            gate,
            summarizer,
            memory,
            bridge,
            sink,
            settings,
        }
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn summarizer(&self) -> &Arc<Summarizer> {
        &self.summarizer
    }

    /// Run one full cycle over `snapshot`.
    pub async fn step(&self, cycle_number: u64, snapshot: Reading) -> ReasoningCycle {
        self.run_cycle(cycle_number, snapshot)
            .instrument(tracing::info_span!("cycle", n = cycle_number))
            .await
    }

    async fn run_cycle(&self, cycle_number: u64, snapshot: Reading) -> ReasoningCycle {
        let sensors_json = snapshot.fields_json();
        let sensor_snapshot = snapshot.fields.clone();

        // 1. feed the summarizer; the drain happens in the background
        self.summarizer.push(snapshot);

        // 2. whatever summary exists right now, possibly predating this snapshot
        let summary = self.summarizer.get_summary().await;
        self.emit(format!("[Agent] Summarizer output: {summary}")).await;

        // 3. retrieval
        let memories = self.memory.search(&summary, self.settings.top_k).await;
        tracing::debug!(cycle = cycle_number, memories = memories.len(), "memories retrieved");

        // 4. full context
        let composed = context::compose(
            context::INITIAL_INSTRUCTION,
            &memories,
            &summary,
            &sensors_json,
        );
        self.emit(format!("\n[Agent] Full Context:\n{composed}")).await;
        self.emit("\n[Agent] Reasoning Output:\n").await;

        // 5-7. exclusive streamed call
        let output = match self.reason(&composed).await {
            Ok(outcome) => {
                if outcome.timed_out {
                    tracing::warn!(
                        cycle = cycle_number,
                        timeout_ms = self.settings.timeout.as_millis() as u64,
                        discarded = outcome.discarded,
                        "reasoning hit soft timeout, output truncated"
                    );
                }
                outcome.text.trim().to_owned()
            }
            Err(e) => {
                tracing::warn!(cycle = cycle_number, error = %e, "reasoning call failed");
                self.emit(format!("[Agent] LLM query failed: {e}")).await;
                String::new()
            }
        };
        self.emit("\n[Agent] Finished Reasoning Output\n").await;

        // 8. persist
        let id = self
            .memory
            .add(store::fragment_text(&output, &summary))
            .await;

        // 9. act
        let actions = self.bridge.process(&output);
        for action in &actions {
            self.emit(format!("[Bridge] Sending: {}", action.command())).await;
        }

        tracing::info!(
            cycle = cycle_number,
            output_chars = output.chars().count(),
            memory_id = id,
            actions = actions.len(),
            "reasoning cycle complete"
        );

        ReasoningCycle {
            cycle_number,
            sensor_snapshot,
            composed_context: composed,
            output,
        }
    }

    /// Hold the gate for the whole streamed call, accumulating tokens until the
    /// soft timeout. Later tokens are drained and discarded until the stream ends
    /// or the drain grace runs out.
    async fn reason(&self, prompt: &str) -> Result<StreamOutcome, CoreError> {
        let _lease = self.gate.acquire("reasoning").await?;
        let started = Instant::now();
        let soft_deadline = started + self.settings.timeout;
        let hard_deadline = soft_deadline + self.settings.drain_grace;

        let request = GenerateRequest::new(&self.settings.model, prompt);
        let mut stream =
            match tokio::time::timeout_at(hard_deadline, self.backend.generate_stream(request)).await {
                Ok(opened) => opened?,
                Err(_) => return Err(CoreError::Timeout(self.settings.timeout)),
            };

        let mut outcome = StreamOutcome::default();
        loop {
            let next = match tokio::time::timeout_at(hard_deadline, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::debug!("drain grace exhausted, dropping stream");
                    outcome.timed_out = true;
                    break;
                }
            };
            let Some(item) = next else {
                break;
            };
            let token = match item {
                Ok(token) => token,
                Err(e) => {
                    // keep what already arrived
                    tracing::warn!(error = %e, "reasoning stream interrupted");
                    self.emit(format!("[Agent] LLM query failed: {e}")).await;
                    break;
                }
            };
            if Instant::now() > soft_deadline {
                outcome.timed_out = true;
                outcome.discarded += 1;
                continue;
            }
            self.sink.emit(OutputMessage::token(token.clone())).await.ok();
            outcome.text.push_str(&token);
        }
        Ok(outcome)
    }

    async fn emit(&self, text: impl Into<String>) {
        if let Err(e) = self.sink.emit(OutputMessage::line(text)).await {
            tracing::debug!(error = %e, "progress message not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cognition::summarizer::{INITIAL_SUMMARY, SummarizerSettings};
    use crate::cognition::bridge::ActionReceiver;
    use crate::io::output::{self, ChannelSink, OutputKind, OutputReceiver};
    use crate::memory::embedding::HashEmbedder;
    use crate::types::Action;
    use percept_llm::provider::MockBackend;
    use serde_json::json;

    struct Harness {
        coordinator: ReasoningCoordinator,
        output_rx: OutputReceiver,
        action_rx: ActionReceiver,
        mock: MockBackend,
    }

    fn harness(mock: MockBackend, settings: ReasoningSettings) -> Harness {
        let backend: Arc<dyn InferenceBackend> = Arc::new(mock.clone());
        let gate = InferenceGate::new();
        let summarizer = Arc::new(Summarizer::new(
            Arc::clone(&backend),
            gate.clone(),
            SummarizerSettings::default(),
        ));
        let memory = Arc::new(MemoryStore::new(Arc::new(HashEmbedder::default())));
        let (bridge, action_rx) = ActionBridge::new();
        let (tx, output_rx) = output::channel(1024);
        let coordinator = ReasoningCoordinator::new(
            backend,
            gate,
            summarizer,
            memory,
            bridge,
            Arc::new(ChannelSink::new(tx)),
            settings,
        );
        Harness { coordinator, output_rx, action_rx, mock }
    }

    fn snapshot() -> Reading {
        Reading::from_json("snapshot", json!({"distance": {"current": 15.0}, "time": {"elapsed": 2.5}}))
    }

    fn drain(rx: &mut OutputReceiver) -> Vec<OutputMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn cycle_streams_stores_and_dispatches() {
        let mock = MockBackend::with_tokens(
            vec!["Close ".into(), "to door. ".into(), "Move.".into()],
            Duration::ZERO,
        );
        let mut h = harness(mock, ReasoningSettings::default());
        let cycle = h.coordinator.step(1, snapshot()).await;

        assert_eq!(cycle.cycle_number, 1);
        assert_eq!(cycle.output, "Close to door. Move.");
        assert!(cycle.composed_context.contains("(no prior memories)"));
        assert!(cycle.composed_context.contains(INITIAL_SUMMARY));
        assert!(cycle.composed_context.contains("\"current\": 15.0"));
        assert_eq!(cycle.sensor_snapshot["time"]["elapsed"], json!(2.5));

        // the snapshot went to the summarizer queue
        assert_eq!(h.coordinator.summarizer().pending(), 1);

        let stored = h.coordinator.memory().get(0).await.unwrap();
        assert_eq!(
            stored.text,
            "[MEMORY] Close to door. Move. | context: No summary yet."
        );

        assert_eq!(h.action_rx.try_recv().unwrap(), Action::MotorOn);

        let messages = drain(&mut h.output_rx);
        let tokens: Vec<&str> = messages
            .iter()
            .filter(|m| m.kind == OutputKind::Token)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(tokens, vec!["Close ", "to door. ", "Move."]);
        assert!(messages.iter().any(|m| m.content.contains("[Bridge] Sending: MOTOR_ON")));

        assert_eq!(h.mock.prompts().len(), 1);
        assert_eq!(h.mock.prompts()[0], cycle.composed_context);
    }

    #[tokio::test]
    async fn second_cycle_retrieves_prior_memory() {
        let mut h = harness(MockBackend::new("door ahead"), ReasoningSettings::default());
        h.coordinator.step(1, snapshot()).await;
        let cycle = h.coordinator.step(2, snapshot()).await;
        assert!(cycle
            .composed_context
            .contains("[MEMORY] door ahead | context: No summary yet."));
        assert!(!cycle.composed_context.contains("(no prior memories)"));
        drain(&mut h.output_rx);
    }

    #[tokio::test]
    async fn backend_failure_yields_empty_output_but_cycle_completes() {
        let mut h = harness(MockBackend::failing(), ReasoningSettings::default());
        let cycle = h.coordinator.step(1, snapshot()).await;
        assert_eq!(cycle.output, "");
        assert_eq!(h.coordinator.memory().len().await, 1);
        assert_eq!(
            h.coordinator.memory().get(0).await.unwrap().text,
            "[MEMORY]  | context: No summary yet."
        );
        let messages = drain(&mut h.output_rx);
        assert!(messages.iter().any(|m| m.content.starts_with("[Agent] LLM query failed")));
        assert!(h.action_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn interrupted_stream_keeps_partial_output_and_reports_failure() {
        let mock = MockBackend::with_tokens(
            vec!["Hold ".into(), "still. ".into(), "never seen".into()],
            Duration::ZERO,
        )
        .interrupted(2);
        let mut h = harness(mock, ReasoningSettings::default());
        let cycle = h.coordinator.step(1, snapshot()).await;
        assert_eq!(cycle.output, "Hold still.");
        assert_eq!(
            h.coordinator.memory().get(0).await.unwrap().text,
            "[MEMORY] Hold still. | context: No summary yet."
        );
        let messages = drain(&mut h.output_rx);
        let failures = messages
            .iter()
            .filter(|m| m.content.starts_with("[Agent] LLM query failed"))
            .count();
        assert_eq!(failures, 1);
        assert!(!messages.iter().any(|m| m.content.contains("never seen")));
    }

    #[tokio::test]
    async fn soft_timeout_discards_late_tokens() {
        let tokens: Vec<String> = (0..20).map(|i| format!("t{i} ")).collect();
        let mock = MockBackend::with_tokens(tokens, Duration::from_millis(20));
        let settings = ReasoningSettings {
            timeout: Duration::from_millis(70),
            drain_grace: Duration::from_millis(2000),
            ..ReasoningSettings::default()
        };
        let mut h = harness(mock, settings);
        let cycle = h.coordinator.step(1, snapshot()).await;

        assert!(cycle.output.starts_with("t0"));
        assert!(!cycle.output.contains("t19"));
        let streamed = drain(&mut h.output_rx)
            .into_iter()
            .filter(|m| m.kind == OutputKind::Token)
            .count();
        assert!(streamed < 20);
    }

    #[tokio::test]
    async fn drain_grace_bounds_a_stalled_stream() {
        let mock = MockBackend::with_tokens(
            vec!["a".into(), "b".into(), "c".into()],
            Duration::from_millis(300),
        );
        let settings = ReasoningSettings {
            timeout: Duration::from_millis(10),
            drain_grace: Duration::from_millis(20),
            ..ReasoningSettings::default()
        };
        let mut h = harness(mock, settings);
        let started = std::time::Instant::now();
        let cycle = h.coordinator.step(1, snapshot()).await;
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(cycle.output, "");
        assert_eq!(h.coordinator.memory().len().await, 1);
        drain(&mut h.output_rx);
    }
}
