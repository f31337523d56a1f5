//! End-to-end tests for the perception pipeline against a scripted backend:
//! sensor lines → snapshot → summarizer → memory retrieval → reasoning → bridge.

use std::sync::Arc;
use std::time::Duration;

use percept_core::cognition::bridge::ActionBridge;
use percept_core::cognition::coordinator::{ReasoningCoordinator, ReasoningSettings};
use percept_core::cognition::summarizer::{DrainOutcome, Summarizer, SummarizerSettings};
use percept_core::config::PerceptCfg;
use percept_core::io::output::{self, ChannelSink, OutputKind, OutputSink};
use percept_core::memory::embedding::HashEmbedder;
use percept_core::memory::store::MemoryStore;
use percept_core::resource_space::gate::InferenceGate;
use percept_core::runtime::{ControlExit, Runtime};
use percept_core::sensory::dispatcher::LineDispatcher;
use percept_core::sensory::sensors::{DistanceSensor, SensorHub, TempSensor, TimeSensor};
use percept_core::types::Action;
use percept_llm::provider::{InferenceBackend, MockBackend};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn sensors() -> (SensorHub, LineDispatcher) {
    let temp = Arc::new(TempSensor::new());
    let distance = Arc::new(DistanceSensor::new());
    let mut hub = SensorHub::new();
    hub.register(Arc::new(TimeSensor::new()));
    hub.register(temp.clone());
    hub.register(distance.clone());
    let mut dispatcher = LineDispatcher::new();
    dispatcher.register(temp);
    dispatcher.register(distance);
    (hub, dispatcher)
}

/// Sensor lines land in the snapshot the control loop would take.
#[tokio::test]
async fn sensor_lines_reach_snapshot() {
    let (hub, dispatcher) = sensors();
    let lines: &[u8] = b"TEMP:23.5,HUM:46.7\nDIST:40\nnoise\nDIST:15\n";
    let dispatched = dispatcher
        .run(lines, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(dispatched, 3);

    let snapshot = hub.snapshot();
    assert_eq!(snapshot.source_id, "snapshot");
    assert_eq!(snapshot.fields["temperature"]["temperature"], json!(23.5));
    assert_eq!(snapshot.fields["temperature"]["humidity"], json!(46.7));
    assert_eq!(snapshot.fields["distance"]["current"], json!(15.0));
    assert_eq!(snapshot.fields["distance"]["min"], json!(15.0));
    assert_eq!(snapshot.fields["distance"]["max"], json!(40.0));
    assert!(snapshot.fields["time"]["elapsed"].is_number());
}

/// A drained summary flows into the next cycle's context, and the previous
/// cycle's memory is retrieved.
#[tokio::test]
async fn summary_and_memory_carry_into_next_cycle() {
    let mock = MockBackend::new("Object near. Move closer.");
    let backend: Arc<dyn InferenceBackend> = Arc::new(mock.clone());
    let gate = InferenceGate::new();
    let summarizer = Arc::new(Summarizer::new(
        Arc::clone(&backend),
        gate.clone(),
        SummarizerSettings::default(),
    ));
    let memory = Arc::new(MemoryStore::new(Arc::new(HashEmbedder::default())));
    let (bridge, mut actions) = ActionBridge::new();
    let (tx, mut rx) = output::channel(1024);
    let sink: Arc<dyn OutputSink> = Arc::new(ChannelSink::new(tx));
    let coordinator = ReasoningCoordinator::new(
        backend,
        gate,
        Arc::clone(&summarizer),
        Arc::clone(&memory),
        bridge,
        sink,
        ReasoningSettings::default(),
    );

    let (hub, dispatcher) = sensors();
    dispatcher.dispatch("DIST:12");

    let first = coordinator.step(1, hub.snapshot()).await;
    assert!(first.composed_context.contains("No summary yet."));
    assert!(first.composed_context.contains("(no prior memories)"));
    assert_eq!(first.output, "Object near. Move closer.");
    assert_eq!(actions.try_recv().unwrap(), Action::MotorOn);

    assert_eq!(summarizer.summarize_pending().await, DrainOutcome::Updated(1));
    assert_eq!(summarizer.get_summary().await, "Object near. Move closer.");

    let second = coordinator.step(2, hub.snapshot()).await;
    assert!(second
        .composed_context
        .contains("=== SHORT TERM CONTEXT ===\nObject near. Move closer.\n"));
    assert!(second.composed_context.contains(
        "[MEMORY] Object near. Move closer. | context: No summary yet."
    ));
    assert_eq!(memory.len().await, 2);
    assert_eq!(
        memory.get(1).await.unwrap().text,
        "[MEMORY] Object near. Move closer. | context: Object near. Move closer."
    );

    // reasoning, summary, reasoning
    let prompts = mock.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[1].ends_with("Updated summary:"));
    assert!(prompts[1].contains("distance.current"));

    let mut tokens = 0;
    while let Ok(msg) = rx.try_recv() {
        if msg.kind == OutputKind::Token {
            tokens += 1;
        }
    }
    assert_eq!(tokens, 2);
}

/// The runtime runs the startup cycle, one `continue`, then exits cleanly.
#[tokio::test]
async fn runtime_continue_then_exit() {
    let cfg = Arc::new(PerceptCfg {
        summarizer_idle_ms: 5,
        shutdown_timeout_secs: 2,
        ..PerceptCfg::default()
    });
    let (hub, _) = sensors();
    let (runtime, tx, mut rx) =
        Runtime::new(cfg, Arc::new(MockBackend::new("hold position")), Arc::new(hub));
    let memory = runtime.memory();

    let console = tokio::spawn(async move {
        let mut prompts = 0;
        while let Some(msg) = rx.recv().await {
            if msg.kind == OutputKind::Prompt {
                prompts += 1;
                let reply = if prompts == 1 { "continue" } else { "exit" };
                if tx.send(reply.into()).await.is_err() {
                    break;
                }
            }
        }
        prompts
    });

    let report = tokio::time::timeout(Duration::from_secs(10), runtime.run())
        .await
        .unwrap();
    assert_eq!(report.exit, ControlExit::Command);
    assert_eq!(report.cycles, 2);
    assert_eq!(report.memories, 2);
    assert_eq!(memory.len().await, 2);
    assert_eq!(console.await.unwrap(), 2);
}

/// A dead backend degrades every cycle to empty output without stalling the loop.
#[tokio::test]
async fn runtime_survives_unavailable_backend() {
    let cfg = Arc::new(PerceptCfg {
        summarizer_idle_ms: 5,
        shutdown_timeout_secs: 2,
        ..PerceptCfg::default()
    });
    let (runtime, tx, mut rx) = Runtime::new(
        cfg,
        Arc::new(MockBackend::failing()),
        Arc::new(SensorHub::new()),
    );
    let memory = runtime.memory();
    let summarizer = runtime.summarizer();
    tx.send("continue".into()).await.unwrap();
    tx.send("exit".into()).await.unwrap();

    let report = runtime.run().await;
    assert_eq!(report.cycles, 2);
    assert_eq!(
        memory.get(0).await.unwrap().text,
        "[MEMORY]  | context: No summary yet."
    );
    assert_eq!(summarizer.get_summary().await, "No summary yet.");

    let mut failures = 0;
    while let Ok(msg) = rx.try_recv() {
        if msg.content.starts_with("[Agent] LLM query failed") {
            failures += 1;
        }
    }
    assert_eq!(failures, 2);
}
