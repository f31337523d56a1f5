//! Incremental running summary of sensor readings.
//!
//! Readings are pushed into a bounded ingest queue; a background loop drains
//! whatever has accumulated, renders it under the remaining character budget,
//! and asks the inference backend to fold it into the previous summary.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::PerceptCfg;
use crate::error::CoreError;
use crate::resource_space::gate::InferenceGate;
use crate::sensory::ingest::IngestQueue;
use crate::sensory::table;
use crate::types::{Batch, Budget, Reading};
use percept_llm::provider::{GenerateOptions, GenerateRequest, InferenceBackend};

/// Summary text before the first successful summarization.
pub const INITIAL_SUMMARY: &str = "No summary yet.";

const PREAMBLE: &str = "You are a summarizer that interprets sensor readings over time.\n\
Maintain continuity from previous summaries and describe changes, trends, growth, or stability \
without providing explanation or commentary. Focus on how readings evolve across time slots.\n\
Be concise (2-3 sentences).";

const TRAILER: &str = "\n\nPlease provide an updated summary that integrates the previous summary \
and describes changes, patterns, or growth observed in the new data.\nUpdated summary:";

/// Summarizer tuning, usually derived from [`PerceptCfg`].
#[derive(Debug, Clone)]
pub struct SummarizerSettings {
    pub model: String,
    pub keep_alive: String,
    pub max_chars: usize,
    pub data_floor: usize,
    pub options: GenerateOptions,
    pub timeout: Duration,
    pub idle: Duration,
    pub queue_cap: usize,
}

impl SummarizerSettings {
    pub fn from_cfg(cfg: &PerceptCfg) -> Self {
        Self {
            model: cfg.summary_model.clone(),
            keep_alive: cfg.keep_alive.clone(),
            max_chars: cfg.summary_max_chars,
            data_floor: cfg.summary_data_floor,
            options: GenerateOptions {
                temperature: cfg.summary_temperature,
                num_ctx: cfg.summary_num_ctx,
            },
            timeout: cfg.summary_timeout(),
            idle: cfg.summarizer_idle(),
            queue_cap: cfg.ingest_queue_cap,
        }
    }
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self::from_cfg(&PerceptCfg::default())
    }
}

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Queue was empty; nothing sent.
    Idle,
    /// Summary replaced after summarizing this many readings.
    Updated(usize),
    /// Backend failed or returned nothing; previous summary kept.
    Kept(usize),
}

/// Owns the ingest queue and the single running summary.
pub struct Summarizer {
    queue: IngestQueue,
    summary: RwLock<String>,
    backend: Arc<dyn InferenceBackend>,
    gate: InferenceGate,
    settings: SummarizerSettings,
}

impl Summarizer {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        gate: InferenceGate,
        settings: SummarizerSettings,
    ) -> Self {
        Self {
            queue: IngestQueue::new(settings.queue_cap),
            summary: RwLock::new(INITIAL_SUMMARY.to_owned()),
            backend,
            gate,
            settings,
        }
    }

    /// Enqueue a reading without waiting on any drain.
    pub fn push(&self, reading: Reading) {
        if self.queue.push(reading) {
            tracing::warn!(
                capacity = self.queue.capacity(),
                dropped = self.queue.dropped(),
                "ingest queue full, dropped oldest reading"
            );
        }
    }

    pub async fn get_summary(&self) -> String {
        self.summary.read().await.clone()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Atomically take every queued reading.
    pub fn drain_batch(&self) -> Batch {
        self.queue.drain()
    }

    /// Budget for a prompt wrapping `previous` summary text.
    pub fn budget_for(&self, previous: &str) -> Budget {
        let static_overhead =
            wrapper(previous).chars().count() + TRAILER.chars().count();
        Budget {
            max_chars: self.settings.max_chars,
            static_overhead,
            floor: self.settings.data_floor,
        }
    }

    /// Full summarization prompt for a batch on top of `previous`.
    pub fn build_prompt(&self, previous: &str, batch: &[Reading]) -> String {
        let budget = self.budget_for(previous);
        let formatted = table::format_batch(batch, budget.data_chars());
        format!("{}{formatted}{TRAILER}", wrapper(previous))
    }

    /// One drain cycle: summarize everything queued since the last one.
    pub async fn summarize_pending(&self) -> DrainOutcome {
        let batch = self.drain_batch();
        if batch.is_empty() {
            return DrainOutcome::Idle;
        }
        let count = batch.len();

        let previous = self.get_summary().await;
        let prompt = self.build_prompt(previous.trim(), &batch);
        tracing::debug!(readings = count, prompt_chars = prompt.chars().count(), "summarizing batch");

        match self.query(prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                *self.summary.write().await = text.trim().to_owned();
                tracing::info!(readings = count, "summary updated");
                DrainOutcome::Updated(count)
            }
            Ok(_) => {
                tracing::warn!(readings = count, "empty summary returned, keeping previous");
                DrainOutcome::Kept(count)
            }
            Err(e) => {
                tracing::warn!(error = %e, readings = count, "summary request failed, keeping previous");
                DrainOutcome::Kept(count)
            }
        }
    }

    async fn query(&self, prompt: String) -> Result<String, CoreError> {
        let request = GenerateRequest::new(&self.settings.model, prompt)
            .keep_alive(&self.settings.keep_alive)
            .options(self.settings.options);

        let _lease = self.gate.acquire("summarizer").await?;
        match tokio::time::timeout(self.settings.timeout, self.backend.generate(request)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CoreError::Timeout(self.settings.timeout)),
        }
    }

    /// Drain perpetually until `cancel` fires. Cancellation is checked each
    /// iteration; an in-progress drain finishes first.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!("summarizer started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if self.summarize_pending().await == DrainOutcome::Idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.idle) => {}
                }
            }
        }
        tracing::info!("summarizer stopped");
    }

    /// Spawn [`Summarizer::run`] as a background task.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

fn wrapper(previous: &str) -> String {
    format!(
        "{PREAMBLE}\n\nPrevious summary:\n{previous}\n\nNew sensor readings (most recent batch):\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use percept_llm::provider::MockBackend;
    use serde_json::json;

    fn summarizer(backend: MockBackend) -> (Summarizer, MockBackend) {
        let settings = SummarizerSettings {
            idle: Duration::from_millis(5),
            ..SummarizerSettings::default()
        };
        let s = Summarizer::new(Arc::new(backend.clone()), InferenceGate::new(), settings);
        (s, backend)
    }

    fn reading(t: i64) -> Reading {
        Reading::from_json("test", json!({ "time": t, "temp": 22.0 }))
    }

    #[tokio::test]
    async fn initial_summary_placeholder() {
        let (s, _) = summarizer(MockBackend::new("x"));
        assert_eq!(s.get_summary().await, "No summary yet.");
    }

    #[tokio::test]
    async fn empty_queue_is_a_no_op() {
        let (s, mock) = summarizer(MockBackend::new("x"));
        assert_eq!(s.summarize_pending().await, DrainOutcome::Idle);
        assert!(mock.prompts().is_empty());
    }

    #[tokio::test]
    async fn drain_twice_second_is_empty() {
        let (s, _) = summarizer(MockBackend::new("x"));
        s.push(reading(1));
        s.push(reading(2));
        assert_eq!(s.drain_batch().len(), 2);
        assert!(s.drain_batch().is_empty());
    }

    #[tokio::test]
    async fn successful_response_replaces_summary() {
        let (s, mock) = summarizer(MockBackend::new("  Temperature steady at 22C.  "));
        s.push(reading(1));
        s.push(reading(2));
        assert_eq!(s.summarize_pending().await, DrainOutcome::Updated(2));
        assert_eq!(s.get_summary().await, "Temperature steady at 22C.");
        assert_eq!(s.pending(), 0);

        let prompt = &mock.prompts()[0];
        assert!(prompt.contains("Previous summary:\nNo summary yet."));
        assert!(prompt.contains("temp|time\n22.0|1\n22.0|2"));
        assert!(prompt.ends_with("Updated summary:"));
    }

    #[tokio::test]
    async fn next_prompt_carries_previous_summary() {
        let (s, mock) = summarizer(MockBackend::new("Warm and stable."));
        s.push(reading(1));
        s.summarize_pending().await;
        s.push(reading(2));
        s.summarize_pending().await;
        assert!(mock.prompts()[1].contains("Previous summary:\nWarm and stable."));
    }

    #[tokio::test]
    async fn failure_keeps_previous_summary() {
        let (s, _) = summarizer(MockBackend::failing());
        s.push(reading(1));
        assert_eq!(s.summarize_pending().await, DrainOutcome::Kept(1));
        assert_eq!(s.get_summary().await, INITIAL_SUMMARY);
        // the batch is consumed either way
        assert_eq!(s.pending(), 0);
    }

    #[tokio::test]
    async fn blank_response_keeps_previous_summary() {
        let (s, _) = summarizer(MockBackend::new("   \n"));
        s.push(reading(1));
        assert_eq!(s.summarize_pending().await, DrainOutcome::Kept(1));
        assert_eq!(s.get_summary().await, INITIAL_SUMMARY);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let slow = MockBackend::with_tokens(vec!["late".into()], Duration::from_millis(200));
        let settings = SummarizerSettings {
            timeout: Duration::from_millis(10),
            ..SummarizerSettings::default()
        };
        let s = Summarizer::new(Arc::new(slow), InferenceGate::new(), settings);
        s.push(reading(1));
        assert_eq!(s.summarize_pending().await, DrainOutcome::Kept(1));
        assert_eq!(s.get_summary().await, INITIAL_SUMMARY);
    }

    #[test]
    fn budget_accounts_for_wrapper_and_trailer() {
        let (s, _) = summarizer(MockBackend::new("x"));
        let short = s.budget_for("short");
        let long = s.budget_for(&"y".repeat(500));
        assert_eq!(long.static_overhead - short.static_overhead, 495);
        assert_eq!(short.data_chars(), 2048 - short.static_overhead);
        let huge = s.budget_for(&"z".repeat(5000));
        assert_eq!(huge.data_chars(), 256);
    }

    #[test]
    fn prompt_respects_data_budget() {
        let (s, _) = summarizer(MockBackend::new("x"));
        let batch: Vec<Reading> = (0..500).map(reading).collect();
        let previous = "Previously warm.";
        let prompt = s.build_prompt(previous, &batch);
        let budget = s.budget_for(previous);
        assert!(prompt.chars().count() <= budget.max_chars);
        assert!(prompt.contains("22.0|0\n"));
        assert!(prompt.contains("22.0|499"));
    }

    #[tokio::test]
    async fn run_drains_in_background_and_stops_on_cancel() {
        let (s, _) = summarizer(MockBackend::new("Summarized."));
        let s = Arc::new(s);
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&s).spawn(cancel.clone());

        s.push(reading(1));
        for _ in 0..100 {
            if s.get_summary().await == "Summarized." {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(s.get_summary().await, "Summarized.");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("summarizer should stop after cancel")
            .unwrap();
    }
}
