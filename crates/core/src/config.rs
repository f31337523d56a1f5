use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Environment prefix for all percept settings.
const ENV_PREFIX: &str = "PERCEPT_";

/// All percept pipeline parameters. Loaded from `PERCEPT_*` environment variables;
/// anything unset or unparsable keeps its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptCfg {
    // inference backend
    pub llm_base_url: String,
    pub reasoning_model: String,
    pub summary_model: String,
    pub keep_alive: String,

    // summarizer
    pub summary_max_chars: usize,
    pub summary_data_floor: usize,
    pub summary_temperature: f32,
    pub summary_num_ctx: u32,
    pub summary_timeout_secs: u64,
    pub summarizer_idle_ms: u64,

    // reasoning
    pub reasoning_timeout_ms: u64,
    pub reasoning_drain_grace_ms: u64,
    pub memory_top_k: usize,
    pub embedding_dim: usize,

    // channels
    pub ingest_queue_cap: usize,
    pub output_buffer: usize,
    pub command_buffer: usize,

    // control
    pub run_initial_cycle: bool,
    pub shutdown_timeout_secs: u64,

    // host
    pub log_dir: PathBuf,
    pub sensor_path: Option<PathBuf>,
}

impl Default for PerceptCfg {
    fn default() -> Self {
        Self {
            llm_base_url: "http://localhost:11434".into(),
            reasoning_model: "phi3".into(),
            summary_model: "phi3:mini".into(),
            keep_alive: "30m".into(),
            summary_max_chars: 2048,
            summary_data_floor: 256,
            summary_temperature: 0.2,
            summary_num_ctx: 2048,
            summary_timeout_secs: 30,
            summarizer_idle_ms: 200,
            reasoning_timeout_ms: 8000,
            reasoning_drain_grace_ms: 2000,
            memory_top_k: 3,
            embedding_dim: 256,
            ingest_queue_cap: 1024,
            output_buffer: 256,
            command_buffer: 16,
            run_initial_cycle: true,
            shutdown_timeout_secs: 5,
            log_dir: PathBuf::from("data/logs"),
            sensor_path: None,
        }
    }
}

impl PerceptCfg {
    /// Load config from `PERCEPT_*` environment variables.
    pub fn from_env() -> Self {
        let map: HashMap<String, String> = std::env::vars()
            .filter_map(|(k, v)| {
                k.strip_prefix(ENV_PREFIX)
                    .map(|rest| (rest.to_ascii_lowercase(), v))
            })
            .collect();
        Self::from_map(&map)
    }

    pub fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();
        Self {
            llm_base_url: get_or(m, "llm_base_url", d.llm_base_url),
            reasoning_model: get_or(m, "reasoning_model", d.reasoning_model),
            summary_model: get_or(m, "summary_model", d.summary_model),
            keep_alive: get_or(m, "keep_alive", d.keep_alive),
            summary_max_chars: get_or(m, "summary_max_chars", d.summary_max_chars),
            summary_data_floor: get_or(m, "summary_data_floor", d.summary_data_floor),
            summary_temperature: get_or(m, "summary_temperature", d.summary_temperature),
            summary_num_ctx: get_or(m, "summary_num_ctx", d.summary_num_ctx),
            summary_timeout_secs: get_or(m, "summary_timeout_secs", d.summary_timeout_secs),
            summarizer_idle_ms: get_or(m, "summarizer_idle_ms", d.summarizer_idle_ms),
            reasoning_timeout_ms: get_or(m, "reasoning_timeout_ms", d.reasoning_timeout_ms),
            reasoning_drain_grace_ms: get_or(m, "reasoning_drain_grace_ms", d.reasoning_drain_grace_ms),
            memory_top_k: get_or(m, "memory_top_k", d.memory_top_k),
            embedding_dim: get_or(m, "embedding_dim", d.embedding_dim).max(1),
            ingest_queue_cap: get_or(m, "ingest_queue_cap", d.ingest_queue_cap).max(1),
            output_buffer: get_or(m, "output_buffer", d.output_buffer).max(1),
            command_buffer: get_or(m, "command_buffer", d.command_buffer).max(1),
            run_initial_cycle: get_or(m, "run_initial_cycle", d.run_initial_cycle),
            shutdown_timeout_secs: get_or(m, "shutdown_timeout_secs", d.shutdown_timeout_secs),
            log_dir: get_or(m, "log_dir", d.log_dir),
            sensor_path: m
                .get("sensor_path")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn summary_timeout(&self) -> Duration {
        Duration::from_secs(self.summary_timeout_secs)
    }

    pub fn summarizer_idle(&self) -> Duration {
        Duration::from_millis(self.summarizer_idle_ms)
    }

    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_millis(self.reasoning_timeout_ms)
    }

    pub fn reasoning_drain_grace(&self) -> Duration {
        Duration::from_millis(self.reasoning_drain_grace_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn to_entries(&self) -> Vec<(&str, String, &str)> {
        vec![
            ("llm_base_url", self.llm_base_url.clone(), "Inference backend base URL"),
            ("reasoning_model", self.reasoning_model.clone(), "Model used for reasoning cycles"),
            ("summary_model", self.summary_model.clone(), "Model used for running summaries"),
            ("keep_alive", self.keep_alive.clone(), "How long the backend keeps the summary model loaded"),
            ("summary_max_chars", self.summary_max_chars.to_string(), "Character budget for a summary prompt"),
            ("summary_data_floor", self.summary_data_floor.to_string(), "Minimum characters reserved for batch data"),
            ("summary_temperature", self.summary_temperature.to_string(), "Summary sampling temperature"),
            ("summary_num_ctx", self.summary_num_ctx.to_string(), "Summary model context window"),
            ("summary_timeout_secs", self.summary_timeout_secs.to_string(), "Summary request timeout seconds"),
            ("summarizer_idle_ms", self.summarizer_idle_ms.to_string(), "Idle delay between empty-queue checks"),
            ("reasoning_timeout_ms", self.reasoning_timeout_ms.to_string(), "Soft timeout for streamed reasoning"),
            ("reasoning_drain_grace_ms", self.reasoning_drain_grace_ms.to_string(), "Extra time to drain a timed-out stream"),
            ("memory_top_k", self.memory_top_k.to_string(), "Memories retrieved per cycle"),
            ("embedding_dim", self.embedding_dim.to_string(), "Embedding vector dimension"),
            ("ingest_queue_cap", self.ingest_queue_cap.to_string(), "Ingest queue capacity before dropping oldest"),
            ("output_buffer", self.output_buffer.to_string(), "Outbound message buffer"),
            ("command_buffer", self.command_buffer.to_string(), "Inbound command buffer"),
            ("run_initial_cycle", self.run_initial_cycle.to_string(), "Run one cycle before the first command"),
            ("shutdown_timeout_secs", self.shutdown_timeout_secs.to_string(), "Graceful shutdown timeout seconds"),
            ("log_dir", self.log_dir.display().to_string(), "Session log directory"),
            (
                "sensor_path",
                self.sensor_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                "Line-oriented sensor source (device or file)",
            ),
        ]
    }
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
