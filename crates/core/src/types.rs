use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Field map of a reading. Values are scalars or nested maps.
pub type Fields = BTreeMap<String, Value>;

/// One timestamped sensor observation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub source_id: String,
    pub fields: Fields,
    /// Process-wide monotonic sequence number.
    pub seq: u64,
    pub captured_at: DateTime<Utc>,
}

impl Reading {
    pub fn new(source_id: impl Into<String>, fields: Fields) -> Self {
        Self {
            source_id: source_id.into(),
            fields,
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            captured_at: Utc::now(),
        }
    }

    /// Build a reading from a JSON object literal. Non-object values land under `value`.
    pub fn from_json(source_id: impl Into<String>, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map.into_iter().collect(),
            other => BTreeMap::from([("value".to_owned(), other)]),
        };
        Self::new(source_id, fields)
    }

    /// Pretty JSON of the fields, as shown to the reasoning model.
    pub fn fields_json(&self) -> String {
        serde_json::to_string_pretty(&self.fields).unwrap_or_else(|_| "{}".to_owned())
    }
}

/// Ordered readings accumulated since the last drain.
pub type Batch = Vec<Reading>;

/// Character budget for one summarization prompt.
/// `data_chars = max(floor, max_chars - static_overhead)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub max_chars: usize,
    pub static_overhead: usize,
    pub floor: usize,
}

impl Budget {
    pub fn data_chars(&self) -> usize {
        self.max_chars
            .saturating_sub(self.static_overhead)
            .max(self.floor)
    }
}

/// One full pass of sense, summarize, retrieve, reason, store, act.
#[derive(Debug, Clone)]
pub struct ReasoningCycle {
    pub cycle_number: u64,
    pub sensor_snapshot: Fields,
    pub composed_context: String,
    pub output: String,
}

/// Control channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlState {
    #[default]
    AwaitingCommand,
    RunningCycle,
    Terminated,
}

impl std::fmt::Display for ControlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AwaitingCommand => "AWAITING_COMMAND",
            Self::RunningCycle => "RUNNING_CYCLE",
            Self::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// Side effect requested by the action bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    MotorOn,
    MotorOff,
}

impl Action {
    /// Wire command sent to the actuator.
    pub fn command(self) -> &'static str {
        match self {
            Self::MotorOn => "MOTOR_ON",
            Self::MotorOff => "MOTOR_OFF",
        }
    }
}
