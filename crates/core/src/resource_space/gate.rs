use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::CoreError;

/// Who held the inference backend, and when.
#[derive(Debug, Clone)]
pub struct LeaseSpan {
    pub holder: &'static str,
    pub acquired_at: Instant,
    pub released_at: Instant,
}

type SpanLog = Arc<Mutex<Vec<LeaseSpan>>>;

/// Single-capacity guard over the inference backend. At most one request
/// is in flight system-wide; every caller holds a lease for the call's duration.
#[derive(Debug, Clone)]
pub struct InferenceGate {
    permits: Arc<Semaphore>,
    spans: Option<SpanLog>,
}

impl InferenceGate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
            spans: None,
        }
    }

    /// A gate that records every lease's acquire/release instants.
    pub fn instrumented() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
            spans: Some(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    /// Wait for exclusive access. The lease releases on drop, on every exit path.
    pub async fn acquire(&self, holder: &'static str) -> Result<InferenceLease, CoreError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| CoreError::GateClosed)?;
        tracing::trace!(holder, "inference gate acquired");
        Ok(InferenceLease {
            _permit: permit,
            holder,
            acquired_at: Instant::now(),
            spans: self.spans.clone(),
        })
    }

    /// True while some caller holds the lease.
    pub fn is_busy(&self) -> bool {
        self.permits.available_permits() == 0
    }

    /// Recorded lease spans (empty unless instrumented).
    pub fn spans(&self) -> Vec<LeaseSpan> {
        self.spans
            .as_ref()
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .unwrap_or_default()
    }
}

impl Default for InferenceGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to the inference backend.
#[derive(Debug)]
pub struct InferenceLease {
    _permit: OwnedSemaphorePermit,
    holder: &'static str,
    acquired_at: Instant,
    spans: Option<SpanLog>,
}

impl InferenceLease {
    pub fn holder(&self) -> &'static str {
        self.holder
    }
}

impl Drop for InferenceLease {
    // Runs before the permit field is dropped, so a span always closes
    // before the next holder can acquire.
    fn drop(&mut self) {
        if let Some(spans) = &self.spans {
            spans.lock().unwrap_or_else(|e| e.into_inner()).push(LeaseSpan {
                holder: self.holder,
                acquired_at: self.acquired_at,
                released_at: Instant::now(),
            });
        }
        tracing::trace!(holder = self.holder, "inference gate released");
    }
}

/// True when no two spans overlap in time.
pub fn spans_disjoint(spans: &[LeaseSpan]) -> bool {
    let mut sorted: Vec<&LeaseSpan> = spans.iter().collect();
    sorted.sort_by_key(|s| s.acquired_at);
    sorted
        .windows(2)
        .all(|w| w[0].released_at <= w[1].acquired_at)
}
