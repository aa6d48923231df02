//! Exchange progress tracking and terminal results.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PodError;
use crate::insulin::{BasalSchedule, TempBasal};
use crate::pod::status::PodStatus;
use crate::protocol::request::PodRequest;
use crate::time::PodDateTime;

/// Basal program carried alongside the exchange that installed it.
///
/// Persisted with the result so the store can reconstruct what schedule the
/// pod is actually running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasalSchedulePayload {
    pub schedule: BasalSchedule,
    pub pod_time: PodDateTime,
    pub utc_offset_minutes: i32,
}

/// Terminal outcome of one exchange.
///
/// Exactly one of these is persisted per started exchange, on every
/// termination path (success, protocol failure, or exception).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeResult {
    /// When the request was handed to the radio.
    pub request_time: Option<DateTime<Utc>>,
    /// When the exchange terminated.
    pub result_time: Option<DateTime<Utc>>,
    /// Whether the full cycle (including parse) succeeded.
    pub success: bool,
    /// The captured failure, when `success` is false.
    pub error: Option<PodError>,
    /// Basal program installed by this exchange, if any.
    pub basal_schedule: Option<BasalSchedulePayload>,
    /// Temp basal started by this exchange, if any.
    pub temp_basal: Option<TempBasal>,
    /// Status snapshot after the response was parsed.
    pub status: Option<PodStatus>,
}

/// Mutable progress of one exchange.
#[derive(Debug)]
struct ExchangeProgress {
    request: PodRequest,
    running: bool,
    finished: bool,
    result: ExchangeResult,
}

/// Shared handle to one exchange's progress.
///
/// Allocated by [`Conversation::new_exchange`](crate::manager::Conversation::new_exchange)
/// and linked as the conversation's current exchange; the orchestrator and
/// the radio-side exchange object both update it through clones of this
/// handle. All accessors take the inner lock briefly and never across an
/// await point.
#[derive(Debug, Clone)]
pub struct ExchangeHandle {
    inner: Arc<Mutex<ExchangeProgress>>,
}

impl ExchangeHandle {
    /// Creates a fresh, not-yet-running progress record for a request.
    pub fn new(request: PodRequest) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ExchangeProgress {
                request,
                running: false,
                finished: false,
                result: ExchangeResult::default(),
            })),
        }
    }

    /// The request this exchange carries.
    pub fn request(&self) -> PodRequest {
        self.inner.lock().unwrap().request.clone()
    }

    /// True while the radio cycle is in flight.
    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().running
    }

    /// True once the exchange has terminated.
    pub fn is_finished(&self) -> bool {
        self.inner.lock().unwrap().finished
    }

    /// Snapshot of the (possibly still accumulating) result.
    pub fn result(&self) -> ExchangeResult {
        self.inner.lock().unwrap().result.clone()
    }

    /// Records the request time and marks the exchange running.
    pub(crate) fn mark_running(&self, now: DateTime<Utc>) {
        let mut progress = self.inner.lock().unwrap();
        progress.running = true;
        progress.result.request_time = Some(now);
    }

    /// Attaches the basal program payload before the exchange runs.
    pub(crate) fn set_basal_payload(&self, payload: BasalSchedulePayload) {
        self.inner.lock().unwrap().result.basal_schedule = Some(payload);
    }

    /// Attaches the temp basal parameters before the exchange runs.
    pub(crate) fn set_temp_basal(&self, temp_basal: TempBasal) {
        self.inner.lock().unwrap().result.temp_basal = Some(temp_basal);
    }

    /// Records the post-parse status snapshot.
    pub(crate) fn set_status_snapshot(&self, status: Option<PodStatus>) {
        self.inner.lock().unwrap().result.status = status;
    }

    /// Terminates the exchange: sets the result time, clears running, marks
    /// finished, and records success or the captured error.
    pub(crate) fn finish(&self, now: DateTime<Utc>, error: Option<PodError>) {
        let mut progress = self.inner.lock().unwrap();
        progress.running = false;
        progress.finished = true;
        progress.result.result_time = Some(now);
        progress.result.success = error.is_none();
        progress.result.error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> ExchangeHandle {
        ExchangeHandle::new(PodRequest::CancelBolus)
    }

    #[test]
    fn test_fresh_exchange_is_idle() {
        let handle = handle();
        assert!(!handle.is_running());
        assert!(!handle.is_finished());
        let result = handle.result();
        assert!(!result.success);
        assert!(result.request_time.is_none());
        assert!(result.result_time.is_none());
    }

    #[test]
    fn test_mark_running_records_request_time() {
        let handle = handle();
        let now = Utc::now();
        handle.mark_running(now);
        assert!(handle.is_running());
        assert_eq!(handle.result().request_time, Some(now));
    }

    #[test]
    fn test_finish_success() {
        let handle = handle();
        handle.mark_running(Utc::now());
        let now = Utc::now();
        handle.finish(now, None);
        assert!(!handle.is_running());
        assert!(handle.is_finished());
        let result = handle.result();
        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.result_time, Some(now));
    }

    #[test]
    fn test_finish_with_error_captures_it() {
        let handle = handle();
        handle.mark_running(Utc::now());
        handle.finish(
            Utc::now(),
            Some(PodError::RadioRecvTimeout("no reply".into())),
        );
        let result = handle.result();
        assert!(!result.success);
        assert_eq!(
            result.error,
            Some(PodError::RadioRecvTimeout("no reply".into()))
        );
    }

    #[test]
    fn test_clones_share_progress() {
        let handle = handle();
        let other = handle.clone();
        handle.mark_running(Utc::now());
        assert!(other.is_running());
    }
}
