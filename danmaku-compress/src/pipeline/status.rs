//! Single-slot run status shared by the guard, the scheduler and the API.
//!
//! All mutation happens under one lock: the busy check and the busy set in
//! [`TaskStatusStore::try_begin`] are a single critical section, so two
//! concurrent submissions can never both start a run.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::result::RunResult;

/// What happens to the previous result while a new run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastResultPolicy {
    /// Drop the previous result as soon as a run starts.
    #[default]
    ClearOnStart,
    /// Keep serving the previous result until the new one replaces it.
    KeepUntilReplaced,
}

impl FromStr for LastResultPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clear_on_start" | "clear" => Ok(Self::ClearOnStart),
            "keep_until_replaced" | "keep" => Ok(Self::KeepUntilReplaced),
            other => Err(format!(
                "unknown last result policy '{other}' (expected clear_on_start or keep_until_replaced)"
            )),
        }
    }
}

/// Point-in-time copy of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub is_running: bool,
    pub last_result: Option<RunResult>,
    pub current_run_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct SlotState {
    is_running: bool,
    current_run_id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    last_result: Option<RunResult>,
}

#[derive(Debug, Default)]
pub struct TaskStatusStore {
    state: Mutex<SlotState>,
    policy: LastResultPolicy,
}

impl TaskStatusStore {
    pub fn new(policy: LastResultPolicy) -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
            policy,
        }
    }

    pub fn policy(&self) -> LastResultPolicy {
        self.policy
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().is_running
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let state = self.state.lock();
        StatusSnapshot {
            is_running: state.is_running,
            last_result: state.last_result.clone(),
            current_run_id: state.current_run_id,
            started_at: state.started_at,
        }
    }

    /// Claim the slot for `run_id`, or `None` if a run is already in flight.
    pub fn try_begin(self: &Arc<Self>, run_id: Uuid) -> Option<RunSlot> {
        let started_at = Utc::now();
        {
            let mut state = self.state.lock();
            if state.is_running {
                return None;
            }
            state.is_running = true;
            state.current_run_id = Some(run_id);
            state.started_at = Some(started_at);
            if self.policy == LastResultPolicy::ClearOnStart {
                state.last_result = None;
            }
        }

        Some(RunSlot {
            store: Arc::clone(self),
            run_id,
            started_at,
            released: false,
        })
    }

    fn publish(&self, result: RunResult) {
        let mut state = self.state.lock();
        state.last_result = Some(result);
        state.is_running = false;
        state.current_run_id = None;
        state.started_at = None;
    }
}

/// Exclusive claim on the run slot.
///
/// Publishing a result releases the slot. A slot dropped without a result
/// (the owning task was torn down) still releases it and records a critical
/// failure, so the busy flag cannot stay set.
#[derive(Debug)]
pub struct RunSlot {
    store: Arc<TaskStatusStore>,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    released: bool,
}

impl RunSlot {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Store `result` as the last result and release the slot.
    pub fn complete(mut self, result: RunResult) -> RunResult {
        self.store.publish(result.clone());
        self.released = true;
        result
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(run_id = %self.run_id, "Run slot dropped before a result was published");
        self.store.publish(RunResult::critical(
            self.run_id,
            self.started_at,
            "run was aborted before it produced a result",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{RunRecorder, RunStatus};

    fn finished(run_id: Uuid) -> RunResult {
        RunRecorder::new(run_id).finish()
    }

    #[test]
    fn test_second_begin_is_rejected_without_mutation() {
        let store = Arc::new(TaskStatusStore::new(LastResultPolicy::ClearOnStart));
        let first = Uuid::new_v4();
        let slot = store.try_begin(first).unwrap();

        let before = store.snapshot();
        assert!(store.try_begin(Uuid::new_v4()).is_none());
        assert_eq!(store.snapshot(), before);
        assert_eq!(before.current_run_id, Some(first));

        slot.complete(finished(first));
        assert!(!store.is_running());
    }

    #[test]
    fn test_clear_on_start_hides_previous_result() {
        let store = Arc::new(TaskStatusStore::new(LastResultPolicy::ClearOnStart));
        let id = Uuid::new_v4();
        store.try_begin(id).unwrap().complete(finished(id));
        assert!(store.snapshot().last_result.is_some());

        let _slot = store.try_begin(Uuid::new_v4()).unwrap();
        let snapshot = store.snapshot();
        assert!(snapshot.is_running);
        assert!(snapshot.last_result.is_none());
    }

    #[test]
    fn test_keep_until_replaced_keeps_previous_result() {
        let store = Arc::new(TaskStatusStore::new(LastResultPolicy::KeepUntilReplaced));
        let id = Uuid::new_v4();
        store.try_begin(id).unwrap().complete(finished(id));

        let next = Uuid::new_v4();
        let slot = store.try_begin(next).unwrap();
        assert_eq!(store.snapshot().last_result.map(|r| r.run_id), Some(id));

        slot.complete(finished(next));
        assert_eq!(store.snapshot().last_result.map(|r| r.run_id), Some(next));
    }

    #[test]
    fn test_dropped_slot_releases_and_records_critical() {
        let store = Arc::new(TaskStatusStore::default());
        let id = Uuid::new_v4();
        drop(store.try_begin(id).unwrap());

        let snapshot = store.snapshot();
        assert!(!snapshot.is_running);
        let last = snapshot.last_result.unwrap();
        assert_eq!(last.run_id, id);
        assert_eq!(last.status, RunStatus::CriticalFailure);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "clear_on_start".parse::<LastResultPolicy>().unwrap(),
            LastResultPolicy::ClearOnStart
        );
        assert_eq!(
            " Keep_Until_Replaced ".parse::<LastResultPolicy>().unwrap(),
            LastResultPolicy::KeepUntilReplaced
        );
        assert!("sometimes".parse::<LastResultPolicy>().is_err());
    }

    #[test]
    fn test_concurrent_begin_admits_exactly_one() {
        let store = Arc::new(TaskStatusStore::default());
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    store.try_begin(Uuid::new_v4())
                })
            })
            .collect();

        let slots: Vec<RunSlot> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(slots.len(), 1);
    }
}
