//! Scripted stage processors shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use danmaku_compress::pipeline::{
    BackgroundTaskGuard, LastResultPolicy, PipelineRunner, Stage, StageError, StageOutcome,
    StageProcessor, StageSet, TaskStatusStore,
};
use tokio::sync::Notify;

/// What a scripted stage does when executed.
#[derive(Clone)]
pub enum Script {
    Complete,
    Skip(&'static str),
    Fail(&'static str),
    Fault(&'static str),
    Panic(&'static str),
    /// Wait for the gate, then complete.
    Gate(Arc<Notify>),
}

pub struct Scripted {
    stage: Stage,
    script: Script,
    calls: AtomicUsize,
}

impl Scripted {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageProcessor for Scripted {
    fn stage(&self) -> Stage {
        self.stage
    }

    fn name(&self) -> &'static str {
        "Scripted"
    }

    async fn execute(&self) -> Result<StageOutcome, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Complete => Ok(StageOutcome::completed()),
            Script::Skip(reason) => Ok(StageOutcome::skipped(*reason)),
            Script::Fail(reason) => Err(StageError::failed(*reason)),
            Script::Fault(reason) => Err(StageError::fault(*reason)),
            Script::Panic(msg) => panic!("{}", msg),
            Script::Gate(gate) => {
                gate.notified().await;
                Ok(StageOutcome::completed())
            }
        }
    }
}

/// Four scripted stages, kept around so tests can count invocations.
pub struct Harness {
    pub prune: Arc<Scripted>,
    pub convert: Arc<Scripted>,
    pub encode: Arc<Scripted>,
    pub upload: Arc<Scripted>,
}

impl Harness {
    pub fn new(prune: Script, convert: Script, encode: Script, upload: Script) -> Self {
        let make = |stage, script| {
            Arc::new(Scripted {
                stage,
                script,
                calls: AtomicUsize::new(0),
            })
        };
        Self {
            prune: make(Stage::Prune, prune),
            convert: make(Stage::Convert, convert),
            encode: make(Stage::Encode, encode),
            upload: make(Stage::Upload, upload),
        }
    }

    pub fn all_complete() -> Self {
        Self::new(
            Script::Complete,
            Script::Complete,
            Script::Complete,
            Script::Complete,
        )
    }

    pub fn stage_set(&self) -> StageSet {
        StageSet {
            prune: self.prune.clone(),
            convert: self.convert.clone(),
            encode: self.encode.clone(),
            upload: self.upload.clone(),
        }
    }

    pub fn runner(&self) -> PipelineRunner {
        PipelineRunner::new(self.stage_set()).unwrap()
    }

    pub fn guard(&self, policy: LastResultPolicy) -> Arc<BackgroundTaskGuard> {
        Arc::new(BackgroundTaskGuard::new(
            Arc::new(self.runner()),
            Arc::new(TaskStatusStore::new(policy)),
        ))
    }
}

/// Poll until the guard reports idle.
pub async fn wait_idle(guard: &BackgroundTaskGuard) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while guard.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("run did not finish in time");
}
