//! Sequential pipeline runner.
//!
//! Runs prune, convert, encode and upload in that order, applying each
//! stage's [`StagePolicy`] to failures. Clean stage failures are recorded
//! into the [`RunResult`]; faults escape as [`Error::RunnerFault`].

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use super::result::{RecordLevel, RunRecorder, RunResult};
use super::stage::{Stage, StageError, StageOutcome, StagePolicy, StageProcessor};
use crate::{Error, Result};

/// The four stage processors, one per [`Stage`].
#[derive(Clone)]
pub struct StageSet {
    pub prune: Arc<dyn StageProcessor>,
    pub convert: Arc<dyn StageProcessor>,
    pub encode: Arc<dyn StageProcessor>,
    pub upload: Arc<dyn StageProcessor>,
}

impl StageSet {
    fn get(&self, stage: Stage) -> &Arc<dyn StageProcessor> {
        match stage {
            Stage::Prune => &self.prune,
            Stage::Convert => &self.convert,
            Stage::Encode => &self.encode,
            Stage::Upload => &self.upload,
        }
    }

    /// Check every slot holds the processor for its own stage.
    pub fn validate(&self) -> Result<()> {
        for stage in Stage::ORDER {
            let actual = self.get(stage).stage();
            if actual != stage {
                return Err(Error::config(format!(
                    "processor {} implements {actual} but is wired as {stage}",
                    self.get(stage).name()
                )));
            }
        }
        Ok(())
    }
}

pub struct PipelineRunner {
    stages: StageSet,
}

impl PipelineRunner {
    pub fn new(stages: StageSet) -> Result<Self> {
        stages.validate()?;
        Ok(Self { stages })
    }

    /// Run the pipeline once under a fresh run id.
    pub async fn run(&self) -> Result<RunResult> {
        self.run_with_id(Uuid::new_v4()).await
    }

    pub async fn run_with_id(&self, run_id: Uuid) -> Result<RunResult> {
        let mut recorder = RunRecorder::new(run_id);
        info!(%run_id, "Pipeline run started");

        for stage in Stage::ORDER {
            let processor = self.stages.get(stage);
            let step = stage.number();
            let what = stage.description();

            record(
                &mut recorder,
                stage,
                RecordLevel::Info,
                format!("Stage {step}: starting {what}"),
            );

            match processor.execute().await {
                Ok(StageOutcome::Completed { summary }) => {
                    let message = match summary {
                        Some(summary) => format!("Stage {step}: {what} complete ({summary})"),
                        None => format!("Stage {step}: {what} complete"),
                    };
                    record(&mut recorder, stage, RecordLevel::Info, message);
                }
                Ok(StageOutcome::Skipped { reason }) => {
                    record(
                        &mut recorder,
                        stage,
                        RecordLevel::Warning,
                        format!("Stage {step}: {what} skipped: {reason}"),
                    );
                }
                Err(StageError::Failed(reason)) => {
                    record(
                        &mut recorder,
                        stage,
                        RecordLevel::Error,
                        format!("Stage {step}: {what} failed: {reason}"),
                    );
                    if stage.policy() == StagePolicy::AbortOnError {
                        warn!(%run_id, %stage, "Aborting pipeline after stage failure");
                        let result = recorder.finish();
                        info!(%run_id, status = %result.status, "Pipeline run finished");
                        return Ok(result);
                    }
                }
                Err(StageError::Fault(reason)) => {
                    error!(%run_id, %stage, "Stage fault: {}", reason);
                    return Err(Error::RunnerFault(format!("stage {stage}: {reason}")));
                }
            }
        }

        let result = recorder.finish();
        info!(%run_id, status = %result.status, "Pipeline run finished");
        Ok(result)
    }
}

fn record(recorder: &mut RunRecorder, stage: Stage, level: RecordLevel, message: String) {
    let run_id = recorder.run_id();
    match level {
        RecordLevel::Info => info!(%run_id, %stage, "{}", message),
        RecordLevel::Warning => warn!(%run_id, %stage, "{}", message),
        RecordLevel::Error => error!(%run_id, %stage, "{}", message),
    }
    recorder.record(level, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RunStatus;
    use async_trait::async_trait;

    struct Fixed(Stage, std::result::Result<StageOutcome, StageError>);

    #[async_trait]
    impl StageProcessor for Fixed {
        fn stage(&self) -> Stage {
            self.0
        }

        fn name(&self) -> &'static str {
            "Fixed"
        }

        async fn execute(&self) -> std::result::Result<StageOutcome, StageError> {
            self.1.clone()
        }
    }

    fn ok(stage: Stage) -> Arc<dyn StageProcessor> {
        Arc::new(Fixed(stage, Ok(StageOutcome::completed())))
    }

    #[test]
    fn test_miswired_stage_set_is_rejected() {
        let stages = StageSet {
            prune: ok(Stage::Prune),
            convert: ok(Stage::Encode),
            encode: ok(Stage::Encode),
            upload: ok(Stage::Upload),
        };
        assert!(matches!(
            PipelineRunner::new(stages),
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_summary_is_appended_to_completion_message() {
        let stages = StageSet {
            prune: Arc::new(Fixed(
                Stage::Prune,
                Ok(StageOutcome::completed_with("removed 2 recordings")),
            )),
            convert: ok(Stage::Convert),
            encode: ok(Stage::Encode),
            upload: ok(Stage::Upload),
        };
        let result = PipelineRunner::new(stages).unwrap().run().await.unwrap();

        assert_eq!(result.status, RunStatus::Success);
        assert!(result.messages[1].ends_with("complete (removed 2 recordings)"));
    }

    #[tokio::test]
    async fn test_fault_escapes_runner() {
        let stages = StageSet {
            prune: ok(Stage::Prune),
            convert: ok(Stage::Convert),
            encode: Arc::new(Fixed(Stage::Encode, Err(StageError::fault("bad state")))),
            upload: ok(Stage::Upload),
        };
        let err = PipelineRunner::new(stages)
            .unwrap()
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RunnerFault(msg) if msg.contains("encode")));
    }
}
