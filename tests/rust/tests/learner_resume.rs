//! Interrupting and resuming a run

mod common;

use anyhow::Result;
use checkpoint::epoch_key;
use common::{init_tracing, pairwise_samples, RecordingScorer};
use learner::{Completion, Learner, LearnerReport, PairwiseLoss, PairwiseTrainer, Trainer, METRICS_KEY};
use sampling::PairwiseDatasetTripletBasedSampler;
use std::path::Path;
use tempfile::TempDir;
use train_core::{Error, ErrorKind};

fn trainer() -> Result<Box<dyn Trainer>> {
    let sampler = PairwiseDatasetTripletBasedSampler::new(pairwise_samples(7));
    Ok(Box::new(PairwiseTrainer::new(
        Box::new(sampler),
        PairwiseLoss::Softmax,
        2,
    )?))
}

async fn run(dir: &Path, max_epochs: u64, scorer: RecordingScorer) -> Result<LearnerReport> {
    let mut learner = Learner::builder(trainer()?, Box::new(scorer))
        .run_dir(dir)
        .seed(17)
        .steps_per_epoch(3)
        .max_epochs(max_epochs)
        .build()
        .await?;
    Ok(learner.run().await?)
}

#[tokio::test]
async fn test_resume_matches_uninterrupted_run() -> Result<()> {
    init_tracing();

    let straight_dir = TempDir::new()?;
    let straight = RecordingScorer::default();
    let report = run(straight_dir.path(), 4, straight.clone()).await?;
    assert_eq!(report.completion, Completion::Exhausted);
    assert_eq!((report.epoch, report.step), (4, 12));

    let dir = TempDir::new()?;
    let first = RecordingScorer::default();
    run(dir.path(), 2, first.clone()).await?;
    let second = RecordingScorer::default();
    let report = run(dir.path(), 4, second.clone()).await?;
    assert_eq!((report.epoch, report.step), (4, 12));

    // The model of the last committed epoch is reloaded
    assert_eq!(
        second.loads(),
        vec![dir.path().join(epoch_key(2)).join("model")]
    );

    let mut resumed = first.seen();
    resumed.extend(second.seen());
    assert_eq!(resumed.len(), 12 * 4);
    assert_eq!(resumed, straight.seen());
    Ok(())
}

#[tokio::test]
async fn test_finished_run_is_not_extended() -> Result<()> {
    let dir = TempDir::new()?;
    run(dir.path(), 2, RecordingScorer::default()).await?;

    let scorer = RecordingScorer::default();
    let report = run(dir.path(), 2, scorer.clone()).await?;
    assert_eq!(report.completion, Completion::Exhausted);
    assert_eq!((report.epoch, report.step), (2, 6));
    assert!(scorer.seen().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_nan_aborts_without_committing() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;

    let scorer = RecordingScorer::failing_at(3);
    let mut learner = Learner::builder(trainer()?, Box::new(scorer.clone()))
        .run_dir(dir.path())
        .steps_per_epoch(10)
        .max_epochs(2)
        .build()
        .await?;

    let err = learner.run().await.unwrap_err();
    assert!(matches!(
        err,
        Error::NumericalFailure {
            epoch: 1,
            step: 3,
            batch: 3
        }
    ));
    assert_eq!(err.kind(), ErrorKind::NumericalFailure);
    assert!(err.is_fatal());

    // Nothing of the failed epoch is persisted
    assert_eq!(scorer.backwards(), 2);
    assert!(learner.checkpoints().committed_epochs().is_empty());
    assert!(!dir.path().join(epoch_key(1)).exists());
    assert!(!dir.path().join(METRICS_KEY).exists());

    // The next run is a cold start
    let retry = RecordingScorer::default();
    let report = run(dir.path(), 1, retry.clone()).await?;
    assert!(retry.loads().is_empty());
    assert_eq!((report.epoch, report.step), (1, 3));
    Ok(())
}
