//! Hard-negative export feeding a configured training run

mod common;

use anyhow::Result;
use common::{adhoc_collection, RecordingScorer};
use learner::{Completion, Learner, PairwiseLoss, PairwiseTrainer};
use sampling::{HardNegativeExporter, PairwiseDatasetTripletBasedSampler, PairwiseSampleDatasetFromTsv};
use std::sync::Arc;
use storage::{LocalStorage, StorageBackend};
use tempfile::TempDir;
use train_core::TrainingConfig;

#[tokio::test]
async fn test_train_on_exported_hard_negatives() -> Result<()> {
    let dir = TempDir::new()?;
    let storage = Arc::new(LocalStorage::new(dir.path().join("exports")));

    let (dataset, retriever) = adhoc_collection();
    let report = HardNegativeExporter::new(dataset, retriever)
        .export(storage.as_ref(), "hard.tsv")
        .await?;
    assert_eq!((report.processed, report.skipped), (4, 0));

    let exported = String::from_utf8(storage.read("hard.tsv").await?.to_vec())?;
    assert_eq!(
        exported.lines().next(),
        Some("q0\tpositives:\td0\tnegatives:\th0a h0b")
    );

    let config_path = dir.path().join("config.json");
    std::fs::write(
        &config_path,
        r#"{
            "learner": {"max_epochs": 2, "steps_per_epoch": 2, "seed": 3},
            "trainer": {"batch_size": 2}
        }"#,
    )?;
    let config = TrainingConfig::from_json_file(&config_path)?;

    let samples = PairwiseSampleDatasetFromTsv::new(storage.resolve("hard.tsv"));
    let trainer = PairwiseTrainer::new(
        Box::new(PairwiseDatasetTripletBasedSampler::new(Arc::new(samples))),
        PairwiseLoss::Hinge { margin: 1.0 },
        config.trainer.batch_size,
    )?;
    let scorer = RecordingScorer::default();
    let mut learner = Learner::builder(Box::new(trainer), Box::new(scorer.clone()))
        .config(config.learner)
        .run_dir(dir.path().join("run"))
        .build()
        .await?;
    let report = learner.run().await?;

    assert_eq!(report.completion, Completion::Exhausted);
    assert_eq!((report.epoch, report.step), (2, 4));
    assert!(report.metrics.contains_key("train/hinge"));
    assert_eq!(scorer.seen().len(), 4 * 2 * 2);
    Ok(())
}

#[test]
fn test_invalid_config_file_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{"validation": {"validation_interval": 3, "early_stop": 4}}"#,
    )?;
    assert!(matches!(
        TrainingConfig::from_json_file(&path),
        Err(train_core::Error::InvalidConfig { .. })
    ));
    Ok(())
}
