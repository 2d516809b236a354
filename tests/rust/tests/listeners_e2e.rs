//! Listeners driving a full learner

mod common;

use anyhow::Result;
use checkpoint::epoch_key;
use common::{adhoc_collection, init_tracing, RecordingScorer, ScriptedEvaluator};
use learner::{
    Completion, IndexRebuildListener, Learner, ListenerPhase, NegativeSamplerListener,
    PairwiseLoss, PairwiseTrainer, Trainer, ValidationListener,
};
use sampling::{PairwiseListSamplers, PairwiseModelBasedSampler, PairwiseSampler, TripletBasedSampler};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use train_core::config::{
    IndexingConfig, NegativeSamplingConfig, SamplerConfig, ValidationConfig,
};
use train_core::memory::MemoryTriplets;
use train_core::{Error, IndexBuilder, Triplet};

fn model_based_trainer() -> Result<Box<dyn Trainer>> {
    let (dataset, retriever) = adhoc_collection();
    let sampler = PairwiseModelBasedSampler::new(dataset, retriever, SamplerConfig::default())?;
    Ok(Box::new(PairwiseTrainer::new(
        Box::new(sampler),
        PairwiseLoss::Softmax,
        2,
    )?))
}

fn validation(early_stop: u64, values: &[f64]) -> Result<ValidationListener> {
    let (dataset, retriever) = adhoc_collection();
    Ok(ValidationListener::new(
        "validation",
        ValidationConfig {
            metrics: BTreeMap::from([("map".to_string(), true)]),
            validation_interval: 1,
            early_stop,
            store_last_checkpoint: true,
            ..Default::default()
        },
        dataset,
        retriever,
        Arc::new(ScriptedEvaluator::new(values)),
    )?)
}

#[tokio::test]
async fn test_early_stop_keeps_best_checkpoint() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;

    let mut learner = Learner::builder(model_based_trainer()?, Box::new(RecordingScorer::default()))
        .run_dir(dir.path())
        .steps_per_epoch(2)
        .max_epochs(20)
        .listener(validation(2, &[0.2, 0.5, 0.4, 0.3, 0.9])?)
        .build()
        .await?;
    let report = learner.run().await?;

    // Best at epoch 2, two epochs without improvement
    assert_eq!(report.completion, Completion::Stopped);
    assert_eq!(report.epoch, 4);
    assert_eq!(learner.listener_phase("validation"), Some(ListenerPhase::Stopped));
    assert_eq!(report.metrics.get("validation/final/map"), Some(&0.5));
    assert!(report.metrics.contains_key("train/softmax"));

    // The snapshot saved after 4 scorer calls survives checkpoint retention
    assert_eq!(
        report.outputs.get("validation/map").map(String::as_str),
        Some("listeners/validation/best/map")
    );
    assert!(!dir.path().join(epoch_key(2)).exists());
    let best = std::fs::read(dir.path().join("listeners/validation/best/map/weights.bin"))?;
    assert_eq!(best, 4u64.to_le_bytes());
    let last = std::fs::read(dir.path().join("listeners/validation/last_checkpoint/weights.bin"))?;
    assert_eq!(last, 8u64.to_le_bytes());

    let info: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("listeners/validation/info.json"))?)?;
    assert_eq!(info["map"]["epoch"], 2);
    assert_eq!(info["map"]["value"], 0.5);
    Ok(())
}

#[tokio::test]
async fn test_stopped_run_stops_again_on_resume() -> Result<()> {
    let dir = TempDir::new()?;
    let build = |values: &'static [f64]| -> Result<_> {
        Ok(
            Learner::builder(model_based_trainer()?, Box::new(RecordingScorer::default()))
                .run_dir(dir.path())
                .steps_per_epoch(1)
                .max_epochs(20)
                .listener(validation(1, values)?),
        )
    };

    let report = build(&[0.5, 0.1])?.build().await?.run().await?;
    assert_eq!(report.epoch, 2);

    // The persisted best table already calls for a stop
    let report = build(&[0.9])?.build().await?.run().await?;
    assert_eq!(report.completion, Completion::Stopped);
    assert_eq!(report.epoch, 3);
    Ok(())
}

fn random_negatives() -> Result<Box<dyn PairwiseSampler>> {
    let triplets = (0..3)
        .map(|i| Triplet {
            query: format!("topic {}", i),
            positive: format!("relevant document {}", i),
            negative: format!("random negative {}", i),
        })
        .collect();
    let source = Arc::new(MemoryTriplets::new(triplets, false));
    Ok(Box::new(TripletBasedSampler::new(source, None)?))
}

fn switching_trainer() -> Result<Box<dyn Trainer>> {
    let (dataset, retriever) = adhoc_collection();
    let hard = PairwiseModelBasedSampler::new(dataset, retriever, SamplerConfig::default())?;
    let samplers = PairwiseListSamplers::new(vec![random_negatives()?, Box::new(hard)])?;
    Ok(Box::new(PairwiseTrainer::new(
        Box::new(samplers),
        PairwiseLoss::Softmax,
        2,
    )?))
}

async fn run_switching(dir: &Path, max_epochs: u64, scorer: RecordingScorer) -> Result<()> {
    let mut learner = Learner::builder(switching_trainer()?, Box::new(scorer))
        .run_dir(dir)
        .steps_per_epoch(2)
        .max_epochs(max_epochs)
        .listener(NegativeSamplerListener::new(
            "negatives",
            NegativeSamplingConfig {
                sampling_interval: 2,
            },
        )?)
        .build()
        .await?;
    learner.run().await?;
    Ok(())
}

fn negatives(scorer: &RecordingScorer) -> Vec<String> {
    scorer
        .seen()
        .into_iter()
        .filter(|pair| !pair.contains("relevant"))
        .collect()
}

#[tokio::test]
async fn test_negative_switch_survives_restart() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;

    // Epochs 1-2 on random negatives, switch after epoch 2
    let first = RecordingScorer::default();
    run_switching(dir.path(), 3, first.clone()).await?;
    let seen = negatives(&first);
    assert_eq!(seen.len(), 3 * 2 * 2);
    assert!(seen[..8].iter().all(|pair| pair.contains("random negative")));
    assert!(seen[8..].iter().all(|pair| pair.contains("hard negative")));

    // The active sampler comes back with the sampler state
    let second = RecordingScorer::default();
    run_switching(dir.path(), 5, second.clone()).await?;
    let seen = negatives(&second);
    assert_eq!(seen.len(), 2 * 2 * 2);
    assert!(seen.iter().all(|pair| pair.contains("hard negative")));
    Ok(())
}

/// Writes the ids of the topics it indexes
struct TopicIndexBuilder;

#[async_trait::async_trait]
impl IndexBuilder for TopicIndexBuilder {
    async fn rebuild(&self, path: &Path) -> train_core::Result<()> {
        tokio::fs::write(path, b"q0 q1 q2 q3").await?;
        Ok(())
    }
}

/// Always fails
struct BrokenIndexBuilder;

#[async_trait::async_trait]
impl IndexBuilder for BrokenIndexBuilder {
    async fn rebuild(&self, _path: &Path) -> train_core::Result<()> {
        Err(Error::Internal {
            message: "indexer crashed".to_string(),
        })
    }
}

fn index_listener(indexing_interval: u64) -> Result<IndexRebuildListener> {
    Ok(IndexRebuildListener::new(
        "index",
        IndexingConfig { indexing_interval },
        Arc::new(TopicIndexBuilder),
    )?)
}

async fn run_indexing(dir: &Path, max_epochs: u64) -> Result<learner::LearnerReport> {
    let mut learner = Learner::builder(model_based_trainer()?, Box::new(RecordingScorer::default()))
        .run_dir(dir)
        .steps_per_epoch(1)
        .max_epochs(max_epochs)
        .listener(index_listener(3)?)
        .build()
        .await?;
    Ok(learner.run().await?)
}

#[tokio::test]
async fn test_index_rebuild_under_epoch_checkpoint() -> Result<()> {
    let dir = TempDir::new()?;
    let mut learner = Learner::builder(model_based_trainer()?, Box::new(RecordingScorer::default()))
        .run_dir(dir.path())
        .steps_per_epoch(1)
        .max_epochs(4)
        .listener(index_listener(2)?)
        .build()
        .await?;
    let report = learner.run().await?;

    assert_eq!(
        report.outputs.get("index/index").map(String::as_str),
        Some("listeners/index/index.dat")
    );
    assert!(dir.path().join("listeners/index/index.dat").exists());
    assert!(dir
        .path()
        .join(epoch_key(4))
        .join("listeners/index/index.dat")
        .exists());
    assert!(!dir.path().join(epoch_key(3)).join("listeners").exists());
    Ok(())
}

#[tokio::test]
async fn test_index_survives_checkpoint_retention() -> Result<()> {
    let dir = TempDir::new()?;

    // Built at epoch 3, whose directory is pruned once epochs 4 and 5 commit
    let report = run_indexing(dir.path(), 5).await?;
    assert!(!dir.path().join(epoch_key(3)).exists());
    let key = report.outputs.get("index/index").cloned().unwrap_or_default();
    assert_eq!(key, "listeners/index/index.dat");
    assert_eq!(std::fs::read(dir.path().join(&key))?, b"q0 q1 q2 q3");

    // A resumed run reports the same index before its next rebuild
    let report = run_indexing(dir.path(), 5).await?;
    assert_eq!(report.epoch, 5);
    assert_eq!(report.outputs.get("index/index"), Some(&key));
    Ok(())
}

#[tokio::test]
async fn test_index_rebuild_failure_ends_run() -> Result<()> {
    let dir = TempDir::new()?;
    let mut learner = Learner::builder(model_based_trainer()?, Box::new(RecordingScorer::default()))
        .run_dir(dir.path())
        .steps_per_epoch(1)
        .max_epochs(4)
        .listener(IndexRebuildListener::new(
            "index",
            IndexingConfig { indexing_interval: 1 },
            Arc::new(BrokenIndexBuilder),
        )?)
        .build()
        .await?;

    let err = learner.run().await.unwrap_err();
    assert!(matches!(err, Error::IndexRebuild { .. }));
    assert!(learner.checkpoints().committed_epochs().is_empty());
    Ok(())
}
