//! Export tasks: hard-negative lists and teacher-scored triplets
//!
//! Both write tab-separated files that the TSV samplers read back.

use crate::sampler::PairwiseSampler;
use bytes::Bytes;
use std::sync::Arc;
use storage::StorageBackend;
use tracing::{debug, info, instrument, warn};
use train_core::{
    document_text, AdhocDataset, DocumentStore, Error, PairwiseRecord, Result, Retriever,
    SamplingReport, Scorer, ScoringBatch, TextStore,
};

/// Writes, for every query, the retrieved documents split into positives and
/// negatives
///
/// Line format: `query_id \t positives: \t ids \t negatives: \t ids`
pub struct HardNegativeExporter {
    dataset: AdhocDataset,
    retriever: Arc<dyn Retriever>,
}

impl HardNegativeExporter {
    pub fn new(dataset: AdhocDataset, retriever: Arc<dyn Retriever>) -> Self {
        Self { dataset, retriever }
    }

    /// Retrieve for every topic and write the file at `key`
    ///
    /// Queries without judgements, positives or negatives are skipped and
    /// counted.
    #[instrument(skip(self, storage))]
    pub async fn export(&self, storage: &dyn StorageBackend, key: &str) -> Result<SamplingReport> {
        self.retriever.initialize().await?;
        let assessments = self.dataset.read_assessments();
        let mut report = SamplingReport::default();
        let mut output = String::new();

        for topic in self.dataset.read_topics() {
            let Some(judgements) = assessments.get(&topic.id) else {
                warn!(query_id = %topic.id, "Skipping topic without assessments");
                report.skipped += 1;
                continue;
            };

            let retrieved = self.retriever.retrieve(&topic.text).await?;
            let (positives, negatives): (Vec<_>, Vec<_>) = retrieved
                .iter()
                .map(|sd| sd.doc_id.as_str())
                .partition(|doc_id| judgements.get(*doc_id).copied().unwrap_or(0) > 0);

            if positives.is_empty() || negatives.is_empty() {
                debug!(
                    query_id = %topic.id,
                    positives = positives.len(),
                    negatives = negatives.len(),
                    "Skipping topic"
                );
                report.skipped += 1;
                continue;
            }

            output.push_str(&format!(
                "{}\tpositives:\t{}\tnegatives:\t{}\n",
                topic.id,
                positives.join(" "),
                negatives.join(" ")
            ));
            report.processed += 1;
        }

        storage.write(key, Bytes::from(output)).await?;
        info!(
            "Processed {} topics ({} skipped)",
            report.total(),
            report.skipped
        );
        Ok(report)
    }
}

/// Scores pairwise records with a teacher model and writes them as triplets
///
/// Line format: `query_id \t positive_id \t positive_score \t negative_id \t negative_score`
pub struct TeacherTripletScorer {
    sampler: Box<dyn PairwiseSampler>,
    query_store: Option<Arc<dyn TextStore>>,
    document_store: Option<Arc<dyn DocumentStore>>,
    teacher: Box<dyn Scorer>,
    batch_size: usize,
}

impl TeacherTripletScorer {
    /// `sampler` must already be initialized
    pub fn new(
        sampler: Box<dyn PairwiseSampler>,
        teacher: Box<dyn Scorer>,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig {
                message: "teacher batch size must be positive".to_string(),
            });
        }
        Ok(Self {
            sampler,
            query_store: None,
            document_store: None,
            teacher,
            batch_size,
        })
    }

    /// Stores used to fill in missing query and document texts
    pub fn with_stores(
        mut self,
        query_store: Option<Arc<dyn TextStore>>,
        document_store: Option<Arc<dyn DocumentStore>>,
    ) -> Self {
        self.query_store = query_store;
        self.document_store = document_store;
        self
    }

    fn backfill(&self, record: &mut PairwiseRecord) {
        if let (None, Some(id), Some(store)) =
            (&record.query.text, &record.query.id, &self.query_store)
        {
            record.query.text = store.text(id);
        }
        if let Some(store) = &self.document_store {
            for document in [&mut record.positive, &mut record.negative] {
                if let (None, Some(id)) = (&document.text, &document.id) {
                    document.text = document_text(store.as_ref(), id);
                }
            }
        }
    }

    /// Draw `count` records, score them and write them at `key`
    ///
    /// Records without query or document ids cannot be written and are
    /// skipped.
    ///
    /// # Returns
    /// Number of triplets written
    #[instrument(skip(self, storage))]
    pub async fn export(
        &mut self,
        storage: &dyn StorageBackend,
        key: &str,
        count: usize,
    ) -> Result<u64> {
        let mut records = self.sampler.pairwise_iter()?;
        let mut output = String::new();
        let mut written = 0u64;
        let mut drawn = 0;

        while drawn < count {
            let size = self.batch_size.min(count - drawn);
            let mut batch = Vec::with_capacity(size);
            for _ in 0..size {
                let mut record = records.next().ok_or_else(|| Error::SamplerExhausted {
                    sampler: "teacher triplets".to_string(),
                })?;
                self.backfill(&mut record);
                batch.push(record);
            }
            drawn += size;

            let scores = self.teacher.score(&ScoringBatch::from_pairwise(&batch)).await?;
            if scores.len() != 2 * batch.len() {
                return Err(Error::Scorer {
                    message: format!(
                        "teacher returned {} scores for {} pairs",
                        scores.len(),
                        2 * batch.len()
                    ),
                });
            }
            if scores.iter().any(|s| !s.is_finite()) {
                return Err(Error::Scorer {
                    message: "teacher returned a NaN or infinite score".to_string(),
                });
            }

            for (ix, record) in batch.iter().enumerate() {
                let (Some(qid), Some(pos), Some(neg)) =
                    (&record.query.id, &record.positive.id, &record.negative.id)
                else {
                    warn!("Skipping triplet without ids");
                    continue;
                };
                output.push_str(&format!(
                    "{}\t{}\t{}\t{}\t{}\n",
                    qid,
                    pos,
                    scores[ix],
                    neg,
                    scores[batch.len() + ix]
                ));
                written += 1;
            }
            debug!(drawn, written, "Scored teacher batch");
        }

        storage.write(key, Bytes::from(output)).await?;
        info!(written, "Wrote teacher triplets");
        Ok(written)
    }
}
