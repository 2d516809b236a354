//! Samplers and datasets backed by the tab-separated export files

use super::{DistillationPairwiseSampler, PairwiseSampler, Sampler};
use crate::{BoxedIterator, RandomStream, SkippingIterator};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use train_core::{
    Document, DocumentStore, Error, PairwiseDistillationSample, PairwiseRecord, PairwiseSample,
    PairwiseSampleSource, Query, Result, TextStore,
};

/// Name of the negative group read from hard-negative files
pub const HARD_NEGATIVES_GROUP: &str = "hard";

type Rows = Box<dyn Iterator<Item = (usize, Vec<String>)> + Send>;

/// Iterate over the rows of a tab-separated file, with their line number
///
/// A read error ends the iteration (and is logged).
pub fn read_tsv(path: &Path) -> Result<Rows> {
    let file = File::open(path).map_err(|e| Error::StoragePathNotFound {
        path: format!("{}: {}", path.display(), e),
    })?;
    let shown = path.display().to_string();

    let rows = BufReader::new(file)
        .lines()
        .enumerate()
        .map_while(move |(ix, line)| match line {
            Ok(line) => Some((ix + 1, line)),
            Err(e) => {
                warn!(path = %shown, line = ix + 1, error = %e, "Cannot read line");
                None
            }
        })
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(ix, line)| (ix, line.split('\t').map(str::to_string).collect()));
    Ok(Box::new(rows))
}

/// One row of the triplet export format
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTriplet {
    pub query_id: String,
    pub positive_id: String,
    pub positive_score: f32,
    pub negative_id: String,
    pub negative_score: f32,
}

/// Parse `query_id, positive_id, positive_score, negative_id, negative_score`
pub fn parse_triplet_line(fields: &[String]) -> Option<ScoredTriplet> {
    match fields {
        [query_id, positive_id, positive_score, negative_id, negative_score] => {
            Some(ScoredTriplet {
                query_id: query_id.clone(),
                positive_id: positive_id.clone(),
                positive_score: positive_score.trim().parse().ok()?,
                negative_id: negative_id.clone(),
                negative_score: negative_score.trim().parse().ok()?,
            })
        }
        _ => None,
    }
}

fn scored_triplets(path: &Path) -> Result<Box<dyn Iterator<Item = ScoredTriplet> + Send>> {
    let shown = path.display().to_string();
    let rows = read_tsv(path)?.filter_map(move |(line, fields)| {
        let triplet = parse_triplet_line(&fields);
        if triplet.is_none() {
            warn!(path = %shown, line, "Skipping malformed triplet line");
        }
        triplet
    });
    Ok(Box::new(rows))
}

/// Pairwise samples read from a hard-negative export
///
/// Each line is `query_id \t positives: \t ids \t negatives: \t ids`.
#[derive(Debug, Clone)]
pub struct PairwiseSampleDatasetFromTsv {
    path: PathBuf,
}

impl PairwiseSampleDatasetFromTsv {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn id_documents(ids: &str) -> Vec<Document> {
    ids.split(' ')
        .filter(|id| !id.is_empty())
        .map(|id| Document::new(Some(id.to_string()), None, None))
        .collect()
}

impl PairwiseSampleSource for PairwiseSampleDatasetFromTsv {
    fn iter(&self) -> Result<Box<dyn Iterator<Item = PairwiseSample> + Send>> {
        let shown = self.path.display().to_string();
        let samples = read_tsv(&self.path)?.filter_map(move |(line, fields)| match &fields[..] {
            [query_id, positives_tag, positives, negatives_tag, negatives]
                if positives_tag == "positives:" && negatives_tag == "negatives:" =>
            {
                Some(PairwiseSample {
                    query: Query::from_id(query_id.clone()),
                    positives: id_documents(positives),
                    negatives: BTreeMap::from([(
                        HARD_NEGATIVES_GROUP.to_string(),
                        id_documents(negatives),
                    )]),
                })
            }
            _ => {
                warn!(path = %shown, line, "Skipping malformed hard negative line");
                None
            }
        });
        Ok(Box::new(samples))
    }
}

/// Pairwise records (ids and scores) read from a triplet export
#[derive(Debug, Clone)]
pub struct PairwiseSamplerFromTsv {
    path: PathBuf,
}

impl PairwiseSamplerFromTsv {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Sampler for PairwiseSamplerFromTsv {
    async fn initialize(&mut self, _random: RandomStream) -> Result<()> {
        Ok(())
    }
}

impl PairwiseSampler for PairwiseSamplerFromTsv {
    fn pairwise_iter(&self) -> Result<BoxedIterator<PairwiseRecord>> {
        let path = self.path.clone();
        Ok(Box::new(SkippingIterator::new(
            format!("triplets in {}", self.path.display()),
            move || {
                let records = scored_triplets(&path)?.map(|t| PairwiseRecord {
                    query: Query::from_id(t.query_id),
                    positive: Document::new(Some(t.positive_id), None, Some(t.positive_score)),
                    negative: Document::new(Some(t.negative_id), None, Some(t.negative_score)),
                });
                Ok(Box::new(records) as Box<dyn Iterator<Item = PairwiseRecord> + Send>)
            },
        )))
    }
}

/// Teacher-scored pairs read from a triplet export
///
/// Query and document texts are filled from the stores when given.
pub struct DistillationTsvSampler {
    path: PathBuf,
    query_store: Option<Arc<dyn TextStore>>,
    document_store: Option<Arc<dyn DocumentStore>>,
}

impl DistillationTsvSampler {
    pub fn new(
        path: impl Into<PathBuf>,
        query_store: Option<Arc<dyn TextStore>>,
        document_store: Option<Arc<dyn DocumentStore>>,
    ) -> Self {
        Self {
            path: path.into(),
            query_store,
            document_store,
        }
    }
}

#[async_trait]
impl Sampler for DistillationTsvSampler {
    async fn initialize(&mut self, _random: RandomStream) -> Result<()> {
        Ok(())
    }
}

impl DistillationPairwiseSampler for DistillationTsvSampler {
    fn distillation_iter(&self) -> Result<BoxedIterator<PairwiseDistillationSample>> {
        let path = self.path.clone();
        let query_store = self.query_store.clone();
        let document_store = self.document_store.clone();

        Ok(Box::new(SkippingIterator::new(
            format!("distillation triplets in {}", self.path.display()),
            move || {
                let query_store = query_store.clone();
                let document_store = document_store.clone();
                let samples = scored_triplets(&path)?.map(move |t| {
                    let document = |id: String, score: f32| {
                        let text = document_store.as_ref().and_then(|s| s.document_text(&id));
                        Document::new(Some(id), text, Some(score))
                    };
                    let query_text = query_store.as_ref().and_then(|s| s.text(&t.query_id));
                    PairwiseDistillationSample {
                        query: Query::new(Some(t.query_id), query_text),
                        documents: [
                            document(t.positive_id, t.positive_score),
                            document(t.negative_id, t.negative_score),
                        ],
                    }
                });
                Ok(Box::new(samples)
                    as Box<dyn Iterator<Item = PairwiseDistillationSample> + Send>)
            },
        )))
    }
}
