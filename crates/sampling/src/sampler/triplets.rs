use super::{not_initialized, PairwiseSampler, Sampler};
use crate::{BoxedIterator, RandomStream, SerializableIterator, SkippingIterator};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};
use train_core::{
    Document, DocumentStore, Error, IteratorState, PairwiseRecord, PairwiseSample,
    PairwiseSampleSource, Query, Result, Triplet, TripletSource,
};

/// Pairwise records read from a triplet source
///
/// When the source gives document ids, texts are looked up in `store`.
pub struct TripletBasedSampler {
    source: Arc<dyn TripletSource>,
    store: Option<Arc<dyn DocumentStore>>,
}

impl TripletBasedSampler {
    pub fn new(
        source: Arc<dyn TripletSource>,
        store: Option<Arc<dyn DocumentStore>>,
    ) -> Result<Self> {
        if source.ids() && store.is_none() {
            return Err(Error::MissingDocumentStore);
        }
        Ok(Self { source, store })
    }
}

fn triplet_record(triplet: Triplet, store: Option<&dyn DocumentStore>) -> PairwiseRecord {
    let document = |value: String| match store {
        Some(store) => {
            let text = store.document_text(&value);
            Document::new(Some(value), text, None)
        }
        None => Document::from_text(value),
    };
    PairwiseRecord {
        query: Query::from_text(triplet.query),
        positive: document(triplet.positive),
        negative: document(triplet.negative),
    }
}

#[async_trait]
impl Sampler for TripletBasedSampler {
    async fn initialize(&mut self, _random: RandomStream) -> Result<()> {
        Ok(())
    }
}

impl PairwiseSampler for TripletBasedSampler {
    fn pairwise_iter(&self) -> Result<BoxedIterator<PairwiseRecord>> {
        let source = self.source.clone();
        // Texts are only looked up for id triplets
        let store = if source.ids() { self.store.clone() } else { None };

        Ok(Box::new(SkippingIterator::new("triplets", move || {
            let store = store.clone();
            let records = source
                .iter()?
                .map(move |triplet| triplet_record(triplet, store.as_deref()));
            Ok(Box::new(records) as Box<dyn Iterator<Item = PairwiseRecord> + Send>)
        })))
    }
}

/// Consecutive unusable samples after which the stream is considered broken
const MAX_SKIPPED_SAMPLES: usize = 1024;

/// Pairwise records drawn from samples holding positives and groups of
/// negatives
pub struct PairwiseDatasetTripletBasedSampler {
    dataset: Arc<dyn PairwiseSampleSource>,
    random: Option<RandomStream>,
}

impl PairwiseDatasetTripletBasedSampler {
    pub fn new(dataset: Arc<dyn PairwiseSampleSource>) -> Self {
        Self {
            dataset,
            random: None,
        }
    }
}

#[async_trait]
impl Sampler for PairwiseDatasetTripletBasedSampler {
    async fn initialize(&mut self, random: RandomStream) -> Result<()> {
        self.random = Some(random);
        Ok(())
    }
}

impl PairwiseSampler for PairwiseDatasetTripletBasedSampler {
    fn pairwise_iter(&self) -> Result<BoxedIterator<PairwiseRecord>> {
        let random = self
            .random
            .clone()
            .ok_or_else(|| not_initialized("PairwiseDatasetTripletBasedSampler"))?;
        let dataset = self.dataset.clone();

        Ok(Box::new(SampleTripletIterator {
            samples: SkippingIterator::new("pairwise samples", move || dataset.iter()),
            random,
        }))
    }
}

/// Skip-ahead over samples, random choice inside each sample
struct SampleTripletIterator {
    samples: SkippingIterator<PairwiseSample>,
    random: RandomStream,
}

impl Iterator for SampleTripletIterator {
    type Item = PairwiseRecord;

    fn next(&mut self) -> Option<PairwiseRecord> {
        for _ in 0..MAX_SKIPPED_SAMPLES {
            let sample = self.samples.next()?;
            let groups: Vec<&Vec<Document>> = sample
                .negatives
                .values()
                .filter(|group| !group.is_empty())
                .collect();
            if sample.positives.is_empty() || groups.is_empty() {
                debug!(
                    query_id = ?sample.query.id,
                    "Skipping sample (missing positives or negatives)"
                );
                continue;
            }

            let random = &mut self.random;
            let positive = sample.positives[random.below(sample.positives.len())].clone();
            let group = groups[random.below(groups.len())];
            let negative = group[random.below(group.len())].clone();

            return Some(PairwiseRecord {
                query: sample.query.clone(),
                positive,
                negative,
            });
        }

        error!(
            skipped = MAX_SKIPPED_SAMPLES,
            "Too many consecutive unusable pairwise samples"
        );
        None
    }
}

impl SerializableIterator for SampleTripletIterator {
    fn state(&self) -> IteratorState {
        IteratorState {
            random: Some(self.random.snapshot()),
            ..self.samples.state()
        }
    }

    fn restore(&mut self, state: &IteratorState) -> Result<()> {
        let random = state.random.as_ref().ok_or_else(|| Error::Internal {
            message: "pairwise sample state has no random snapshot".to_string(),
        })?;
        self.samples.restore(state)?;
        self.random.restore(random);
        Ok(())
    }
}
