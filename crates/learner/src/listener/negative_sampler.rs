use super::{Listener, ListenerDecision};
use crate::context::ListenerContext;
use async_trait::async_trait;
use tracing::info;
use train_core::config::NegativeSamplingConfig;
use train_core::{Error, ListenerId, Result, TrainState};

/// Index of the sampler switched to on the first trigger
const HARD_NEGATIVES_SAMPLER: usize = 1;

/// Periodically refreshes the negatives of a sampler list
///
/// The trainer's sampler must be a [`sampling::PairwiseListSamplers`], the
/// first one serving until hard negatives are available. Every
/// `sampling_interval` epochs, the first trigger switches to the second
/// sampler; every trigger then refreshes the active sampler.
pub struct NegativeSamplerListener {
    id: ListenerId,
    config: NegativeSamplingConfig,
}

impl NegativeSamplerListener {
    pub fn new(id: impl Into<ListenerId>, config: NegativeSamplingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: id.into(),
            config,
        })
    }
}

fn no_sampler_list() -> Error {
    Error::InvalidConfig {
        message: "negative sampling needs a trainer over a list of pairwise samplers".to_string(),
    }
}

#[async_trait]
impl Listener for NegativeSamplerListener {
    fn id(&self) -> &ListenerId {
        &self.id
    }

    async fn initialize(&mut self, context: &mut ListenerContext<'_>) -> Result<()> {
        let samplers = context.trainer.sampler_list().ok_or_else(no_sampler_list)?;
        if samplers.len() <= HARD_NEGATIVES_SAMPLER {
            return Err(Error::InvalidConfig {
                message: format!(
                    "negative sampling needs at least {} samplers, got {}",
                    HARD_NEGATIVES_SAMPLER + 1,
                    samplers.len()
                ),
            });
        }
        Ok(())
    }

    async fn on_epoch_end(
        &mut self,
        state: &TrainState,
        context: &mut ListenerContext<'_>,
    ) -> Result<ListenerDecision> {
        if state.epoch % self.config.sampling_interval != 0 {
            return Ok(ListenerDecision::NoDecision);
        }

        let samplers = context.trainer.sampler_list().ok_or_else(no_sampler_list)?;
        // The active index is restored from checkpoints
        if samplers.current() < HARD_NEGATIVES_SAMPLER {
            samplers.set_current(HARD_NEGATIVES_SAMPLER)?;
        }

        let current = samplers.current();
        info!(epoch = state.epoch, sampler = current, "Refreshing negatives");
        samplers.update_sampler(current).await?;
        Ok(ListenerDecision::NoDecision)
    }
}
