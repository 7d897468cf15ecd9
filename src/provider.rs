//! The public entry point: [`DataProvider`] owns the pool, the loader thread,
//! the cache and the assembler, and exposes the pass-oriented `reset` /
//! `next_batch` interface.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::assembler::BatchAssembler;
use crate::batch::{Batch, BatchTransfer};
use crate::cache::{CacheKind, CacheStrategy};
use crate::config::ProviderConfig;
use crate::error::{ProviderError, Result};
use crate::generator::{GeneratorFactory, IndexSampler, Weigher};
use crate::loader::{LoaderContext, LoaderTask};
use crate::pool::{SamplePool, draw_samples};
use crate::slot::SlotHeader;

pub struct DataProvider {
    config: ProviderConfig,
    files: Arc<[String]>,
    factory: Arc<dyn GeneratorFactory>,
    weigher: Option<Arc<dyn Weigher>>,
    pool: Arc<SamplePool>,
    cache: CacheStrategy,
    assembler: BatchAssembler,
    transfer: Option<Box<dyn BatchTransfer>>,
    loader: Option<LoaderTask>,
    /// Source of per-pass loader seeds.
    seeds: StdRng,
    /// Consumer-side rng for shuffled draws; `None` when not shuffling.
    draw_rng: Option<StdRng>,
    started: bool,
    drained: bool,
    /// The loader of the current pass reported an error, so the pass is incomplete.
    loader_failed: bool,
    passes: usize,
}

impl DataProvider {
    pub fn new(
        config: ProviderConfig,
        factory: Arc<dyn GeneratorFactory>,
        files: Vec<String>,
        headers: Vec<SlotHeader>,
        weigher: Option<Arc<dyn Weigher>>,
    ) -> Result<Self> {
        config.validate()?;
        if headers.is_empty() {
            return Err(ProviderError::configuration("at least one slot is required"));
        }

        let (seeds, draw_rng) = match config.seed {
            Some(seed) => (
                StdRng::seed_from_u64(seed),
                StdRng::seed_from_u64(seed.wrapping_add(1)),
            ),
            None => (StdRng::from_os_rng(), StdRng::from_os_rng()),
        };

        info!(
            files = files.len(),
            slots = headers.len(),
            shuffle = config.shuffle,
            pool_size = ?config.pool_size,
            can_over_batch_size = config.can_over_batch_size,
            cache = ?config.cache,
            "Data provider created"
        );

        Ok(Self {
            pool: Arc::new(SamplePool::new(config.pool_size, config.can_over_batch_size)),
            cache: CacheStrategy::new(config.cache),
            assembler: BatchAssembler::new(headers),
            draw_rng: config.shuffle.then_some(draw_rng),
            config,
            files: files.into(),
            factory,
            weigher,
            transfer: None,
            loader: None,
            seeds,
            started: false,
            drained: false,
            loader_failed: false,
            passes: 0,
        })
    }

    /// Install a hook that receives every finished batch before it is returned.
    pub fn with_transfer(mut self, transfer: Box<dyn BatchTransfer>) -> Self {
        self.transfer = Some(transfer);
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn headers(&self) -> &[SlotHeader] {
        self.assembler.headers()
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Number of passes started so far.
    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn is_replaying(&self) -> bool {
        self.cache.is_replaying()
    }

    /// Start a new pass.
    ///
    /// Stops any running loader, drops buffered samples and asks the cache
    /// whether the generators must run again. A loading pass counts as
    /// complete once its generators ran dry and every sample was drawn, even
    /// if the end-of-pass batch was never requested. A failure from the previous
    /// pass that `next_batch` never reported is returned here instead, and no
    /// new pass is started; the next `reset` proceeds normally.
    pub fn reset(&mut self) -> Result<()> {
        // Only a capturing cache cares whether the pass completed, and the
        // check has to happen before the loader is cancelled.
        let completed = self.drained
            || (self.loader.is_some()
                && self.cache.kind() == CacheKind::CacheOnePassInMemory
                && self.pool.settle());
        self.stop_loader();
        self.pool.clear();

        if let Some(failure) = self.pool.take_failure() {
            warn!(kind = failure.kind(), "Unreported failure from the previous pass");
            self.started = false;
            return Err(failure);
        }

        let reload = self.cache.should_reload(completed && !self.loader_failed);
        self.drained = false;
        self.loader_failed = false;
        self.started = true;
        self.passes += 1;

        if reload {
            self.pool.begin_pass(self.files.len());
            let sampler = if self.config.shuffle {
                IndexSampler::shuffled(StdRng::from_rng(&mut self.seeds))
            } else {
                IndexSampler::sequential()
            };
            self.loader = Some(LoaderTask::spawn(LoaderContext {
                factory: Arc::clone(&self.factory),
                files: Arc::clone(&self.files),
                weigher: self.weigher.clone(),
                pool: Arc::clone(&self.pool),
                sampler,
                on_error: self.config.on_generator_error,
            })?);
            info!(pass = self.passes, files = self.files.len(), "Loading pass started");
        } else {
            info!(
                pass = self.passes,
                samples = self.cache.cached_samples(),
                "Replaying cached pass"
            );
        }
        Ok(())
    }

    /// Draw up to `max_weight` worth of samples and encode them.
    ///
    /// Blocks until enough weight is buffered or the pass has ended. Returns
    /// an empty batch when the pass has no more data, before the first
    /// `reset`, and for a zero `max_weight` (which draws nothing and leaves
    /// the pass untouched).
    pub fn next_batch(&mut self, max_weight: usize) -> Result<Batch> {
        if max_weight == 0 || !self.started {
            return Ok(Batch::empty());
        }

        let (samples, size) = match self.cache.load() {
            Some(replay) => draw_samples(replay, max_weight, self.draw_rng.as_mut()),
            None => match self.pool.take(max_weight, self.draw_rng.as_mut()) {
                Ok(drawn) => drawn,
                Err(err) => {
                    self.loader_failed = true;
                    return Err(err);
                }
            },
        };

        if samples.is_empty() {
            if !self.drained {
                info!(pass = self.passes, "Pass finished");
            }
            self.drained = true;
            return Ok(Batch::empty());
        }

        let encoded = self.assembler.assemble(&samples, size);
        self.cache.drop_samples(samples);
        let batch = encoded?;
        debug!(size = batch.size, samples = batch.num_samples, "Batch assembled");

        match &self.transfer {
            Some(transfer) => transfer.transfer(batch),
            None => Ok(batch),
        }
    }

    fn stop_loader(&mut self) {
        if let Some(mut loader) = self.loader.take() {
            loader.stop();
        }
    }
}

impl Drop for DataProvider {
    fn drop(&mut self) {
        self.stop_loader();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::SampleGenerator;
    use crate::sample::{Sample, Value};

    fn provider(config: ProviderConfig, files: &[&str]) -> DataProvider {
        let open = |file: &str| -> Result<Box<dyn SampleGenerator>> {
            let base: i64 = file.len() as i64 * 100;
            Ok(Box::new((0..3).map(move |i| {
                Ok::<_, ProviderError>(Sample::new(vec![Value::from(vec![base + i])]))
            })))
        };
        DataProvider::new(
            config,
            Arc::new(open),
            files.iter().map(|f| f.to_string()).collect(),
            vec![SlotHeader::dense(1).unwrap()],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_next_batch_before_reset_is_empty() {
        let mut provider = provider(ProviderConfig::default(), &["a"]);
        assert!(provider.next_batch(4).unwrap().is_empty());
        assert_eq!(provider.passes(), 0);
    }

    #[test]
    fn test_zero_weight_request_draws_nothing() {
        let mut provider = provider(ProviderConfig::default().with_shuffle(false), &["a"]);
        provider.reset().unwrap();
        assert!(provider.next_batch(0).unwrap().is_empty());

        // The pass itself is unaffected.
        let batch = provider.next_batch(3).unwrap();
        assert_eq!(batch.num_samples, 3);
        assert!(provider.next_batch(3).unwrap().is_empty());
    }

    #[test]
    fn test_requires_slots() {
        let open = |_: &str| -> Result<Box<dyn SampleGenerator>> {
            Ok(Box::new(std::iter::empty::<Result<Sample>>()))
        };
        let result = DataProvider::new(ProviderConfig::default(), Arc::new(open), vec![], vec![], None);
        assert!(matches!(result, Err(ProviderError::Configuration(_))));
    }

    #[test]
    fn test_full_pass_then_empty() {
        let mut provider = provider(ProviderConfig::default().with_seed(1), &["a", "bb"]);
        provider.reset().unwrap();
        let mut total = 0;
        loop {
            let batch = provider.next_batch(4).unwrap();
            if batch.is_empty() {
                break;
            }
            assert!(batch.size <= 4);
            total += batch.num_samples;
        }
        assert_eq!(total, 6);
        assert!(provider.next_batch(4).unwrap().is_empty());
    }

    #[test]
    fn test_transfer_hook_sees_every_batch() {
        let transfer = |mut batch: Batch| -> Result<Batch> {
            batch.size *= 10;
            Ok(batch)
        };
        let mut provider = provider(ProviderConfig::default().with_shuffle(false), &["a"])
            .with_transfer(Box::new(transfer));
        provider.reset().unwrap();
        assert_eq!(provider.next_batch(2).unwrap().size, 20);
    }
}
