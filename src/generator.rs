//! External sample sources and the sampler that picks between them.
//!
//! A [`GeneratorFactory`] opens one [`SampleGenerator`] per input file. The
//! generators themselves are arbitrary user logic; the provider only relies on
//! "give me the next sample, or tell me you are done". A generator that reports
//! exhaustion is dropped from the [`GeneratorSet`] for the rest of the pass.

use rand::distr::{Distribution, Uniform};
use rand::rngs::StdRng;
use tracing::debug;

use crate::error::{ProviderError, Result};
use crate::sample::Sample;

// ============================================================================
// Contracts
// ============================================================================

/// Iterator-like handle over the samples of one file.
pub trait SampleGenerator: Send {
    /// `Ok(None)` means exhausted; the handle is never polled again.
    fn next_sample(&mut self) -> Result<Option<Sample>>;

    /// Like `next_sample`, for generators that weigh their own output while
    /// the raw record is still at hand. `None` weight defers to the provider's
    /// weigher.
    fn next_weighted(&mut self) -> Result<Option<(Sample, Option<usize>)>> {
        Ok(self.next_sample()?.map(|sample| (sample, None)))
    }
}

/// Opens a generator for a file identifier.
pub trait GeneratorFactory: Send + Sync {
    fn open(&self, file: &str) -> Result<Box<dyn SampleGenerator>>;
}

/// Batch weight of a sample. Without a weigher every sample weighs 1.
pub trait Weigher: Send + Sync {
    fn weigh(&self, sample: &Sample) -> Result<usize>;
}

impl<I> SampleGenerator for I
where
    I: Iterator<Item = Result<Sample>> + Send,
{
    fn next_sample(&mut self) -> Result<Option<Sample>> {
        self.next().transpose()
    }
}

impl<F> GeneratorFactory for F
where
    F: Fn(&str) -> Result<Box<dyn SampleGenerator>> + Send + Sync,
{
    fn open(&self, file: &str) -> Result<Box<dyn SampleGenerator>> {
        self(file)
    }
}

impl<F> Weigher for F
where
    F: Fn(&Sample) -> Result<usize> + Send + Sync,
{
    fn weigh(&self, sample: &Sample) -> Result<usize> {
        self(sample)
    }
}

// ============================================================================
// GeneratorSet
// ============================================================================

/// Outcome of pulling from one generator. A sample carries the weight its
/// generator assigned, if any.
#[derive(Debug)]
pub enum Pull {
    Sample(Sample, Option<usize>),
    Exhausted,
}

struct GeneratorHandle {
    file: String,
    inner: Box<dyn SampleGenerator>,
}

/// The live generators of the current pass, in file-list order.
#[derive(Default)]
pub struct GeneratorSet {
    handles: Vec<GeneratorHandle>,
}

impl GeneratorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, file: impl Into<String>, generator: Box<dyn SampleGenerator>) {
        self.handles.push(GeneratorHandle {
            file: file.into(),
            inner: generator,
        });
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn file(&self, index: usize) -> Option<&str> {
        self.handles.get(index).map(|h| h.file.as_str())
    }

    /// Pull the next sample from generator `index`. On exhaustion the
    /// generator is removed and later indices shift down by one.
    pub fn pull(&mut self, index: usize) -> Result<Pull> {
        let live = self.handles.len();
        let handle = self.handles.get_mut(index).ok_or_else(|| {
            ProviderError::configuration(format!(
                "generator index {} out of range ({} live)",
                index, live
            ))
        })?;

        match handle.inner.next_weighted()? {
            Some((sample, weight)) => Ok(Pull::Sample(sample, weight)),
            None => {
                let handle = self.handles.remove(index);
                debug!(file = %handle.file, remaining = self.handles.len(), "Generator exhausted");
                Ok(Pull::Exhausted)
            }
        }
    }

    /// Drop generator `index` without pulling (used when a file is skipped).
    pub fn remove(&mut self, index: usize) -> Option<String> {
        (index < self.handles.len()).then(|| self.handles.remove(index).file)
    }
}

// ============================================================================
// IndexSampler
// ============================================================================

/// Chooses which live generator to pull from next.
///
/// Shuffled: uniform over `[0, active)`, with the distribution rebuilt when the
/// active count changes. Unshuffled: always the first generator, which drains
/// files strictly in list order.
pub struct IndexSampler {
    rng: Option<StdRng>,
    dist: Option<(usize, Uniform<usize>)>,
}

impl IndexSampler {
    pub fn shuffled(rng: StdRng) -> Self {
        Self {
            rng: Some(rng),
            dist: None,
        }
    }

    pub fn sequential() -> Self {
        Self {
            rng: None,
            dist: None,
        }
    }

    /// Index in `[0, active)`. `active` must be positive.
    pub fn next(&mut self, active: usize) -> usize {
        let Some(rng) = self.rng.as_mut() else {
            return 0;
        };
        if active <= 1 {
            return 0;
        }
        let rebuild = !matches!(self.dist, Some((len, _)) if len == active);
        if rebuild {
            // Uniform::new only fails on an empty range, excluded above.
            self.dist = Uniform::new(0, active).ok().map(|d| (active, d));
        }
        match &self.dist {
            Some((_, dist)) => dist.sample(rng),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Value;
    use rand::SeedableRng;

    fn counting(n: i64) -> Box<dyn SampleGenerator> {
        Box::new((0..n).map(|i| Ok::<_, ProviderError>(Sample::new(vec![Value::Int(i)]))))
    }

    #[test]
    fn test_exhausted_generator_is_removed() {
        let mut set = GeneratorSet::new();
        set.push("a", counting(1));
        set.push("b", counting(2));

        assert!(matches!(set.pull(0).unwrap(), Pull::Sample(_, None)));
        assert!(matches!(set.pull(0).unwrap(), Pull::Exhausted));
        assert_eq!(set.len(), 1);
        assert_eq!(set.file(0), Some("b"));

        assert!(matches!(set.pull(0).unwrap(), Pull::Sample(_, None)));
        assert!(matches!(set.pull(0).unwrap(), Pull::Sample(_, None)));
        assert!(matches!(set.pull(0).unwrap(), Pull::Exhausted));
        assert!(set.is_empty());
        assert!(set.pull(0).is_err());
    }

    #[test]
    fn test_generator_error_propagates() {
        let mut set = GeneratorSet::new();
        let failing =
            std::iter::once(Err::<Sample, _>(ProviderError::foreign("generator(x)", "boom")));
        set.push("x", Box::new(failing));
        let err = set.pull(0).unwrap_err();
        assert!(matches!(err, ProviderError::ForeignCall { .. }));
        assert_eq!(set.len(), 1);
    }

    struct SelfWeighing(std::vec::IntoIter<i64>);

    impl SampleGenerator for SelfWeighing {
        fn next_sample(&mut self) -> Result<Option<Sample>> {
            Ok(self.0.next().map(|v| Sample::new(vec![Value::Int(v)])))
        }

        fn next_weighted(&mut self) -> Result<Option<(Sample, Option<usize>)>> {
            Ok(self
                .0
                .next()
                .map(|v| (Sample::new(vec![Value::Int(v)]), Some(v as usize * 2))))
        }
    }

    #[test]
    fn test_generator_weight_is_carried() {
        let mut set = GeneratorSet::new();
        set.push("w", Box::new(SelfWeighing(vec![3].into_iter())));
        match set.pull(0).unwrap() {
            Pull::Sample(sample, weight) => {
                assert_eq!(sample.fields(), &[Value::Int(3)]);
                assert_eq!(weight, Some(6));
            }
            Pull::Exhausted => panic!("expected a sample"),
        }
        assert!(matches!(set.pull(0).unwrap(), Pull::Exhausted));
    }

    #[test]
    fn test_sequential_sampler_always_first() {
        let mut sampler = IndexSampler::sequential();
        for active in [5, 3, 1] {
            assert_eq!(sampler.next(active), 0);
        }
    }

    #[test]
    fn test_shuffled_sampler_stays_in_range_and_covers() {
        let mut sampler = IndexSampler::shuffled(StdRng::seed_from_u64(7));
        let mut seen = [false; 4];
        for _ in 0..200 {
            let i = sampler.next(4);
            assert!(i < 4);
            seen[i] = true;
        }
        assert!(seen.iter().all(|&s| s));

        // Shrinking the active set rebuilds the distribution.
        for _ in 0..50 {
            assert!(sampler.next(2) < 2);
        }
        assert_eq!(sampler.next(1), 0);
    }
}
