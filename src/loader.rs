//! Background producer: opens one generator per file, pulls samples, weighs
//! them and pushes them into the shared [`SamplePool`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::config::GeneratorErrorMode;
use crate::error::{ProviderError, Result};
use crate::generator::{GeneratorFactory, GeneratorSet, IndexSampler, Pull, Weigher};
use crate::pool::{CancellationToken, SamplePool};
use crate::sample::PooledSample;

pub const LOADER_THREAD_NAME: &str = "slotfeed-loader";

/// Everything one loading pass needs. Moved into the loader thread.
pub struct LoaderContext {
    pub factory: Arc<dyn GeneratorFactory>,
    pub files: Arc<[String]>,
    pub weigher: Option<Arc<dyn Weigher>>,
    pub pool: Arc<SamplePool>,
    pub sampler: IndexSampler,
    pub on_error: GeneratorErrorMode,
}

/// Handle on a running loader thread. Dropping it stops and joins the thread.
pub struct LoaderTask {
    cancel: CancellationToken,
    pool: Arc<SamplePool>,
    handle: Option<JoinHandle<()>>,
}

impl LoaderTask {
    /// The pool must already be armed with `begin_pass(files.len())`.
    pub fn spawn(context: LoaderContext) -> Result<Self> {
        let cancel = CancellationToken::new();
        let pool = Arc::clone(&context.pool);

        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name(LOADER_THREAD_NAME.to_string())
            .spawn(move || run(context, token))?;

        Ok(Self {
            cancel,
            pool,
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Cancel the loader and wait for it to exit. Samples it had not pushed
    /// yet are dropped.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.cancel.cancel();
        self.pool.wake_producer();
        if handle.join().is_err() {
            warn!("Loader thread panicked");
            // Make sure a consumer never waits on a dead producer.
            self.pool.finish(Some(ProviderError::protocol("loader thread panicked")), false);
        }
        debug!("Loader joined");
    }
}

impl Drop for LoaderTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut context: LoaderContext, cancel: CancellationToken) {
    info!(files = context.files.len(), "Loader started");

    match produce(&mut context, &cancel) {
        Ok((pushed, true)) => {
            info!(pushed, "Loader finished, all generators exhausted");
            context.pool.finish(None, true);
        }
        Ok((pushed, false)) => {
            debug!(pushed, "Loader cancelled");
            context.pool.finish(None, false);
        }
        Err(err) => {
            warn!(kind = err.kind(), error = %err, "Loader stopped on error");
            context.pool.finish(Some(err), false);
        }
    }
}

/// Producer loop. Returns the number of samples pushed and whether every
/// generator ran dry (as opposed to the loop being cancelled).
fn produce(context: &mut LoaderContext, cancel: &CancellationToken) -> Result<(usize, bool)> {
    let mut generators = open_generators(context, cancel)?;
    if cancel.is_cancelled() {
        return Ok((0, false));
    }
    let mut pushed = 0usize;

    while !cancel.is_cancelled() && !generators.is_empty() {
        let index = context.sampler.next(generators.len());
        let (sample, weight) = match generators.pull(index) {
            Ok(Pull::Sample(sample, weight)) => (sample, weight),
            Ok(Pull::Exhausted) => {
                context.pool.generator_exhausted();
                continue;
            }
            Err(err) => {
                skip_or_fail(context, generators.remove(index), err)?;
                continue;
            }
        };

        let weight = match (weight, &context.weigher) {
            (Some(weight), _) => weight,
            (None, Some(weigher)) => weigher.weigh(&sample)?,
            (None, None) => 1,
        };

        if !context.pool.push(PooledSample::new(sample, weight), cancel)? {
            break;
        }
        pushed += 1;
    }
    Ok((pushed, generators.is_empty()))
}

fn open_generators(context: &LoaderContext, cancel: &CancellationToken) -> Result<GeneratorSet> {
    let mut generators = GeneratorSet::new();
    for file in context.files.iter() {
        if cancel.is_cancelled() {
            break;
        }
        match context.factory.open(file) {
            Ok(generator) => generators.push(file.as_str(), generator),
            Err(err) => skip_or_fail(context, Some(file.clone()), err)?,
        }
    }
    debug!(opened = generators.len(), "Generators opened");
    Ok(generators)
}

/// Apply the generator error policy to a failed file.
fn skip_or_fail(context: &LoaderContext, file: Option<String>, err: ProviderError) -> Result<()> {
    match context.on_error {
        GeneratorErrorMode::Fail => Err(err),
        GeneratorErrorMode::SkipFile => {
            let file = file.unwrap_or_default();
            warn!(file = %file, error = %err, "Skipping file");
            context.pool.generator_exhausted();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::SampleGenerator;
    use crate::sample::{Sample, Value};

    fn factory(per_file: i64) -> Arc<dyn GeneratorFactory> {
        let open = move |file: &str| -> Result<Box<dyn SampleGenerator>> {
            if file.starts_with("broken") {
                return Err(ProviderError::foreign(format!("generator({})", file), "cannot open"));
            }
            Ok(Box::new(
                (0..per_file).map(|i| Ok::<_, ProviderError>(Sample::new(vec![Value::Int(i)]))),
            ))
        };
        Arc::new(open)
    }

    fn context(files: &[&str], pool: &Arc<SamplePool>, on_error: GeneratorErrorMode) -> LoaderContext {
        LoaderContext {
            factory: factory(3),
            files: files.iter().map(|f| f.to_string()).collect(),
            weigher: None,
            pool: Arc::clone(pool),
            sampler: IndexSampler::sequential(),
            on_error,
        }
    }

    fn drain(pool: &SamplePool) -> Result<usize> {
        let mut total = 0;
        loop {
            let (drawn, _) = pool.take(2, None)?;
            if drawn.is_empty() {
                return Ok(total);
            }
            total += drawn.len();
        }
    }

    #[test]
    fn test_loader_pushes_every_sample() {
        let pool = Arc::new(SamplePool::new(Some(4), false));
        pool.begin_pass(2);
        let mut task = LoaderTask::spawn(context(&["a", "b"], &pool, GeneratorErrorMode::Fail)).unwrap();
        assert_eq!(drain(&pool).unwrap(), 6);
        task.stop();
        assert!(task.is_finished());
    }

    #[test]
    fn test_open_failure_is_reported() {
        let pool = Arc::new(SamplePool::new(None, true));
        pool.begin_pass(2);
        let _task =
            LoaderTask::spawn(context(&["a", "broken"], &pool, GeneratorErrorMode::Fail)).unwrap();
        let err = drain(&pool).unwrap_err();
        assert!(matches!(err, ProviderError::ForeignCall { .. }));
    }

    #[test]
    fn test_open_failure_is_skipped() {
        let pool = Arc::new(SamplePool::new(None, true));
        pool.begin_pass(3);
        let _task = LoaderTask::spawn(context(
            &["a", "broken", "b"],
            &pool,
            GeneratorErrorMode::SkipFile,
        ))
        .unwrap();
        assert_eq!(drain(&pool).unwrap(), 6);
    }

    /// Yields `1, 2, 3` and weighs each sample from the raw value it read.
    struct RawWeighed(std::ops::Range<i64>);

    impl SampleGenerator for RawWeighed {
        fn next_sample(&mut self) -> Result<Option<Sample>> {
            Ok(self.next_weighted()?.map(|(sample, _)| sample))
        }

        fn next_weighted(&mut self) -> Result<Option<(Sample, Option<usize>)>> {
            Ok(self
                .0
                .next()
                .map(|raw| (Sample::new(vec![Value::Int(raw)]), Some(raw as usize * 10))))
        }
    }

    #[test]
    fn test_generator_weight_overrides_weigher() {
        let pool = Arc::new(SamplePool::new(None, true));
        pool.begin_pass(1);
        let open = |_: &str| -> Result<Box<dyn SampleGenerator>> { Ok(Box::new(RawWeighed(1..4))) };
        let failing = |_: &Sample| -> Result<usize> { Err(ProviderError::protocol("weigher called")) };
        let mut ctx = context(&["a"], &pool, GeneratorErrorMode::Fail);
        ctx.factory = Arc::new(open);
        ctx.weigher = Some(Arc::new(failing));
        let mut task = LoaderTask::spawn(ctx).unwrap();

        let (drawn, weight) = pool.take(60, None).unwrap();
        let weights: Vec<usize> = drawn.iter().map(|s| s.weight).collect();
        assert_eq!(weights, vec![10, 20, 30]);
        assert_eq!(weight, 60);
        task.stop();
    }

    #[test]
    fn test_stop_joins_blocked_loader() {
        let pool = Arc::new(SamplePool::new(Some(1), false));
        pool.begin_pass(1);
        let mut task = LoaderTask::spawn(context(&["a"], &pool, GeneratorErrorMode::Fail)).unwrap();
        // Nobody consumes: the loader parks on a full pool until cancelled.
        task.stop();
        assert!(task.is_finished());
        assert!(pool.len() <= 1);
    }
}
