// Throughput check for the provider: every listed file is read as one dense
// sample per line (whitespace separated numbers) and drained for a number of passes.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use slotfeed::{
    CacheKind, DataProvider, GeneratorErrorMode, ProviderConfig, ProviderError, Result, Sample,
    SampleGenerator, SlotHeader, Value, load_file_list,
};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "slotfeed-bench")]
#[command(about = "Drain text files through the data provider and report batch throughput.")]
struct Args {
    /// File with one data file path per line
    #[arg(short, long)]
    file_list: PathBuf,

    /// Numbers per line (dense slot dimension)
    #[arg(short, long)]
    dim: usize,

    #[arg(short, long, default_value_t = 128)]
    batch_size: usize,

    #[arg(short, long, default_value_t = 2)]
    passes: usize,

    /// Keep the first pass in memory and replay it
    #[arg(long, default_value = "false")]
    cache: bool,

    #[arg(long, default_value = "false")]
    no_shuffle: bool,

    /// Pool capacity in samples (unbounded when omitted)
    #[arg(long)]
    pool_size: Option<usize>,

    /// Skip files that fail to open or parse instead of aborting
    #[arg(long, default_value = "false")]
    skip_bad_files: bool,

    #[arg(long)]
    seed: Option<u64>,
}

struct LineGenerator {
    path: String,
    lines: Lines<BufReader<File>>,
}

impl SampleGenerator for LineGenerator {
    fn next_sample(&mut self) -> Result<Option<Sample>> {
        for line in self.lines.by_ref() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let cells = line
                .split_whitespace()
                .map(|cell| {
                    cell.parse::<f64>().map(Value::Float).map_err(|e| {
                        ProviderError::protocol(format!("{}: bad number {:?}: {}", self.path, cell, e))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Some(Sample::new(vec![Value::List(cells)])));
        }
        Ok(None)
    }
}

fn open_lines(path: &str) -> Result<Box<dyn SampleGenerator>> {
    let file = File::open(path)?;
    Ok(Box::new(LineGenerator {
        path: path.to_string(),
        lines: BufReader::new(file).lines(),
    }))
}

fn run(args: Args) -> Result<()> {
    let files = load_file_list(&args.file_list)?;
    info!("Loaded {} files from {:?}", files.len(), args.file_list);

    let mut config = ProviderConfig::default()
        .with_shuffle(!args.no_shuffle)
        .with_pool_size(args.pool_size);
    if args.cache {
        config = config.with_cache(CacheKind::CacheOnePassInMemory);
    }
    if args.skip_bad_files {
        config = config.with_generator_error_mode(GeneratorErrorMode::SkipFile);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    let mut provider = DataProvider::new(
        config,
        Arc::new(open_lines),
        files,
        vec![SlotHeader::dense(args.dim)?],
        None,
    )?;

    for pass in 1..=args.passes {
        let start = Instant::now();
        provider.reset()?;
        let mut batches = 0usize;
        let mut samples = 0usize;
        loop {
            let batch = provider.next_batch(args.batch_size)?;
            if batch.is_empty() {
                break;
            }
            batches += 1;
            samples += batch.num_samples;
        }
        let secs = start.elapsed().as_secs_f64();
        info!(
            "Pass {}: {} batches, {} samples in {:.3}s ({:.0} samples/s){}",
            pass,
            batches,
            samples,
            secs,
            samples as f64 / secs.max(f64::EPSILON),
            if provider.is_replaying() { " [cached]" } else { "" }
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .with_thread_names(true)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(kind = err.kind(), "{}", err);
            ExitCode::FAILURE
        }
    }
}
