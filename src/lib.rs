//! Streaming sample provider for training loops.
//!
//! User generators yield samples from a list of files. A background loader
//! pulls them into a weight-bounded pool, and the consumer draws batches from it
//! and encodes them slot by slot into dense, sparse, index or sequence buffers.

pub mod assembler;
pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod generator;
pub mod loader;
pub mod pool;
pub mod provider;
pub mod sample;
pub mod scanner;
pub mod slot;

#[cfg(feature = "python")]
pub mod python;

pub use assembler::BatchAssembler;
pub use batch::{Argument, Batch, BatchTransfer, DenseMatrix, SlotMatrix, SparseMatrix};
pub use cache::{CacheKind, CacheStrategy};
pub use config::{GeneratorErrorMode, ProviderConfig, load_file_list};
pub use error::{ProviderError, Result};
pub use generator::{GeneratorFactory, GeneratorSet, IndexSampler, Pull, SampleGenerator, Weigher};
pub use pool::{CancellationToken, SamplePool};
pub use provider::DataProvider;
pub use sample::{PooledSample, Sample, Value};
pub use scanner::FieldScanner;
pub use slot::{SeqType, SlotHeader, SlotType};

#[cfg(feature = "python")]
#[pyo3::pymodule]
fn slotfeed(m: &pyo3::Bound<'_, pyo3::types::PyModule>) -> pyo3::PyResult<()> {
    use pyo3::types::PyModuleMethods;

    m.add_class::<python::PyDataProvider>()?;
    Ok(())
}
