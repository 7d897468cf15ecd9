//! Provider options and file-list loading.

use std::fs;
use std::path::Path;

use crate::cache::CacheKind;
use crate::error::{ProviderError, Result};

/// What the loader does when a generator fails to open or fails mid-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeneratorErrorMode {
    /// Stop the pass and report the error from the next `next_batch`.
    #[default]
    Fail,
    /// Log the failure, drop that file for the rest of the pass and go on.
    SkipFile,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// Pick generators at random and draw pool samples at random
    pub shuffle: bool,
    /// Pool capacity in weight units; `None` means unbounded
    pub pool_size: Option<usize>,
    /// Admit a push while the pool is below capacity, even if it overruns it
    pub can_over_batch_size: bool,
    pub cache: CacheKind,
    /// Seed for the generator sampler and the pool draws
    pub seed: Option<u64>,
    pub on_generator_error: GeneratorErrorMode,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            shuffle: true,
            pool_size: None,
            can_over_batch_size: true,
            cache: CacheKind::NoCache,
            seed: None,
            on_generator_error: GeneratorErrorMode::Fail,
        }
    }
}

impl ProviderConfig {
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_pool_size(mut self, pool_size: Option<usize>) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_can_over_batch_size(mut self, can_over_batch_size: bool) -> Self {
        self.can_over_batch_size = can_over_batch_size;
        self
    }

    pub fn with_cache(mut self, cache: CacheKind) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_generator_error_mode(mut self, mode: GeneratorErrorMode) -> Self {
        self.on_generator_error = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == Some(0) {
            return Err(ProviderError::configuration(
                "pool_size must be positive (use None for an unbounded pool)",
            ));
        }
        Ok(())
    }
}

/// Read a file list: one identifier per line, blank lines ignored.
pub fn load_file_list(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let config = ProviderConfig::default();
        assert!(config.shuffle);
        assert!(config.can_over_batch_size);
        assert_eq!(config.pool_size, None);
        assert_eq!(config.cache, CacheKind::NoCache);
        assert_eq!(config.on_generator_error, GeneratorErrorMode::Fail);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_and_validation() {
        let config = ProviderConfig::default()
            .with_shuffle(false)
            .with_pool_size(Some(16))
            .with_seed(9)
            .with_cache(CacheKind::CacheOnePassInMemory);
        assert!(!config.shuffle);
        assert_eq!(config.seed, Some(9));
        assert!(config.validate().is_ok());

        let bad = ProviderConfig::default().with_pool_size(Some(0));
        assert!(matches!(bad.validate(), Err(ProviderError::Configuration(_))));
    }

    #[test]
    fn test_load_file_list_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "train-00.txt").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  train-01.txt  ").unwrap();
        file.flush().unwrap();

        let files = load_file_list(file.path()).unwrap();
        assert_eq!(files, vec!["train-00.txt", "train-01.txt"]);
    }

    #[test]
    fn test_missing_file_list_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_file_list(dir.path().join("absent.list")).unwrap_err();
        assert_eq!(err.kind(), "io");
    }
}
