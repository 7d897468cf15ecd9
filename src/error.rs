//! Error types for the data provider.
//!
//! Every failure the pipeline can hit is surfaced as a [`ProviderError`] at the
//! call boundary (`DataProvider::next_batch` / `DataProvider::reset`). Nothing is
//! coerced or skipped silently; the caller decides whether to abort the run or
//! drop the offending file.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// Unsupported slot kind, sequence kind, cache kind or an invalid option.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Data did not have the shape or type the slot header promises.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The external generator, generator factory or weigher itself failed.
    #[error("Foreign call to {source_name} failed: {message}")]
    ForeignCall {
        source_name: String,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn foreign(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self::ForeignCall {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    /// Prefix a protocol error with the slot it was raised in.
    pub fn in_slot(self, slot: usize) -> Self {
        match self {
            Self::Protocol(message) => Self::Protocol(format!("slot {}: {}", slot, message)),
            other => other,
        }
    }

    /// Short label for the error class, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Protocol(_) => "protocol",
            Self::ForeignCall { .. } => "foreign-call",
            Self::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_the_class() {
        let err = ProviderError::protocol("slot 2: expected an integer, got 1.5");
        assert_eq!(
            err.to_string(),
            "Protocol error: slot 2: expected an integer, got 1.5"
        );
        assert_eq!(err.kind(), "protocol");

        let err = ProviderError::foreign("generator(train-00.txt)", "StopIteration raised twice");
        assert!(err.to_string().contains("generator(train-00.txt)"));
        assert_eq!(err.kind(), "foreign-call");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.list");
        let err: ProviderError = io.into();
        assert_eq!(err.kind(), "io");
    }
}
