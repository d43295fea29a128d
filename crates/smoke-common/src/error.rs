//! Error types for the smoke-forecast services.

use thiserror::Error;

/// Result type alias using ForecastError.
pub type ForecastResult<T> = Result<T, ForecastError>;

/// Primary error type for the forecast pipeline.
#[derive(Debug, Error)]
pub enum ForecastError {
    // === Retrieval ===
    #[error("retry budget exhausted after {0} failures")]
    BudgetExhausted(u32),

    // === Grouping / rendering ===
    #[error("incomplete tile set for {timestamp}: {got}/{want} tiles")]
    IncompleteTileSet {
        timestamp: String,
        got: usize,
        want: usize,
    },

    #[error("mosaic assembly failed: {0}")]
    Mosaic(String),

    // === Encode / publish ===
    #[error("storage error: {0}")]
    Storage(String),

    #[error("publication incomplete: missing {0}")]
    PublicationIncomplete(String),

    // === Infrastructure ===
    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ForecastError {
    /// Whether this condition must terminate the whole run. Everything else
    /// is absorbed at the component that detects it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ForecastError::BudgetExhausted(_) | ForecastError::PublicationIncomplete(_)
        )
    }
}

impl From<std::io::Error> for ForecastError {
    fn from(err: std::io::Error) -> Self {
        ForecastError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ForecastError::BudgetExhausted(26).is_fatal());
        assert!(ForecastError::PublicationIncomplete("utah h264".to_string()).is_fatal());
        assert!(!ForecastError::IncompleteTileSet {
            timestamp: "2021-08-10T05:00:00Z".to_string(),
            got: 24,
            want: 25,
        }
        .is_fatal());
    }
}
