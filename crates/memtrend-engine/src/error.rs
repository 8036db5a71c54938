//! Crate-level error types for `memtrend-engine`.
//!
//! Provides a unified [`EngineError`] composing sub-module errors together
//! with [`error_stack::Report`] for context-carrying propagation. Note that
//! a fitter's `NotReady` and `Degenerate` outcomes are *not* errors: both
//! are expected "no signal this cycle" states, represented as
//! [`FitOutcome`](crate::fitter::FitOutcome) variants and mapped by the
//! engine to an empty action set.

use crate::config::ConfigError;
use thiserror::Error;

/// Crate-level error type for `memtrend-engine`.
///
/// Wraps each sub-module's typed error via `#[from]` so that the `?`
/// operator converts them automatically.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A configuration-related error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The caller supplied the wrong number of per-order samples.
    #[error("Expected {expected} per-order samples, got {got}")]
    SampleCount { expected: usize, got: usize },
}

/// Convenience result alias using [`error_stack::Report`].
///
/// Equivalent to `Result<T, error_stack::Report<EngineError>>`.
pub type EngineResult<T> = Result<T, error_stack::Report<EngineError>>;

#[cfg(test)]
mod tests {
    use super::*;
    use error_stack::{Report, ResultExt};

    #[test]
    fn config_error_converts_via_from() {
        let cfg_err = ConfigError::UnsupportedFormat("xml".to_string());
        let engine_err: EngineError = cfg_err.into();

        assert!(matches!(engine_err, EngineError::Config(_)));
        assert!(engine_err.to_string().contains("xml"));
    }

    #[test]
    fn sample_count_display() {
        let err = EngineError::SampleCount {
            expected: 11,
            got: 4,
        };
        assert_eq!(err.to_string(), "Expected 11 per-order samples, got 4");
    }

    #[test]
    fn report_carries_context() {
        let result: EngineResult<()> = Err(Report::new(EngineError::SampleCount {
            expected: 11,
            got: 4,
        }))
        .attach_printable("while evaluating node 0");

        let report = result.unwrap_err();
        let display = format!("{report:?}");

        assert!(display.contains("per-order samples"));
        assert!(display.contains("while evaluating node 0"));
    }
}
