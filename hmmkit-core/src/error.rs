//! Structured error types for hmmkit.
//!
//! Variants fall into four classes. Configuration errors and validation
//! errors are fatal and raised before any parameter is touched. Numerical
//! degeneracies abort only the unit of work that produced them. Persistence
//! errors wrap I/O and (de)serialisation failures.

use thiserror::Error;

/// Unified error type for all hmmkit operations.
#[derive(Debug, Error)]
pub enum HmmError {
    /// Invalid model configuration (init mode, hyper-parameters, parameter bundle).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Inference requested before parameters exist.
    #[error("configuration error: model has no parameters yet; call fit() or set_params() first")]
    NotFitted,

    /// Decoder name outside the supported set.
    #[error("invalid argument: unknown decode algorithm {name:?}, expected one of {valid:?}")]
    UnknownAlgorithm {
        name: String,
        valid: &'static [&'static str],
    },

    /// A sequence with no observations.
    #[error("validation error: sequence {index} is empty, every sequence needs at least one observation")]
    EmptySequence { index: usize },

    /// A raw symbol that is negative, non-integer or not finite.
    #[error("validation error: symbol at position {position} is {value}, symbols must be nonnegative integers")]
    InvalidSymbol { position: usize, value: f64 },

    /// A symbol outside the model's alphabet.
    #[error("validation error: symbol at position {position} is {symbol} but the model only emits symbols up to {}", .n_symbols.saturating_sub(1))]
    SymbolOutOfRange {
        position: usize,
        symbol: usize,
        n_symbols: usize,
    },

    /// Sequence lengths disagree with the number of samples.
    #[error("validation error: lengths sum to {total} but there are {n_samples} samples")]
    LengthMismatch { total: usize, n_samples: usize },

    /// Other shape or value problems in caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Zero-likelihood observation or non-finite intermediate value.
    #[error("numerical degeneracy in sequence {sequence} at t = {t}: {reason}")]
    Degenerate {
        sequence: usize,
        t: usize,
        reason: String,
    },

    /// A re-estimated parameter set that is not a valid model, for example
    /// after averaging per-sequence estimates.
    #[error("numerical degeneracy in re-estimated parameters: {reason}")]
    DegenerateEstimate { reason: String },

    /// I/O error while loading or saving parameters.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed persisted parameters.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl HmmError {
    /// `true` for errors raised before computation because of bad settings.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            HmmError::Configuration(_) | HmmError::NotFitted | HmmError::UnknownAlgorithm { .. }
        )
    }

    /// `true` for errors caused by malformed caller input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            HmmError::EmptySequence { .. }
                | HmmError::InvalidSymbol { .. }
                | HmmError::SymbolOutOfRange { .. }
                | HmmError::LengthMismatch { .. }
                | HmmError::Validation(_)
        )
    }

    /// `true` for zero-likelihood or NaN/Inf conditions.
    pub fn is_degenerate(&self) -> bool {
        matches!(
            self,
            HmmError::Degenerate { .. } | HmmError::DegenerateEstimate { .. }
        )
    }

    /// Re-tag a degeneracy with the index of the sequence it happened in.
    pub fn in_sequence(self, index: usize) -> Self {
        match self {
            HmmError::Degenerate { t, reason, .. } => HmmError::Degenerate {
                sequence: index,
                t,
                reason,
            },
            HmmError::EmptySequence { .. } => HmmError::EmptySequence { index },
            other => other,
        }
    }
}

/// Convenience alias used throughout hmmkit.
pub type Result<T> = std::result::Result<T, HmmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_value_and_constraint() {
        let err = HmmError::SymbolOutOfRange {
            position: 3,
            symbol: 2,
            n_symbols: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("position 3"));
        assert!(msg.contains("is 2"));
        assert!(msg.contains("up to 1"));

        let err = HmmError::UnknownAlgorithm {
            name: "beam".into(),
            valid: &["viterbi", "map"],
        };
        let msg = err.to_string();
        assert!(msg.contains("beam"));
        assert!(msg.contains("viterbi"));
        assert!(msg.contains("map"));
    }

    #[test]
    fn classification() {
        assert!(HmmError::NotFitted.is_configuration());
        assert!(HmmError::LengthMismatch { total: 5, n_samples: 4 }.is_validation());
        assert!(HmmError::Degenerate {
            sequence: 0,
            t: 1,
            reason: "zero".into()
        }
        .is_degenerate());
        assert!(!HmmError::Validation("x".into()).is_configuration());
    }

    #[test]
    fn estimate_degeneracy_names_no_sequence() {
        let err = HmmError::DegenerateEstimate {
            reason: "transition row 1 sums to 0".into(),
        };
        assert!(err.is_degenerate());
        let msg = err.to_string();
        assert!(!msg.contains("sequence"), "{msg}");
        assert!(msg.contains("transition row 1"));
        assert!(matches!(err.in_sequence(3), HmmError::DegenerateEstimate { .. }));
    }

    #[test]
    fn in_sequence_retags_degeneracy() {
        let err = HmmError::Degenerate {
            sequence: 0,
            t: 4,
            reason: "c[t] = 0".into(),
        }
        .in_sequence(7);
        match err {
            HmmError::Degenerate { sequence, t, .. } => {
                assert_eq!(sequence, 7);
                assert_eq!(t, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: HmmError = io.into();
        assert!(err.to_string().contains("missing"));
    }
}
