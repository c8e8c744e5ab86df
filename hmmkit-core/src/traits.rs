//! Core trait definitions shared across hmmkit crates.

/// A type that can produce a summary of its contents.
pub trait Summarizable {
    /// A one-line summary suitable for display.
    fn summary(&self) -> String;
}

/// A type that carries a log-likelihood score.
pub trait Scored {
    /// The natural-log score.
    fn log_likelihood(&self) -> f64;
}
