//! Shared primitives for the hmmkit workspace.
//!
//! `hmmkit-core` provides the foundation the HMM engine builds on:
//!
//! - **Error types**: [`HmmError`] and [`Result`] for structured error handling
//! - **Log-space probability**: [`log_sum_exp`], [`log_mask_zero`] and row helpers
//! - **Traits**: small shared abstractions like [`Summarizable`] and [`Scored`]

pub mod error;
pub mod prob;
pub mod traits;

pub use error::{HmmError, Result};
pub use prob::{check_distribution, log_mask_zero, log_sum_exp, normalize, renormalize};
pub use traits::*;
