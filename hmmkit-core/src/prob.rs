//! Log-space probability helpers for numerically stable computation.
//!
//! Slice-level operations the HMM recursions need: log-sum-exp, zero-safe
//! logarithms and in-place normalisation of probability rows.

use crate::{HmmError, Result};

/// `ln(p)` with `ln(0) = -∞` and no floating-point warning path.
#[inline]
pub fn log_mask_zero(p: f64) -> f64 {
    if p <= 0.0 {
        f64::NEG_INFINITY
    } else {
        p.ln()
    }
}

/// Log-sum-exp over a slice, shifted by the maximum.
///
/// Returns `-∞` for an empty slice or when every entry is `-∞`.
pub fn log_sum_exp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = xs.iter().map(|&x| (x - max).exp()).sum();
    max + sum.ln()
}

/// Divide a nonnegative row by its sum in place and return the sum.
///
/// A zero-sum row is left untouched; callers decide whether that is an error.
pub fn normalize(row: &mut [f64]) -> f64 {
    let sum: f64 = row.iter().sum();
    if sum > 0.0 {
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
    sum
}

/// Renormalise `row` when its sum is more than `tol` away from one.
///
/// Rows already within `tol` are left bit-for-bit unchanged. Returns `true`
/// if the row was rescaled.
pub fn renormalize(row: &mut [f64], tol: f64) -> bool {
    let sum: f64 = row.iter().sum();
    if (sum - 1.0).abs() > tol && sum > 0.0 {
        normalize(row);
        true
    } else {
        false
    }
}

/// Check that `row` is a probability distribution within `tol`.
///
/// `what` names the row in the error message, e.g. `"transition row 2"`.
pub fn check_distribution(row: &[f64], tol: f64, what: &str) -> Result<()> {
    for (i, &p) in row.iter().enumerate() {
        if !p.is_finite() || p < 0.0 {
            return Err(HmmError::Configuration(format!(
                "{what} entry {i} is {p}, expected a finite nonnegative probability"
            )));
        }
    }
    let sum: f64 = row.iter().sum();
    if (sum - 1.0).abs() > tol {
        return Err(HmmError::Configuration(format!(
            "{what} sums to {sum}, expected 1 within {tol}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-10;

    #[test]
    fn log_sum_exp_stable() {
        let r = log_sum_exp(&[-1000.0, -1001.0]);
        assert!(r.is_finite());
        assert!(r > -1000.0 && r < -999.0);

        let big = log_sum_exp(&[700.0, 700.0]);
        assert!((big - (700.0 + 2.0_f64.ln())).abs() < 1e-10);

        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
        assert_eq!(
            log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]),
            f64::NEG_INFINITY
        );
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY, 5.0]), 5.0);
    }

    #[test]
    fn normalize_row() {
        let mut row = vec![1.0, 3.0];
        let sum = normalize(&mut row);
        assert_eq!(sum, 4.0);
        assert!((row[0] - 0.25).abs() < TOL);

        let mut zeros = vec![0.0, 0.0];
        assert_eq!(normalize(&mut zeros), 0.0);
        assert_eq!(zeros, vec![0.0, 0.0]);
    }

    #[test]
    fn renormalize_only_rescales_drifted_rows() {
        let mut drifted = vec![0.5, 0.5000005];
        assert!(renormalize(&mut drifted, 1e-12));
        assert!((drifted.iter().sum::<f64>() - 1.0).abs() < 1e-12);

        let mut exact = vec![0.1, 0.2, 0.7];
        let before = exact.clone();
        assert!(!renormalize(&mut exact, 1e-12));
        assert_eq!(exact, before);

        let mut zeros = vec![0.0, 0.0];
        assert!(!renormalize(&mut zeros, 1e-12));
    }

    #[test]
    fn check_distribution_rejects_bad_rows() {
        assert!(check_distribution(&[0.4, 0.6], 1e-9, "row").is_ok());
        assert!(check_distribution(&[0.4, 0.5], 1e-9, "row").is_err());
        assert!(check_distribution(&[-0.1, 1.1], 1e-9, "row").is_err());
        let err = check_distribution(&[f64::NAN, 1.0], 1e-9, "emission row 1").unwrap_err();
        assert!(err.to_string().contains("emission row 1"));
    }
}
