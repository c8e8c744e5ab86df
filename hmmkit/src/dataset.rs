//! Datasets of one or more concatenated observation sequences.
//!
//! A dataset is a flat sample buffer plus an optional `lengths` array whose
//! prefix sums mark sequence boundaries. Boundaries are checked once on
//! construction; afterwards every sequence is a non-empty sub-slice.

use std::ops::Range;

use hmmkit_core::{HmmError, Result};

/// Validated view of `(X, lengths)`.
#[derive(Debug, Clone)]
pub struct Dataset<'a, T> {
    samples: &'a [T],
    bounds: Vec<Range<usize>>,
}

impl<'a, T> Dataset<'a, T> {
    /// Split `samples` according to `lengths` (`None` means one sequence).
    ///
    /// # Errors
    ///
    /// - [`HmmError::Validation`] if `lengths` is `Some(&[])`
    /// - [`HmmError::LengthMismatch`] if `Σ lengths != samples.len()`; a sum
    ///   that overflows is reported as `usize::MAX`
    /// - [`HmmError::EmptySequence`] if any sequence has length zero
    pub fn new(samples: &'a [T], lengths: Option<&[usize]>) -> Result<Self> {
        let bounds = match lengths {
            None => {
                if samples.is_empty() {
                    return Err(HmmError::EmptySequence { index: 0 });
                }
                vec![0..samples.len()]
            }
            Some(lengths) => {
                if lengths.is_empty() {
                    return Err(HmmError::Validation(
                        "lengths is empty, expected at least one sequence length".into(),
                    ));
                }
                let total = lengths
                    .iter()
                    .try_fold(0usize, |acc, &n| acc.checked_add(n))
                    .unwrap_or(usize::MAX);
                if total != samples.len() {
                    return Err(HmmError::LengthMismatch {
                        total,
                        n_samples: samples.len(),
                    });
                }
                if let Some(index) = lengths.iter().position(|&n| n == 0) {
                    return Err(HmmError::EmptySequence { index });
                }
                let mut start = 0;
                lengths
                    .iter()
                    .map(|&n| {
                        let range = start..start + n;
                        start += n;
                        range
                    })
                    .collect()
            }
        };
        Ok(Self { samples, bounds })
    }

    /// A dataset holding exactly one sequence.
    pub fn single(samples: &'a [T]) -> Result<Self> {
        Self::new(samples, None)
    }

    /// All samples, concatenated.
    pub fn samples(&self) -> &'a [T] {
        self.samples
    }

    /// `start..end` of every sequence, in order.
    pub fn bounds(&self) -> &[Range<usize>] {
        &self.bounds
    }

    /// Number of sequences.
    pub fn n_sequences(&self) -> usize {
        self.bounds.len()
    }

    /// Total number of samples.
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// The `i`-th sequence.
    pub fn sequence(&self, i: usize) -> &'a [T] {
        &self.samples[self.bounds[i].clone()]
    }

    /// Iterate over the sequences in order.
    pub fn iter(&self) -> impl Iterator<Item = &'a [T]> + '_ {
        self.bounds.iter().map(move |r| &self.samples[r.clone()])
    }
}

impl<'a, T: Sync> Dataset<'a, T> {
    /// Apply `f` to every sequence and collect the results in sequence order.
    ///
    /// `init` builds per-worker scratch state (e.g. a lattice) that `f`
    /// reuses across sequences. With the `parallel` feature the sequences are
    /// spread over the rayon pool; the output order never changes. Errors are
    /// tagged with the index of the sequence that produced them, and when
    /// several sequences fail the lowest index wins.
    pub fn map_sequences<S, U, I, F>(&self, init: I, f: F) -> Result<Vec<U>>
    where
        U: Send,
        I: Fn() -> S + Sync + Send,
        F: Fn(&mut S, &'a [T]) -> Result<U> + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            // Reduce in order so the lowest failing sequence is the one reported.
            let results: Vec<Result<U>> = (0..self.n_sequences())
                .into_par_iter()
                .map_init(init, |scratch, i| {
                    f(scratch, self.sequence(i)).map_err(|e| e.in_sequence(i))
                })
                .collect();
            results.into_iter().collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            let mut scratch = init();
            (0..self.n_sequences())
                .map(|i| f(&mut scratch, self.sequence(i)).map_err(|e| e.in_sequence(i)))
                .collect()
        }
    }
}

/// Convert raw integer symbols, rejecting negatives.
pub fn symbols_from_i64(raw: &[i64]) -> Result<Vec<usize>> {
    raw.iter()
        .enumerate()
        .map(|(position, &v)| {
            usize::try_from(v).map_err(|_| HmmError::InvalidSymbol {
                position,
                value: v as f64,
            })
        })
        .collect()
}

/// Convert raw floating-point symbols, rejecting non-integers and negatives.
pub fn symbols_from_f64(raw: &[f64]) -> Result<Vec<usize>> {
    raw.iter()
        .enumerate()
        .map(|(position, &v)| {
            if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= usize::MAX as f64 {
                Ok(v as usize)
            } else {
                Err(HmmError::InvalidSymbol { position, value: v })
            }
        })
        .collect()
}

/// `max(symbol) + 1`, the alphabet size implied by some data.
pub fn alphabet_size(symbols: &[usize]) -> usize {
    symbols.iter().max().map_or(0, |&m| m + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sequence_without_lengths() {
        let x = [0, 1, 1];
        let d = Dataset::new(&x, None).unwrap();
        assert_eq!(d.n_sequences(), 1);
        assert_eq!(d.bounds(), &[0..3]);
    }

    #[test]
    fn lengths_split_in_order() {
        let x = [0, 1, 2, 3, 4];
        let d = Dataset::new(&x, Some(&[3, 2][..])).unwrap();
        let seqs: Vec<&[i32]> = d.iter().collect();
        assert_eq!(seqs, vec![&[0, 1, 2][..], &[3, 4][..]]);
        assert_eq!(d.sequence(1), &[3, 4]);
    }

    #[test]
    fn lengths_must_cover_samples() {
        let x = [0, 1, 0, 1];
        match Dataset::new(&x, Some(&[3, 2][..])) {
            Err(HmmError::LengthMismatch { total, n_samples }) => {
                assert_eq!((total, n_samples), (5, 4));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(Dataset::new(&x, Some(&[1, 2][..])).is_err());
    }

    #[test]
    fn overflowing_lengths_are_a_mismatch() {
        let x = [0];
        match Dataset::new(&x, Some(&[usize::MAX, 2][..])) {
            Err(HmmError::LengthMismatch { total, n_samples }) => {
                assert_eq!((total, n_samples), (usize::MAX, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_lengths_list_rejected() {
        let empty: [usize; 0] = [];
        let err = Dataset::new(&empty, Some(&[][..])).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("lengths is empty"), "{err}");
        assert!(Dataset::new(&[0, 1][..], Some(&[][..])).unwrap_err().is_validation());
    }

    #[test]
    fn empty_sequences_rejected() {
        let empty: [usize; 0] = [];
        assert!(matches!(
            Dataset::new(&empty, None),
            Err(HmmError::EmptySequence { index: 0 })
        ));
        let x = [0, 1];
        assert!(matches!(
            Dataset::new(&x, Some(&[2, 0][..])),
            Err(HmmError::EmptySequence { index: 1 })
        ));
    }

    #[test]
    fn map_sequences_keeps_order_and_tags_errors() {
        let x = [1, 1, 2, 2, 2, 3];
        let d = Dataset::new(&x, Some(&[2, 3, 1][..])).unwrap();
        let lens = d.map_sequences(|| (), |_, s| Ok(s.len())).unwrap();
        assert_eq!(lens, vec![2, 3, 1]);

        let err = d
            .map_sequences(
                || (),
                |_, s| {
                    if s[0] == 3 {
                        Err(HmmError::Degenerate {
                            sequence: 0,
                            t: 0,
                            reason: "boom".into(),
                        })
                    } else {
                        Ok(())
                    }
                },
            )
            .unwrap_err();
        assert!(matches!(err, HmmError::Degenerate { sequence: 2, .. }));
    }

    #[test]
    fn lowest_failing_sequence_is_reported() {
        let x: Vec<usize> = (0..64).collect();
        let lengths = vec![1; 64];
        let d = Dataset::new(&x, Some(lengths.as_slice())).unwrap();
        for _ in 0..20 {
            let err = d
                .map_sequences(
                    || (),
                    |_, s| {
                        if s[0] % 7 == 3 {
                            Err(HmmError::EmptySequence { index: 0 })
                        } else {
                            Ok(())
                        }
                    },
                )
                .unwrap_err();
            assert!(matches!(err, HmmError::EmptySequence { index: 3 }), "{err:?}");
        }
    }

    #[test]
    fn raw_symbol_conversion() {
        assert_eq!(symbols_from_i64(&[0, 3, 1]).unwrap(), vec![0, 3, 1]);
        assert!(matches!(
            symbols_from_i64(&[0, -1]),
            Err(HmmError::InvalidSymbol { position: 1, .. })
        ));
        assert_eq!(symbols_from_f64(&[0.0, 2.0]).unwrap(), vec![0, 2]);
        assert!(symbols_from_f64(&[0.5]).is_err());
        assert!(symbols_from_f64(&[-1.0]).is_err());
        assert!(symbols_from_f64(&[f64::NAN]).is_err());
    }

    #[test]
    fn alphabet_from_max_symbol() {
        assert_eq!(alphabet_size(&[0, 4, 2]), 5);
        assert_eq!(alphabet_size(&[]), 0);
    }
}
