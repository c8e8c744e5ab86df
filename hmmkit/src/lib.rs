//! Discrete hidden Markov models.
//!
//! Scaled forward-backward inference, Viterbi and MAP decoding, Baum-Welch
//! training with convergence control, and seeded sequence generation.
//!
//! The dynamic-programming code is written against the [`EmissionModel`]
//! capability; [`Multinomial`] is the discrete family shipped here.
//!
//! # Quick start
//!
//! ```
//! use hmmkit::{HmmParams, MultinomialHmm};
//!
//! // 2-state fair/loaded coin model
//! let params = HmmParams::from_rows(
//!     vec![0.5, 0.5],
//!     &[vec![0.9, 0.1], vec![0.2, 0.8]],
//!     &[vec![0.5, 0.5], vec![0.8, 0.2]],
//! )
//! .unwrap();
//!
//! let mut model = MultinomialHmm::from_params(params);
//! let obs = vec![0, 0, 1, 0, 0]; // H H T H H
//! let path = model.predict(&obs, None).unwrap();
//! assert_eq!(path.len(), obs.len());
//!
//! let report = model.fit(&obs, None).unwrap();
//! assert_eq!(model.history().len(), report.epochs);
//! ```
//!
//! # Features
//!
//! - `parallel` (default): per-sequence work runs on the rayon pool.
//! - `serde` (default): serde derives and the JSON parameter store.

pub mod dataset;
pub mod decode;
pub mod emission;
pub mod lattice;
pub mod model;
pub mod params;
pub mod persist;
pub mod progress;
pub mod random;
pub mod sample;
pub mod train;

pub use dataset::{alphabet_size, symbols_from_f64, symbols_from_i64, Dataset};
pub use decode::{decode, map, viterbi, DecodeAlgorithm, Decoded, ViterbiWorkspace};
pub use emission::{EmissionModel, EmissionSampler, Multinomial};
pub use hmmkit_core::{HmmError, Result, Scored, Summarizable};
pub use lattice::{log_forward, log_likelihood_log_domain, Lattice};
pub use model::{Init, MultinomialHmm};
pub use params::HmmParams;
#[cfg(feature = "serde")]
pub use persist::JsonParamStore;
pub use persist::{ParamStore, PartialParams};
pub use progress::{NoProgress, ProgressSink, TracingProgress};
pub use random::{categorical, seeded_rng, CategoricalRows};
pub use sample::{sample, Sample};
pub use train::{BaumWelch, CancelToken, FitReport, FitStatus, TrainConfig};

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn distribution(n: usize) -> impl Strategy<Value = Vec<f64>> {
        proptest::collection::vec(0.05f64..1.0, n).prop_map(|mut row| {
            let s: f64 = row.iter().sum();
            row.iter_mut().for_each(|v| *v /= s);
            row
        })
    }

    fn params(k: usize, m: usize) -> impl Strategy<Value = HmmParams> {
        (
            distribution(k),
            proptest::collection::vec(distribution(k), k),
            proptest::collection::vec(distribution(m), k),
        )
            .prop_map(|(initial, transition, emission)| {
                HmmParams::from_rows(initial, &transition, &emission).unwrap()
            })
    }

    fn model_and_obs() -> impl Strategy<Value = (HmmParams, Vec<usize>)> {
        (1usize..=4, 1usize..=4).prop_flat_map(|(k, m)| {
            (params(k, m), proptest::collection::vec(0..m, 1..=60))
        })
    }

    proptest! {
        #[test]
        fn scaled_and_log_forward_agree((p, obs) in model_and_obs()) {
            let scaled = Lattice::new(p.n_hidden()).score(&p, &obs).unwrap();
            let log = log_likelihood_log_domain(&p, &obs).unwrap();
            prop_assert!((scaled - log).abs() < 1e-6, "scaled={} log={}", scaled, log);
        }

        #[test]
        fn viterbi_bounded_by_forward((p, obs) in model_and_obs()) {
            let best = viterbi(&p, &obs).unwrap();
            let total = Lattice::new(p.n_hidden()).score(&p, &obs).unwrap();
            prop_assert!(best.log_prob <= total + 1e-9);
            prop_assert_eq!(best.states.len(), obs.len());
        }

        #[test]
        fn posteriors_are_distributions((p, obs) in model_and_obs()) {
            let mut lattice = Lattice::new(p.n_hidden());
            lattice.run(&p, &obs).unwrap();
            for row in lattice.gamma().chunks(p.n_hidden()) {
                prop_assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            }
        }

        #[test]
        fn training_keeps_rows_stochastic(
            (p, obs) in model_and_obs(),
            split in 0usize..60,
        ) {
            let cut = split.min(obs.len() - 1);
            let lengths = if cut == 0 { vec![obs.len()] } else { vec![cut, obs.len() - cut] };
            let mut model = MultinomialHmm::from_params(p)
                .with_config(TrainConfig { max_epochs: 3, tol: 0.0 });
            model.fit(&obs, Some(lengths.as_slice())).unwrap();
            let fitted = model.params().unwrap();
            prop_assert!((fitted.initial().iter().sum::<f64>() - 1.0).abs() < 1e-9);
            for j in 0..fitted.n_hidden() {
                prop_assert!((fitted.transition_row(j).iter().sum::<f64>() - 1.0).abs() < 1e-9);
                prop_assert!((fitted.emission().row(j).iter().sum::<f64>() - 1.0).abs() < 1e-9);
            }
        }
    }
}
