//! Baum-Welch expectation-maximisation.
//!
//! One epoch runs forward-backward on every sequence (in parallel with the
//! `parallel` feature), turns each sequence's posteriors into its own
//! closed-form estimate of `(initial, transition, emission)`, and then
//! combines the estimates by arithmetic averaging across sequences. The
//! average is unweighted: a two-step sequence counts as much as a
//! thousand-step one. This differs from pooled sufficient statistics and is
//! kept as the documented aggregation rule.
//!
//! Parameters are replaced only after a whole epoch has aggregated
//! successfully. A degenerate epoch or a cancellation leaves them at the
//! last completed epoch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hmmkit_core::{normalize, HmmError, Result, Scored, Summarizable};
use tracing::{debug, info, warn};

use crate::dataset::Dataset;
use crate::emission::EmissionModel;
use crate::lattice::Lattice;
use crate::params::HmmParams;
use crate::progress::ProgressSink;

/// Stopping rule for Baum-Welch.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainConfig {
    /// Upper bound on the number of epochs.
    pub max_epochs: usize,
    /// Stop once the mean log-likelihood changes by less than this.
    pub tol: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            max_epochs: 10,
            tol: 1e-4,
        }
    }
}

impl TrainConfig {
    /// Check the hyper-parameters.
    pub fn validate(&self) -> Result<()> {
        if self.max_epochs == 0 {
            return Err(HmmError::Configuration("max_epochs must be >= 1, got 0".into()));
        }
        if !(self.tol.is_finite() && self.tol >= 0.0) {
            return Err(HmmError::Configuration(format!(
                "tol must be a finite value >= 0, got {}",
                self.tol
            )));
        }
        Ok(())
    }
}

/// Shared flag for stopping a running fit between epochs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the trainer to stop at the next epoch boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a fit ended.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FitStatus {
    /// Two consecutive epochs differed by less than `tol`.
    Converged,
    /// `max_epochs` ran out first. Not an error.
    MaxIterReached,
    /// The cancel token was raised.
    Cancelled,
    /// Epoch `epoch` hit a numerical degeneracy and was discarded.
    Degenerate { epoch: usize, reason: String },
}

/// Outcome of one call to [`BaumWelch::run`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FitReport {
    pub status: FitStatus,
    /// Epochs whose estimates were committed.
    pub epochs: usize,
    /// Mean log-likelihood of each committed epoch of this run.
    pub history: Vec<f64>,
}

impl FitReport {
    pub fn converged(&self) -> bool {
        self.status == FitStatus::Converged
    }
}

impl Scored for FitReport {
    /// Mean log-likelihood of the last committed epoch (`-∞` if none).
    fn log_likelihood(&self) -> f64 {
        self.history.last().copied().unwrap_or(f64::NEG_INFINITY)
    }
}

impl Summarizable for FitReport {
    fn summary(&self) -> String {
        let status = match &self.status {
            FitStatus::Converged => "converged".to_string(),
            FitStatus::MaxIterReached => "max epochs reached".to_string(),
            FitStatus::Cancelled => "cancelled".to_string(),
            FitStatus::Degenerate { epoch, .. } => format!("degenerate at epoch {epoch}"),
        };
        format!(
            "Baum-Welch: {status} after {} epochs, log-likelihood={:.6}",
            self.epochs,
            self.log_likelihood()
        )
    }
}

/// Closed-form estimate from a single sequence.
#[derive(Debug, Clone)]
pub struct SequenceEstimate<E> {
    pub initial: Vec<f64>,
    /// Row-major `K × K`.
    pub transition: Vec<f64>,
    pub emission: E,
    /// `ln p(X)` under the parameters the posteriors came from.
    pub log_likelihood: f64,
}

/// Closed-form M-step from one sequence's posteriors.
///
/// `expected_transitions` holds `Σ_t xi[t]` (row-major `K × K`) and is
/// normalised in place into the new transition matrix. A row with no
/// expected outflow (for instance in a sequence of length one) keeps the
/// current row. Emission rows follow [`EmissionModel::reestimate`].
///
/// Returns `(initial, transition, emission)`, a validation error if the
/// shapes do not match `params`, or a degeneracy if any estimate is not
/// finite.
pub fn closed_form<E: EmissionModel>(
    params: &HmmParams<E>,
    observations: &[E::Observation],
    gamma: &[f64],
    mut expected_transitions: Vec<f64>,
) -> Result<(Vec<f64>, Vec<f64>, E)> {
    let k = params.n_hidden();
    if observations.is_empty() {
        return Err(HmmError::EmptySequence { index: 0 });
    }
    if gamma.len() != observations.len() * k {
        return Err(HmmError::Validation(format!(
            "gamma has {} entries, expected {} x {k} = {}",
            gamma.len(),
            observations.len(),
            observations.len() * k
        )));
    }
    if expected_transitions.len() != k * k {
        return Err(HmmError::Validation(format!(
            "expected transitions have {} entries, expected {k} x {k} = {}",
            expected_transitions.len(),
            k * k
        )));
    }
    let mut initial = gamma[..k].to_vec();
    normalize(&mut initial);

    for (j, row) in expected_transitions.chunks_mut(k).enumerate() {
        if !(normalize(row) > 0.0) {
            row.copy_from_slice(params.transition_row(j));
        }
    }

    let emission = params.emission().reestimate(observations, gamma);

    let finite = initial.iter().chain(&expected_transitions).all(|v| v.is_finite()) && emission.is_finite();
    if !finite {
        return Err(HmmError::Degenerate {
            sequence: 0,
            t: 0,
            reason: "re-estimated parameters contain NaN or infinity".into(),
        });
    }
    Ok((initial, expected_transitions, emission))
}

/// E-step and per-sequence M-step for one sequence.
pub fn estimate_sequence<E: EmissionModel>(
    params: &HmmParams<E>,
    observations: &[E::Observation],
    lattice: &mut Lattice,
) -> Result<SequenceEstimate<E>> {
    let log_likelihood = lattice.run(params, observations)?;
    let k = params.n_hidden();
    let mut counts = vec![0.0; k * k];
    lattice.accumulate_xi(params.transition(), &mut counts)?;
    let (initial, transition, emission) = closed_form(params, observations, lattice.gamma(), counts)?;
    Ok(SequenceEstimate {
        initial,
        transition,
        emission,
        log_likelihood,
    })
}

/// Average per-sequence estimates into one parameter set.
///
/// Returns the new parameters and the mean log-likelihood of the inputs.
pub fn aggregate<E: EmissionModel>(estimates: &[SequenceEstimate<E>]) -> Result<(HmmParams<E>, f64)> {
    let first = estimates
        .first()
        .ok_or_else(|| HmmError::Validation("no sequences to aggregate".into()))?;
    let n = estimates.len() as f64;

    let mut initial = vec![0.0; first.initial.len()];
    let mut transition = vec![0.0; first.transition.len()];
    let mut mean_ll = 0.0;
    for est in estimates {
        for (acc, v) in initial.iter_mut().zip(&est.initial) {
            *acc += v / n;
        }
        for (acc, v) in transition.iter_mut().zip(&est.transition) {
            *acc += v / n;
        }
        mean_ll += est.log_likelihood / n;
    }
    let emissions: Vec<E> = estimates.iter().map(|e| e.emission.clone()).collect();
    let emission = E::average(&emissions)?;

    HmmParams::new(initial, transition, emission)
        .map(|p| (p, mean_ll))
        .map_err(|e| HmmError::DegenerateEstimate {
            reason: format!("averaged estimate is not a valid parameter set: {e}"),
        })
}

/// One full epoch: parallel E-step, then single-writer aggregation.
pub fn run_epoch<E: EmissionModel>(
    params: &HmmParams<E>,
    dataset: &Dataset<'_, E::Observation>,
) -> Result<(HmmParams<E>, f64)> {
    let k = params.n_hidden();
    let estimates = dataset.map_sequences(|| Lattice::new(k), |lattice, seq| estimate_sequence(params, seq, lattice))?;
    aggregate(&estimates)
}

/// Baum-Welch driver.
#[derive(Debug, Clone, Default)]
pub struct BaumWelch {
    config: TrainConfig,
    cancel: Option<CancelToken>,
}

impl BaumWelch {
    pub fn new(config: TrainConfig) -> Self {
        Self { config, cancel: None }
    }

    /// Stop at the next epoch boundary once `token` is raised.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Train `params` in place on `dataset`.
    ///
    /// Each committed epoch's mean log-likelihood is appended to `history`.
    ///
    /// # Errors
    ///
    /// Configuration and validation problems are returned before the first
    /// epoch and leave `params` untouched. A numerical degeneracy is not an
    /// error: it ends the run with [`FitStatus::Degenerate`] and the last
    /// committed parameters.
    pub fn run<E: EmissionModel>(
        &self,
        params: &mut HmmParams<E>,
        dataset: &Dataset<'_, E::Observation>,
        history: &mut Vec<f64>,
        progress: &mut dyn ProgressSink,
    ) -> Result<FitReport> {
        self.config.validate()?;
        params.validate()?;
        params.emission().check_observations(dataset.samples())?;

        let max_epochs = self.config.max_epochs;
        let mut report = FitReport {
            status: FitStatus::MaxIterReached,
            epochs: 0,
            history: Vec::new(),
        };
        let mut previous: Option<f64> = None;

        for epoch in 1..=max_epochs {
            if self.cancelled() {
                report.status = FitStatus::Cancelled;
                return Ok(report);
            }

            let (next, mean_ll) = match run_epoch(params, dataset) {
                Ok(step) => step,
                Err(e) if e.is_degenerate() => {
                    warn!(epoch, error = %e, "epoch aborted, keeping parameters from the previous epoch");
                    report.status = FitStatus::Degenerate {
                        epoch,
                        reason: e.to_string(),
                    };
                    return Ok(report);
                }
                Err(e) => return Err(e),
            };

            if self.cancelled() {
                report.status = FitStatus::Cancelled;
                return Ok(report);
            }

            *params = next;
            history.push(mean_ll);
            report.history.push(mean_ll);
            report.epochs = epoch;

            let delta = previous.map(|p| mean_ll - p);
            debug!(epoch, mean_log_likelihood = mean_ll, delta = ?delta, "baum-welch epoch");
            match delta {
                Some(d) => progress.on_epoch(epoch, max_epochs, &[("log_likelihood", mean_ll), ("delta", d)]),
                None => progress.on_epoch(epoch, max_epochs, &[("log_likelihood", mean_ll)]),
            }

            if delta.is_some_and(|d| d.abs() < self.config.tol) {
                info!(epoch, mean_log_likelihood = mean_ll, "baum-welch converged");
                report.status = FitStatus::Converged;
                return Ok(report);
            }
            previous = Some(mean_ll);
        }

        warn!(
            max_epochs,
            tol = self.config.tol,
            "baum-welch stopped at max_epochs without converging"
        );
        Ok(report)
    }
}
