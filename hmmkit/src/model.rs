//! User-facing discrete HMM.
//!
//! [`MultinomialHmm`] owns one parameter set and its training history and
//! wires datasets through the lattice, decoders, trainer and sampler.

use std::path::{Path, PathBuf};

use hmmkit_core::{HmmError, Result, Summarizable};
use rand::Rng;

use crate::dataset::{alphabet_size, Dataset};
use crate::decode::{self, DecodeAlgorithm, Decoded};
use crate::emission::EmissionModel;
use crate::lattice::{log_likelihood_log_domain, Lattice};
use crate::params::HmmParams;
use crate::persist::ParamStore;
use crate::progress::{NoProgress, ProgressSink};
use crate::random::seeded_rng;
use crate::sample::{self, Sample};
use crate::train::{closed_form, BaumWelch, CancelToken, FitReport, TrainConfig};

/// Where the first parameters come from.
#[derive(Debug, Clone, PartialEq)]
pub enum Init {
    /// Random rows from a seeded generator; `n_symbols` is taken from the
    /// first training set.
    Random { seed: u64 },
    /// A JSON parameter file.
    Path(PathBuf),
    /// Explicit parameters.
    Params(HmmParams),
}

impl Default for Init {
    fn default() -> Self {
        Init::Random { seed: 0 }
    }
}

impl Init {
    /// Parse `"random"` or the path of an existing parameter file.
    pub fn parse(s: &str, seed: u64) -> Result<Self> {
        if s.eq_ignore_ascii_case("random") {
            return Ok(Init::Random { seed });
        }
        let path = Path::new(s);
        if path.is_file() {
            return Ok(Init::Path(path.to_path_buf()));
        }
        Err(HmmError::Configuration(format!(
            "init must be \"random\" or the path of an existing parameter file, got {s:?}"
        )))
    }

    fn resolve(&self, n_hidden: usize, observations: &[usize]) -> Result<HmmParams> {
        let params = match self {
            Init::Random { seed } => {
                HmmParams::random(n_hidden, alphabet_size(observations), &mut seeded_rng(*seed))?
            }
            Init::Path(path) => load_path(path)?,
            Init::Params(params) => params.clone(),
        };
        if params.n_hidden() != n_hidden {
            return Err(HmmError::Configuration(format!(
                "initial parameters have {} hidden states, model expects {n_hidden}",
                params.n_hidden()
            )));
        }
        Ok(params)
    }
}

#[cfg(feature = "serde")]
fn load_path(path: &Path) -> Result<HmmParams> {
    crate::persist::JsonParamStore::new(path).load()?.into_params()
}

#[cfg(not(feature = "serde"))]
fn load_path(path: &Path) -> Result<HmmParams> {
    Err(HmmError::Configuration(format!(
        "cannot load {}: parameter files need the `serde` feature",
        path.display()
    )))
}

/// Discrete-emission hidden Markov model.
#[derive(Debug, Clone)]
pub struct MultinomialHmm {
    n_hidden: usize,
    init: Init,
    algorithm: DecodeAlgorithm,
    config: TrainConfig,
    params: Option<HmmParams>,
    history: Vec<f64>,
}

impl MultinomialHmm {
    /// Unfitted model with `n_hidden` states and default settings.
    pub fn new(n_hidden: usize) -> Result<Self> {
        if n_hidden == 0 {
            return Err(HmmError::Configuration("n_hidden must be >= 1, got 0".into()));
        }
        Ok(Self {
            n_hidden,
            init: Init::default(),
            algorithm: DecodeAlgorithm::default(),
            config: TrainConfig::default(),
            params: None,
            history: Vec::new(),
        })
    }

    /// Model that starts from `params`.
    pub fn from_params(params: HmmParams) -> Self {
        Self {
            n_hidden: params.n_hidden(),
            init: Init::default(),
            algorithm: DecodeAlgorithm::default(),
            config: TrainConfig::default(),
            params: Some(params),
            history: Vec::new(),
        }
    }

    /// Build from a parameter store; the bundle must be complete.
    pub fn load(store: &dyn ParamStore) -> Result<Self> {
        Ok(Self::from_params(store.load()?.into_params()?))
    }

    pub fn with_init(mut self, init: Init) -> Self {
        self.init = init;
        self
    }

    /// Shorthand for `with_init(Init::Random { seed })`.
    pub fn with_seed(self, seed: u64) -> Self {
        self.with_init(Init::Random { seed })
    }

    pub fn with_algorithm(mut self, algorithm: DecodeAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_config(mut self, config: TrainConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the parameters.
    ///
    /// Once parameters exist their shape is fixed; a bundle with a different
    /// number of states or symbols is rejected.
    pub fn set_params(&mut self, params: HmmParams) -> Result<()> {
        params.validate()?;
        if params.n_hidden() != self.n_hidden {
            return Err(HmmError::Configuration(format!(
                "parameters have {} hidden states, model has {}",
                params.n_hidden(),
                self.n_hidden
            )));
        }
        if let Some(current) = &self.params {
            if current.n_symbols() != params.n_symbols() {
                return Err(HmmError::Configuration(format!(
                    "parameters emit {} symbols, model emits {}",
                    params.n_symbols(),
                    current.n_symbols()
                )));
            }
        }
        self.params = Some(params);
        Ok(())
    }

    pub fn n_hidden(&self) -> usize {
        self.n_hidden
    }

    /// Alphabet size, once parameters exist.
    pub fn n_symbols(&self) -> Option<usize> {
        self.params.as_ref().map(HmmParams::n_symbols)
    }

    pub fn params(&self) -> Option<&HmmParams> {
        self.params.as_ref()
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn algorithm(&self) -> DecodeAlgorithm {
        self.algorithm
    }

    /// Mean log-likelihood of every committed training epoch, across fits.
    pub fn history(&self) -> &[f64] {
        &self.history
    }

    fn fitted(&self) -> Result<&HmmParams> {
        self.params.as_ref().ok_or(HmmError::NotFitted)
    }

    /// Parameters plus a validated dataset whose symbols are all in range.
    fn prepare<'a>(&self, x: &'a [usize], lengths: Option<&[usize]>) -> Result<(&HmmParams, Dataset<'a, usize>)> {
        let params = self.fitted()?;
        let dataset = Dataset::new(x, lengths)?;
        params.emission().check_observations(x)?;
        Ok((params, dataset))
    }

    /// Train with Baum-Welch.
    pub fn fit(&mut self, x: &[usize], lengths: Option<&[usize]>) -> Result<FitReport> {
        self.fit_with(x, lengths, &mut NoProgress, None)
    }

    /// Train with a progress sink and an optional cancel token.
    ///
    /// The first fit initialises parameters from the configured [`Init`];
    /// later fits continue from the current parameters. On error the model
    /// is left exactly as it was.
    pub fn fit_with(
        &mut self,
        x: &[usize],
        lengths: Option<&[usize]>,
        progress: &mut dyn ProgressSink,
        cancel: Option<CancelToken>,
    ) -> Result<FitReport> {
        let dataset = Dataset::new(x, lengths)?;
        let mut params = match &self.params {
            Some(p) => p.clone(),
            None => self.init.resolve(self.n_hidden, x)?,
        };
        let mut trainer = BaumWelch::new(self.config);
        if let Some(token) = cancel {
            trainer = trainer.with_cancel(token);
        }
        let report = trainer.run(&mut params, &dataset, &mut self.history, progress)?;
        self.params = Some(params);
        Ok(report)
    }

    /// Total log-likelihood (sum over sequences), scaled forward pass.
    pub fn score(&self, x: &[usize], lengths: Option<&[usize]>) -> Result<f64> {
        let (params, dataset) = self.prepare(x, lengths)?;
        let k = params.n_hidden();
        let parts = dataset.map_sequences(|| Lattice::new(k), |lattice, seq| lattice.score(params, seq))?;
        Ok(parts.iter().sum())
    }

    /// Same quantity as [`score`](Self::score), computed in the log domain.
    pub fn score_log(&self, x: &[usize], lengths: Option<&[usize]>) -> Result<f64> {
        let (params, dataset) = self.prepare(x, lengths)?;
        let parts = dataset.map_sequences(|| (), |_, seq| log_likelihood_log_domain(params, seq))?;
        Ok(parts.iter().sum())
    }

    /// Total log-likelihood and posteriors (row-major `len(x) × K`).
    pub fn score_samples(&self, x: &[usize], lengths: Option<&[usize]>) -> Result<(f64, Vec<f64>)> {
        let (params, dataset) = self.prepare(x, lengths)?;
        let k = params.n_hidden();
        let parts = dataset.map_sequences(
            || Lattice::new(k),
            |lattice, seq| {
                let ll = lattice.run(params, seq)?;
                Ok((ll, lattice.gamma().to_vec()))
            },
        )?;
        let mut total = 0.0;
        let mut posteriors = Vec::with_capacity(x.len() * k);
        for (ll, gamma) in parts {
            total += ll;
            posteriors.extend(gamma);
        }
        Ok((total, posteriors))
    }

    /// Posteriors only.
    pub fn predict_proba(&self, x: &[usize], lengths: Option<&[usize]>) -> Result<Vec<f64>> {
        self.score_samples(x, lengths).map(|(_, posteriors)| posteriors)
    }

    /// Decode with `algorithm`, or the model's default when `None`.
    pub fn decode(&self, x: &[usize], lengths: Option<&[usize]>, algorithm: Option<DecodeAlgorithm>) -> Result<Decoded> {
        let (params, dataset) = self.prepare(x, lengths)?;
        decode::decode(params, &dataset, algorithm.unwrap_or(self.algorithm))
    }

    /// Decode with an algorithm given by name (`"viterbi"` or `"map"`).
    pub fn decode_named(&self, x: &[usize], lengths: Option<&[usize]>, algorithm: &str) -> Result<Decoded> {
        let algorithm: DecodeAlgorithm = algorithm.parse()?;
        self.decode(x, lengths, Some(algorithm))
    }

    /// Decoded state path only, with the model's default algorithm.
    pub fn predict(&self, x: &[usize], lengths: Option<&[usize]>) -> Result<Vec<usize>> {
        self.decode(x, lengths, None).map(|d| d.states)
    }

    /// Generate `n` observations and their hidden states.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Sample<usize>> {
        sample::sample(self.fitted()?, n, rng)
    }

    /// Overwrite the parameters with the closed-form estimate from one
    /// sequence's posteriors.
    ///
    /// `gamma` is row-major `N × K`, `xi` is `(N - 1) × K × K`. Shapes and
    /// symbols are checked first; a degenerate estimate is reported and the
    /// parameters are left untouched.
    pub fn mstep(&mut self, gamma: &[f64], xi: &[f64], sequence: &[usize]) -> Result<()> {
        let params = self.fitted()?;
        let k = params.n_hidden();
        let n = sequence.len();
        if n == 0 {
            return Err(HmmError::EmptySequence { index: 0 });
        }
        if gamma.len() != n * k {
            return Err(HmmError::Validation(format!(
                "gamma has {} entries, expected {n} x {k} = {}",
                gamma.len(),
                n * k
            )));
        }
        if xi.len() != (n - 1) * k * k {
            return Err(HmmError::Validation(format!(
                "xi has {} entries, expected {} x {k} x {k} = {}",
                xi.len(),
                n - 1,
                (n - 1) * k * k
            )));
        }
        params.emission().check_observations(sequence)?;

        let mut counts = vec![0.0; k * k];
        for step in xi.chunks(k * k) {
            for (acc, v) in counts.iter_mut().zip(step) {
                *acc += v;
            }
        }
        let (initial, transition, emission) = closed_form(params, sequence, gamma, counts)?;
        let next = HmmParams::new(initial, transition, emission).map_err(|e| HmmError::DegenerateEstimate {
            reason: format!("estimate is not a valid parameter set: {e}"),
        })?;
        self.params = Some(next);
        Ok(())
    }

    /// Marginalized count kernel features.
    ///
    /// For every sequence returns the row-major `M × K` matrix
    /// `(1/N) · onehot(seq)ᵀ · gamma`: entry `(m, k)` is the average
    /// posterior mass of state `k` at positions emitting symbol `m`.
    pub fn marginalized_count_kernel(&self, x: &[usize], lengths: Option<&[usize]>) -> Result<Vec<Vec<f64>>> {
        let (params, dataset) = self.prepare(x, lengths)?;
        let k = params.n_hidden();
        let m = params.n_symbols();
        dataset.map_sequences(
            || Lattice::new(k),
            |lattice, seq| {
                lattice.run(params, seq)?;
                let scale = 1.0 / seq.len() as f64;
                let mut counts = vec![0.0; m * k];
                for (row, &symbol) in lattice.gamma().chunks(k).zip(seq) {
                    for (acc, g) in counts[symbol * k..(symbol + 1) * k].iter_mut().zip(row) {
                        *acc += g * scale;
                    }
                }
                Ok(counts)
            },
        )
    }

    /// Persist the current parameters.
    pub fn save(&self, store: &dyn ParamStore) -> Result<()> {
        store.save(self.fitted()?)
    }
}

impl Summarizable for MultinomialHmm {
    fn summary(&self) -> String {
        match &self.params {
            Some(p) => format!("{} ({} training epochs)", p.summary(), self.history.len()),
            None => format!("HMM: n_hidden={}, not fitted", self.n_hidden),
        }
    }
}
