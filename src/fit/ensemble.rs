use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Serialize, Deserialize};
use tracing::{debug, info};
use crate::error::{InferenceError, Result};
use crate::problem::InferenceProblem;
use super::posterior::LogPosterior;
use super::result::{Backend, InferenceResult};
use super::{Estimator, progress_bar};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleSettings {

    pub n_walkers : usize,

    /// Steps kept after burn-in.
    pub n_steps : usize,

    /// Burn-in steps, discarded.
    pub n_initial_steps : usize,

    /// Stretch scale a of the proposal; z is drawn from g(z) ~ 1/sqrt(z) on [1/a, a].
    pub stretch : f64,

    pub seed : Option<u64>,

    /// Label the result columns with the parameters' tex names.
    pub use_tex : bool,

    pub verbose : bool

}

impl Default for EnsembleSettings {

    fn default() -> Self {
        Self {
            n_walkers : 20,
            n_steps : 1000,
            n_initial_steps : 100,
            stretch : 2.0,
            seed : None,
            use_tex : false,
            verbose : false
        }
    }

}

impl EnsembleSettings {

    pub fn from_json(s : &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    fn validate(&self, dim : usize) -> Result<()> {
        if self.n_walkers < 2 * dim || self.n_walkers < 2 {
            return Err(InferenceError::InvalidSettings(format!(
                "{} walkers for {} parameters; at least twice as many walkers as parameters are required",
                self.n_walkers, dim
            )));
        }
        if !(self.stretch > 1.0) {
            return Err(InferenceError::InvalidSettings(format!("stretch scale {} must exceed 1", self.stretch)));
        }
        if self.n_steps == 0 {
            return Err(InferenceError::InvalidSettings("at least one step is required".to_string()));
        }
        Ok(())
    }

    /// Stretch factor z = ((a - 1) u + 1)^2 / a, u ~ U(0, 1).
    fn sample_z<R : Rng>(&self, rng : &mut R) -> f64 {
        let a = self.stretch;
        let u : f64 = rng.gen();
        ((a - 1.) * u + 1.).powi(2) / a
    }

}

/// Affine-invariant ensemble sampler (Goodman & Weare stretch move). The ensemble is split
/// in two halves; each walker of one half moves along the line through a random walker of
/// the other half. Only forward model responses are needed.
pub struct EnsembleSolver {

    posterior : LogPosterior,

    settings : EnsembleSettings,

    result : Option<InferenceResult>

}

impl EnsembleSolver {

    pub fn new(problem : &InferenceProblem, settings : Option<EnsembleSettings>) -> Result<Self> {
        let settings = settings.unwrap_or_default();
        let posterior = LogPosterior::new(problem)?;
        settings.validate(posterior.dim())?;
        Ok(Self { posterior, settings, result : None })
    }

    pub fn log_posterior(&self) -> &LogPosterior {
        &self.posterior
    }

    pub fn settings(&self) -> &EnsembleSettings {
        &self.settings
    }

    pub fn run(&self) -> Result<InferenceResult> {
        let s = &self.settings;
        let post = &self.posterior;
        let (n, dim) = (s.n_walkers, post.dim());
        let mut rng = match s.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy()
        };
        info!(
            "ensemble sampler: {} walkers, {} burn-in + {} steps over {:?}",
            n, s.n_initial_steps, s.n_steps, post.names()
        );

        let mut positions = (0..n).map(|_| post.sample_prior(&mut rng) ).collect::<Result<Vec<DVector<f64>>>>()?;
        let mut log_probs = post.log_prob_batch(&positions)?;
        if let Some(k) = log_probs.iter().position(|lp| lp.is_nan() ) {
            return Err(InferenceError::NonFinite(format!("initial log-posterior of walker {}", k)));
        }

        let total = s.n_initial_steps + s.n_steps;
        let progress = progress_bar(total as u64, s.verbose, "ensemble");
        let mut chains = vec![DMatrix::zeros(s.n_steps, dim); n];
        let mut accepted = vec![0usize; n];
        let half = n / 2;
        for step in 0..total {
            for (active, other) in vec![(0..half, half..n), (half..n, 0..half)] {
                let mut proposals = Vec::with_capacity(active.len());
                let mut zs = Vec::with_capacity(active.len());
                for i in active.clone() {
                    let z = s.sample_z(&mut rng);
                    let j = rng.gen_range(other.clone());
                    proposals.push(&positions[j] + (&positions[i] - &positions[j]) * z);
                    zs.push(z);
                }
                let proposed_lps = post.log_prob_batch(&proposals)?;
                for (k, i) in active.enumerate() {
                    let lp = proposed_lps[k];
                    let ln_q = (dim as f64 - 1.) * zs[k].ln() + lp - log_probs[i];
                    let u : f64 = rng.gen();
                    if lp.is_finite() && u.ln() < ln_q {
                        positions[i] = proposals[k].clone();
                        log_probs[i] = lp;
                        if step >= s.n_initial_steps {
                            accepted[i] += 1;
                        }
                    }
                }
            }
            if step >= s.n_initial_steps {
                for (chain, pos) in chains.iter_mut().zip(positions.iter()) {
                    chain.row_mut(step - s.n_initial_steps).tr_copy_from(pos);
                }
            }
            if step + 1 == s.n_initial_steps {
                debug!("burn-in done");
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        let accept_rates : Vec<f64> = accepted.iter().map(|a| *a as f64 / s.n_steps as f64 ).collect();
        info!("mean acceptance {:.3}", accept_rates.iter().sum::<f64>() / n as f64);
        let result = InferenceResult::new(post.names().to_vec(), chains, accept_rates, Backend::Ensemble)?;
        if s.use_tex {
            result.with_tex_names(post.tex_names())
        } else {
            Ok(result)
        }
    }

}

impl Estimator for EnsembleSolver {

    fn fit(&mut self) -> Result<&InferenceResult> {
        let result = self.run()?;
        Ok(&*self.result.insert(result))
    }

    fn posterior(&self) -> Option<&InferenceResult> {
        self.result.as_ref()
    }

}
