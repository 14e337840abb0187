use nalgebra::DMatrix;
use indicatif::ProgressBar;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Serialize, Deserialize};
use tracing::{debug, info};
use crate::error::{InferenceError, Result};
use crate::problem::InferenceProblem;
use super::hmc::*;
use super::posterior::LogPosterior;
use super::result::{Backend, InferenceResult};
use super::{Estimator, progress_bar};

/// Transition kernel of the gradient-based sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kernel {

    /// No-U-Turn sampler with multinomial selection along the trajectory.
    Nuts,

    /// Hamiltonian Monte Carlo with a fixed trajectory length.
    Hmc { leapfrog_steps : usize }

}

impl Default for Kernel {

    fn default() -> Self {
        Kernel::Nuts
    }

}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NutsSettings {

    pub n_chains : usize,

    /// Draws kept per chain.
    pub n_steps : usize,

    /// Warm-up transitions per chain (step size and mass matrix adaptation).
    pub n_initial_steps : usize,

    /// Starting point of the step size search.
    pub step_size : f64,

    pub max_tree_depth : usize,

    pub target_accept : f64,

    pub kernel : Kernel,

    pub adapt_mass_matrix : bool,

    /// Chain c is seeded with seed + c. Drawn from entropy when absent.
    pub seed : Option<u64>,

    /// Label the result columns with the parameters' tex names.
    pub use_tex : bool,

    pub verbose : bool

}

impl Default for NutsSettings {

    fn default() -> Self {
        Self {
            n_chains : 1,
            n_steps : 300,
            n_initial_steps : 30,
            step_size : 0.1,
            max_tree_depth : 10,
            target_accept : 0.8,
            kernel : Kernel::Nuts,
            adapt_mass_matrix : true,
            seed : None,
            use_tex : false,
            verbose : false
        }
    }

}

impl NutsSettings {

    pub fn from_json(s : &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    fn validate(&self) -> Result<()> {
        if self.n_chains == 0 || self.n_steps == 0 {
            return Err(InferenceError::InvalidSettings("at least one chain and one step are required".to_string()));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(InferenceError::InvalidSettings(format!("target_accept {} outside (0, 1)", self.target_accept)));
        }
        if let Kernel::Hmc { leapfrog_steps : 0 } = self.kernel {
            return Err(InferenceError::InvalidSettings("HMC needs at least one leapfrog step".to_string()));
        }
        if self.kernel == Kernel::Nuts && self.max_tree_depth == 0 {
            return Err(InferenceError::InvalidSettings("NUTS needs a max_tree_depth of at least one".to_string()));
        }
        Ok(())
    }

}

struct Tree {
    left : PhasePoint,
    right : PhasePoint,
    proposal : PhasePoint,
    log_sum_weight : f64,
    sum_accept : f64,
    n_leapfrog : usize,
    turning : bool,
    diverging : bool
}

fn log_sum_exp(a : f64, b : f64) -> f64 {
    if a == f64::NEG_INFINITY && b == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

// Balanced subtree of 2^depth leapfrog steps starting from `point` in the direction of eps.
fn build_subtree<R : Rng>(h : &Hamiltonian, point : &PhasePoint, eps : f64, h0 : f64, depth : usize, rng : &mut R) -> Result<Tree> {
    if depth == 0 {
        let next = h.leapfrog(point, eps)?;
        let delta_h = h.energy(&next) - h0;
        let diverging = !delta_h.is_finite() || delta_h > MAX_DELTA_H;
        let log_weight = if diverging { f64::NEG_INFINITY } else { -delta_h };
        let accept = if delta_h.is_finite() { (-delta_h).min(0.0).exp() } else { 0.0 };
        return Ok(Tree {
            left : next.clone(),
            right : next.clone(),
            proposal : next,
            log_sum_weight : log_weight,
            sum_accept : accept,
            n_leapfrog : 1,
            turning : false,
            diverging
        });
    }
    let inner = build_subtree(h, point, eps, h0, depth - 1, rng)?;
    if inner.diverging || inner.turning {
        return Ok(inner);
    }
    let start = if eps > 0.0 { &inner.right } else { &inner.left };
    let outer = build_subtree(h, start, eps, h0, depth - 1, rng)?;
    let n_leapfrog = inner.n_leapfrog + outer.n_leapfrog;
    let sum_accept = inner.sum_accept + outer.sum_accept;
    if outer.diverging || outer.turning {
        return Ok(Tree { n_leapfrog, sum_accept, turning : outer.turning, diverging : outer.diverging, ..inner });
    }
    let log_sum = log_sum_exp(inner.log_sum_weight, outer.log_sum_weight);
    let proposal = if rng.gen::<f64>() < (outer.log_sum_weight - log_sum).exp() {
        outer.proposal
    } else {
        inner.proposal
    };
    let (left, right) = if eps > 0.0 { (inner.left, outer.right) } else { (outer.left, inner.right) };
    let turning = h.is_turning(&left, &right);
    Ok(Tree { left, right, proposal, log_sum_weight : log_sum, sum_accept, n_leapfrog, turning, diverging : false })
}

/// One NUTS transition: the trajectory is doubled in a random direction until it makes a
/// U-turn, diverges or reaches 2^max_depth steps. Subtrees are merged by biased
/// progressive sampling.
fn nuts_transition<R : Rng>(h : &Hamiltonian, current : &PhasePoint, eps : f64, max_depth : usize, rng : &mut R) -> Result<(PhasePoint, TransitionStats)> {
    let mut start = current.clone();
    start.p = h.sample_momentum(rng);
    let h0 = h.energy(&start);
    let mut left = start.clone();
    let mut right = start.clone();
    let mut proposal = start;
    let mut log_sum_weight = 0.0;
    let mut sum_accept = 0.0;
    let mut n_leapfrog = 0;
    let mut diverging = false;
    for depth in 0..max_depth {
        let forward = rng.gen::<bool>();
        let tree = if forward {
            build_subtree(h, &right, eps, h0, depth, rng)?
        } else {
            build_subtree(h, &left, -eps, h0, depth, rng)?
        };
        n_leapfrog += tree.n_leapfrog;
        sum_accept += tree.sum_accept;
        if tree.diverging {
            diverging = true;
            break;
        }
        if tree.turning {
            break;
        }
        if rng.gen::<f64>() < (tree.log_sum_weight - log_sum_weight).min(0.0).exp() {
            proposal = tree.proposal;
        }
        log_sum_weight = log_sum_exp(log_sum_weight, tree.log_sum_weight);
        if forward {
            right = tree.right;
        } else {
            left = tree.left;
        }
        if h.is_turning(&left, &right) {
            break;
        }
    }
    let accept_prob = if n_leapfrog > 0 { (sum_accept / n_leapfrog as f64).min(1.0) } else { 0.0 };
    Ok((proposal, TransitionStats { accept_prob, diverging, n_leapfrog }))
}

struct ChainDraws {
    draws : DMatrix<f64>,
    accept_rate : f64,
    step_size : f64,
    divergences : usize
}

fn run_chain(posterior : &LogPosterior, settings : &NutsSettings, seed : u64, progress : &ProgressBar) -> Result<ChainDraws> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let dim = posterior.dim();
    let theta0 = posterior.sample_prior(&mut rng)?;
    let mut h = Hamiltonian::new(posterior);
    let mut current = h.point(posterior.unconstrain(&theta0)?)?;
    let mut step_size = find_reasonable_step_size(&h, &current, settings.step_size, &mut rng);
    let mut da = DualAveraging::new(step_size, settings.target_accept);

    // Step size only (15%), step size and mass matrix window (75%), step size only (10%)
    let warmup = settings.n_initial_steps;
    let (window_start, window_end) = (warmup * 15 / 100, warmup * 90 / 100);
    let mut window = MassWindow::new(dim);

    let mut draws = DMatrix::zeros(settings.n_steps, dim);
    let mut sum_accept = 0.0;
    let mut divergences = 0;
    for iter in 0..(warmup + settings.n_steps) {
        let (next, stats) = match settings.kernel {
            Kernel::Nuts => nuts_transition(&h, &current, step_size, settings.max_tree_depth, &mut rng)?,
            Kernel::Hmc { leapfrog_steps } => hmc_transition(&h, &current, step_size, leapfrog_steps, &mut rng)?
        };
        current = next;
        if iter < warmup {
            step_size = da.update(stats.accept_prob);
            if settings.adapt_mass_matrix && iter >= window_start && iter < window_end {
                window.push(&current.q);
            }
            if settings.adapt_mass_matrix && iter == window_end && window.count() > 10 {
                h.set_inverse_mass(window.variance());
                step_size = find_reasonable_step_size(&h, &current, step_size, &mut rng);
                da = DualAveraging::new(step_size, settings.target_accept);
                debug!("inverse mass matrix {:?}", h.inverse_mass().as_slice());
            }
            if iter + 1 == warmup {
                step_size = da.final_step_size();
                debug!("warm-up done, step size {}", step_size);
            }
        } else {
            sum_accept += stats.accept_prob;
            if stats.diverging {
                divergences += 1;
            }
            let theta = posterior.constrain(&current.q)?;
            draws.row_mut(iter - warmup).tr_copy_from(&theta);
        }
        progress.inc(1);
    }
    Ok(ChainDraws { draws, accept_rate : sum_accept / settings.n_steps as f64, step_size, divergences })
}

/// Gradient-based sampler (NUTS, or static HMC) over the unconstrained log-posterior. The
/// forward models are differentiated through their Jacobians; any non-finite
/// log-posterior or gradient met along a trajectory aborts the run.
pub struct NutsSolver {

    posterior : LogPosterior,

    settings : NutsSettings,

    result : Option<InferenceResult>

}

impl NutsSolver {

    pub fn new(problem : &InferenceProblem, settings : Option<NutsSettings>) -> Result<Self> {
        let settings = settings.unwrap_or_default();
        settings.validate()?;
        let posterior = LogPosterior::new(problem)?;
        Ok(Self { posterior, settings, result : None })
    }

    pub fn log_posterior(&self) -> &LogPosterior {
        &self.posterior
    }

    pub fn settings(&self) -> &NutsSettings {
        &self.settings
    }

    pub fn run(&self) -> Result<InferenceResult> {
        let s = &self.settings;
        let base_seed = s.seed.unwrap_or_else(rand::random);
        let total = (s.n_initial_steps + s.n_steps) * s.n_chains;
        let progress = progress_bar(total as u64, s.verbose, "nuts");
        info!(
            "gradient sampler ({:?}): {} chains, {} warm-up + {} draws over {:?}",
            s.kernel, s.n_chains, s.n_initial_steps, s.n_steps, self.posterior.names()
        );
        let post = &self.posterior;
        let chains : Vec<ChainDraws> = if post.capabilities().concurrent {
            (0..s.n_chains).into_par_iter()
                .map(|c| run_chain(post, s, base_seed.wrapping_add(c as u64), &progress) )
                .collect::<Result<Vec<_>>>()?
        } else {
            (0..s.n_chains)
                .map(|c| run_chain(post, s, base_seed.wrapping_add(c as u64), &progress) )
                .collect::<Result<Vec<_>>>()?
        };
        progress.finish_and_clear();
        for (c, ch) in chains.iter().enumerate() {
            info!("chain {}: acceptance {:.3}, step size {:.4}, {} divergences", c, ch.accept_rate, ch.step_size, ch.divergences);
        }
        let backend = match s.kernel {
            Kernel::Nuts => Backend::Nuts,
            Kernel::Hmc { .. } => Backend::Hmc
        };
        let accept = chains.iter().map(|c| c.accept_rate ).collect();
        let draws = chains.into_iter().map(|c| c.draws ).collect();
        let result = InferenceResult::new(post.names().to_vec(), draws, accept, backend)?;
        if s.use_tex {
            result.with_tex_names(post.tex_names())
        } else {
            Ok(result)
        }
    }

}

impl Estimator for NutsSolver {

    fn fit(&mut self) -> Result<&InferenceResult> {
        let result = self.run()?;
        Ok(&*self.result.insert(result))
    }

    fn posterior(&self) -> Option<&InferenceResult> {
        self.result.as_ref()
    }

}
