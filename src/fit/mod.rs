use indicatif::{ProgressBar, ProgressStyle};
use crate::error::Result;

/// Log-posterior of a problem, evaluated plainly or recorded on a differentiation tape.
pub mod posterior;

/// Gradient-free sampling with an affine-invariant ensemble of walkers.
pub mod ensemble;

/// Hamiltonian dynamics shared by the gradient-based kernels (leapfrog integration,
/// static HMC transitions, step size and mass matrix adaptation).
mod hmc;

/// No-U-Turn sampling over the unconstrained parameter space.
pub mod nuts;

/// Normalized sampler output.
pub mod result;

pub use posterior::*;

pub use ensemble::*;

pub use nuts::*;

pub use result::*;

/// Trait shared by the sampling backends. Each backend is built from a problem (which it
/// copies) and its settings; `fit` runs the sampler and keeps the draws.
pub trait Estimator {

    /// Runs the sampler, returning a reference to the stored result.
    fn fit(&mut self) -> Result<&InferenceResult>;

    /// If fit(.) has been called successfully at least once, returns the last result
    /// without running the sampler again.
    fn posterior(&self) -> Option<&InferenceResult>;

}

pub(crate) fn progress_bar(len : u64, verbose : bool, label : &'static str) -> ProgressBar {
    if !verbose {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("{msg} [{elapsed_precise}] {bar:40} {pos}/{len} ({eta})") {
        bar.set_style(style);
    }
    bar.set_message(label);
    bar
}
