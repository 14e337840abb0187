/// Failures of problem validation, model evaluation and sampling.
pub mod error;

/// Prior distributions (densities, variates and the transforms onto the real line).
pub mod prob;

/// Forward model interface: named values, sensors and numerical Jacobians.
pub mod model;

/// Problem definition: parameters, forward models, experiments and noise models.
pub mod problem;

/// Dependency ordering of hierarchical priors.
pub mod graph;

/// Reverse-mode differentiation, and the bridge that makes black-box forward models
/// differentiable through their Jacobians.
pub mod diff;

/// Gaussian noise models and the log-likelihood of the data under them.
pub mod noise;

/// Posterior sampling: ensemble (gradient-free) and NUTS/HMC (gradient-based).
pub mod fit;

/// Summary statistics of sampler output.
pub mod calc;

pub use error::{InferenceError, Result};

pub use model::{ForwardModel, Interface, Sensor, Value, Values, Inputs, Outputs, Capabilities};

pub use problem::{InferenceProblem, Parameter, ParameterRole, Experiment};

pub use prob::{Prior, Family, HyperRef};

pub use noise::{NoiseModel, ErrorModel};

pub use fit::{Estimator, EnsembleSolver, EnsembleSettings, NutsSolver, NutsSettings, Kernel, InferenceResult, Backend, LogPosterior};
