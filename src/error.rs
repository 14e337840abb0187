use thiserror::Error;

/// Failures raised while validating a problem, evaluating a forward model or running a sampler.
/// Configuration variants are raised before any sampling starts; numerical variants abort
/// the evaluation (or the run) that produced them.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InferenceError {

    #[error("Forward model '{0}' does not override 'response'; define it before evaluating the model")]
    NotImplemented(String),

    #[error("Prior of parameter '{parameter}' references '{reference}', which is neither a literal nor a declared parameter")]
    UnresolvedReference { parameter : String, reference : String },

    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("Name '{0}' was already registered")]
    DuplicateName(String),

    #[error("Prior of parameter '{parameter}' is missing the hyperparameter '{role}'")]
    MissingHyperparameter { parameter : String, role : String },

    #[error("Invalid hyperparameters for {family} prior of '{parameter}': {msg}")]
    InvalidHyperparameter { parameter : String, family : String, msg : String },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Experiment '{experiment}' carries no data for sensor '{sensor}'")]
    MissingSensorData { experiment : String, sensor : String },

    #[error("Found circular dependency between {0} and {1}!")]
    CircularDependency(String, String),

    #[error("Non-finite value in {0}")]
    NonFinite(String),

    #[error("Non-finite log-posterior ({0}) during gradient-based sampling")]
    NonFiniteLogPosterior(f64),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Failed to read configuration: {0}")]
    Config(String)

}

pub type Result<T> = std::result::Result<T, InferenceError>;

impl From<serde_json::Error> for InferenceError {

    fn from(e : serde_json::Error) -> Self {
        InferenceError::Config(e.to_string())
    }

}
