use indexmap::IndexMap;
use serde::{Serialize, Deserialize};
use statrs::distribution::{Continuous, Normal};
use crate::diff::{Tape, Var};
use crate::error::{InferenceError, Result};
use crate::model::{Outputs, Value};
use crate::prob::normal_log_density;
use crate::problem::{InferenceProblem, sensor_value};

/// How the residual scale relates to the prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorModel {

    /// prediction - observation ~ N(0, sigma)
    Additive,

    /// prediction - observation ~ N(0, sigma |prediction|)
    Multiplicative

}

impl Default for ErrorModel {

    fn default() -> Self {
        ErrorModel::Additive
    }

}

/// Zero-mean Gaussian noise on the residuals of a set of sensors, with standard deviation
/// given by a (usually latent) parameter. Noise models are conditionally independent: the
/// total log-likelihood is the sum of their contributions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseModel {

    pub name : String,

    pub sensors : Vec<String>,

    /// Global name of the standard deviation parameter.
    pub std : String,

    pub error : ErrorModel,

    /// Experiments whose residuals this noise model explains. Filled by
    /// `InferenceProblem::assign_experiments_to_noise_models` when left empty.
    pub experiments : Vec<String>

}

impl NoiseModel {

    pub fn normal(std : &str, sensors : &[&str]) -> Self {
        Self {
            name : format!("{}_{}", std, sensors.join("_")),
            sensors : sensors.iter().map(|s| s.to_string() ).collect(),
            std : std.to_string(),
            error : ErrorModel::Additive,
            experiments : Vec::new()
        }
    }

    pub fn named(mut self, name : &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn multiplicative(mut self) -> Self {
        self.error = ErrorModel::Multiplicative;
        self
    }

    pub fn for_experiments(mut self, experiments : &[&str]) -> Self {
        self.experiments = experiments.iter().map(|e| e.to_string() ).collect();
        self
    }

    /// (prediction, observation) pairs of one sensor of one experiment. A scalar on either
    /// side is broadcast against a vector on the other.
    fn pairs(&self, problem : &InferenceProblem, experiment : &str, sensor : &str, prediction : &Value) -> Result<Vec<(f64, f64)>> {
        let exp = problem.experiment(experiment)?;
        let obs = sensor_value(exp, sensor)?;
        let (p, o) = (prediction.as_slice(), obs.as_slice());
        if p.len() == o.len() {
            Ok(p.iter().cloned().zip(o.iter().cloned()).collect())
        } else if p.len() == 1 {
            Ok(o.iter().map(|o| (p[0], *o) ).collect())
        } else if o.len() == 1 {
            Ok(p.iter().map(|p| (*p, o[0]) ).collect())
        } else {
            Err(InferenceError::ShapeMismatch(format!(
                "sensor '{}' of experiment '{}': {} predictions for {} observations",
                sensor, experiment, p.len(), o.len()
            )))
        }
    }

    fn prediction<'a>(&self, responses : &'a IndexMap<String, Outputs>, experiment : &str, sensor : &str) -> Result<&'a Value> {
        responses.get(experiment)
            .and_then(|out| out.get(sensor) )
            .ok_or_else(|| InferenceError::MissingSensorData {
                experiment : experiment.to_string(),
                sensor : sensor.to_string()
            })
    }

    /// Log-likelihood of the observations given the model responses (keyed by experiment)
    /// and the noise level sigma. A sigma outside (0, inf) has zero likelihood.
    pub fn log_likelihood(&self, problem : &InferenceProblem, responses : &IndexMap<String, Outputs>, sigma : f64) -> Result<f64> {
        let mut ll = 0.0;
        for e in self.experiments.iter() {
            for s in self.sensors.iter() {
                let pred = self.prediction(responses, e, s)?;
                for (p, o) in self.pairs(problem, e, s, pred)? {
                    let scale = match self.error {
                        ErrorModel::Additive => sigma,
                        ErrorModel::Multiplicative => sigma * p.abs()
                    };
                    match Normal::new(0.0, scale) {
                        Ok(d) => ll += d.ln_pdf(p - o),
                        Err(_) => return Ok(f64::NEG_INFINITY)
                    }
                }
            }
        }
        Ok(ll)
    }

    /// Same as `log_likelihood`, recorded on the tape. Predictions are the tape variables of
    /// each experiment's output sensors.
    pub fn log_likelihood_on_tape(
        &self,
        problem : &InferenceProblem,
        tape : &mut Tape,
        predictions : &IndexMap<String, IndexMap<String, Vec<Var>>>,
        sigma : Var
    ) -> Result<Var> {
        let mut terms = Vec::new();
        let zero = tape.constant(0.0);
        for e in self.experiments.iter() {
            for s in self.sensors.iter() {
                let vars = predictions.get(e).and_then(|p| p.get(s) ).ok_or_else(|| InferenceError::MissingSensorData {
                    experiment : e.to_string(),
                    sensor : s.to_string()
                })?;
                let values : Vec<f64> = vars.iter().map(|v| tape.val(*v) ).collect();
                let pairs = self.pairs(problem, e, s, &Value::from(values))?;
                let broadcast = vars.len() == 1;
                for (i, (_, o)) in pairs.iter().enumerate() {
                    let p = if broadcast { vars[0] } else { vars[i] };
                    let obs = tape.constant(*o);
                    let residual = tape.sub(p, obs);
                    let scale = match self.error {
                        ErrorModel::Additive => sigma,
                        ErrorModel::Multiplicative => {
                            let ap = tape.abs(p);
                            tape.mul(sigma, ap)
                        }
                    };
                    terms.push(normal_log_density(tape, residual, zero, scale));
                }
            }
        }
        Ok(tape.sum(&terms))
    }

}

/// Sum of the contributions of all noise models of the problem.
pub fn total_log_likelihood(problem : &InferenceProblem, responses : &IndexMap<String, Outputs>, theta : &IndexMap<String, f64>) -> Result<f64> {
    let mut ll = 0.0;
    for n in problem.noise_models() {
        let sigma = problem.value_of(&n.std, theta)?;
        ll += n.log_likelihood(problem, responses, sigma)?;
    }
    Ok(ll)
}
