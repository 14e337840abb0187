use nalgebra::DVector;
use indexmap::IndexMap;
use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, warn};
use crate::diff::{Arg, DifferentiableBridge, Tape, Var};
use crate::error::{InferenceError, Result};
use crate::graph::dependency_order;
use crate::model::{Capabilities, Inputs, Outputs, Value, check_outputs};
use crate::noise::total_log_likelihood;
use crate::prob::{constrain_on_tape, HyperRef, Prior};
use crate::problem::{InferenceProblem, sensor_value};

/// Unnormalized log-posterior of a problem: the sum of the prior log-densities of the
/// latent parameters and the log-likelihoods of all noise models. Positions are vectors
/// over the latent parameters in dependency order (`names`). Both the plain evaluation
/// used by the ensemble sampler and the recorded evaluation (value and gradient) used by
/// the Hamiltonian samplers live here.
pub struct LogPosterior {

    problem : InferenceProblem,

    order : Vec<String>,

    // Experiments that enter some noise model, in declaration order.
    experiments : Vec<String>,

    bridges : IndexMap<String, DifferentiableBridge>

}

impl LogPosterior {

    /// Validates a private copy of the problem, assigns experiments to noise models and
    /// resolves the sampling order.
    pub fn new(problem : &InferenceProblem) -> Result<Self> {
        let mut problem = problem.clone();
        problem.check()?;
        problem.assign_experiments_to_noise_models()?;
        for n in problem.noise_models() {
            if n.experiments.is_empty() {
                warn!("noise model '{}' explains no experiment", n.name);
            }
        }
        let order = dependency_order(problem.parameters())?;
        let experiments = problem.experiments().keys()
            .filter(|e| problem.noise_models().iter().any(|n| n.experiments.contains(*e) ) )
            .cloned()
            .collect();
        let bridges = problem.forward_models()
            .map(|m| (m.name().to_string(), DifferentiableBridge::new(m.clone())) )
            .collect();
        debug!("posterior over {:?}", order);
        Ok(Self { problem, order, experiments, bridges })
    }

    pub fn dim(&self) -> usize {
        self.order.len()
    }

    /// Latent parameter names, in the order of the position vectors.
    pub fn names(&self) -> &[String] {
        &self.order[..]
    }

    pub fn tex_names(&self) -> Vec<String> {
        self.order.iter()
            .map(|n| self.problem.parameter(n).ok().and_then(|p| p.tex.clone() ).unwrap_or_else(|| n.clone() ) )
            .collect()
    }

    pub fn problem(&self) -> &InferenceProblem {
        &self.problem
    }

    /// Capabilities shared by all forward models of the problem.
    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities { concurrent : true, batch : true };
        for m in self.problem.forward_models() {
            let c = m.capabilities();
            caps.concurrent &= c.concurrent;
            caps.batch &= c.batch;
        }
        caps
    }

    pub fn theta_map(&self, theta : &DVector<f64>) -> IndexMap<String, f64> {
        self.order.iter().cloned().zip(theta.iter().cloned()).collect()
    }

    fn prior(&self, name : &str) -> Result<&Prior> {
        self.problem.parameter(name)?.prior.as_ref()
            .ok_or_else(|| InferenceError::UnknownParameter(name.to_string()) )
    }

    fn check_dim(&self, v : &DVector<f64>) -> Result<()> {
        if v.nrows() != self.dim() {
            return Err(InferenceError::ShapeMismatch(
                format!("position of length {} for {} latent parameters", v.nrows(), self.dim())
            ));
        }
        Ok(())
    }

    fn log_prior_map(&self, theta : &IndexMap<String, f64>) -> Result<f64> {
        let mut lp = 0.0;
        for name in self.order.iter() {
            let hypers = self.problem.hyperparameter_values(name, theta)?;
            lp += self.prior(name)?.log_density(theta[&name[..]], &hypers, name)?;
        }
        Ok(lp)
    }

    pub fn log_prior(&self, theta : &DVector<f64>) -> Result<f64> {
        self.check_dim(theta)?;
        self.log_prior_map(&self.theta_map(theta))
    }

    pub fn log_likelihood(&self, theta : &DVector<f64>) -> Result<f64> {
        self.check_dim(theta)?;
        let map = self.theta_map(theta);
        let responses = self.problem.evaluate_model_response(&map, &self.experiments)?;
        total_log_likelihood(&self.problem, &responses, &map)
    }

    /// Log-posterior at theta. Positions outside the prior support evaluate to -inf
    /// without calling the forward models.
    pub fn log_prob(&self, theta : &DVector<f64>) -> Result<f64> {
        let lp = self.log_prior(theta)?;
        if !lp.is_finite() {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(lp + self.log_likelihood(theta)?)
    }

    /// Log-posterior at many positions: in parallel when all models are concurrent, through
    /// `batch_response` when all models are vectorized, sequentially otherwise.
    pub fn log_prob_batch(&self, thetas : &[DVector<f64>]) -> Result<Vec<f64>> {
        let caps = self.capabilities();
        if caps.concurrent {
            thetas.par_iter().map(|t| self.log_prob(t) ).collect()
        } else if caps.batch {
            self.log_prob_vectorized(thetas)
        } else {
            thetas.iter().map(|t| self.log_prob(t) ).collect()
        }
    }

    fn log_prob_vectorized(&self, thetas : &[DVector<f64>]) -> Result<Vec<f64>> {
        for t in thetas.iter() {
            self.check_dim(t)?;
        }
        let maps : Vec<IndexMap<String, f64>> = thetas.iter().map(|t| self.theta_map(t) ).collect();
        let priors = maps.iter().map(|m| self.log_prior_map(m) ).collect::<Result<Vec<f64>>>()?;
        let active : Vec<usize> = (0..thetas.len()).filter(|i| priors[*i].is_finite() ).collect();
        let mut responses : Vec<IndexMap<String, Outputs>> = vec![IndexMap::new(); active.len()];
        for e in self.experiments.iter() {
            let model = self.problem.forward_model(&self.problem.experiment(e)?.forward_model)?;
            let inputs = active.iter()
                .map(|i| self.problem.model_inputs(e, &maps[*i]) )
                .collect::<Result<Vec<Inputs>>>()?;
            let outputs = model.batch_response(&inputs)?;
            if outputs.len() != inputs.len() {
                return Err(InferenceError::ShapeMismatch(format!(
                    "batch evaluation of '{}' returned {} responses for {} inputs",
                    model.name(), outputs.len(), inputs.len()
                )));
            }
            for (r, out) in responses.iter_mut().zip(outputs.into_iter()) {
                check_outputs(model.as_ref(), &out)?;
                r.insert(e.clone(), out);
            }
        }
        let mut lps = vec![f64::NEG_INFINITY; thetas.len()];
        for (k, i) in active.iter().enumerate() {
            lps[*i] = priors[*i] + total_log_likelihood(&self.problem, &responses[k], &maps[*i])?;
        }
        Ok(lps)
    }

    /// Draws a position from the joint prior, sampling hyperparameters before the
    /// parameters that depend on them.
    pub fn sample_prior<R : Rng>(&self, rng : &mut R) -> Result<DVector<f64>> {
        let mut theta = IndexMap::new();
        for name in self.order.iter() {
            let hypers = self.problem.hyperparameter_values(name, &theta)?;
            let v = self.prior(name)?.sample(&hypers, name, rng)?;
            theta.insert(name.clone(), v);
        }
        Ok(DVector::from_iterator(self.dim(), theta.values().cloned()))
    }

    /// Maps an unconstrained position to parameter space.
    pub fn constrain(&self, z : &DVector<f64>) -> Result<DVector<f64>> {
        self.check_dim(z)?;
        let mut theta = IndexMap::new();
        for (i, name) in self.order.iter().enumerate() {
            let hypers = self.problem.hyperparameter_values(name, &theta)?;
            let support = self.prior(name)?.support(&hypers, name)?;
            theta.insert(name.clone(), support.from_unconstrained(z[i]));
        }
        Ok(DVector::from_iterator(self.dim(), theta.values().cloned()))
    }

    pub fn unconstrain(&self, theta : &DVector<f64>) -> Result<DVector<f64>> {
        self.check_dim(theta)?;
        let map = self.theta_map(theta);
        let mut z = DVector::zeros(self.dim());
        for (i, name) in self.order.iter().enumerate() {
            let hypers = self.problem.hyperparameter_values(name, &map)?;
            let support = self.prior(name)?.support(&hypers, name)?;
            z[i] = support.to_unconstrained(theta[i]);
        }
        Ok(z)
    }

    fn parameter_var(&self, tape : &mut Tape, thetas : &IndexMap<String, Var>, name : &str) -> Result<Var> {
        if let Some(v) = thetas.get(name) {
            return Ok(*v);
        }
        let p = self.problem.parameter(name)?;
        match p.value {
            Some(v) if !p.is_latent() => Ok(tape.constant(v)),
            _ => Err(InferenceError::UnknownParameter(name.to_string()))
        }
    }

    fn hyper_vars(&self, tape : &mut Tape, thetas : &IndexMap<String, Var>, name : &str) -> Result<IndexMap<String, Var>> {
        let mut out = IndexMap::new();
        for (role, h) in self.prior(name)?.hyperparameters.iter() {
            let v = match h {
                HyperRef::Value(v) => tape.constant(*v),
                HyperRef::Parameter(r) => self.parameter_var(tape, thetas, r)?
            };
            out.insert(role.clone(), v);
        }
        Ok(out)
    }

    // Records prior and likelihood terms on top of `terms`, returning their sum.
    fn record(&self, tape : &mut Tape, thetas : &IndexMap<String, Var>, mut terms : Vec<Var>) -> Result<Var> {
        for name in self.order.iter() {
            let hv = self.hyper_vars(tape, thetas, name)?;
            let theta = self.parameter_var(tape, thetas, name)?;
            terms.push(self.prior(name)?.log_density_on_tape(tape, theta, &hv, name)?);
        }
        let mut predictions = IndexMap::new();
        for e in self.experiments.iter() {
            let exp = self.problem.experiment(e)?;
            let bridge = self.bridges.get(&exp.forward_model)
                .ok_or_else(|| InferenceError::Config(format!("Unknown forward model '{}'", exp.forward_model)) )?;
            let iface = bridge.model().interface();
            let mut args = Vec::with_capacity(bridge.channels().len());
            for s in iface.input_sensors.iter() {
                args.push(Arg::Fixed(sensor_value(exp, &s.name)?.clone()));
            }
            for global in iface.parameters.keys() {
                match thetas.get(global) {
                    Some(v) => args.push(Arg::Var(*v)),
                    None => args.push(Arg::Fixed(Value::Scalar(self.problem.value_of(global, &IndexMap::new())?)))
                }
            }
            let out = bridge.apply(tape, &args)?;
            predictions.insert(e.clone(), out.by_sensor());
        }
        for n in self.problem.noise_models() {
            let sigma = self.parameter_var(tape, thetas, &n.std)?;
            terms.push(n.log_likelihood_on_tape(&self.problem, tape, &predictions, sigma)?);
        }
        Ok(tape.sum(&terms))
    }

    fn finish(tape : &mut Tape, root : Var, vars : &[Var]) -> Result<(f64, DVector<f64>)> {
        let lp = tape.val(root);
        if !lp.is_finite() {
            return Err(InferenceError::NonFiniteLogPosterior(lp));
        }
        tape.backward(root)?;
        let grad = DVector::from_iterator(vars.len(), vars.iter().map(|v| tape.grad(*v) ));
        if grad.iter().any(|g| !g.is_finite() ) {
            return Err(InferenceError::NonFinite("gradient of the log-posterior".to_string()));
        }
        Ok((lp, grad))
    }

    /// Log-posterior and its gradient with respect to theta (parameter space).
    pub fn log_prob_grad(&self, theta : &DVector<f64>) -> Result<(f64, DVector<f64>)> {
        let lp = self.log_prior(theta)?;
        if !lp.is_finite() {
            return Err(InferenceError::NonFiniteLogPosterior(lp));
        }
        let mut tape = Tape::new();
        let vars : Vec<Var> = theta.iter().map(|t| tape.var(*t) ).collect();
        let thetas : IndexMap<String, Var> = self.order.iter().cloned().zip(vars.iter().cloned()).collect();
        let root = self.record(&mut tape, &thetas, Vec::new())?;
        Self::finish(&mut tape, root, &vars)
    }

    /// Log-density of the unconstrained position z (log-posterior of the constrained
    /// position plus the log-Jacobian of the transform) and its gradient with respect to z.
    pub fn log_prob_grad_unconstrained(&self, z : &DVector<f64>) -> Result<(f64, DVector<f64>)> {
        self.check_dim(z)?;
        let mut tape = Tape::new();
        let zs : Vec<Var> = z.iter().map(|zi| tape.var(*zi) ).collect();
        let mut thetas = IndexMap::new();
        let mut terms = Vec::with_capacity(zs.len());
        for (i, name) in self.order.iter().enumerate() {
            let hv = self.hyper_vars(&mut tape, &thetas, name)?;
            let support = self.prior(name)?.tape_support(&mut tape, &hv, name)?;
            let (theta, lj) = constrain_on_tape(&mut tape, support, zs[i]);
            terms.push(lj);
            thetas.insert(name.clone(), theta);
        }
        let root = self.record(&mut tape, &thetas, terms)?;
        Self::finish(&mut tape, root, &zs)
    }

}
