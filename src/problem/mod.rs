use indexmap::IndexMap;
use serde::{Serialize, Deserialize};
use std::sync::Arc;
use tracing::debug;
use crate::error::{InferenceError, Result};
use crate::model::{ForwardModel, Inputs, Outputs, Value, Values, checked_response};
use crate::noise::NoiseModel;
use crate::prob::{HyperRef, Prior};

/// What a parameter is used for. Informational; the latent/constant distinction is made by
/// the presence of a prior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterRole {
    Model,
    Noise,
    Prior,
    Const
}

/// A named scalar of the problem. Latent parameters carry a prior and are sampled;
/// constants carry a fixed value. Parameters are scalars only: vector-valued quantities
/// reach a forward model through its input sensors, or as several scalar parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {

    pub name : String,

    pub role : ParameterRole,

    /// Present for latent parameters.
    pub prior : Option<Prior>,

    /// Present for constant parameters.
    pub value : Option<f64>,

    pub info : String,

    /// Display label used when renaming sampler output.
    pub tex : Option<String>

}

impl Parameter {

    pub fn latent(name : &str, role : ParameterRole, prior : Prior) -> Self {
        Self { name : name.to_string(), role, prior : Some(prior), value : None, info : String::new(), tex : None }
    }

    pub fn constant(name : &str, value : f64) -> Self {
        Self {
            name : name.to_string(),
            role : ParameterRole::Const,
            prior : None,
            value : Some(value),
            info : String::new(),
            tex : None
        }
    }

    pub fn info(mut self, info : &str) -> Self {
        self.info = info.to_string();
        self
    }

    pub fn tex(mut self, tex : &str) -> Self {
        self.tex = Some(tex.to_string());
        self
    }

    pub fn is_latent(&self) -> bool {
        self.prior.is_some()
    }

}

/// Declared parameters, keyed by global name in declaration order.
pub type Parameters = IndexMap<String, Parameter>;

/// A data set: the forward model it is explained by and the values of that model's input
/// sensors (known) and output sensors (observed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {

    pub name : String,

    pub forward_model : String,

    pub sensor_values : Values

}

/// Problem definition: parameters, forward models, experiments and noise models. Samplers
/// clone the problem at construction, so later changes do not affect a running solver.
#[derive(Clone, Default)]
pub struct InferenceProblem {

    pub name : String,

    parameters : Parameters,

    forward_models : IndexMap<String, Arc<dyn ForwardModel>>,

    experiments : IndexMap<String, Experiment>,

    noise_models : Vec<NoiseModel>

}

impl InferenceProblem {

    pub fn new(name : &str) -> Self {
        Self { name : name.to_string(), ..Default::default() }
    }

    pub fn add_parameter(&mut self, parameter : Parameter) -> Result<()> {
        if self.parameters.contains_key(&parameter.name) {
            return Err(InferenceError::DuplicateName(parameter.name));
        }
        if let Some(prior) = &parameter.prior {
            prior.check(&parameter.name)?;
        } else if parameter.value.is_none() {
            return Err(InferenceError::Config(
                format!("Parameter '{}' needs either a prior or a constant value", parameter.name)
            ));
        }
        self.parameters.insert(parameter.name.clone(), parameter);
        Ok(())
    }

    pub fn add_forward_model<M>(&mut self, model : M) -> Result<()>
    where
        M : ForwardModel + 'static
    {
        self.add_shared_forward_model(Arc::new(model))
    }

    pub fn add_shared_forward_model(&mut self, model : Arc<dyn ForwardModel>) -> Result<()> {
        let name = model.name().to_string();
        if self.forward_models.contains_key(&name) {
            return Err(InferenceError::DuplicateName(name));
        }
        self.forward_models.insert(name, model);
        Ok(())
    }

    /// Registers a data set for a known forward model. Every input and output sensor of
    /// the model must be present in the data.
    pub fn add_experiment(&mut self, name : &str, forward_model : &str, sensor_values : Values) -> Result<()> {
        if self.experiments.contains_key(name) {
            return Err(InferenceError::DuplicateName(name.to_string()));
        }
        let model = self.forward_models.get(forward_model)
            .ok_or_else(|| InferenceError::Config(format!("Unknown forward model '{}'", forward_model)) )?;
        let iface = model.interface();
        for s in iface.input_sensors.iter().chain(iface.output_sensors.iter()) {
            if !sensor_values.contains(&s.name) {
                return Err(InferenceError::MissingSensorData {
                    experiment : name.to_string(),
                    sensor : s.name.clone()
                });
            }
        }
        self.experiments.insert(name.to_string(), Experiment {
            name : name.to_string(),
            forward_model : forward_model.to_string(),
            sensor_values
        });
        Ok(())
    }

    pub fn add_noise_model(&mut self, noise_model : NoiseModel) -> Result<()> {
        if self.noise_models.iter().any(|n| n.name == noise_model.name ) {
            return Err(InferenceError::DuplicateName(noise_model.name));
        }
        self.noise_models.push(noise_model);
        Ok(())
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn parameter(&self, name : &str) -> Result<&Parameter> {
        self.parameters.get(name).ok_or_else(|| InferenceError::UnknownParameter(name.to_string()) )
    }

    pub fn forward_model(&self, name : &str) -> Result<&Arc<dyn ForwardModel>> {
        self.forward_models.get(name)
            .ok_or_else(|| InferenceError::Config(format!("Unknown forward model '{}'", name)) )
    }

    pub fn forward_models(&self) -> impl Iterator<Item=&Arc<dyn ForwardModel>> {
        self.forward_models.values()
    }

    pub fn experiments(&self) -> &IndexMap<String, Experiment> {
        &self.experiments
    }

    pub fn experiment(&self, name : &str) -> Result<&Experiment> {
        self.experiments.get(name)
            .ok_or_else(|| InferenceError::Config(format!("Unknown experiment '{}'", name)) )
    }

    pub fn noise_models(&self) -> &[NoiseModel] {
        &self.noise_models[..]
    }

    /// Global names of the latent parameters, in declaration order.
    pub fn latent_names(&self) -> Vec<String> {
        self.parameters.values().filter(|p| p.is_latent() ).map(|p| p.name.clone() ).collect()
    }

    /// Latent parameter names, or their display labels when `tex` is set (falling back to
    /// the name for parameters without a label).
    pub fn theta_names(&self, tex : bool) -> Vec<String> {
        self.parameters.values()
            .filter(|p| p.is_latent() )
            .map(|p| if tex { p.tex.clone().unwrap_or_else(|| p.name.clone() ) } else { p.name.clone() } )
            .collect()
    }

    /// Static validation: every hyperparameter reference, forward model parameter and noise
    /// standard deviation names a declared parameter, and every noise model sensor is an
    /// output of some forward model.
    pub fn check(&self) -> Result<()> {
        if self.latent_names().is_empty() {
            return Err(InferenceError::Config("The problem declares no latent parameter".to_string()));
        }
        for p in self.parameters.values() {
            if let Some(prior) = &p.prior {
                prior.check(&p.name)?;
                for r in prior.references() {
                    if !self.parameters.contains_key(r) {
                        return Err(InferenceError::UnresolvedReference {
                            parameter : p.name.clone(),
                            reference : r.to_string()
                        });
                    }
                }
            }
        }
        for m in self.forward_models.values() {
            for global in m.interface().parameters.keys() {
                self.parameter(global)?;
            }
            let channels = m.interface().channel_names();
            for (i, c) in channels.iter().enumerate() {
                if channels[..i].contains(c) {
                    return Err(InferenceError::DuplicateName(c.clone()));
                }
            }
            for s in m.interface().output_sensors.iter() {
                if let Some(std) = &s.std_parameter {
                    self.parameter(std)?;
                }
            }
        }
        for n in self.noise_models.iter() {
            self.parameter(&n.std)?;
            for s in n.sensors.iter() {
                let known = self.forward_models.values()
                    .any(|m| m.interface().output_sensor(s).is_some() );
                if !known {
                    return Err(InferenceError::Config(
                        format!("Noise model '{}' refers to sensor '{}', which no forward model outputs", n.name, s)
                    ));
                }
            }
        }
        Ok(())
    }

    /// Attaches to each noise model the experiments whose forward model outputs all of the
    /// noise model's sensors (keeping experiments that were assigned explicitly). Output
    /// sensors that name a std parameter and are not covered by any noise model first get
    /// an additive normal noise model of their own.
    pub fn assign_experiments_to_noise_models(&mut self) -> Result<()> {
        let mut implied : Vec<NoiseModel> = Vec::new();
        for m in self.forward_models.values() {
            for s in m.interface().output_sensors.iter() {
                if let Some(std) = &s.std_parameter {
                    let covered = self.noise_models.iter().chain(implied.iter())
                        .any(|n| n.sensors.contains(&s.name) );
                    if !covered {
                        debug!("sensor '{}' implies a noise model with std '{}'", s.name, std);
                        implied.push(NoiseModel::normal(std, &[&s.name[..]]));
                    }
                }
            }
        }
        self.noise_models.extend(implied);
        for n in self.noise_models.iter_mut() {
            if !n.experiments.is_empty() {
                for e in n.experiments.iter() {
                    if !self.experiments.contains_key(e) {
                        return Err(InferenceError::Config(format!("Unknown experiment '{}'", e)));
                    }
                }
                continue;
            }
            for (name, exp) in self.experiments.iter() {
                let model = self.forward_models.get(&exp.forward_model)
                    .ok_or_else(|| InferenceError::Config(format!("Unknown forward model '{}'", exp.forward_model)) )?;
                let covers = n.sensors.iter().all(|s| model.interface().output_sensor(s).is_some() );
                if covers {
                    n.experiments.push(name.clone());
                }
            }
            debug!("noise model '{}' assigned to experiments {:?}", n.name, n.experiments);
        }
        Ok(())
    }

    /// Value of a parameter given the latent values: latent parameters are read from theta,
    /// constants from their declaration.
    pub fn value_of(&self, name : &str, theta : &IndexMap<String, f64>) -> Result<f64> {
        let p = self.parameter(name)?;
        match (p.is_latent(), p.value) {
            (true, _) => theta.get(name).cloned().ok_or_else(|| InferenceError::UnknownParameter(name.to_string()) ),
            (false, Some(v)) => Ok(v),
            (false, None) => Err(InferenceError::UnknownParameter(name.to_string()))
        }
    }

    /// Values of the parameters listed in `aliases` (global -> local), keyed by their local names.
    pub fn parameter_values(&self, theta : &IndexMap<String, f64>, aliases : &IndexMap<String, String>) -> Result<Values> {
        let mut out = Values::new();
        for (global, local) in aliases.iter() {
            out.insert(local, self.value_of(global, theta)?);
        }
        Ok(out)
    }

    /// Resolved hyperparameters of a latent parameter's prior, keyed by role.
    pub fn hyperparameter_values(&self, name : &str, theta : &IndexMap<String, f64>) -> Result<IndexMap<String, f64>> {
        let p = self.parameter(name)?;
        let prior = p.prior.as_ref().ok_or_else(|| InferenceError::UnknownParameter(name.to_string()) )?;
        let mut out = IndexMap::new();
        for (role, h) in prior.hyperparameters.iter() {
            let v = match h {
                HyperRef::Value(v) => *v,
                HyperRef::Parameter(r) => {
                    if !self.parameters.contains_key(r) {
                        return Err(InferenceError::UnresolvedReference { parameter : name.to_string(), reference : r.clone() });
                    }
                    self.value_of(r, theta)?
                }
            };
            out.insert(role.clone(), v);
        }
        Ok(out)
    }

    /// Forward model inputs of an experiment: its input sensors first, then the model's
    /// parameters under their local names.
    pub fn model_inputs(&self, experiment : &str, theta : &IndexMap<String, f64>) -> Result<Inputs> {
        let exp = self.experiment(experiment)?;
        let model = self.forward_model(&exp.forward_model)?;
        let iface = model.interface();
        let mut inputs = Values::new();
        for s in iface.input_sensors.iter() {
            let v = sensor_value(exp, &s.name)?;
            inputs.insert(&s.name, v.clone());
        }
        for (local, v) in self.parameter_values(theta, &iface.parameters)?.iter() {
            inputs.insert(local, v.clone());
        }
        Ok(inputs)
    }

    /// Model predictions for the given experiments, keyed by experiment name.
    pub fn evaluate_model_response(&self, theta : &IndexMap<String, f64>, experiments : &[String]) -> Result<IndexMap<String, Outputs>> {
        let mut out = IndexMap::new();
        for e in experiments.iter() {
            let model = self.forward_model(&self.experiment(e)?.forward_model)?;
            let inputs = self.model_inputs(e, theta)?;
            out.insert(e.clone(), checked_response(model.as_ref(), &inputs)?);
        }
        Ok(out)
    }

}

pub(crate) fn sensor_value<'a>(exp : &'a Experiment, sensor : &str) -> Result<&'a Value> {
    exp.sensor_values.get(sensor).ok_or_else(|| InferenceError::MissingSensorData {
        experiment : exp.name.clone(),
        sensor : sensor.to_string()
    })
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::model::{Interface, Sensor};

    struct Line {
        interface : Interface
    }

    impl ForwardModel for Line {

        fn name(&self) -> &str {
            "line"
        }

        fn interface(&self) -> &Interface {
            &self.interface
        }

        fn response(&self, inp : &Inputs) -> Result<Outputs> {
            let x = inp.vector("x")?;
            let (a, b) = (inp.scalar("slope")?, inp.scalar("b")?);
            Ok(Values::new().with("y", x.map(|x| a * x + b )))
        }

    }

    fn problem() -> InferenceProblem {
        let mut p = InferenceProblem::new("line");
        p.add_parameter(Parameter::latent("a", ParameterRole::Model, Prior::normal(2.0, 1.0)).tex("$a$")).unwrap();
        p.add_parameter(Parameter::constant("b", 1.0)).unwrap();
        p.add_forward_model(Line {
            interface : Interface::new(&["b"]).alias("a", "slope").input(Sensor::new("x")).output(Sensor::new("y"))
        }).unwrap();
        p
    }

    #[test]
    fn duplicate_experiments_are_rejected() {
        let mut p = problem();
        let data = Values::new().with("x", vec![0.0, 1.0]).with("y", vec![1.0, 3.0]);
        p.add_experiment("e1", "line", data.clone()).unwrap();
        assert_eq!(p.add_experiment("e1", "line", data), Err(InferenceError::DuplicateName("e1".to_string())));
    }

    #[test]
    fn experiment_needs_all_sensors() {
        let mut p = problem();
        let err = p.add_experiment("e1", "line", Values::new().with("x", vec![0.0])).unwrap_err();
        assert_eq!(err, InferenceError::MissingSensorData { experiment : "e1".to_string(), sensor : "y".to_string() });
    }

    #[test]
    fn parameters_are_aliased_to_local_names() {
        let mut p = problem();
        p.add_experiment("e1", "line", Values::new().with("x", vec![0.0, 1.0]).with("y", vec![1.0, 3.0])).unwrap();
        let theta : IndexMap<String, f64> = vec![("a".to_string(), 2.0)].into_iter().collect();
        let inputs = p.model_inputs("e1", &theta).unwrap();
        assert_eq!(inputs.keys().cloned().collect::<Vec<_>>(), vec!["x", "b", "slope"]);
        let resp = p.evaluate_model_response(&theta, &["e1".to_string()]).unwrap();
        assert_eq!(resp["e1"].vector("y").unwrap().as_slice(), &[1.0, 3.0]);
        assert_eq!(p.theta_names(true), vec!["$a$".to_string()]);
    }

    #[test]
    fn sensor_std_implies_noise_model() {
        let mut p = InferenceProblem::new("line");
        p.add_parameter(Parameter::latent("a", ParameterRole::Model, Prior::normal(2.0, 1.0))).unwrap();
        p.add_parameter(Parameter::constant("b", 1.0)).unwrap();
        p.add_parameter(Parameter::latent("sigma", ParameterRole::Noise, Prior::uniform(0.1, 1.0))).unwrap();
        p.add_forward_model(Line {
            interface : Interface::new(&["b"]).alias("a", "slope").input(Sensor::new("x")).output(Sensor::new("y").with_std("sigma"))
        }).unwrap();
        p.add_experiment("e1", "line", Values::new().with("x", vec![0.0, 1.0]).with("y", vec![1.0, 3.0])).unwrap();
        p.check().unwrap();
        p.assign_experiments_to_noise_models().unwrap();
        assert_eq!(p.noise_models().len(), 1);
        assert_eq!(p.noise_models()[0].std, "sigma");
        assert_eq!(p.noise_models()[0].sensors, vec!["y".to_string()]);
        assert_eq!(p.noise_models()[0].experiments, vec!["e1".to_string()]);

        // An explicit noise model on the sensor takes precedence.
        let mut q = p.clone();
        q.noise_models.clear();
        q.add_noise_model(NoiseModel::normal("b", &["y"])).unwrap();
        q.assign_experiments_to_noise_models().unwrap();
        assert_eq!(q.noise_models().len(), 1);
        assert_eq!(q.noise_models()[0].std, "b");
    }

    #[test]
    fn alias_colliding_with_sensor_is_rejected() {
        let mut p = InferenceProblem::new("line");
        p.add_parameter(Parameter::latent("a", ParameterRole::Model, Prior::normal(2.0, 1.0))).unwrap();
        p.add_forward_model(Line {
            interface : Interface::new(&[]).alias("a", "x").input(Sensor::new("x")).output(Sensor::new("y"))
        }).unwrap();
        assert_eq!(p.check(), Err(InferenceError::DuplicateName("x".to_string())));
    }

    #[test]
    fn unresolved_reference_is_reported() {
        let mut p = problem();
        p.add_parameter(Parameter::latent("c", ParameterRole::Model, Prior::normal("loc_c", 1.0))).unwrap();
        assert_eq!(p.check(), Err(InferenceError::UnresolvedReference {
            parameter : "c".to_string(),
            reference : "loc_c".to_string()
        }));
    }

}
