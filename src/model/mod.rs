use nalgebra::DVector;
use indexmap::IndexMap;
use serde::{Serialize, Deserialize};
use crate::error::{InferenceError, Result};

/// Central finite-difference Jacobians and their dense (sensor x channel x element) layout.
pub mod jacobian;

pub use jacobian::*;

/// A named quantity exchanged with a forward model: either a single number or a vector
/// of numbers (e.g. a time series observed at one sensor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(f64),
    Vector(DVector<f64>)
}

impl Value {

    pub fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Vector(v) => v.nrows()
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Scalar(_))
    }

    pub fn as_slice(&self) -> &[f64] {
        match self {
            Value::Scalar(x) => std::slice::from_ref(x),
            Value::Vector(v) => v.as_slice()
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(x) => Some(*x),
            Value::Vector(_) => None
        }
    }

    /// Copies the entries into a column vector (a scalar becomes a vector of length one).
    pub fn to_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(self.as_slice())
    }

    pub fn map<F>(&self, f : F) -> Value
    where
        F : Fn(f64) -> f64
    {
        match self {
            Value::Scalar(x) => Value::Scalar(f(*x)),
            Value::Vector(v) => Value::Vector(v.map(|x| f(x)))
        }
    }

    /// Combines two values elementwise. A scalar operand is broadcast against a vector one;
    /// two vectors must have the same length.
    pub fn zip_map<F>(&self, other : &Value, f : F) -> Result<Value>
    where
        F : Fn(f64, f64) -> f64
    {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(f(*a, *b))),
            (Value::Scalar(a), Value::Vector(b)) => Ok(Value::Vector(b.map(|b| f(*a, b)))),
            (Value::Vector(a), Value::Scalar(b)) => Ok(Value::Vector(a.map(|a| f(a, *b)))),
            (Value::Vector(a), Value::Vector(b)) => {
                if a.nrows() != b.nrows() {
                    return Err(InferenceError::ShapeMismatch(
                        format!("cannot combine vectors of length {} and {}", a.nrows(), b.nrows())
                    ));
                }
                Ok(Value::Vector(a.zip_map(b, |a, b| f(a, b))))
            }
        }
    }

    pub fn is_finite(&self) -> bool {
        self.as_slice().iter().all(|x| x.is_finite())
    }

}

impl From<f64> for Value {

    fn from(x : f64) -> Self {
        Value::Scalar(x)
    }

}

impl From<DVector<f64>> for Value {

    fn from(v : DVector<f64>) -> Self {
        Value::Vector(v)
    }

}

impl From<Vec<f64>> for Value {

    fn from(v : Vec<f64>) -> Self {
        Value::Vector(DVector::from_vec(v))
    }

}

impl<'a> From<&'a [f64]> for Value {

    fn from(v : &'a [f64]) -> Self {
        Value::Vector(DVector::from_column_slice(v))
    }

}

/// Insertion-ordered map of named values. Serves both as the input of a forward model
/// (input sensors and local parameter names) and as its output (one entry per output sensor).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(IndexMap<String, Value>);

pub type Inputs = Values;

pub type Outputs = Values;

impl Values {

    pub fn new() -> Self {
        Values(IndexMap::new())
    }

    pub fn with<V : Into<Value>>(mut self, name : &str, v : V) -> Self {
        self.insert(name, v);
        self
    }

    pub fn insert<V : Into<Value>>(&mut self, name : &str, v : V) -> Option<Value> {
        self.0.insert(name.to_string(), v.into())
    }

    pub fn get(&self, name : &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name : &str) -> bool {
        self.0.contains_key(name)
    }

    /// Reads a scalar entry. Vectors of length one are accepted.
    pub fn scalar(&self, name : &str) -> Result<f64> {
        match self.0.get(name) {
            Some(Value::Scalar(x)) => Ok(*x),
            Some(Value::Vector(v)) if v.nrows() == 1 => Ok(v[0]),
            Some(Value::Vector(v)) => Err(InferenceError::ShapeMismatch(
                format!("'{}' holds a vector of length {} where a scalar was expected", name, v.nrows())
            )),
            None => Err(InferenceError::UnknownParameter(name.to_string()))
        }
    }

    /// Reads an entry as a column vector (a scalar becomes a vector of length one).
    pub fn vector(&self, name : &str) -> Result<DVector<f64>> {
        self.0.get(name)
            .map(|v| v.to_vector() )
            .ok_or_else(|| InferenceError::UnknownParameter(name.to_string()) )
    }

    pub fn iter(&self) -> impl Iterator<Item=(&String, &Value)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item=&String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

}

impl std::iter::FromIterator<(String, Value)> for Values {

    fn from_iter<I : IntoIterator<Item=(String, Value)>>(iter : I) -> Self {
        Values(iter.into_iter().collect())
    }

}

/// A measurement location of a forward model. Input sensors carry known quantities
/// (e.g. time points); output sensors carry the predictions compared against data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {

    pub name : String,

    /// Optional spatial coordinate of the sensor, available to the forward model.
    pub x : Option<f64>,

    /// Global name of the parameter holding this sensor's noise level, if any.
    pub std_parameter : Option<String>

}

impl Sensor {

    pub fn new(name : &str) -> Self {
        Self { name : name.to_string(), x : None, std_parameter : None }
    }

    pub fn at(mut self, x : f64) -> Self {
        self.x = Some(x);
        self
    }

    pub fn with_std(mut self, parameter : &str) -> Self {
        self.std_parameter = Some(parameter.to_string());
        self
    }

}

/// Declares what a forward model consumes and produces. Parameters map the global name
/// (as registered at the problem) to the local name the model reads from its inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interface {

    pub parameters : IndexMap<String, String>,

    pub input_sensors : Vec<Sensor>,

    pub output_sensors : Vec<Sensor>

}

impl Interface {

    /// Interface where every parameter is known under the same name globally and locally.
    pub fn new(parameters : &[&str]) -> Self {
        let parameters = parameters.iter().map(|p| (p.to_string(), p.to_string()) ).collect();
        Self { parameters, input_sensors : Vec::new(), output_sensors : Vec::new() }
    }

    /// Registers a parameter whose global name differs from the name seen by the model.
    pub fn alias(mut self, global : &str, local : &str) -> Self {
        self.parameters.insert(global.to_string(), local.to_string());
        self
    }

    pub fn input(mut self, sensor : Sensor) -> Self {
        self.input_sensors.push(sensor);
        self
    }

    pub fn output(mut self, sensor : Sensor) -> Self {
        self.output_sensors.push(sensor);
        self
    }

    pub fn input_sensor_names(&self) -> Vec<String> {
        self.input_sensors.iter().map(|s| s.name.clone() ).collect()
    }

    pub fn output_sensor_names(&self) -> Vec<String> {
        self.output_sensors.iter().map(|s| s.name.clone() ).collect()
    }

    pub fn output_sensor(&self, name : &str) -> Option<&Sensor> {
        self.output_sensors.iter().find(|s| s.name == name )
    }

    /// Names of the channels presented to the differentiation tape: input sensors first,
    /// then the local names of the parameters, both in declaration order.
    pub fn channel_names(&self) -> Vec<String> {
        self.input_sensor_names().into_iter()
            .chain(self.parameters.values().cloned())
            .collect()
    }

}

/// Evaluation guarantees a model offers to the samplers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {

    /// Calls to `response` can run simultaneously from several threads.
    pub concurrent : bool,

    /// `batch_response` evaluates many input sets faster than repeated calls to `response`.
    pub batch : bool

}

/// A black-box mapping from named inputs (input sensors and parameters) to named outputs
/// (one entry per output sensor). Only `response` has to be provided; the Jacobian falls
/// back to central finite differences.
pub trait ForwardModel : Send + Sync {

    fn name(&self) -> &str;

    fn interface(&self) -> &Interface;

    fn response(&self, _inputs : &Inputs) -> Result<Outputs> {
        Err(InferenceError::NotImplemented(self.name().to_string()))
    }

    /// Derivatives of every output sensor with respect to every input channel.
    fn jacobian(&self, inputs : &Inputs) -> Result<Jacobian> {
        let all : Vec<String> = inputs.keys().cloned().collect();
        self.jacobian_wrt(inputs, &all)
    }

    /// Derivatives with respect to the channels in `wrt`. The gradient samplers call this
    /// with the tracked parameters only. Override it to supply an analytic Jacobian;
    /// `jacobian` follows.
    fn jacobian_wrt(&self, inputs : &Inputs, wrt : &[String]) -> Result<Jacobian> {
        central_difference_wrt(self, inputs, wrt, &self.finite_difference())
    }

    /// Step configuration for the default Jacobian.
    fn finite_difference(&self) -> FiniteDifference {
        FiniteDifference::default()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn batch_response(&self, inputs : &[Inputs]) -> Result<Vec<Outputs>> {
        inputs.iter().map(|inp| self.response(inp) ).collect()
    }

}

/// Evaluates the model and verifies every declared output sensor was produced.
pub fn checked_response<M>(model : &M, inputs : &Inputs) -> Result<Outputs>
where
    M : ForwardModel + ?Sized
{
    let out = model.response(inputs)?;
    check_outputs(model, &out)?;
    Ok(out)
}

pub(crate) fn check_outputs<M>(model : &M, out : &Outputs) -> Result<()>
where
    M : ForwardModel + ?Sized
{
    for s in model.interface().output_sensors.iter() {
        if !out.contains(&s.name) {
            return Err(InferenceError::ShapeMismatch(
                format!("forward model '{}' did not produce output sensor '{}'", model.name(), s.name)
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {

    use super::*;

    struct Unimplemented {
        interface : Interface
    }

    impl ForwardModel for Unimplemented {

        fn name(&self) -> &str {
            "unimplemented"
        }

        fn interface(&self) -> &Interface {
            &self.interface
        }

    }

    #[test]
    fn missing_response_is_reported() {
        let m = Unimplemented { interface : Interface::new(&["a"]).output(Sensor::new("y")) };
        let inp = Values::new().with("a", 1.0);
        assert_eq!(m.response(&inp), Err(InferenceError::NotImplemented("unimplemented".to_string())));
        assert!(matches!(m.jacobian(&inp), Err(InferenceError::NotImplemented(_))));
    }

    #[test]
    fn channels_list_sensors_before_parameters() {
        let iface = Interface::new(&["a"])
            .alias("b_global", "b")
            .input(Sensor::new("x"))
            .output(Sensor::new("y"));
        assert_eq!(iface.channel_names(), vec!["x".to_string(), "a".to_string(), "b".to_string()]);
    }

    #[test]
    fn scalar_broadcasts_against_vector() {
        let a = Value::from(vec![1.0, 2.0]);
        let b = Value::Scalar(3.0);
        assert_eq!(a.zip_map(&b, |a, b| a * b).unwrap(), Value::from(vec![3.0, 6.0]));
        assert!(a.zip_map(&Value::from(vec![1.0, 2.0, 3.0]), |a, b| a + b).is_err());
    }

}
