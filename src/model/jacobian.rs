use nalgebra::{DMatrix, DVector, DMatrixSlice, DMatrixSliceMut};
use indexmap::IndexMap;
use serde::{Serialize, Deserialize};
use crate::error::{InferenceError, Result};
use super::{ForwardModel, Inputs, Value, Values, checked_response};

/// Machine epsilon the finite-difference step is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepPrecision {

    /// Step derived from the epsilon of f64. Appropriate for models evaluated in double precision.
    Double,

    /// Step derived from the epsilon of f32, for models whose outputs only carry
    /// single-precision accuracy (e.g. surrogates evaluated in f32).
    Single

}

impl Default for StepPrecision {

    fn default() -> Self {
        StepPrecision::Double
    }

}

impl StepPrecision {

    pub fn epsilon(&self) -> f64 {
        match self {
            StepPrecision::Double => f64::EPSILON,
            StepPrecision::Single => f32::EPSILON as f64
        }
    }

}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiniteDifference {

    pub precision : StepPrecision

}

impl FiniteDifference {

    /// Step taken around x: sqrt(eps) * |x| + sqrt(eps). The absolute value keeps the step
    /// positive for negative arguments.
    pub fn step(&self, x : f64) -> f64 {
        let s = self.precision.epsilon().sqrt();
        s * x.abs() + s
    }

}

/// Derivatives of every output sensor with respect to every input channel, indexed
/// as jacobian[output][input]. For a scalar channel the entry has one element per output
/// element; for a vector channel it holds the elementwise derivative (one element per
/// channel element).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Jacobian {

    entries : IndexMap<String, IndexMap<String, DVector<f64>>>

}

impl Jacobian {

    pub fn new() -> Self {
        Self { entries : IndexMap::new() }
    }

    pub fn insert(&mut self, output : &str, input : &str, d : DVector<f64>) {
        self.entries.entry(output.to_string())
            .or_insert_with(IndexMap::new)
            .insert(input.to_string(), d);
    }

    pub fn get(&self, output : &str, input : &str) -> Option<&DVector<f64>> {
        self.entries.get(output).and_then(|row| row.get(input) )
    }

    pub fn outputs(&self) -> impl Iterator<Item=&String> {
        self.entries.keys()
    }

}

fn perturbed(inputs : &Inputs, name : &str, v : Value) -> Inputs {
    inputs.iter()
        .map(|(n, old)| if n == name { (n.clone(), v.clone()) } else { (n.clone(), old.clone()) } )
        .collect()
}

/// Derivative of a response difference with respect to a channel, given the per-element
/// step h of that channel. A vector channel is paired elementwise with the output, which
/// must either have the same length or be a scalar.
fn derivative(diff : &Value, h : &Value, output : &str, input : &str) -> Result<DVector<f64>> {
    let d = match (diff, h) {
        (diff, Value::Scalar(h)) => diff.to_vector() / (2. * h),
        (Value::Scalar(diff), Value::Vector(h)) => h.map(|h| diff / (2. * h) ),
        (Value::Vector(diff), Value::Vector(h)) => {
            if diff.nrows() != h.nrows() {
                return Err(InferenceError::ShapeMismatch(format!(
                    "output '{}' has {} elements but input '{}' has {}",
                    output, diff.nrows(), input, h.nrows()
                )));
            }
            diff.zip_map(h, |d, h| d / (2. * h) )
        }
    };
    if d.iter().any(|x| !x.is_finite() ) {
        return Err(InferenceError::NonFinite(format!("d{}/d{}", output, input)));
    }
    Ok(d)
}

/// Central finite-difference Jacobian: for each input channel, the response is evaluated at
/// x + h and x - h (all other channels fixed) and every output difference is divided by 2h.
pub fn central_difference<M>(model : &M, inputs : &Inputs, fd : &FiniteDifference) -> Result<Jacobian>
where
    M : ForwardModel + ?Sized
{
    let all : Vec<String> = inputs.keys().cloned().collect();
    central_difference_wrt(model, inputs, &all, fd)
}

/// Central differences with respect to the channels named in `wrt` only. Other channels
/// are held fixed and get no entry, whatever their length.
pub fn central_difference_wrt<M>(model : &M, inputs : &Inputs, wrt : &[String], fd : &FiniteDifference) -> Result<Jacobian>
where
    M : ForwardModel + ?Sized
{
    let outputs = model.interface().output_sensor_names();
    let mut jac = Jacobian::new();
    for (name, x) in inputs.iter().filter(|(n, _)| wrt.contains(*n) ) {
        let h = x.map(|x| fd.step(x) );
        let right = checked_response(model, &perturbed(inputs, name, x.zip_map(&h, |x, h| x + h)?))?;
        let left = checked_response(model, &perturbed(inputs, name, x.zip_map(&h, |x, h| x - h)?))?;
        for out in outputs.iter() {
            let (r, l) = match (right.get(out), left.get(out)) {
                (Some(r), Some(l)) => (r, l),
                _ => return Err(InferenceError::ShapeMismatch(format!("missing output '{}'", out)))
            };
            let diff = r.zip_map(l, |r, l| r - l)?;
            jac.insert(out, name, derivative(&diff, &h, out, name)?);
        }
    }
    Ok(jac)
}

/// Three-axis array (output sensor, input channel, element) stored as a wide matrix: one
/// n_channels x n_elements block per output sensor, laid side by side.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor3 {

    data : DMatrix<f64>,

    n_elems : usize

}

impl Tensor3 {

    pub fn zeros(n_outputs : usize, n_channels : usize, n_elems : usize) -> Self {
        Self { data : DMatrix::zeros(n_channels, n_outputs * n_elems), n_elems }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        let n_outputs = if self.n_elems == 0 { 0 } else { self.data.ncols() / self.n_elems };
        (n_outputs, self.data.nrows(), self.n_elems)
    }

    pub fn get(&self, output : usize, channel : usize, elem : usize) -> f64 {
        self.data[(channel, output * self.n_elems + elem)]
    }

    /// Channel x element block of one output sensor.
    pub fn slice(&self, output : usize) -> DMatrixSlice<'_, f64> {
        self.data.slice((0, output * self.n_elems), (self.data.nrows(), self.n_elems))
    }

    pub fn slice_mut(&mut self, output : usize) -> DMatrixSliceMut<'_, f64> {
        let nrows = self.data.nrows();
        self.data.slice_mut((0, output * self.n_elems), (nrows, self.n_elems))
    }

}

/// Arranges a Jacobian densely. The element axis has the largest arity among the input
/// channels and the Jacobian entries; shorter entries are zero-padded. Output sensors
/// follow the model's declaration order and channels the order of `inputs`.
pub fn jacobian_to_dense<M>(model : &M, inputs : &Inputs, jac : &Jacobian) -> Result<Tensor3>
where
    M : ForwardModel + ?Sized
{
    arrange(model, inputs, jac, |_| true )
}

/// Same layout as `jacobian_to_dense`, where only the channels in `wrt` must have entries.
/// Rows of the other channels stay zero.
pub fn jacobian_to_dense_wrt<M>(model : &M, inputs : &Inputs, jac : &Jacobian, wrt : &[String]) -> Result<Tensor3>
where
    M : ForwardModel + ?Sized
{
    arrange(model, inputs, jac, |ch| wrt.iter().any(|w| w == ch ) )
}

fn arrange<M, F>(model : &M, inputs : &Inputs, jac : &Jacobian, required : F) -> Result<Tensor3>
where
    M : ForwardModel + ?Sized,
    F : Fn(&str) -> bool
{
    let outputs = model.interface().output_sensor_names();
    let channels : Vec<&String> = inputs.keys().collect();
    let mut n_elems = inputs.iter().map(|(_, v)| v.len() ).max().unwrap_or(1);
    for out in outputs.iter() {
        for ch in channels.iter() {
            match jac.get(out, ch) {
                Some(d) => n_elems = n_elems.max(d.nrows()),
                None if required(ch.as_str()) => return Err(InferenceError::ShapeMismatch(
                    format!("jacobian lacks the entry d{}/d{}", out, ch)
                )),
                None => { }
            }
        }
    }
    let mut dense = Tensor3::zeros(outputs.len(), channels.len(), n_elems);
    for (i, out) in outputs.iter().enumerate() {
        let mut block = dense.slice_mut(i);
        for (j, ch) in channels.iter().enumerate() {
            if let Some(d) = jac.get(out, ch) {
                for (e, v) in d.iter().enumerate() {
                    block[(j, e)] = *v;
                }
            }
        }
    }
    Ok(dense)
}

/// Convenience for models that only want the dense layout.
pub fn dense_jacobian<M>(model : &M, inputs : &Values) -> Result<Tensor3>
where
    M : ForwardModel + ?Sized
{
    let jac = model.jacobian(inputs)?;
    jacobian_to_dense(model, inputs, &jac)
}
