use nalgebra::{DVector, RowDVector};
use indexmap::IndexMap;
use std::sync::Arc;
use crate::error::{InferenceError, Result};
use crate::model::{ForwardModel, Inputs, Outputs, Tensor3, Value, Values, checked_response, jacobian_to_dense_wrt};
use super::tape::{Arg, DifferentiableOp, Tape, Var};

/// Shape of one entry of a flattened response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Vector(usize)
}

impl Shape {

    pub fn len(&self) -> usize {
        match self {
            Shape::Scalar => 1,
            Shape::Vector(n) => *n
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

}

/// A model response with all sensors concatenated into one vector, in the order of the
/// model's output sensors, along with the shape of each sensor's block.
#[derive(Debug, Clone, PartialEq)]
pub struct Flattened {

    pub values : DVector<f64>,

    pub structure : IndexMap<String, Shape>

}

impl Flattened {

    pub fn flatten(outputs : &Outputs, order : &[String]) -> Result<Self> {
        let mut values = Vec::new();
        let mut structure = IndexMap::new();
        for name in order.iter() {
            let v = outputs.get(name).ok_or_else(|| InferenceError::ShapeMismatch(
                format!("response lacks output sensor '{}'", name)
            ))?;
            values.extend_from_slice(v.as_slice());
            let shape = match v {
                Value::Scalar(_) => Shape::Scalar,
                Value::Vector(x) => Shape::Vector(x.nrows())
            };
            structure.insert(name.clone(), shape);
        }
        Ok(Self { values : DVector::from_vec(values), structure })
    }

    /// Start offset and length of each sensor's block.
    pub fn offsets(&self) -> Vec<(usize, usize)> {
        let mut start = 0;
        self.structure.values()
            .map(|s| {
                let r = (start, s.len());
                start += s.len();
                r
            })
            .collect()
    }

    pub fn offset(&self, name : &str) -> Option<(usize, usize)> {
        let ix = self.structure.get_index_of(name)?;
        Some(self.offsets()[ix])
    }

    pub fn unflatten(&self) -> Outputs {
        self.structure.iter().zip(self.offsets())
            .map(|((name, shape), (start, len))| {
                let v = match shape {
                    Shape::Scalar => Value::Scalar(self.values[start]),
                    Shape::Vector(_) => Value::Vector(self.values.rows(start, len).into_owned())
                };
                (name.clone(), v)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

}

/// What the bridge keeps between the forward and the backward pass.
#[derive(Debug, Clone)]
pub struct BridgeContext {

    pub jacobian : Tensor3,

    pub structure : IndexMap<String, Shape>

}

impl BridgeContext {

    fn offsets(&self) -> Vec<(usize, usize)> {
        let mut start = 0;
        self.structure.values()
            .map(|s| {
                let r = (start, s.len());
                start += s.len();
                r
            })
            .collect()
    }

}

/// Tape variables produced by one bridge evaluation.
#[derive(Debug, Clone)]
pub struct BridgeOutput {

    pub vars : Vec<Var>,

    pub context : Arc<BridgeContext>

}

impl BridgeOutput {

    /// Output variables of one sensor.
    pub fn sensor(&self, name : &str) -> Option<&[Var]> {
        let ix = self.context.structure.get_index_of(name)?;
        let (start, len) = self.context.offsets()[ix];
        Some(&self.vars[start..(start + len)])
    }

    pub fn by_sensor(&self) -> IndexMap<String, Vec<Var>> {
        self.context.structure.keys().zip(self.context.offsets())
            .map(|(name, (start, len))| (name.clone(), self.vars[start..(start + len)].to_vec()) )
            .collect()
    }

}

/// Presents a black-box forward model as a differentiable operation. The arguments are the
/// model's channels (input sensors, then parameters by local name); the outputs are the
/// flattened response. The backward pass contracts the incoming gradient with the
/// model's Jacobian, so the model itself never needs to know about the tape.
#[derive(Clone)]
pub struct DifferentiableBridge {

    model : Arc<dyn ForwardModel>,

    channels : Vec<String>,

    outputs : Vec<String>

}

impl DifferentiableBridge {

    pub fn new(model : Arc<dyn ForwardModel>) -> Self {
        let channels = model.interface().channel_names();
        let outputs = model.interface().output_sensor_names();
        Self { model, channels, outputs }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels[..]
    }

    pub fn model(&self) -> &Arc<dyn ForwardModel> {
        &self.model
    }

    fn inputs(&self, args : &[Value]) -> Result<Inputs> {
        if args.len() != self.channels.len() {
            return Err(InferenceError::ShapeMismatch(format!(
                "forward model '{}' takes {} channels, got {}",
                self.model.name(), self.channels.len(), args.len()
            )));
        }
        Ok(self.channels.iter().cloned().zip(args.iter().cloned()).collect())
    }

    /// Response, flattened, and its dense Jacobian with respect to the channels flagged in
    /// `needs_grad`. Rows of the other channels are zero.
    pub fn evaluate(&self, args : &[Value], needs_grad : &[bool]) -> Result<(Flattened, Tensor3)> {
        let inputs = self.inputs(args)?;
        if needs_grad.len() != args.len() {
            return Err(InferenceError::ShapeMismatch(format!(
                "{} gradient flags for {} channels", needs_grad.len(), args.len()
            )));
        }
        let response = checked_response(self.model.as_ref(), &inputs)?;
        let flat = Flattened::flatten(&response, &self.outputs)?;
        let wrt : Vec<String> = self.channels.iter().zip(needs_grad.iter())
            .filter(|(_, n)| **n )
            .map(|(c, _)| c.clone() )
            .collect();
        let dense = if wrt.is_empty() {
            let n_elems = inputs.iter().map(|(_, v)| v.len() ).chain(std::iter::once(flat.len())).max().unwrap_or(1);
            Tensor3::zeros(self.outputs.len(), self.channels.len(), n_elems)
        } else {
            let jac = self.model.jacobian_wrt(&inputs, &wrt)?;
            jacobian_to_dense_wrt(self.model.as_ref(), &inputs, &jac, &wrt)?
        };
        Ok((flat, dense))
    }

    /// Records the model on the tape.
    pub fn apply(&self, tape : &mut Tape, args : &[Arg]) -> Result<BridgeOutput> {
        let (vars, context) = tape.custom(self, args)?;
        Ok(BridgeOutput { vars, context })
    }

    /// Evaluates without recording, for callers that only need the response.
    pub fn response(&self, args : &[Value]) -> Result<Outputs> {
        let inputs = self.inputs(args)?;
        checked_response(self.model.as_ref(), &inputs)
    }

}

impl DifferentiableOp for DifferentiableBridge {

    type Context = BridgeContext;

    fn forward(&self, args : &[Value], needs_grad : &[bool]) -> Result<(DVector<f64>, BridgeContext)> {
        let (flat, jacobian) = self.evaluate(args, needs_grad)?;
        Ok((flat.values, BridgeContext { jacobian, structure : flat.structure }))
    }

    fn backward(ctx : &BridgeContext, grad_output : &DVector<f64>, needs_grad : &[bool]) -> Result<Vec<Option<f64>>> {
        let (n_sensors, n_channels, n_elems) = ctx.jacobian.shape();
        if n_channels != needs_grad.len() || n_sensors != ctx.structure.len() {
            return Err(InferenceError::ShapeMismatch(format!(
                "saved jacobian has shape {:?} for {} sensors and {} arguments",
                (n_sensors, n_channels, n_elems), ctx.structure.len(), needs_grad.len()
            )));
        }
        let mut grad = RowDVector::zeros(n_channels);
        for (i, (start, len)) in ctx.offsets().into_iter().enumerate() {
            if len > n_elems || start + len > grad_output.nrows() {
                return Err(InferenceError::ShapeMismatch(
                    format!("gradient block of sensor {} does not fit the saved jacobian", i)
                ));
            }
            let mut padded = RowDVector::zeros(n_elems);
            for e in 0..len {
                padded[e] = grad_output[start + e];
            }
            grad += padded * ctx.jacobian.slice(i).transpose();
        }
        Ok(needs_grad.iter().zip(grad.iter()).map(|(n, g)| if *n { Some(*g) } else { None } ).collect())
    }

}

/// Plain value of each channel for a set of named inputs.
pub fn channel_values(bridge : &DifferentiableBridge, inputs : &Values) -> Result<Vec<Value>> {
    bridge.channels().iter()
        .map(|c| inputs.get(c).cloned().ok_or_else(|| InferenceError::UnknownParameter(c.clone()) ) )
        .collect()
}
