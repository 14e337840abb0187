use nalgebra::DVector;
use std::sync::Arc;
use crate::error::{InferenceError, Result};
use crate::model::Value;

/// Handle to a scalar recorded on a `Tape`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Var(usize);

impl Var {

    pub fn index(&self) -> usize {
        self.0
    }

}

/// Argument of a custom operation: either a tracked tape variable (which receives a
/// gradient) or a fixed value that takes part in the evaluation only.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Var(Var),
    Fixed(Value)
}

/// A computation with a user-defined forward pass and a vector-Jacobian product as its
/// backward pass. Whatever the forward pass needs for differentiation goes into the
/// context, which the tape keeps until the reverse sweep.
pub trait DifferentiableOp {

    type Context : 'static;

    /// Evaluates the operation on plain numbers, returning the flat outputs. `needs_grad`
    /// flags the arguments that will receive a gradient in the backward pass.
    fn forward(&self, args : &[Value], needs_grad : &[bool]) -> Result<(DVector<f64>, Self::Context)>;

    /// Maps the gradient with respect to the outputs to one gradient per argument.
    /// Arguments for which `needs_grad` is false must yield None.
    fn backward(
        ctx : &Self::Context,
        grad_output : &DVector<f64>,
        needs_grad : &[bool]
    ) -> Result<Vec<Option<f64>>>;

}

#[derive(Debug, Clone)]
enum Op {
    Input,
    Const,
    Add(usize, usize),
    Sub(usize, usize),
    Mul(usize, usize),
    Div(usize, usize),
    Neg(usize),
    Ln(usize),
    Exp(usize),
    Powf(usize, f64),
    Square(usize),
    Softplus(usize),
    Sigmoid(usize),
    Abs(usize),
    Sum(Vec<usize>),
    Custom { call : usize, elem : usize }
}

#[derive(Debug, Clone)]
struct Node {
    val : f64,
    op : Op
}

type Pullback = Box<dyn Fn(&DVector<f64>, &[bool]) -> Result<Vec<Option<f64>>>>;

struct Call {

    // Tape index of each argument, None for fixed arguments.
    args : Vec<Option<usize>>,

    first : usize,

    len : usize,

    pullback : Pullback

}

/// Reverse-mode differentiation tape over scalars. Each operation appends a node; `backward`
/// sweeps the nodes in reverse, accumulating adjoints. Custom operations occupy a contiguous
/// range of output nodes and contribute through their own backward rule.
pub struct Tape {

    nodes : Vec<Node>,

    calls : Vec<Call>,

    adjoints : Vec<f64>

}

impl Default for Tape {

    fn default() -> Self {
        Self::new()
    }

}

/// Numerically stable ln(1 + exp(x)).
pub fn softplus(x : f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// Numerically stable 1 / (1 + exp(-x)).
pub fn sigmoid(x : f64) -> f64 {
    if x >= 0.0 {
        1. / (1. + (-x).exp())
    } else {
        let e = x.exp();
        e / (1. + e)
    }
}

impl Tape {

    pub fn new() -> Self {
        Self { nodes : Vec::new(), calls : Vec::new(), adjoints : Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, val : f64, op : Op) -> Var {
        self.nodes.push(Node { val, op });
        Var(self.nodes.len() - 1)
    }

    /// Independent variable.
    pub fn var(&mut self, x : f64) -> Var {
        self.push(x, Op::Input)
    }

    pub fn constant(&mut self, x : f64) -> Var {
        self.push(x, Op::Const)
    }

    pub fn val(&self, v : Var) -> f64 {
        self.nodes[v.0].val
    }

    pub fn add(&mut self, a : Var, b : Var) -> Var {
        let v = self.val(a) + self.val(b);
        self.push(v, Op::Add(a.0, b.0))
    }

    pub fn sub(&mut self, a : Var, b : Var) -> Var {
        let v = self.val(a) - self.val(b);
        self.push(v, Op::Sub(a.0, b.0))
    }

    pub fn mul(&mut self, a : Var, b : Var) -> Var {
        let v = self.val(a) * self.val(b);
        self.push(v, Op::Mul(a.0, b.0))
    }

    pub fn div(&mut self, a : Var, b : Var) -> Var {
        let v = self.val(a) / self.val(b);
        self.push(v, Op::Div(a.0, b.0))
    }

    pub fn neg(&mut self, a : Var) -> Var {
        let v = -self.val(a);
        self.push(v, Op::Neg(a.0))
    }

    pub fn ln(&mut self, a : Var) -> Var {
        let v = self.val(a).ln();
        self.push(v, Op::Ln(a.0))
    }

    pub fn exp(&mut self, a : Var) -> Var {
        let v = self.val(a).exp();
        self.push(v, Op::Exp(a.0))
    }

    pub fn powf(&mut self, a : Var, p : f64) -> Var {
        let v = self.val(a).powf(p);
        self.push(v, Op::Powf(a.0, p))
    }

    pub fn square(&mut self, a : Var) -> Var {
        let x = self.val(a);
        self.push(x * x, Op::Square(a.0))
    }

    pub fn softplus(&mut self, a : Var) -> Var {
        let v = softplus(self.val(a));
        self.push(v, Op::Softplus(a.0))
    }

    pub fn sigmoid(&mut self, a : Var) -> Var {
        let v = sigmoid(self.val(a));
        self.push(v, Op::Sigmoid(a.0))
    }

    pub fn abs(&mut self, a : Var) -> Var {
        let v = self.val(a).abs();
        self.push(v, Op::Abs(a.0))
    }

    pub fn sum(&mut self, terms : &[Var]) -> Var {
        let v = terms.iter().map(|t| self.val(*t) ).sum();
        self.push(v, Op::Sum(terms.iter().map(|t| t.0 ).collect()))
    }

    /// a * c for a constant c.
    pub fn scale(&mut self, a : Var, c : f64) -> Var {
        let c = self.constant(c);
        self.mul(a, c)
    }

    /// a + c for a constant c.
    pub fn offset(&mut self, a : Var, c : f64) -> Var {
        let c = self.constant(c);
        self.add(a, c)
    }

    /// Records a custom operation. Tracked arguments are detached to their current values
    /// before the forward pass; the outputs become new tape variables.
    pub fn custom<O>(&mut self, op : &O, args : &[Arg]) -> Result<(Vec<Var>, Arc<O::Context>)>
    where
        O : DifferentiableOp + 'static
    {
        let plain : Vec<Value> = args.iter()
            .map(|a| match a {
                Arg::Var(v) => Value::Scalar(self.val(*v)),
                Arg::Fixed(x) => x.clone()
            })
            .collect();
        let needs : Vec<bool> = args.iter().map(|a| matches!(a, Arg::Var(_)) ).collect();
        let (out, ctx) = op.forward(&plain, &needs)?;
        let ctx = Arc::new(ctx);
        let call = self.calls.len();
        let first = self.nodes.len();
        let vars : Vec<Var> = out.iter().enumerate()
            .map(|(elem, v)| self.push(*v, Op::Custom { call, elem }) )
            .collect();
        let saved = ctx.clone();
        self.calls.push(Call {
            args : args.iter().map(|a| match a { Arg::Var(v) => Some(v.0), Arg::Fixed(_) => None } ).collect(),
            first,
            len : vars.len(),
            pullback : Box::new(move |g : &DVector<f64>, needs : &[bool]| O::backward(&saved, g, needs) )
        });
        Ok((vars, ctx))
    }

    /// Accumulates d root / d node for every node recorded before root.
    pub fn backward(&mut self, root : Var) -> Result<()> {
        self.adjoints = vec![0.0; self.nodes.len()];
        self.adjoints[root.0] = 1.0;
        for i in (0..=root.0).rev() {
            let g = self.adjoints[i];
            match &self.nodes[i].op {
                Op::Custom { call, elem } => {
                    if *elem != 0 {
                        continue;
                    }
                    let c = &self.calls[*call];
                    let grad_out = DVector::from_column_slice(&self.adjoints[c.first..(c.first + c.len)]);
                    let needs : Vec<bool> = c.args.iter().map(|a| a.is_some() ).collect();
                    let grads = (c.pullback)(&grad_out, &needs)?;
                    if grads.len() != c.args.len() {
                        return Err(InferenceError::ShapeMismatch(format!(
                            "custom operation returned {} gradients for {} arguments",
                            grads.len(), c.args.len()
                        )));
                    }
                    for (arg, grad) in c.args.iter().zip(grads.iter()) {
                        if let (Some(ix), Some(grad)) = (arg, grad) {
                            self.adjoints[*ix] += grad;
                        }
                    }
                    continue;
                },
                _ if g == 0.0 => continue,
                Op::Input | Op::Const => { },
                Op::Add(a, b) => {
                    self.adjoints[*a] += g;
                    self.adjoints[*b] += g;
                },
                Op::Sub(a, b) => {
                    self.adjoints[*a] += g;
                    self.adjoints[*b] -= g;
                },
                Op::Mul(a, b) => {
                    let (va, vb) = (self.nodes[*a].val, self.nodes[*b].val);
                    self.adjoints[*a] += g * vb;
                    self.adjoints[*b] += g * va;
                },
                Op::Div(a, b) => {
                    let (va, vb) = (self.nodes[*a].val, self.nodes[*b].val);
                    self.adjoints[*a] += g / vb;
                    self.adjoints[*b] -= g * va / (vb * vb);
                },
                Op::Neg(a) => {
                    self.adjoints[*a] -= g;
                },
                Op::Ln(a) => {
                    self.adjoints[*a] += g / self.nodes[*a].val;
                },
                Op::Exp(a) => {
                    self.adjoints[*a] += g * self.nodes[i].val;
                },
                Op::Powf(a, p) => {
                    self.adjoints[*a] += g * p * self.nodes[*a].val.powf(p - 1.);
                },
                Op::Square(a) => {
                    self.adjoints[*a] += 2. * g * self.nodes[*a].val;
                },
                Op::Softplus(a) => {
                    self.adjoints[*a] += g * sigmoid(self.nodes[*a].val);
                },
                Op::Sigmoid(a) => {
                    let s = self.nodes[i].val;
                    self.adjoints[*a] += g * s * (1. - s);
                },
                Op::Abs(a) => {
                    let x = self.nodes[*a].val;
                    let sign = if x > 0.0 { 1.0 } else if x < 0.0 { -1.0 } else { 0.0 };
                    self.adjoints[*a] += g * sign;
                },
                Op::Sum(terms) => {
                    for t in terms.iter() {
                        self.adjoints[*t] += g;
                    }
                }
            }
        }
        Ok(())
    }

    /// Adjoint of v after the last call to `backward` (zero before any sweep).
    pub fn grad(&self, v : Var) -> f64 {
        self.adjoints.get(v.0).cloned().unwrap_or(0.0)
    }

}
