use serde::{Serialize, Deserialize};
use crate::diff::{Tape, Var, softplus, sigmoid};

/// Support of a prior, used to map a bounded parameter onto the whole real line before
/// gradient-based sampling (the sampler moves z; the model sees theta).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Support {

    /// theta = z
    Real,

    /// theta = l + exp(z)
    LowerBounded(f64),

    /// theta = l + (u - l) sigmoid(z)
    Interval(f64, f64)

}

impl Support {

    pub fn to_unconstrained(&self, theta : f64) -> f64 {
        match *self {
            Support::Real => theta,
            Support::LowerBounded(l) => (theta - l).max(f64::MIN_POSITIVE).ln(),
            Support::Interval(l, u) => {
                let p = ((theta - l) / (u - l)).max(f64::EPSILON).min(1. - f64::EPSILON);
                p.ln() - (1. - p).ln()
            }
        }
    }

    pub fn from_unconstrained(&self, z : f64) -> f64 {
        match *self {
            Support::Real => z,
            Support::LowerBounded(l) => l + z.exp(),
            Support::Interval(l, u) => l + (u - l) * sigmoid(z)
        }
    }

    /// ln |d theta / d z| at z.
    pub fn log_abs_det_jacobian(&self, z : f64) -> f64 {
        match *self {
            Support::Real => 0.0,
            Support::LowerBounded(_) => z,
            Support::Interval(l, u) => (u - l).ln() - softplus(-z) - softplus(z)
        }
    }

}

/// Bounds of a support whose endpoints may themselves be tape variables (hierarchical
/// priors, e.g. a uniform whose lower bound is latent).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TapeSupport {
    Real,
    LowerBounded(Var),
    Interval(Var, Var)
}

/// Maps z to theta on the tape, returning (theta, ln |d theta / d z|).
pub fn constrain_on_tape(tape : &mut Tape, support : TapeSupport, z : Var) -> (Var, Var) {
    match support {
        TapeSupport::Real => {
            let zero = tape.constant(0.0);
            (z, zero)
        },
        TapeSupport::LowerBounded(l) => {
            let ez = tape.exp(z);
            let theta = tape.add(l, ez);
            (theta, z)
        },
        TapeSupport::Interval(l, u) => {
            let width = tape.sub(u, l);
            let s = tape.sigmoid(z);
            let ws = tape.mul(width, s);
            let theta = tape.add(l, ws);
            let ln_width = tape.ln(width);
            let neg_z = tape.neg(z);
            let sp_neg = tape.softplus(neg_z);
            let sp_pos = tape.softplus(z);
            let a = tape.sub(ln_width, sp_neg);
            let lj = tape.sub(a, sp_pos);
            (theta, lj)
        }
    }
}
