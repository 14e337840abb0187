use indexmap::IndexMap;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Serialize, Deserialize};
use statrs::distribution::Continuous;
use std::fmt;
use std::str::FromStr;
use crate::diff::{Tape, Var};
use crate::error::{InferenceError, Result};

/// Bijections between bounded supports and the real line.
pub mod transform;

pub use transform::*;

const LN_SQRT_2PI : f64 = 0.918_938_533_204_672_8;

/// Distribution families available as priors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {

    /// Roles: loc, scale.
    Normal,

    /// Roles: loc, scale (of the normal distribution of ln(x)).
    LogNormal,

    /// Roles: low, high.
    Uniform,

    /// Roles: loc (shift), scale, shape.
    Weibull

}

impl Family {

    pub fn roles(&self) -> &'static [&'static str] {
        match self {
            Family::Normal | Family::LogNormal => &["loc", "scale"],
            Family::Uniform => &["low", "high"],
            Family::Weibull => &["loc", "scale", "shape"]
        }
    }

}

impl fmt::Display for Family {

    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Family::Normal => "normal",
            Family::LogNormal => "lognormal",
            Family::Uniform => "uniform",
            Family::Weibull => "weibull"
        };
        write!(f, "{}", name)
    }

}

impl FromStr for Family {

    type Err = InferenceError;

    fn from_str(s : &str) -> Result<Self> {
        match &s.to_lowercase()[..] {
            "normal" | "gaussian" => Ok(Family::Normal),
            "lognormal" | "log-normal" => Ok(Family::LogNormal),
            "uniform" => Ok(Family::Uniform),
            "weibull" => Ok(Family::Weibull),
            other => Err(InferenceError::Config(format!("Unknown prior family '{}'", other)))
        }
    }

}

/// Hyperparameter of a prior: a literal, or the global name of another parameter (latent
/// or constant) whose value is substituted at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HyperRef {
    Value(f64),
    Parameter(String)
}

impl From<f64> for HyperRef {

    fn from(v : f64) -> Self {
        HyperRef::Value(v)
    }

}

impl<'a> From<&'a str> for HyperRef {

    fn from(name : &'a str) -> Self {
        HyperRef::Parameter(name.to_string())
    }

}

/// Prior distribution of a latent parameter. Hyperparameter values are resolved by the
/// caller into a role -> value map before evaluating or sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prior {

    pub family : Family,

    pub hyperparameters : IndexMap<String, HyperRef>

}

fn hyper(values : &IndexMap<String, f64>, role : &str, parameter : &str) -> Result<f64> {
    values.get(role).cloned().ok_or_else(|| InferenceError::MissingHyperparameter {
        parameter : parameter.to_string(),
        role : role.to_string()
    })
}

fn hyper_var(values : &IndexMap<String, Var>, role : &str, parameter : &str) -> Result<Var> {
    values.get(role).cloned().ok_or_else(|| InferenceError::MissingHyperparameter {
        parameter : parameter.to_string(),
        role : role.to_string()
    })
}

impl Prior {

    /// Prior without hyperparameters; add them with `with`.
    pub fn new(family : Family) -> Self {
        Self { family, hyperparameters : IndexMap::new() }
    }

    pub fn with<H : Into<HyperRef>>(mut self, role : &str, h : H) -> Self {
        self.hyperparameters.insert(role.to_string(), h.into());
        self
    }

    pub fn normal<A : Into<HyperRef>, B : Into<HyperRef>>(loc : A, scale : B) -> Self {
        Self::new(Family::Normal).with("loc", loc).with("scale", scale)
    }

    pub fn lognormal<A : Into<HyperRef>, B : Into<HyperRef>>(loc : A, scale : B) -> Self {
        Self::new(Family::LogNormal).with("loc", loc).with("scale", scale)
    }

    pub fn uniform<A : Into<HyperRef>, B : Into<HyperRef>>(low : A, high : B) -> Self {
        Self::new(Family::Uniform).with("low", low).with("high", high)
    }

    pub fn weibull<A, B, C>(loc : A, scale : B, shape : C) -> Self
    where
        A : Into<HyperRef>,
        B : Into<HyperRef>,
        C : Into<HyperRef>
    {
        Self::new(Family::Weibull).with("loc", loc).with("scale", scale).with("shape", shape)
    }

    /// Global names of the parameters this prior refers to, in role order.
    pub fn references(&self) -> Vec<&str> {
        self.hyperparameters.values()
            .filter_map(|h| match h {
                HyperRef::Parameter(name) => Some(&name[..]),
                HyperRef::Value(_) => None
            })
            .collect()
    }

    /// Verifies all roles required by the family are present.
    pub fn check(&self, parameter : &str) -> Result<()> {
        for role in self.family.roles() {
            if !self.hyperparameters.contains_key(*role) {
                return Err(InferenceError::MissingHyperparameter {
                    parameter : parameter.to_string(),
                    role : role.to_string()
                });
            }
        }
        Ok(())
    }

    fn invalid(&self, parameter : &str, msg : &str) -> InferenceError {
        InferenceError::InvalidHyperparameter {
            parameter : parameter.to_string(),
            family : self.family.to_string(),
            msg : msg.to_string()
        }
    }

    /// Log-density at x. Hyperparameters outside their domain (e.g. a non-positive
    /// scale reached through a latent hyperparameter) give zero density.
    pub fn log_density(&self, x : f64, values : &IndexMap<String, f64>, parameter : &str) -> Result<f64> {
        let lp = match self.family {
            Family::Normal => {
                let (loc, scale) = (hyper(values, "loc", parameter)?, hyper(values, "scale", parameter)?);
                statrs::distribution::Normal::new(loc, scale).map(|d| d.ln_pdf(x) )
            },
            Family::LogNormal => {
                let (loc, scale) = (hyper(values, "loc", parameter)?, hyper(values, "scale", parameter)?);
                statrs::distribution::LogNormal::new(loc, scale).map(|d| d.ln_pdf(x) )
            },
            Family::Uniform => {
                let (low, high) = (hyper(values, "low", parameter)?, hyper(values, "high", parameter)?);
                if !(low < high) {
                    return Ok(f64::NEG_INFINITY);
                }
                statrs::distribution::Uniform::new(low, high).map(|d| d.ln_pdf(x) )
            },
            Family::Weibull => {
                let loc = hyper(values, "loc", parameter)?;
                let (scale, shape) = (hyper(values, "scale", parameter)?, hyper(values, "shape", parameter)?);
                statrs::distribution::Weibull::new(shape, scale).map(|d| d.ln_pdf(x - loc) )
            }
        };
        Ok(lp.unwrap_or(f64::NEG_INFINITY))
    }

    pub fn support(&self, values : &IndexMap<String, f64>, parameter : &str) -> Result<Support> {
        match self.family {
            Family::Normal => Ok(Support::Real),
            Family::LogNormal => Ok(Support::LowerBounded(0.0)),
            Family::Uniform => Ok(Support::Interval(
                hyper(values, "low", parameter)?,
                hyper(values, "high", parameter)?
            )),
            Family::Weibull => Ok(Support::LowerBounded(hyper(values, "loc", parameter)?))
        }
    }

    pub fn tape_support(&self, tape : &mut Tape, values : &IndexMap<String, Var>, parameter : &str) -> Result<TapeSupport> {
        match self.family {
            Family::Normal => Ok(TapeSupport::Real),
            Family::LogNormal => Ok(TapeSupport::LowerBounded(tape.constant(0.0))),
            Family::Uniform => Ok(TapeSupport::Interval(
                hyper_var(values, "low", parameter)?,
                hyper_var(values, "high", parameter)?
            )),
            Family::Weibull => Ok(TapeSupport::LowerBounded(hyper_var(values, "loc", parameter)?))
        }
    }

    /// Draws one value. Fails with InvalidHyperparameter when the resolved hyperparameters
    /// do not define a distribution.
    pub fn sample<R : Rng>(&self, values : &IndexMap<String, f64>, parameter : &str, rng : &mut R) -> Result<f64> {
        match self.family {
            Family::Normal => {
                let (loc, scale) = (hyper(values, "loc", parameter)?, hyper(values, "scale", parameter)?);
                let d = rand_distr::Normal::new(loc, scale).map_err(|e| self.invalid(parameter, &e.to_string()) )?;
                Ok(rng.sample(d))
            },
            Family::LogNormal => {
                let (loc, scale) = (hyper(values, "loc", parameter)?, hyper(values, "scale", parameter)?);
                let d = rand_distr::LogNormal::new(loc, scale).map_err(|e| self.invalid(parameter, &e.to_string()) )?;
                Ok(rng.sample(d))
            },
            Family::Uniform => {
                let (low, high) = (hyper(values, "low", parameter)?, hyper(values, "high", parameter)?);
                if !(low < high) || !low.is_finite() || !high.is_finite() {
                    return Err(self.invalid(parameter, "low must be smaller than high"));
                }
                Ok(rng.sample(rand::distributions::Uniform::new(low, high)))
            },
            Family::Weibull => {
                let loc = hyper(values, "loc", parameter)?;
                let (scale, shape) = (hyper(values, "scale", parameter)?, hyper(values, "shape", parameter)?);
                let d = rand_distr::Weibull::new(scale, shape).map_err(|e| self.invalid(parameter, &e.to_string()) )?;
                Ok(loc + rng.sample(d))
            }
        }
    }

    /// Draws n independent values from a generator seeded with `seed`.
    pub fn generate_samples(&self, values : &IndexMap<String, f64>, parameter : &str, n : usize, seed : u64) -> Result<Vec<f64>> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n).map(|_| self.sample(values, parameter, &mut rng) ).collect()
    }

    /// Log-density at x written as tape operations, so gradients reach x and any latent
    /// hyperparameter. x is assumed to lie inside the support.
    pub fn log_density_on_tape(&self, tape : &mut Tape, x : Var, values : &IndexMap<String, Var>, parameter : &str) -> Result<Var> {
        match self.family {
            Family::Normal => {
                let (loc, scale) = (hyper_var(values, "loc", parameter)?, hyper_var(values, "scale", parameter)?);
                Ok(normal_log_density(tape, x, loc, scale))
            },
            Family::LogNormal => {
                let (loc, scale) = (hyper_var(values, "loc", parameter)?, hyper_var(values, "scale", parameter)?);
                let lx = tape.ln(x);
                let lp = normal_log_density(tape, lx, loc, scale);
                Ok(tape.sub(lp, lx))
            },
            Family::Uniform => {
                let (low, high) = (hyper_var(values, "low", parameter)?, hyper_var(values, "high", parameter)?);
                let width = tape.sub(high, low);
                let lw = tape.ln(width);
                Ok(tape.neg(lw))
            },
            Family::Weibull => {
                let loc = hyper_var(values, "loc", parameter)?;
                let (scale, shape) = (hyper_var(values, "scale", parameter)?, hyper_var(values, "shape", parameter)?);

                // ln k - ln lambda + (k - 1) ln y - y^k, with y = (x - loc) / lambda
                let shifted = tape.sub(x, loc);
                let y = tape.div(shifted, scale);
                let ly = tape.ln(y);
                let ln_k = tape.ln(shape);
                let ln_l = tape.ln(scale);
                let one = tape.constant(1.0);
                let km1 = tape.sub(shape, one);
                let a = tape.mul(km1, ly);
                let kly = tape.mul(shape, ly);
                let yk = tape.exp(kly);
                let b = tape.sub(ln_k, ln_l);
                let c = tape.add(b, a);
                Ok(tape.sub(c, yk))
            }
        }
    }

}

/// -ln(sqrt(2 pi)) - ln(scale) - 0.5 ((x - loc) / scale)^2
pub fn normal_log_density(tape : &mut Tape, x : Var, loc : Var, scale : Var) -> Var {
    let r = tape.sub(x, loc);
    let z = tape.div(r, scale);
    let z2 = tape.square(z);
    let half = tape.scale(z2, -0.5);
    let ls = tape.ln(scale);
    let a = tape.sub(half, ls);
    tape.offset(a, -LN_SQRT_2PI)
}
