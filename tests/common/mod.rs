#![allow(dead_code)]

use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Normal, StandardNormal};
use bayes_inverse::*;

/// y = a * x + b, evaluated at the positions given by the input sensor x.
pub struct LinearModel {
    interface : Interface,
    concurrent : bool,
    batch : bool
}

impl LinearModel {

    pub fn new() -> Self {
        Self {
            interface : Interface::new(&["a", "b"]).input(Sensor::new("x")).output(Sensor::new("y")),
            concurrent : true,
            batch : false
        }
    }

    pub fn sequential() -> Self {
        Self { concurrent : false, ..Self::new() }
    }

    pub fn vectorized() -> Self {
        Self { concurrent : false, batch : true, ..Self::new() }
    }

}

impl ForwardModel for LinearModel {

    fn name(&self) -> &str {
        "linear"
    }

    fn interface(&self) -> &Interface {
        &self.interface
    }

    fn response(&self, inp : &Inputs) -> Result<Outputs> {
        let x = inp.vector("x")?;
        let (a, b) = (inp.scalar("a")?, inp.scalar("b")?);
        Ok(Values::new().with("y", x.map(|x| a * x + b )))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { concurrent : self.concurrent, batch : self.batch }
    }

}

/// Three output sensors at positions 0.2, 0.5 and 1.0: y_s(t) = A * x_s + B * t + c.
pub struct ThreeSensorModel {
    interface : Interface
}

impl ThreeSensorModel {

    /// Each output sensor names its own noise level, so no noise model needs declaring.
    pub fn with_sensor_noise() -> Self {
        let mut model = Self::new();
        for (i, s) in model.interface.output_sensors.iter_mut().enumerate() {
            s.std_parameter = Some(format!("sigma_{}", i + 1));
        }
        model
    }

    pub fn new() -> Self {
        Self {
            interface : Interface::new(&["A", "B", "c"])
                .input(Sensor::new("time"))
                .output(Sensor::new("y1").at(0.2))
                .output(Sensor::new("y2").at(0.5))
                .output(Sensor::new("y3").at(1.0))
        }
    }

}

impl ForwardModel for ThreeSensorModel {

    fn name(&self) -> &str {
        "three_sensors"
    }

    fn interface(&self) -> &Interface {
        &self.interface
    }

    fn response(&self, inp : &Inputs) -> Result<Outputs> {
        let t = inp.vector("time")?;
        let (a, b, c) = (inp.scalar("A")?, inp.scalar("B")?, inp.scalar("c")?);
        let mut out = Values::new();
        for s in self.interface.output_sensors.iter() {
            let x = s.x.unwrap_or(0.0);
            out.insert(&s.name, t.map(|t| a * x + b * t + c ));
        }
        Ok(out)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { concurrent : true, batch : false }
    }

}

pub fn linspace(from : f64, to : f64, n : usize) -> DVector<f64> {
    DVector::from_fn(n, |i, _| from + (to - from) * i as f64 / (n - 1) as f64 )
}

/// Gaussian noise made orthogonal to the columns [1, x] and rescaled so its root mean
/// square is exactly sd. Least squares on data perturbed by it recovers the true line.
pub fn orthogonal_noise(x : &DVector<f64>, sd : f64, seed : u64) -> DVector<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let n = x.nrows();
    let design = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { x[i] } );
    let e = DVector::from_fn(n, |_, _| rng.sample::<f64, _>(StandardNormal) );
    let xt = design.transpose();
    let coef = (&xt * &design).cholesky().unwrap().solve(&(&xt * &e));
    let r = e - &design * coef;
    let rms = (r.dot(&r) / n as f64).sqrt();
    r * (sd / rms)
}

/// Plain i.i.d. N(0, sd) noise.
pub fn gaussian_noise(n : usize, sd : f64, seed : u64) -> DVector<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(0.0, sd).unwrap();
    DVector::from_fn(n, |_, _| rng.sample(normal) )
}

pub const A_TRUE : f64 = 2.5;

pub const B_TRUE : f64 = 1.7;

pub const SIGMA_TRUE : f64 = 0.5;

/// Line with a ~ N(2, 1), b ~ N(1, 1) and sigma ~ U(0.1, 1.0), observed at 100 points.
pub fn linear_problem<M : ForwardModel + 'static>(model : M) -> InferenceProblem {
    let x = linspace(0.0, 1.0, 100);
    let noise = orthogonal_noise(&x, SIGMA_TRUE, 1);
    line_problem(model, x, noise)
}

/// As `linear_problem`, but the data carry unadjusted Gaussian noise.
pub fn noisy_linear_problem<M : ForwardModel + 'static>(model : M, seed : u64) -> InferenceProblem {
    let x = linspace(0.0, 1.0, 100);
    let noise = gaussian_noise(100, SIGMA_TRUE, seed);
    line_problem(model, x, noise)
}

fn line_problem<M : ForwardModel + 'static>(model : M, x : DVector<f64>, noise : DVector<f64>) -> InferenceProblem {
    let y = x.map(|x| A_TRUE * x + B_TRUE ) + noise;
    let mut problem = InferenceProblem::new("linear regression");
    problem.add_parameter(Parameter::latent("a", ParameterRole::Model, Prior::normal(2.0, 1.0)).tex("$a$")).unwrap();
    problem.add_parameter(Parameter::latent("b", ParameterRole::Model, Prior::normal(1.0, 1.0)).tex("$b$")).unwrap();
    problem.add_parameter(Parameter::latent("sigma", ParameterRole::Noise, Prior::uniform(0.1, 1.0)).tex(r"$\sigma$")).unwrap();
    problem.add_forward_model(model).unwrap();
    problem.add_experiment("line", "linear", Values::new().with("x", x).with("y", y)).unwrap();
    problem.add_noise_model(NoiseModel::normal("sigma", &["y"])).unwrap();
    problem
}

pub const SIGMAS : [f64; 3] = [0.2, 0.4, 0.6];

/// Three sensors with independent noise levels, each with a U(0.1, 0.7) prior, observed
/// in two experiments of 101 and 51 time points. With `with_third_noise` false the
/// third sensor's data does not enter the likelihood.
pub fn three_sensor_problem(with_third_noise : bool) -> InferenceProblem {
    let n_noise = if with_third_noise { 3 } else { 2 };
    sensor_problem(ThreeSensorModel::new(), n_noise)
}

/// The three-sensor data set with noise levels declared on the model's sensors only.
pub fn sensor_noise_problem() -> InferenceProblem {
    sensor_problem(ThreeSensorModel::with_sensor_noise(), 0)
}

fn sensor_problem(model : ThreeSensorModel, n_noise : usize) -> InferenceProblem {
    let (a, b, c) = (1.3, -1.0, 0.5);
    let mut problem = InferenceProblem::new("three sensors");
    problem.add_parameter(Parameter::latent("A", ParameterRole::Model, Prior::normal(1.0, 1.0))).unwrap();
    problem.add_parameter(Parameter::latent("B", ParameterRole::Model, Prior::normal(0.0, 1.0))).unwrap();
    problem.add_parameter(Parameter::constant("c", c)).unwrap();
    for (i, _) in SIGMAS.iter().enumerate() {
        let name = format!("sigma_{}", i + 1);
        problem.add_parameter(Parameter::latent(&name, ParameterRole::Noise, Prior::uniform(0.1, 0.7))).unwrap();
    }
    problem.add_forward_model(model).unwrap();
    let positions = [0.2, 0.5, 1.0];
    for (k, n) in [101usize, 51].iter().enumerate() {
        let t = linspace(0.0, 1.0, *n);
        let mut data = Values::new().with("time", t.clone());
        for (i, (x, sd)) in positions.iter().zip(SIGMAS.iter()).enumerate() {
            let y = t.map(|t| a * x + b * t + c ) + orthogonal_noise(&t, *sd, 10 * k as u64 + i as u64);
            data.insert(&format!("y{}", i + 1), y);
        }
        problem.add_experiment(&format!("experiment_{}", k + 1), "three_sensors", data).unwrap();
    }
    for i in 0..n_noise {
        let sensor = format!("y{}", i + 1);
        problem.add_noise_model(NoiseModel::normal(&format!("sigma_{}", i + 1), &[&sensor[..]])).unwrap();
    }
    problem
}

/// Line whose slope has a hierarchical prior: loc_a ~ U(2, 3), a ~ N(loc_a, 1).
pub fn hierarchical_problem() -> InferenceProblem {
    let x = linspace(0.0, 1.0, 100);
    let y = x.map(|x| A_TRUE * x + B_TRUE ) + orthogonal_noise(&x, SIGMA_TRUE, 2);
    let mut problem = InferenceProblem::new("hierarchical");
    problem.add_parameter(Parameter::latent("a", ParameterRole::Model, Prior::normal("loc_a", 1.0))).unwrap();
    problem.add_parameter(Parameter::latent("b", ParameterRole::Model, Prior::normal(1.0, 1.0))).unwrap();
    problem.add_parameter(Parameter::latent("sigma", ParameterRole::Noise, Prior::uniform(0.1, 1.0))).unwrap();
    problem.add_parameter(Parameter::latent("loc_a", ParameterRole::Prior, Prior::uniform(2.0, 3.0))).unwrap();
    problem.add_forward_model(LinearModel::new()).unwrap();
    problem.add_experiment("line", "linear", Values::new().with("x", x).with("y", y)).unwrap();
    problem.add_noise_model(NoiseModel::normal("sigma", &["y"])).unwrap();
    problem
}
