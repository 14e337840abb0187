use nalgebra::DVector;
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::debug;
use crate::error::Result;
use super::posterior::LogPosterior;

/// Energy error above which a trajectory is flagged as divergent.
pub(crate) const MAX_DELTA_H : f64 = 1000.0;

/// Position (unconstrained), momentum, gradient and log-density at the position.
#[derive(Debug, Clone)]
pub(crate) struct PhasePoint {
    pub q : DVector<f64>,
    pub p : DVector<f64>,
    pub grad : DVector<f64>,
    pub logp : f64
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TransitionStats {
    pub accept_prob : f64,
    pub diverging : bool,
    pub n_leapfrog : usize
}

/// Hamiltonian with a diagonal mass matrix over the unconstrained log-posterior.
pub(crate) struct Hamiltonian<'a> {

    posterior : &'a LogPosterior,

    inv_mass : DVector<f64>,

    // Standard deviation of the momentum, sqrt(1 / inv_mass).
    momentum_sd : DVector<f64>

}

impl<'a> Hamiltonian<'a> {

    pub fn new(posterior : &'a LogPosterior) -> Self {
        let dim = posterior.dim();
        Self { posterior, inv_mass : DVector::repeat(dim, 1.0), momentum_sd : DVector::repeat(dim, 1.0) }
    }

    /// Uses the given variances of the positions as the inverse mass matrix diagonal.
    pub fn set_inverse_mass(&mut self, var : DVector<f64>) {
        self.momentum_sd = var.map(|v| (1. / v).sqrt() );
        self.inv_mass = var;
    }

    pub fn inverse_mass(&self) -> &DVector<f64> {
        &self.inv_mass
    }

    pub fn point(&self, q : DVector<f64>) -> Result<PhasePoint> {
        let (logp, grad) = self.posterior.log_prob_grad_unconstrained(&q)?;
        let p = DVector::zeros(q.nrows());
        Ok(PhasePoint { q, p, grad, logp })
    }

    pub fn sample_momentum<R : Rng>(&self, rng : &mut R) -> DVector<f64> {
        self.momentum_sd.map(|sd| sd * rng.sample::<f64, _>(StandardNormal) )
    }

    pub fn energy(&self, pt : &PhasePoint) -> f64 {
        let ke : f64 = pt.p.iter().zip(self.inv_mass.iter()).map(|(p, m)| 0.5 * p * p * m ).sum();
        -pt.logp + ke
    }

    /// Half step in momentum, full step in position, half step in momentum.
    pub fn leapfrog(&self, pt : &PhasePoint, eps : f64) -> Result<PhasePoint> {
        let p_half = &pt.p + &pt.grad * (0.5 * eps);
        let q = &pt.q + p_half.component_mul(&self.inv_mass) * eps;
        let (logp, grad) = self.posterior.log_prob_grad_unconstrained(&q)?;
        let p = p_half + &grad * (0.5 * eps);
        Ok(PhasePoint { q, p, grad, logp })
    }

    /// The trajectory between left and right is turning if either endpoint's velocity
    /// points back towards the other endpoint.
    pub fn is_turning(&self, left : &PhasePoint, right : &PhasePoint) -> bool {
        let dq = &right.q - &left.q;
        dq.dot(&left.p.component_mul(&self.inv_mass)) < 0.0 || dq.dot(&right.p.component_mul(&self.inv_mass)) < 0.0
    }

}

/// Doubles or halves eps starting from `eps0` until the acceptance probability of a single
/// leapfrog step crosses 1/2. Steps that fail to evaluate count as unacceptable.
pub(crate) fn find_reasonable_step_size<R : Rng>(h : &Hamiltonian, current : &PhasePoint, eps0 : f64, rng : &mut R) -> f64 {
    let mut start = current.clone();
    start.p = h.sample_momentum(rng);
    let h0 = h.energy(&start);
    let log_ratio = |eps : f64| -> f64 {
        match h.leapfrog(&start, eps) {
            Ok(next) => {
                let lr = h0 - h.energy(&next);
                if lr.is_nan() { f64::NEG_INFINITY } else { lr }
            },
            Err(e) => {
                debug!("step size {} rejected: {}", eps, e);
                f64::NEG_INFINITY
            }
        }
    };
    let ln_half = 0.5f64.ln();
    let mut eps = if eps0 > 0.0 { eps0 } else { 1.0 };
    let direction = if log_ratio(eps) > ln_half { 1.0 } else { -1.0 };
    for _ in 0..50 {
        let next = eps * 2.0f64.powf(direction);
        let lr = log_ratio(next);
        if direction > 0.0 && !(lr > ln_half) {
            break;
        }
        eps = next;
        if direction < 0.0 && lr > ln_half {
            break;
        }
    }
    eps.max(1e-10).min(1e3)
}

/// Static HMC: a fixed number of leapfrog steps followed by a Metropolis correction.
pub(crate) fn hmc_transition<R : Rng>(
    h : &Hamiltonian,
    current : &PhasePoint,
    eps : f64,
    n_leapfrog : usize,
    rng : &mut R
) -> Result<(PhasePoint, TransitionStats)> {
    let mut start = current.clone();
    start.p = h.sample_momentum(rng);
    let h0 = h.energy(&start);
    let mut pt = start.clone();
    for _ in 0..n_leapfrog {
        pt = h.leapfrog(&pt, eps)?;
    }
    let delta_h = h.energy(&pt) - h0;
    let accept_prob = if delta_h.is_finite() { (-delta_h).min(0.0).exp() } else { 0.0 };
    let stats = TransitionStats {
        accept_prob,
        diverging : !delta_h.is_finite() || delta_h > MAX_DELTA_H,
        n_leapfrog
    };
    let u : f64 = rng.gen();
    if u < accept_prob {
        Ok((pt, stats))
    } else {
        Ok((start, stats))
    }
}

/// Dual averaging of the log step size towards a target acceptance probability.
pub(crate) struct DualAveraging {
    mu : f64,
    target : f64,
    h_bar : f64,
    log_eps_bar : f64,
    count : f64
}

impl DualAveraging {

    const GAMMA : f64 = 0.05;

    const T0 : f64 = 10.0;

    const KAPPA : f64 = 0.75;

    pub fn new(eps : f64, target : f64) -> Self {
        Self { mu : (10. * eps).ln(), target, h_bar : 0.0, log_eps_bar : eps.ln(), count : 0.0 }
    }

    /// Records the acceptance statistic of one warm-up transition; returns the next step size.
    pub fn update(&mut self, accept_prob : f64) -> f64 {
        let accept = if accept_prob.is_finite() { accept_prob } else { 0.0 };
        self.count += 1.0;
        let w = 1. / (self.count + Self::T0);
        self.h_bar = (1. - w) * self.h_bar + w * (self.target - accept);
        let log_eps = self.mu - (self.count.sqrt() / Self::GAMMA) * self.h_bar;
        let m = self.count.powf(-Self::KAPPA);
        self.log_eps_bar = m * log_eps + (1. - m) * self.log_eps_bar;
        log_eps.exp()
    }

    pub fn final_step_size(&self) -> f64 {
        self.log_eps_bar.exp()
    }

}

/// Running first and second moments of positions collected during warm-up.
pub(crate) struct MassWindow {
    sum : DVector<f64>,
    sq_sum : DVector<f64>,
    count : usize
}

impl MassWindow {

    pub fn new(dim : usize) -> Self {
        Self { sum : DVector::zeros(dim), sq_sum : DVector::zeros(dim), count : 0 }
    }

    pub fn push(&mut self, q : &DVector<f64>) {
        self.sum += q;
        self.sq_sum += q.component_mul(q);
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Position variances, shrunk towards 1e-3 for short windows.
    pub fn variance(&self) -> DVector<f64> {
        let n = self.count as f64;
        let mean = &self.sum / n;
        let var = (&self.sq_sum / n - mean.component_mul(&mean)).map(|v| v.max(1e-8) );
        var.map(|v| (n / (n + 5.)) * v + 1e-3 * (5. / (n + 5.)) )
    }

}
