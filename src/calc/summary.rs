use serde::{Serialize, Deserialize};

pub fn mean(data : &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Sample variance (n - 1 denominator).
pub fn variance(data : &[f64]) -> f64 {
    if data.len() < 2 {
        return f64::NAN;
    }
    let m = mean(data);
    data.iter().map(|x| (x - m).powi(2) ).sum::<f64>() / (data.len() - 1) as f64
}

pub fn std_dev(data : &[f64]) -> f64 {
    variance(data).sqrt()
}

/// Quantile q in [0, 1] of sorted data, linearly interpolating between order statistics.
pub fn quantile_sorted(sorted : &[f64], q : f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.max(0.0).min(1.0) * (sorted.len() - 1) as f64;
    let (lo, hi) = (pos.floor() as usize, pos.ceil() as usize);
    let w = pos - lo as f64;
    sorted[lo] * (1. - w) + sorted[hi] * w
}

pub fn quantile(data : &[f64], q : f64) -> f64 {
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal) );
    quantile_sorted(&sorted, q)
}

/// Marginal summary of one parameter over all chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {

    pub name : String,

    pub mean : f64,

    pub sd : f64,

    pub median : f64,

    pub q05 : f64,

    pub q95 : f64

}

impl Summary {

    pub fn new(name : &str, data : &[f64]) -> Self {
        let mut sorted = data.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal) );
        Self {
            name : name.to_string(),
            mean : mean(data),
            sd : std_dev(data),
            median : quantile_sorted(&sorted, 0.5),
            q05 : quantile_sorted(&sorted, 0.05),
            q95 : quantile_sorted(&sorted, 0.95)
        }
    }

}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn order_statistics() {
        let data : Vec<f64> = (0..=100).map(|i| i as f64 ).collect();
        let s = Summary::new("x", &data);
        assert!((s.mean - 50.0).abs() < 1e-12);
        assert!((s.median - 50.0).abs() < 1e-12);
        assert!((s.q05 - 5.0).abs() < 1e-12);
        assert!((s.q95 - 95.0).abs() < 1e-12);
        assert!((quantile(&[3.0, 1.0, 2.0, 4.0], 0.5) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn sample_deviation() {
        assert!((std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert!(variance(&[1.0]).is_nan());
    }

}
