mod common;

use bayes_inverse::*;
use bayes_inverse::calc::{mean, std_dev};
use common::*;

const TOL : f64 = 0.1;

/// Every posterior mean lies within three posterior standard deviations of the truth.
fn assert_covers_truth(res : &InferenceResult) {
    for (name, truth) in [("a", A_TRUE), ("b", B_TRUE), ("sigma", SIGMA_TRUE)] {
        let v = res.values(name).unwrap();
        let (m, sd) = (mean(&v), std_dev(&v));
        assert!((m - truth).abs() < 3.0 * sd, "{} = {} +- {}", name, m, sd);
    }
    let sd_a = std_dev(&res.values("a").unwrap());
    assert!(sd_a > 0.1 && sd_a < 0.3, "sd(a) = {}", sd_a);
}

#[test]
fn ensemble_recovers_line() {
    let problem = linear_problem(LinearModel::new());
    let settings = EnsembleSettings {
        n_walkers : 20,
        n_steps : 1000,
        n_initial_steps : 500,
        seed : Some(11),
        ..Default::default()
    };
    let mut solver = EnsembleSolver::new(&problem, Some(settings)).unwrap();
    let res = solver.fit().unwrap();
    assert_eq!(res.backend(), Backend::Ensemble);
    assert_eq!(res.n_chains(), 20);
    assert_eq!(res.n_draws(), 1000);
    assert!((res.mean("a").unwrap() - A_TRUE).abs() < TOL);
    assert!((res.mean("b").unwrap() - B_TRUE).abs() < TOL);
    assert!((res.mean("sigma").unwrap() - SIGMA_TRUE).abs() < 0.05);
    let accept = res.accept_rates().iter().sum::<f64>() / 20.;
    assert!(accept > 0.1 && accept < 0.9);
}

#[test]
fn nuts_recovers_line() {
    let problem = linear_problem(LinearModel::new());
    let settings = NutsSettings {
        n_chains : 2,
        n_steps : 1000,
        n_initial_steps : 300,
        seed : Some(3),
        ..Default::default()
    };
    let mut solver = NutsSolver::new(&problem, Some(settings)).unwrap();
    let res = solver.fit().unwrap();
    assert_eq!(res.backend(), Backend::Nuts);
    assert!((res.mean("a").unwrap() - A_TRUE).abs() < TOL);
    assert!((res.mean("b").unwrap() - B_TRUE).abs() < TOL);
    assert!((res.mean("sigma").unwrap() - SIGMA_TRUE).abs() < 0.05);
    assert!(res.values("sigma").unwrap().iter().all(|s| *s > 0.1 && *s < 1.0 ));
    assert!(solver.posterior().is_some());
}

#[test]
fn ensemble_covers_line_under_gaussian_noise() {
    let problem = noisy_linear_problem(LinearModel::new(), 101);
    let settings = EnsembleSettings { n_walkers : 20, n_steps : 1000, n_initial_steps : 500, seed : Some(12), ..Default::default() };
    let res = EnsembleSolver::new(&problem, Some(settings)).unwrap().run().unwrap();
    assert_covers_truth(&res);
}

#[test]
fn nuts_covers_line_under_gaussian_noise() {
    let problem = noisy_linear_problem(LinearModel::new(), 102);
    let settings = NutsSettings { n_chains : 2, n_steps : 1000, n_initial_steps : 300, seed : Some(4), ..Default::default() };
    let res = NutsSolver::new(&problem, Some(settings)).unwrap().run().unwrap();
    assert_covers_truth(&res);
}

#[test]
fn static_hmc_recovers_line() {
    let problem = linear_problem(LinearModel::sequential());
    let settings = NutsSettings {
        n_steps : 1000,
        n_initial_steps : 300,
        kernel : Kernel::Hmc { leapfrog_steps : 10 },
        seed : Some(5),
        ..Default::default()
    };
    let res = NutsSolver::new(&problem, Some(settings)).unwrap().run().unwrap();
    assert_eq!(res.backend(), Backend::Hmc);
    assert!((res.mean("a").unwrap() - A_TRUE).abs() < TOL);
    assert!((res.mean("b").unwrap() - B_TRUE).abs() < TOL);
}

#[test]
fn batch_models_are_evaluated_together() {
    let problem = linear_problem(LinearModel::vectorized());
    let post = LogPosterior::new(&problem).unwrap();
    assert!(post.capabilities().batch);
    let thetas : Vec<_> = vec![vec![2.5, 1.7, 0.5], vec![2.0, 1.0, 0.3], vec![2.0, 1.0, 5.0]]
        .into_iter()
        .map(nalgebra::DVector::from_vec)
        .collect();
    let batch = post.log_prob_batch(&thetas).unwrap();
    for (t, lp) in thetas.iter().zip(batch.iter()) {
        let single = post.log_prob(t).unwrap();
        if single.is_finite() {
            assert!((single - lp).abs() < 1e-9);
        } else {
            assert_eq!(*lp, f64::NEG_INFINITY);
        }
    }
    // sigma = 5 lies outside U(0.1, 1.0)
    assert_eq!(batch[2], f64::NEG_INFINITY);
}

#[test]
fn tex_names_label_the_result() {
    let problem = linear_problem(LinearModel::new());
    let settings = EnsembleSettings { n_steps : 20, n_initial_steps : 0, seed : Some(1), use_tex : true, ..Default::default() };
    let res = EnsembleSolver::new(&problem, Some(settings)).unwrap().run().unwrap();
    assert_eq!(res.display_names(), &["$a$".to_string(), "$b$".to_string(), r"$\sigma$".to_string()][..]);
    assert!(res.mean("a").is_some());
    let json = res.to_json().unwrap();
    assert!(json.contains("\"backend\""));
}
