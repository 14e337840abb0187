mod common;

use bayes_inverse::*;
use common::*;

fn settings(n_steps : usize, seed : u64) -> EnsembleSettings {
    EnsembleSettings {
        n_walkers : 20,
        n_steps,
        n_initial_steps : 500,
        seed : Some(seed),
        ..Default::default()
    }
}

#[test]
fn each_sensor_gets_its_own_noise_level() {
    let problem = three_sensor_problem(true);
    let res = EnsembleSolver::new(&problem, Some(settings(500, 21))).unwrap().run().unwrap();
    for (i, sd) in SIGMAS.iter().enumerate() {
        let m = res.mean(&format!("sigma_{}", i + 1)).unwrap();
        assert!((m - sd).abs() < 0.05, "sigma_{} = {}", i + 1, m);
    }
    assert!((res.mean("A").unwrap() - 1.3).abs() < 0.1);
    assert!((res.mean("B").unwrap() + 1.0).abs() < 0.1);
    assert!(res.values("c").is_none());
}

#[test]
fn log_likelihood_is_sum_over_noise_models() {
    let problem = three_sensor_problem(true);
    let post = LogPosterior::new(&problem).unwrap();
    let theta = nalgebra::DVector::from_vec(vec![1.1, -0.8, 0.3, 0.3, 0.5]);
    let map = post.theta_map(&theta);
    let assigned = post.problem();
    let experiments : Vec<String> = assigned.experiments().keys().cloned().collect();
    let responses = assigned.evaluate_model_response(&map, &experiments).unwrap();
    let mut total = 0.0;
    for n in assigned.noise_models() {
        assert_eq!(n.experiments.len(), 2);
        total += n.log_likelihood(assigned, &responses, map[&n.std[..]]).unwrap();
    }
    let ll = post.log_likelihood(&theta).unwrap();
    assert!((ll - total).abs() < 1e-8 * ll.abs().max(1.0));
}

#[test]
fn dropping_a_noise_model_leaves_its_sigma_at_the_prior() {
    let problem = three_sensor_problem(false);
    let res = EnsembleSolver::new(&problem, Some(settings(1000, 22))).unwrap().run().unwrap();
    let m3 = res.mean("sigma_3").unwrap();
    assert!((m3 - 0.4).abs() < 0.05, "sigma_3 = {}", m3);
    assert!((res.mean("sigma_1").unwrap() - SIGMAS[0]).abs() < 0.05);
    assert!((res.mean("sigma_2").unwrap() - SIGMAS[1]).abs() < 0.05);
}

#[test]
fn sensor_noise_levels_imply_noise_models() {
    let declared = LogPosterior::new(&three_sensor_problem(true)).unwrap();
    let implied = LogPosterior::new(&sensor_noise_problem()).unwrap();
    assert_eq!(implied.problem().noise_models().len(), 3);
    for (n, i) in implied.problem().noise_models().iter().zip(1..) {
        assert_eq!(n.std, format!("sigma_{}", i));
        assert_eq!(n.sensors, vec![format!("y{}", i)]);
        assert_eq!(n.experiments.len(), 2);
    }
    let theta = nalgebra::DVector::from_vec(vec![1.1, -0.8, 0.3, 0.3, 0.5]);
    let (a, b) = (declared.log_likelihood(&theta).unwrap(), implied.log_likelihood(&theta).unwrap());
    assert!((a - b).abs() < 1e-10 * a.abs().max(1.0));
}
