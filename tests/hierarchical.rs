mod common;

use bayes_inverse::*;
use bayes_inverse::graph::dependency_order;
use common::*;

#[test]
fn hyperparameters_are_resolved_first() {
    let problem = hierarchical_problem();
    let order = dependency_order(problem.parameters()).unwrap();
    assert_eq!(order, vec!["b", "sigma", "loc_a", "a"]);
    let post = LogPosterior::new(&problem).unwrap();
    assert_eq!(post.names(), &order[..]);
}

#[test]
fn prior_samples_follow_the_hierarchy() {
    let problem = hierarchical_problem();
    let post = LogPosterior::new(&problem).unwrap();
    let mut rng = <rand_chacha::ChaCha8Rng as rand::SeedableRng>::seed_from_u64(4);
    for _ in 0..100 {
        let theta = post.sample_prior(&mut rng).unwrap();
        let loc_a = theta[2];
        assert!(loc_a >= 2.0 && loc_a <= 3.0);
        assert!(post.log_prior(&theta).unwrap().is_finite());
    }
}

#[test]
fn nuts_calibrates_hyperparameter() {
    let problem = hierarchical_problem();
    let settings = NutsSettings {
        n_chains : 2,
        n_steps : 1000,
        n_initial_steps : 300,
        seed : Some(8),
        ..Default::default()
    };
    let res = NutsSolver::new(&problem, Some(settings)).unwrap().run().unwrap();
    let a = res.mean("a").unwrap();
    let loc_a = res.mean("loc_a").unwrap();
    assert!((a - A_TRUE).abs() < 0.1, "a = {}", a);
    assert!((loc_a - 2.5).abs() < 0.1, "loc_a = {}", loc_a);
    assert!(res.values("loc_a").unwrap().iter().all(|l| *l > 2.0 && *l < 3.0 ));
}

#[test]
fn circular_priors_are_rejected() {
    let mut problem = InferenceProblem::new("cycle");
    problem.add_parameter(Parameter::latent("a", ParameterRole::Model, Prior::normal("b", 1.0))).unwrap();
    problem.add_parameter(Parameter::latent("b", ParameterRole::Prior, Prior::normal("a", 1.0))).unwrap();
    problem.add_parameter(Parameter::latent("sigma", ParameterRole::Noise, Prior::uniform(0.1, 1.0))).unwrap();
    problem.add_forward_model(LinearModel::new()).unwrap();
    let x = linspace(0.0, 1.0, 5);
    problem.add_experiment("line", "linear", Values::new().with("x", x.clone()).with("y", x)).unwrap();
    problem.add_noise_model(NoiseModel::normal("sigma", &["y"])).unwrap();
    match LogPosterior::new(&problem) {
        Err(InferenceError::CircularDependency(p, q)) => {
            let mut pair = vec![p, q];
            pair.sort();
            assert_eq!(pair, vec!["a", "b"]);
        },
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("cycle was accepted")
    }
}

#[test]
fn unknown_hyperparameter_is_rejected() {
    let mut problem = hierarchical_problem();
    problem.add_parameter(Parameter::latent("d", ParameterRole::Model, Prior::normal("nowhere", 1.0))).unwrap();
    match LogPosterior::new(&problem) {
        Err(InferenceError::UnresolvedReference { parameter, reference }) => {
            assert_eq!(parameter, "d");
            assert_eq!(reference, "nowhere");
        },
        other => panic!("unexpected {:?}", other.map(|_| () ))
    }
}
