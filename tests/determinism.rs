mod common;

use bayes_inverse::*;
use common::*;

fn ensemble(seed : u64) -> InferenceResult {
    let problem = linear_problem(LinearModel::new());
    let settings = EnsembleSettings { n_steps : 50, n_initial_steps : 10, seed : Some(seed), ..Default::default() };
    EnsembleSolver::new(&problem, Some(settings)).unwrap().run().unwrap()
}

fn nuts(seed : u64) -> InferenceResult {
    let problem = linear_problem(LinearModel::new());
    let settings = NutsSettings { n_chains : 2, n_steps : 30, n_initial_steps : 20, seed : Some(seed), ..Default::default() };
    NutsSolver::new(&problem, Some(settings)).unwrap().run().unwrap()
}

#[test]
fn seeded_ensemble_is_reproducible() {
    assert_eq!(ensemble(42).samples(), ensemble(42).samples());
    assert_ne!(ensemble(42).samples(), ensemble(43).samples());
}

#[test]
fn seeded_nuts_is_reproducible() {
    let (first, second) = (nuts(42), nuts(42));
    assert_eq!(first.samples(), second.samples());
    assert_eq!(first.accept_rates(), second.accept_rates());
    assert_ne!(first.samples(), nuts(43).samples());
}

#[test]
fn nuts_chains_use_distinct_seeds() {
    let res = nuts(7);
    assert_eq!(res.n_chains(), 2);
    assert_ne!(res.chain_values("a", 0), res.chain_values("a", 1));
}

#[test]
fn sequential_and_concurrent_evaluation_agree() {
    let settings = EnsembleSettings { n_steps : 30, n_initial_steps : 10, seed : Some(9), ..Default::default() };
    let par = EnsembleSolver::new(&linear_problem(LinearModel::new()), Some(settings.clone())).unwrap().run().unwrap();
    let seq = EnsembleSolver::new(&linear_problem(LinearModel::sequential()), Some(settings)).unwrap().run().unwrap();
    assert_eq!(par.samples(), seq.samples());
}
