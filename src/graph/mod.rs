use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use indexmap::IndexMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::debug;
use crate::error::{InferenceError, Result};
use crate::problem::Parameters;

/// Hierarchical structure of the latent parameters: a directed graph with an edge from
/// each hyperparameter to the parameter whose prior refers to it. Nodes are inserted in
/// declaration order, so node indices double as declaration ranks.
pub struct PriorGraph {

    graph : DiGraph<String, ()>,

    nodes : IndexMap<String, NodeIndex>

}

impl PriorGraph {

    /// Builds the graph over the latent parameters. References to constants are dropped
    /// (they are not sampled); references to undeclared names fail.
    pub fn new(parameters : &Parameters) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut nodes = IndexMap::new();
        for (name, p) in parameters.iter() {
            if p.is_latent() {
                nodes.insert(name.clone(), graph.add_node(name.clone()));
            }
        }
        for (name, p) in parameters.iter() {
            let prior = match &p.prior {
                Some(prior) => prior,
                None => continue
            };
            for r in prior.references() {
                match parameters.get(r) {
                    Some(dep) if dep.is_latent() => {
                        graph.add_edge(nodes[r], nodes[&name[..]], ());
                    },
                    Some(_) => { },
                    None => return Err(InferenceError::UnresolvedReference {
                        parameter : name.clone(),
                        reference : r.to_string()
                    })
                }
            }
        }
        Ok(Self { graph, nodes })
    }

    /// Latent parameters the prior of `name` depends on directly.
    pub fn dependencies(&self, name : &str) -> Vec<String> {
        match self.nodes.get(name) {
            Some(ix) => {
                let mut deps : Vec<NodeIndex> = self.graph.neighbors_directed(*ix, Direction::Incoming).collect();
                deps.sort();
                deps.dedup();
                deps.into_iter().map(|d| self.graph[d].clone() ).collect()
            },
            None => Vec::new()
        }
    }

    /// Kahn's algorithm, always releasing the earliest-declared parameter among those whose
    /// dependencies were all emitted. Graphs without hierarchy keep declaration order.
    pub fn order(&self) -> Result<Vec<String>> {
        let n = self.graph.node_count();
        let mut in_degree : Vec<usize> = self.graph.node_indices()
            .map(|ix| self.graph.neighbors_directed(ix, Direction::Incoming).count() )
            .collect();
        let mut ready : BinaryHeap<Reverse<usize>> = in_degree.iter().enumerate()
            .filter(|(_, d)| **d == 0 )
            .map(|(i, _)| Reverse(i) )
            .collect();
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            let ix = NodeIndex::new(i);
            order.push(self.graph[ix].clone());
            for next in self.graph.neighbors_directed(ix, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next.index()));
                }
            }
        }
        if order.len() < n {
            let (a, b) = self.cycle_members();
            return Err(InferenceError::CircularDependency(a, b));
        }
        debug!("sampling order {:?}", order);
        Ok(order)
    }

    // Two adjacent members of some cycle: the earliest-declared node in a strongly connected
    // component that is not a single acyclic node, and one of its dependencies in the same
    // component. A self reference gives the same name twice.
    fn cycle_members(&self) -> (String, String) {
        let mut best : Option<(NodeIndex, NodeIndex)> = None;
        for comp in tarjan_scc(&self.graph) {
            let first = match comp.iter().min() {
                Some(first) => *first,
                None => continue
            };
            let dep = self.graph.neighbors_directed(first, Direction::Incoming)
                .filter(|d| comp.contains(d) )
                .min();
            if let Some(dep) = dep {
                if best.map(|(b, _)| first < b ).unwrap_or(true) {
                    best = Some((first, dep));
                }
            }
        }
        match best {
            Some((a, b)) => (self.graph[a].clone(), self.graph[b].clone()),
            None => (String::new(), String::new())
        }
    }

}

/// Latent parameter names ordered so every latent hyperparameter precedes the parameters
/// whose priors refer to it.
pub fn dependency_order(parameters : &Parameters) -> Result<Vec<String>> {
    PriorGraph::new(parameters)?.order()
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::problem::{Parameter, ParameterRole};
    use crate::prob::Prior;

    fn params(list : Vec<Parameter>) -> Parameters {
        list.into_iter().map(|p| (p.name.clone(), p) ).collect()
    }

    #[test]
    fn hyperparameters_come_first() {
        let ps = params(vec![
            Parameter::latent("a", ParameterRole::Model, Prior::normal("loc_a", "scale_a")),
            Parameter::latent("b", ParameterRole::Model, Prior::normal(1.0, 1.0)),
            Parameter::latent("loc_a", ParameterRole::Prior, Prior::uniform(2.0, 3.0)),
            Parameter::constant("scale_a", 1.0)
        ]);
        assert_eq!(dependency_order(&ps).unwrap(), vec!["b", "loc_a", "a"]);
    }

    #[test]
    fn independent_parameters_keep_declaration_order() {
        let ps = params(vec![
            Parameter::latent("z", ParameterRole::Model, Prior::normal(0.0, 1.0)),
            Parameter::latent("y", ParameterRole::Model, Prior::normal(0.0, 1.0)),
            Parameter::latent("x", ParameterRole::Model, Prior::normal(0.0, 1.0))
        ]);
        assert_eq!(dependency_order(&ps).unwrap(), vec!["z", "y", "x"]);
    }

    #[test]
    fn two_cycle_names_both() {
        let ps = params(vec![
            Parameter::latent("A", ParameterRole::Model, Prior::normal("B", 1.0)),
            Parameter::latent("B", ParameterRole::Model, Prior::normal("A", 1.0))
        ]);
        match dependency_order(&ps) {
            Err(InferenceError::CircularDependency(a, b)) => {
                let mut names = vec![a, b];
                names.sort();
                assert_eq!(names, vec!["A", "B"]);
            },
            other => panic!("expected a cycle, got {:?}", other)
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let ps = params(vec![
            Parameter::latent("s", ParameterRole::Model, Prior::normal(0.0, "s"))
        ]);
        assert_eq!(dependency_order(&ps), Err(InferenceError::CircularDependency("s".to_string(), "s".to_string())));
    }

    #[test]
    fn unknown_reference_fails() {
        let ps = params(vec![
            Parameter::latent("a", ParameterRole::Model, Prior::normal("nope", 1.0))
        ]);
        assert!(matches!(dependency_order(&ps), Err(InferenceError::UnresolvedReference { .. })));
    }

}
