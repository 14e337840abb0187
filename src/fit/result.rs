use nalgebra::DMatrix;
use indexmap::IndexMap;
use serde::{Serialize, Deserialize};
use crate::calc::Summary;
use crate::error::{InferenceError, Result};

/// Which sampler produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    Ensemble,
    Nuts,
    Hmc
}

/// Posterior draws of a sampler run. `samples[c]` holds the draws of chain (or walker) c,
/// one row per draw and one column per latent parameter, columns following `names`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {

    names : Vec<String>,

    display_names : Vec<String>,

    samples : Vec<DMatrix<f64>>,

    accept_rates : Vec<f64>,

    backend : Backend

}

impl InferenceResult {

    pub fn new(names : Vec<String>, samples : Vec<DMatrix<f64>>, accept_rates : Vec<f64>, backend : Backend) -> Result<Self> {
        if samples.iter().any(|s| s.ncols() != names.len() ) || samples.len() != accept_rates.len() {
            return Err(InferenceError::ShapeMismatch(
                format!("{} chains with {} acceptance rates for {} parameters", samples.len(), accept_rates.len(), names.len())
            ));
        }
        Ok(Self { display_names : names.clone(), names, samples, accept_rates, backend })
    }

    pub fn names(&self) -> &[String] {
        &self.names[..]
    }

    /// Labels used for reporting; the parameter names unless renamed.
    pub fn display_names(&self) -> &[String] {
        &self.display_names[..]
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn samples(&self) -> &[DMatrix<f64>] {
        &self.samples[..]
    }

    pub fn n_chains(&self) -> usize {
        self.samples.len()
    }

    pub fn n_draws(&self) -> usize {
        self.samples.first().map(|s| s.nrows() ).unwrap_or(0)
    }

    pub fn accept_rates(&self) -> &[f64] {
        &self.accept_rates[..]
    }

    fn column(&self, name : &str) -> Option<usize> {
        self.names.iter().position(|n| n == name )
            .or_else(|| self.display_names.iter().position(|n| n == name ) )
    }

    /// Draws of one chain for a parameter (by name or display label).
    pub fn chain_values(&self, name : &str, chain : usize) -> Option<Vec<f64>> {
        let col = self.column(name)?;
        self.samples.get(chain).map(|s| s.column(col).iter().cloned().collect() )
    }

    /// Draws of all chains for a parameter, chain after chain.
    pub fn values(&self, name : &str) -> Option<Vec<f64>> {
        let col = self.column(name)?;
        Some(self.samples.iter().flat_map(|s| s.column(col).iter().cloned().collect::<Vec<_>>() ).collect())
    }

    pub fn mean(&self, name : &str) -> Option<f64> {
        self.values(name).map(|v| crate::calc::mean(&v) )
    }

    /// Per-parameter marginal statistics over all chains, labelled by display name.
    pub fn summary(&self) -> Vec<Summary> {
        self.names.iter().zip(self.display_names.iter())
            .filter_map(|(n, d)| self.values(n).map(|v| Summary::new(d, &v) ) )
            .collect()
    }

    /// Replaces display labels; parameters absent from the map keep theirs.
    pub fn rename(&mut self, labels : &IndexMap<String, String>) {
        for (n, d) in self.names.iter().zip(self.display_names.iter_mut()) {
            if let Some(label) = labels.get(n) {
                *d = label.clone();
            }
        }
    }

    pub fn with_tex_names(mut self, tex : Vec<String>) -> Result<Self> {
        if tex.len() != self.names.len() {
            return Err(InferenceError::ShapeMismatch(
                format!("{} labels for {} parameters", tex.len(), self.names.len())
            ));
        }
        self.display_names = tex;
        Ok(self)
    }

    /// Result as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

}
