/// Marginal statistics of posterior draws.
pub mod summary;

pub use summary::*;
