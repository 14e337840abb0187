/// Reverse-mode tape over scalar operations, with support for custom operations.
pub mod tape;

/// Forward models as custom tape operations.
pub mod bridge;

pub use tape::*;

pub use bridge::*;
