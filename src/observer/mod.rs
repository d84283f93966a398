// Observer system for post-write processing: catalog indexing and audit

pub mod context;
pub mod error;
pub mod implementations;
pub mod pipeline;
pub mod traits;

// Re-export core types
pub use context::*;
pub use error::*;
pub use implementations::*;
pub use pipeline::*;
pub use traits::*;
