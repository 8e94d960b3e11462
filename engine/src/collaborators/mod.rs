//! Collaborator adapters
//!
//! Concrete implementations of the sdk collaborator traits that ship with the
//! engine: an HTTP vector index and a JSON file renderer. The relational side
//! lives in `catalog`.

pub mod http_vector;
pub mod json_renderer;

pub use http_vector::HttpVectorIndex;
pub use json_renderer::JsonFileRenderer;
