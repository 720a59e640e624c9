//! Semantic product search for the Zava retail catalog.
//!
//! [`embedder`] turns query text into vectors; [`search`] runs the ranked
//! query under the caller's security context and degrades to keyword search
//! when no vector is available.

pub mod embedder;
pub mod search;

pub use embedder::{DisabledEmbedder, Embedder, EmbeddingError, HttpEmbedder};
pub use search::{ProductSearch, SearchError, SearchMode, SearchOutcome};
