//! Retrieval engine: dimensional-distribution RAG and visual similarity.
//!
//! Two independent paths that may be combined. The distribution path compares
//! a user's eight-dimension vector against the statistics of an advisor's
//! reference portfolio and picks representative examples for the weakest
//! dimensions. The visual path ranks pre-computed embeddings by cosine
//! similarity. Both are pure over in-memory profiles; only the embedding
//! client touches the network.

mod distribution;
mod embedding;
mod similarity;

pub use distribution::{
    analyze_distribution, DimensionStats, DistributionOutcome, Representative, RetrievalParams,
};
pub use embedding::{EmbeddingBackend, EmbeddingClient, EmbeddingError, IndexResponse, SearchHit};
pub use similarity::{visual_top_k, VisualMatch};
