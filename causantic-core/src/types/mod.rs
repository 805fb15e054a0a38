//! Domain types shared across the parser, chunker, edge builder,
//! clusterer, retriever, and store.

mod checkpoint;
mod chunk;
mod cluster;
mod edge;
mod turn;

pub use checkpoint::{EmbeddingCacheEntry, IngestOutcome, IngestionCheckpoint};
pub use chunk::{Chunk, ChunkCluster};
pub use cluster::Cluster;
pub use edge::{Confidence, Edge, EdgeType, ReferenceType, BOOST_FACTOR};
pub use turn::{ContentBlock, Turn};
