//! Approximate-nearest-neighbor retrieval over stored vectors.

pub mod hnsw;
pub mod quantize;
pub mod serialize;

pub use hnsw::{HnswConfig, HnswIndex, HnswNode, Metric, SearchHit};
pub use quantize::QuantizedVector;
pub use serialize::{from_json, to_json, ENVELOPE_VERSION};
