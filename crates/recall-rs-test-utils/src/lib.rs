//! Test helpers shared across recall crates.

pub mod embedder;

pub use embedder::{
    CountingEmbedder, FailingEmbedder, HashEmbedder, MismatchedEmbedder, SlowEmbedder,
};
