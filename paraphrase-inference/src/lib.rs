//! Generation from a conditional GPT-2 checkpoint: dense feature tables,
//! the engine interface and the batched [`generator::Generator`].

pub mod dense;
pub mod engine;
pub mod generator;

pub use dense::{DenseFeatureSelector, DenseFeatures};
pub use engine::{DecodingParams, GenerationEngine, GenerationOutput, GenerationRequest};
pub use generator::{GeneratedBatch, Generator, GeneratorError};
