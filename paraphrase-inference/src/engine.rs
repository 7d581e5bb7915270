use paraphrase_data::UpperLength;
use thiserror::Error;

use crate::dense::DenseVectors;

/// Width of the zeroed secondary encoder input sent with every request.
pub const ROBERTA_PLACEHOLDER_WIDTH: usize = 512;

/// Decoding parameters forwarded to the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodingParams {
    pub upper_length: UpperLength,
    pub beam_size: usize,
    pub top_p: f32,
    pub top_k: usize,
    pub temperature: f32,
    pub num_samples: usize,
    /// Stop decoding at the end-of-sequence token
    pub stop_at_eos: bool,
}

impl DecodingParams {
    /// Greedy (or beam) decoding: a single sample, `top_k = 1`, zero
    /// temperature, stopping at eos only when the upper length policy is `eos`.
    pub fn new(upper_length: UpperLength, beam_size: usize, top_p: f32) -> Self {
        Self {
            upper_length,
            beam_size,
            top_p,
            top_k: 1,
            temperature: 0.0,
            num_samples: 1,
            stop_at_eos: upper_length == UpperLength::Eos,
        }
    }
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self::new(UpperLength::Eos, 1, 0.0)
    }
}

/// `GenerationRequest` - one packed batch of instances.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    /// Secondary encoder input, a single zero row of `ROBERTA_PLACEHOLDER_WIDTH`
    pub roberta_sentences: Vec<Vec<f32>>,
    /// `[batch][sentence]` GPT-2 input ids
    pub gpt2_sentences: Vec<Vec<i64>>,
    /// `[batch][dense + sentence]` segment ids
    pub segments: Vec<Vec<i64>>,
    /// `[batch][rows][width]` global dense feature vectors
    pub global_dense_vectors: Vec<DenseVectors>,
    /// Number of leading sentence positions that form the context
    pub init_context_size: usize,
    pub eos_token_id: u32,
    pub get_scores: bool,
    pub interpolation: Option<f32>,
    pub decoding: DecodingParams,
}

/// `GenerationOutput` - the engine's answer to a `GenerationRequest`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationOutput {
    /// `[batch][positions]` output ids, context positions included
    pub sequences: Vec<Vec<i64>>,
    /// Per-row scores, when requested
    pub scores: Option<Vec<f32>>,
}

/// `GenerationEngine` - interface for the model that decodes continuations
/// from packed instances.
pub trait GenerationEngine {
    fn generate(&mut self, request: GenerationRequest) -> Result<GenerationOutput, EngineError>;
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Generation backend error: `{0}`")]
    Backend(String),
}
