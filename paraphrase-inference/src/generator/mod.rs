//! Batched generation from a fine-tuned model.

mod load;

pub use load::{SPECIAL_TOKENS_FILE, TOKENIZER_FILE, TRAINING_ARGS_FILE};

use paraphrase_data::{
    config::ConfigError, instance::InstanceError, shuffle_rng, Instance, RunConfig,
    TokenizerCapability, TokenizerError, UpperLength,
};
use rand::rngs::StdRng;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::{
    dense::{DenseFeatureError, DenseFeatureSelector, DenseFeatures},
    engine::{
        DecodingParams, EngineError, GenerationEngine, GenerationOutput, GenerationRequest,
        ROBERTA_PLACEHOLDER_WIDTH,
    },
};

type Result<T> = std::result::Result<T, GeneratorError>;

/// Decoded continuations of a batch, in input order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeneratedBatch {
    pub outputs: Vec<String>,
    /// Engine scores, when requested
    pub scores: Option<Vec<f32>>,
}

/// `Generator` - packs text contexts into instances, runs one engine call
/// per batch and turns the output ids back into text.
pub struct Generator<T, E> {
    run_config: RunConfig,
    tokenizer: T,
    engine: E,
    dense_features: DenseFeatures,
    decoding: DecodingParams,
    rng: StdRng,
}

impl<T, E> Generator<T, E>
where
    T: TokenizerCapability,
    E: GenerationEngine,
{
    /// Constructor
    pub fn new(
        run_config: RunConfig,
        tokenizer: T,
        engine: E,
        dense_features: DenseFeatures,
        decoding: DecodingParams,
    ) -> Self {
        Self {
            run_config,
            tokenizer,
            engine,
            dense_features,
            decoding,
            rng: shuffle_rng(),
        }
    }

    /// Updates the nucleus sampling mass used by later calls.
    pub fn set_top_p(&mut self, top_p: f32) {
        self.decoding.top_p = top_p;
    }

    /// Getter for the decoding parameters
    pub fn decoding(&self) -> &DecodingParams {
        &self.decoding
    }

    /// Getter for the run configuration
    pub fn run_config(&self) -> &RunConfig {
        &self.run_config
    }

    /// Generates one continuation per context.
    ///
    /// Each context is conditioned on itself: it is both the prefix and the
    /// placeholder suffix the model overwrites. `global_dense_features`, when
    /// given, holds one optional selector per context.
    ///
    /// # Errors
    ///
    /// * `GeneratorError::EmptyBatch` - if `contexts` is empty
    /// * `GeneratorError::SelectorCount` - if selectors and contexts differ in number
    /// * `GeneratorError::OutputCount` - if the engine returns a different
    ///   number of rows
    /// * tokenizer, instance, dense feature and engine errors
    #[instrument(level = "info", skip_all, fields(batch_size = contexts.len()))]
    pub fn generate_batch<S: AsRef<str>>(
        &mut self,
        contexts: &[S],
        global_dense_features: Option<&[Option<DenseFeatureSelector>]>,
        get_scores: bool,
        interpolation: Option<f32>,
    ) -> Result<GeneratedBatch> {
        if contexts.is_empty() {
            return Err(GeneratorError::EmptyBatch);
        }
        if let Some(selectors) = global_dense_features {
            if selectors.len() != contexts.len() {
                return Err(GeneratorError::SelectorCount {
                    contexts: contexts.len(),
                    selectors: selectors.len(),
                });
            }
        }

        let mut instances = Vec::with_capacity(contexts.len());
        let mut global_dense_vectors = Vec::with_capacity(contexts.len());
        for (i, context) in contexts.iter().enumerate() {
            let context_ids = self
                .tokenizer
                .convert_tokens_to_ids(&self.tokenizer.tokenize(context.as_ref())?)?;
            let instance = Instance::new(
                &self.run_config,
                &self.tokenizer,
                &mut self.rng,
                context_ids.clone(),
                context_ids,
                None,
                String::new(),
            )?;
            let selector = global_dense_features.and_then(|selectors| selectors[i].as_ref());
            global_dense_vectors.push(self.dense_features.vectors(selector)?);
            instances.push(instance);
        }

        let init_context_size = self.run_config.init_context_size();
        let eos_token_id = self.tokenizer.eos_token_id();
        let request = GenerationRequest {
            roberta_sentences: vec![vec![0.0; ROBERTA_PLACEHOLDER_WIDTH]],
            gpt2_sentences: instances.iter().map(|i| i.sentence().to_vec()).collect(),
            segments: instances.iter().map(|i| i.segment().to_vec()).collect(),
            global_dense_vectors,
            init_context_size,
            eos_token_id,
            get_scores,
            interpolation,
            decoding: self.decoding.clone(),
        };

        let GenerationOutput { sequences, scores } = self.engine.generate(request)?;
        if sequences.len() != instances.len() {
            return Err(GeneratorError::OutputCount {
                expected: instances.len(),
                actual: sequences.len(),
            });
        }

        let outputs = sequences
            .iter()
            .zip(&instances)
            .map(|(sequence, instance)| self.postprocess(sequence, instance))
            .collect::<Result<Vec<_>>>()?;
        debug!("Generated {} outputs", outputs.len());

        Ok(GeneratedBatch {
            outputs,
            scores: if get_scores { scores } else { None },
        })
    }

    /// Generates the continuation of a single context.
    pub fn generate(
        &mut self,
        context: &str,
        global_dense_features: Option<DenseFeatureSelector>,
        get_scores: bool,
        interpolation: Option<f32>,
    ) -> Result<String> {
        let batch = self.generate_batch(
            &[context],
            Some(&[global_dense_features]),
            get_scores,
            interpolation,
        )?;
        batch
            .outputs
            .into_iter()
            .next()
            .ok_or(GeneratorError::OutputCount {
                expected: 1,
                actual: 0,
            })
    }

    /// Drops the context positions, cuts at the first eos and at the upper
    /// length, then decodes.
    fn postprocess(&self, sequence: &[i64], instance: &Instance) -> Result<String> {
        let eos = i64::from(self.tokenizer.eos_token_id());
        let mut curr_out = sequence
            .get(instance.init_context_size()..)
            .unwrap_or_default()
            .to_vec();

        if let Some(position) = curr_out.iter().position(|&id| id == eos) {
            curr_out.truncate(position);
        }
        if let UpperLength::SamePlus(extra) = self.decoding.upper_length {
            curr_out.truncate(instance.sent1_tokens().len() + extra);
        }

        let ids = curr_out
            .into_iter()
            .map(|id| u32::try_from(id).map_err(|_| GeneratorError::InvalidOutputId(id)))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.tokenizer.decode(&ids, true, true)?)
    }
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Cannot generate from an empty batch")]
    EmptyBatch,
    #[error("Got {selectors} dense feature selectors for {contexts} contexts")]
    SelectorCount { contexts: usize, selectors: usize },
    #[error("Engine returned {actual} sequences, expected {expected}")]
    OutputCount { expected: usize, actual: usize },
    #[error("Engine returned invalid token id {0}")]
    InvalidOutputId(i64),
    #[error("Failed to read special token names: `{0}`")]
    SpecialTokens(String),
    #[error("Configuration error: `{0}`")]
    Config(#[from] ConfigError),
    #[error("Instance error: `{0}`")]
    Instance(#[from] InstanceError),
    #[error("Tokenizer error: `{0}`")]
    Tokenizer(#[from] TokenizerError),
    #[error("Dense feature error: `{0}`")]
    DenseFeature(#[from] DenseFeatureError),
    #[error("Engine error: `{0}`")]
    Engine(#[from] EngineError),
}
