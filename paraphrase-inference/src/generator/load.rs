use std::{fmt::Debug, fs, path::Path};

use paraphrase_data::{
    tokenizer::SpecialTokenNames, update_config, DatasetRegistry, HfTokenizer, RunArgs,
    UpperLength,
};
use tracing::{info, instrument};

use super::{Generator, GeneratorError, Result};
use crate::{
    dense::DenseFeatures,
    engine::{DecodingParams, GenerationEngine},
};

/// Training arguments saved next to the checkpoint, in any format the
/// `config` crate reads (the extension is resolved on load).
pub const TRAINING_ARGS_FILE: &str = "training_args";
/// Serialized `tokenizers` tokenizer.
pub const TOKENIZER_FILE: &str = "tokenizer.json";
/// Names of the pad, bos, eos and additional special tokens.
pub const SPECIAL_TOKENS_FILE: &str = "special_tokens_map.json";

impl<E: GenerationEngine> Generator<HfTokenizer, E> {
    /// Builds a generator for a checkpoint directory: reads the run
    /// arguments, resolves the dataset limits by the run's data directory,
    /// derives the run layout, loads dense features and the tokenizer.
    ///
    /// `upper_length`, when given, replaces the policy saved with the run.
    #[instrument(level = "info", skip(registry, engine))]
    pub fn load<P: AsRef<Path> + Debug>(
        model_path: P,
        registry: &DatasetRegistry,
        engine: E,
        upper_length: Option<UpperLength>,
        beam_size: usize,
        top_p: f32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let args = RunArgs::from_file_path(model_path.join(TRAINING_ARGS_FILE))?;
        let run_config = update_config(&args, registry.resolve(&args.data_dir)?)?;
        let dense_features = DenseFeatures::for_run(&args)?;

        let special_tokens_path = model_path.join(SPECIAL_TOKENS_FILE);
        let names: SpecialTokenNames = fs::read_to_string(&special_tokens_path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
            .map_err(|e| {
                GeneratorError::SpecialTokens(format!("{}: {e}", special_tokens_path.display()))
            })?;
        let tokenizer = HfTokenizer::from_file(model_path.join(TOKENIZER_FILE), &names)?;

        info!(
            "Loaded generator with context input type `{}`, init context size {}",
            args.context_input_type,
            run_config.init_context_size()
        );

        Ok(Self::new(
            run_config,
            tokenizer,
            engine,
            dense_features,
            DecodingParams::new(
                upper_length.unwrap_or(args.upper_length),
                beam_size,
                top_p,
            ),
        ))
    }
}
