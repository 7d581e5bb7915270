//! Fixed-layout training instances.
//!
//! Every instance is laid out as
//!
//! ```text
//! sentence: [prefix (left padded)] [bos] [suffix ++ eos (right padded)]
//! label:    [-1 x dense] [-1 x prefix] [-1] [suffix ++ eos (padded with -1)]
//! segment:  [tag0 x dense] [prefix tags] [suffix tag] [suffix tag x suffix]
//! ```
//!
//! and is produced by a fixed pipeline: truncate, shuffle or reverse,
//! then build the sentence, label and segment arrays and check that their
//! lengths line up.

mod source;

pub use source::{HpInstance, PrefixSource};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    config::RunConfig,
    mode::PrefixOrder,
    padding::{left_padding, right_padding, PaddingError},
    records::RawInstance,
    tokenizer::{TokenizerCapability, TokenizerError},
};

type Result<T> = std::result::Result<T, InstanceError>;

/// Label value for positions that are not prediction targets.
pub const IGNORE_INDEX: i64 = -1;

/// Seed of the prefix/suffix shuffling stream.
pub const SHUFFLE_SEED: u64 = 12;

/// Creates the deterministic random stream used to shuffle prefixes and
/// suffixes. One stream should be shared by all instances of a dataset,
/// constructed in a fixed order, for runs to be reproducible.
pub fn shuffle_rng() -> StdRng {
    StdRng::seed_from_u64(SHUFFLE_SEED)
}

/// Lengths of the sentence regions, as built by `build_sentence`.
struct SentenceLayout {
    prefix_len: usize,
    suffix_len: usize,
}

/// `Instance` - a single example packed into aligned `sentence`, `label`
/// and `segment` arrays.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Instance {
    sent1_tokens: Vec<u32>,
    sent2_tokens: Vec<u32>,
    sent1_tokens_tags: Option<Vec<String>>,
    truncated: bool,
    init_context_size: usize,
    sentence: Vec<i64>,
    label: Vec<i64>,
    segment: Vec<i64>,
    metadata: String,
}

impl Instance {
    /// Builds an instance from prefix and suffix ids and runs the pipeline.
    ///
    /// `sent1_tokens_tags`, when present, are vocabulary tokens whose ids
    /// become the segment tags of the prefix region.
    ///
    /// # Errors
    ///
    /// * `InstanceError::Padding` - if a swapped sequence no longer fits its slot
    /// * `InstanceError::Tokenizer` - if a tag token is not in the vocabulary
    /// * `InstanceError::MissingSpecialToken` - if the tokenizer publishes
    ///   fewer than three additional special tokens
    /// * `InstanceError::ConstraintViolation` - if the arrays are misaligned
    pub fn new<T, R>(
        config: &RunConfig,
        tokenizer: &T,
        rng: &mut R,
        sent1_tokens: Vec<u32>,
        sent2_tokens: Vec<u32>,
        sent1_tokens_tags: Option<Vec<String>>,
        metadata: String,
    ) -> Result<Self>
    where
        T: TokenizerCapability + ?Sized,
        R: Rng,
    {
        let mut instance = Self {
            sent1_tokens,
            sent2_tokens,
            sent1_tokens_tags,
            truncated: false,
            init_context_size: config.init_context_size(),
            sentence: Vec::new(),
            label: Vec::new(),
            segment: Vec::new(),
            metadata,
        };
        instance.preprocess(config, tokenizer, rng)?;
        Ok(instance)
    }

    /// Builds an instance from a raw `{sent1_tokens, sent2_tokens}` record.
    pub fn from_raw<T, R>(
        config: &RunConfig,
        tokenizer: &T,
        rng: &mut R,
        raw: &RawInstance,
    ) -> Result<Self>
    where
        T: TokenizerCapability + ?Sized,
        R: Rng,
    {
        Self::new(
            config,
            tokenizer,
            rng,
            raw.sent1_tokens.clone(),
            raw.sent2_tokens.clone(),
            None,
            raw.metadata.clone(),
        )
    }

    fn preprocess<T, R>(&mut self, config: &RunConfig, tokenizer: &T, rng: &mut R) -> Result<()>
    where
        T: TokenizerCapability + ?Sized,
        R: Rng,
    {
        self.truncate(config);
        self.shuffle_prefix_suffix(config, rng);
        let layout = self.build_sentence(config, tokenizer)?;
        self.build_label(config, tokenizer, &layout)?;
        self.build_segment(config, tokenizer, &layout)?;
        self.check_constraints(config)
    }

    fn truncate(&mut self, config: &RunConfig) {
        let max_prefix_length = config.max_prefix_length();
        let max_suffix_length = config.max_suffix_length();
        if self.sent1_tokens.len() > max_prefix_length {
            debug!(
                "Truncating prefix from {} to {max_prefix_length} tokens",
                self.sent1_tokens.len()
            );
            self.truncated = true;
            self.sent1_tokens.truncate(max_prefix_length);
            // tags stay parallel to the prefix tokens
            if let Some(tags) = self.sent1_tokens_tags.as_mut() {
                tags.truncate(max_prefix_length);
            }
        }
        if self.sent2_tokens.len() > max_suffix_length {
            debug!(
                "Truncating suffix from {} to {max_suffix_length} tokens",
                self.sent2_tokens.len()
            );
            self.truncated = true;
            self.sent2_tokens.truncate(max_suffix_length);
        }
    }

    fn shuffle_prefix_suffix<R: Rng>(&mut self, config: &RunConfig, rng: &mut R) {
        let swap = match config.context_input_type().order() {
            PrefixOrder::Shuffle => rng.gen::<f64>() <= 0.5,
            PrefixOrder::Reverse => true,
            PrefixOrder::Keep => false,
        };
        if swap {
            std::mem::swap(&mut self.sent1_tokens, &mut self.sent2_tokens);
        }
    }

    fn build_sentence<T>(&mut self, config: &RunConfig, tokenizer: &T) -> Result<SentenceLayout>
    where
        T: TokenizerCapability + ?Sized,
    {
        let pad = i64::from(tokenizer.pad_token_id());
        let sent_prefix = if config.context_input_type().is_no_srl_input() {
            Vec::new()
        } else {
            left_padding(&widen(&self.sent1_tokens), pad, config.max_prefix_length())?
        };
        let sent_suffix = right_padding(
            &self.suffix_with_eos(tokenizer),
            pad,
            config.max_suffix_length() + 1,
        )?;

        let layout = SentenceLayout {
            prefix_len: sent_prefix.len(),
            suffix_len: sent_suffix.len(),
        };

        let mut sentence = sent_prefix;
        sentence.push(i64::from(tokenizer.bos_token_id()));
        sentence.extend(sent_suffix);
        self.sentence = sentence;
        Ok(layout)
    }

    fn build_label<T>(
        &mut self,
        config: &RunConfig,
        tokenizer: &T,
        layout: &SentenceLayout,
    ) -> Result<()>
    where
        T: TokenizerCapability + ?Sized,
    {
        let label_suffix = right_padding(
            &self.suffix_with_eos(tokenizer),
            IGNORE_INDEX,
            config.max_suffix_length() + 1,
        )?;

        let mut label = vec![IGNORE_INDEX; config.dense_length() + layout.prefix_len + 1];
        label.extend(label_suffix);
        self.label = label;
        Ok(())
    }

    fn build_segment<T>(
        &mut self,
        config: &RunConfig,
        tokenizer: &T,
        layout: &SentenceLayout,
    ) -> Result<()>
    where
        T: TokenizerCapability + ?Sized,
    {
        let special = tokenizer.additional_special_tokens_ids();
        let special_id = |index: usize| {
            special
                .get(index)
                .map(|&id| i64::from(id))
                .ok_or(InstanceError::MissingSpecialToken(index))
        };

        let (prefix_segment, suffix_segment_tag) = match &self.sent1_tokens_tags {
            Some(tags) => {
                let tag_ids = widen(&tokenizer.convert_tokens_to_ids(tags)?);
                let prefix_segment = left_padding(
                    &tag_ids,
                    i64::from(tokenizer.pad_token_id()),
                    config.max_prefix_length(),
                )?;
                (prefix_segment, special_id(1)?)
            }
            None => (vec![special_id(1)?; layout.prefix_len], special_id(2)?),
        };

        let mut segment = vec![special_id(0)?; config.dense_length()];
        segment.extend(prefix_segment);
        segment.extend(std::iter::repeat(suffix_segment_tag).take(layout.suffix_len + 1));
        self.segment = segment;
        Ok(())
    }

    fn check_constraints(&self, config: &RunConfig) -> Result<()> {
        let dense_length = config.dense_length();
        for (array, len) in [("label", self.label.len()), ("segment", self.segment.len())] {
            if len < dense_length || self.sentence.len() != len - dense_length {
                error!(
                    "Misaligned {array}: sentence length {}, {array} length {len}, dense length {dense_length}",
                    self.sentence.len()
                );
                return Err(InstanceError::ConstraintViolation {
                    array,
                    sentence_len: self.sentence.len(),
                    array_len: len,
                    dense_length,
                });
            }
        }
        Ok(())
    }

    fn suffix_with_eos<T>(&self, tokenizer: &T) -> Vec<i64>
    where
        T: TokenizerCapability + ?Sized,
    {
        let mut suffix = widen(&self.sent2_tokens);
        suffix.push(i64::from(tokenizer.eos_token_id()));
        suffix
    }

    /// Getter for `sent1_tokens`, after truncation and shuffling
    pub fn sent1_tokens(&self) -> &[u32] {
        &self.sent1_tokens
    }

    /// Getter for `sent2_tokens`, after truncation and shuffling
    pub fn sent2_tokens(&self) -> &[u32] {
        &self.sent2_tokens
    }

    /// Getter for `sent1_tokens_tags`
    pub fn sent1_tokens_tags(&self) -> Option<&[String]> {
        self.sent1_tokens_tags.as_deref()
    }

    /// Whether either sequence was shortened
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Getter for `init_context_size`
    pub fn init_context_size(&self) -> usize {
        self.init_context_size
    }

    /// Getter for `sentence`
    pub fn sentence(&self) -> &[i64] {
        &self.sentence
    }

    /// Getter for `label`
    pub fn label(&self) -> &[i64] {
        &self.label
    }

    /// Getter for `segment`
    pub fn segment(&self) -> &[i64] {
        &self.segment
    }

    /// Getter for `metadata`
    pub fn metadata(&self) -> &str {
        &self.metadata
    }
}

fn widen(ids: &[u32]) -> Vec<i64> {
    ids.iter().map(|&id| i64::from(id)).collect()
}

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error(
        "Instance {array} is misaligned: sentence length {sentence_len}, {array} length {array_len}, dense length {dense_length}"
    )]
    ConstraintViolation {
        array: &'static str,
        sentence_len: usize,
        array_len: usize,
        dense_length: usize,
    },
    #[error("Secondary encoding must be exactly 502 ids wide, got {0}")]
    RobertaLength(usize),
    #[error("Invalid token id `{0}`")]
    InvalidTokenId(String),
    #[error("Tokenizer has no additional special token at index {0}")]
    MissingSpecialToken(usize),
    #[error("Padding error: `{0}`")]
    Padding(#[from] PaddingError),
    #[error("Tokenizer error: `{0}`")]
    Tokenizer(#[from] TokenizerError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{update_config, DatasetConfig, RunArgs},
        mode::ContextInputType,
        tokenizer::mock::{MockTokenizer, BOS, DENSE_TAG, EOS, PAD, PREFIX_TAG, SUFFIX_TAG},
    };

    fn run_config(mode: &str, features: &str, prefix: usize, suffix: usize) -> RunConfig {
        let args = RunArgs {
            data_dir: "datasets/shakespeare".to_string(),
            context_input_type: ContextInputType::from(mode),
            global_dense_feature_list: features.to_string(),
            content_aggregation: 1000,
            upper_length: Default::default(),
        };
        let dataset = DatasetConfig {
            max_prefix_length: prefix,
            max_suffix_length: suffix,
            max_dense_length: 4,
            keys: Vec::new(),
        };
        update_config(&args, &dataset).unwrap()
    }

    fn build(config: &RunConfig, sent1: Vec<u32>, sent2: Vec<u32>) -> Instance {
        let tokenizer = MockTokenizer::new(&[]);
        Instance::new(config, &tokenizer, &mut shuffle_rng(), sent1, sent2, None, String::new())
            .unwrap()
    }

    fn assert_aligned(instance: &Instance, config: &RunConfig) {
        let dense = config.dense_length();
        assert_eq!(instance.sentence().len(), instance.label().len() - dense);
        assert_eq!(instance.sentence().len(), instance.segment().len() - dense);
    }

    #[test]
    fn test_sentence_layout() {
        let config = run_config("1_tags", "none", 4, 3);
        let instance = build(&config, vec![20, 21], vec![30, 31]);

        let (pad, bos, eos) = (PAD as i64, BOS as i64, EOS as i64);
        assert_eq!(
            instance.sentence(),
            &[pad, pad, 20, 21, bos, 30, 31, eos, pad]
        );
        assert_eq!(instance.init_context_size(), 5);
        assert!(!instance.truncated());
        assert_aligned(&instance, &config);
    }

    #[test]
    fn test_label_masks_everything_but_the_suffix() {
        let config = run_config("1_tags", "a,b", 4, 3);
        let instance = build(&config, vec![20, 21], vec![30, 31]);

        let label = instance.label();
        let suffix_start = config.dense_length() + config.max_prefix_length() + 1;
        assert!(label[..suffix_start].iter().all(|&l| l == IGNORE_INDEX));
        assert_eq!(&label[suffix_start..], &[30, 31, EOS as i64, IGNORE_INDEX]);
        assert_aligned(&instance, &config);
    }

    #[test]
    fn test_segment_without_tags() {
        let config = run_config("1_tags", "a", 2, 2);
        let instance = build(&config, vec![20], vec![30]);

        let (dense, prefix, suffix) = (DENSE_TAG as i64, PREFIX_TAG as i64, SUFFIX_TAG as i64);
        assert_eq!(
            instance.segment(),
            &[dense, prefix, prefix, suffix, suffix, suffix, suffix]
        );
        assert_aligned(&instance, &config);
    }

    #[test]
    fn test_segment_with_tags() {
        let config = run_config("1_tags", "none", 3, 1);
        let tokenizer = MockTokenizer::new(&["<A0>", "<V>"]);
        let instance = Instance::new(
            &config,
            &tokenizer,
            &mut shuffle_rng(),
            vec![20, 21],
            vec![30],
            Some(vec!["<A0>".to_string(), "<V>".to_string()]),
            String::new(),
        )
        .unwrap();

        let (pad, prefix) = (PAD as i64, PREFIX_TAG as i64);
        assert_eq!(instance.segment(), &[pad, 10, 11, prefix, prefix, prefix]);
        assert_aligned(&instance, &config);
    }

    #[test]
    fn test_unknown_tag_fails() {
        let config = run_config("1_tags", "none", 3, 1);
        let err = Instance::new(
            &config,
            &MockTokenizer::new(&[]),
            &mut shuffle_rng(),
            vec![20],
            vec![30],
            Some(vec!["<ARG9>".to_string()]),
            String::new(),
        )
        .unwrap_err();
        assert!(matches!(err, InstanceError::Tokenizer(_)));
    }

    #[test]
    fn test_no_srl_input_has_no_prefix() {
        let config = run_config("0_no_srl_input", "none", 5, 2);
        let instance = build(&config, vec![20, 21, 22], vec![30]);

        assert_eq!(instance.init_context_size(), 1);
        assert_eq!(
            instance.sentence(),
            &[BOS as i64, 30, EOS as i64, PAD as i64]
        );
        assert_eq!(instance.label(), &[IGNORE_INDEX, 30, EOS as i64, IGNORE_INDEX]);
        assert_eq!(instance.segment(), &[SUFFIX_TAG as i64; 4]);
        // truncation applies to the zero-width prefix
        assert!(instance.truncated());
        assert!(instance.sent1_tokens().is_empty());
    }

    #[test]
    fn test_truncation() {
        let config = run_config("1_tags", "none", 2, 3);
        let instance = build(&config, vec![20, 21, 22, 23], vec![30, 31]);
        assert!(instance.truncated());
        assert_eq!(instance.sent1_tokens(), &[20, 21]);
        assert_eq!(instance.sent2_tokens(), &[30, 31]);

        let instance = build(&config, vec![20], vec![30, 31, 32, 33, 34]);
        assert!(instance.truncated());
        assert_eq!(instance.sent1_tokens(), &[20]);
        assert_eq!(instance.sent2_tokens(), &[30, 31, 32]);
        assert_aligned(&instance, &config);

        let instance = build(&config, vec![20, 21], vec![30, 31, 32]);
        assert!(!instance.truncated());
    }

    #[test]
    fn test_truncation_keeps_tags_parallel() {
        let config = run_config("1_tags", "none", 1, 1);
        let tokenizer = MockTokenizer::new(&["<A0>", "<V>"]);
        let instance = Instance::new(
            &config,
            &tokenizer,
            &mut shuffle_rng(),
            vec![20, 21],
            vec![30],
            Some(vec!["<A0>".to_string(), "<V>".to_string()]),
            String::new(),
        )
        .unwrap();
        assert_eq!(instance.sent1_tokens_tags(), Some(&["<A0>".to_string()][..]));
        assert_aligned(&instance, &config);
    }

    #[test]
    fn test_reverse_always_swaps() {
        let config = run_config("1_reverse_tags", "none", 3, 3);
        for _ in 0..5 {
            let instance = build(&config, vec![20, 21], vec![30]);
            assert_eq!(instance.sent1_tokens(), &[30]);
            assert_eq!(instance.sent2_tokens(), &[20, 21]);
            assert_eq!(&instance.label()[4..], &[20, 21, EOS as i64, IGNORE_INDEX]);
        }
    }

    #[test]
    fn test_shuffle_is_reproducible_with_fixed_seed() {
        let config = run_config("1_shuffle_tags", "none", 3, 3);
        let tokenizer = MockTokenizer::new(&[]);

        let swaps = |rng: &mut StdRng| {
            (0..32)
                .map(|_| {
                    let instance = Instance::new(
                        &config,
                        &tokenizer,
                        rng,
                        vec![20],
                        vec![30],
                        None,
                        String::new(),
                    )
                    .unwrap();
                    instance.sent1_tokens() == [30]
                })
                .collect::<Vec<_>>()
        };

        let first = swaps(&mut shuffle_rng());
        let second = swaps(&mut shuffle_rng());
        assert_eq!(first, second);
        assert_eq!(
            first[..8],
            [true, false, false, false, true, false, false, true]
        );
        assert!(first.iter().any(|&swapped| swapped));
        assert!(first.iter().any(|&swapped| !swapped));
    }

    #[test]
    fn test_shuffle_of_oversized_suffix_fails_padding() {
        let config = run_config("1_reverse_tags", "none", 1, 3);
        let tokenizer = MockTokenizer::new(&[]);
        let err = Instance::new(
            &config,
            &tokenizer,
            &mut shuffle_rng(),
            vec![20],
            vec![30, 31, 32],
            None,
            String::new(),
        )
        .unwrap_err();
        assert!(matches!(err, InstanceError::Padding(_)));
    }

    #[test]
    fn test_lengths_align_for_many_shapes() {
        for (prefix, suffix, features) in [(0, 0, "none"), (3, 5, "a"), (7, 2, "a,b,c,d")] {
            let config = run_config("1_tags", features, prefix, suffix);
            for len1 in 0..=prefix + 2 {
                for len2 in 0..=suffix + 2 {
                    let instance = build(
                        &config,
                        (0..len1 as u32).map(|i| 100 + i).collect(),
                        (0..len2 as u32).map(|i| 200 + i).collect(),
                    );
                    assert_aligned(&instance, &config);
                    assert_eq!(
                        instance.truncated(),
                        len1 > prefix || len2 > suffix,
                        "prefix {len1}, suffix {len2}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_missing_special_tokens_fail() {
        struct BareTokenizer(MockTokenizer);

        impl TokenizerCapability for BareTokenizer {
            fn tokenize(&self, text: &str) -> std::result::Result<Vec<String>, TokenizerError> {
                self.0.tokenize(text)
            }
            fn convert_tokens_to_ids(
                &self,
                tokens: &[String],
            ) -> std::result::Result<Vec<u32>, TokenizerError> {
                self.0.convert_tokens_to_ids(tokens)
            }
            fn pad_token_id(&self) -> u32 {
                PAD
            }
            fn bos_token_id(&self) -> u32 {
                BOS
            }
            fn eos_token_id(&self) -> u32 {
                EOS
            }
            fn additional_special_tokens_ids(&self) -> &[u32] {
                &[]
            }
            fn decode(
                &self,
                ids: &[u32],
                skip: bool,
                clean: bool,
            ) -> std::result::Result<String, TokenizerError> {
                self.0.decode(ids, skip, clean)
            }
        }

        let config = run_config("1_tags", "none", 1, 1);
        let err = Instance::new(
            &config,
            &BareTokenizer(MockTokenizer::new(&[])),
            &mut shuffle_rng(),
            vec![20],
            vec![30],
            None,
            String::new(),
        )
        .unwrap_err();
        assert!(matches!(err, InstanceError::MissingSpecialToken(_)));
    }
}
