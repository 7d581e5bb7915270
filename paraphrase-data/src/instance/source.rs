use rand::Rng;

use super::{Instance, InstanceError, Result};
use crate::{
    config::RunConfig,
    mode::InputMode,
    records::RawHpInstance,
    roberta::{normalize_roberta_sentence, parse_ids, RobertaSentence},
    tokenizer::TokenizerCapability,
};

/// `PrefixSource` - where an author-conditioned instance takes its prefix
/// tokens from, selected by the run's input mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefixSource<'a> {
    /// No prefix and no tags.
    Empty,
    /// The raw secondary encoding of the sentence.
    Roberta(&'a RobertaSentence),
    /// The author tag ids, with their tag tokens as segment tags.
    AuthorTags { ids: &'a str, tags: &'a [String] },
}

impl<'a> PrefixSource<'a> {
    /// Picks the source for `raw` according to `input`.
    pub fn select(input: InputMode, raw: &'a RawHpInstance) -> Self {
        match input {
            InputMode::NoSrlInput => Self::Empty,
            InputMode::RobertaInput => Self::Roberta(&raw.roberta_sentence),
            InputMode::TagInput => Self::AuthorTags {
                ids: &raw.author_tag_str,
                tags: &raw.author_tag_ids,
            },
        }
    }

    /// Resolves the prefix ids and optional segment tags.
    pub fn resolve(&self) -> Result<(Vec<u32>, Option<Vec<String>>)> {
        match self {
            Self::Empty => Ok((Vec::new(), None)),
            Self::Roberta(sentence) => {
                let ids = sentence
                    .ids()?
                    .into_iter()
                    .map(|id| u32::try_from(id).map_err(|_| InstanceError::InvalidTokenId(id.to_string())))
                    .collect::<Result<Vec<_>>>()?;
                Ok((ids, None))
            }
            Self::AuthorTags { ids, tags } => Ok((parse_ids(ids)?, Some(tags.to_vec()))),
        }
    }
}

/// `HpInstance` - an author-conditioned instance: the sentence is the
/// suffix, the prefix comes from the `PrefixSource` chosen by the input
/// mode, and the secondary encoding is carried at its fixed width.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HpInstance {
    instance: Instance,
    original_sentence: Vec<u32>,
    roberta_sentence: Vec<i64>,
    author_tag_str: String,
    author_tag_ids: Vec<String>,
    author_target: i64,
    original_author_target: i64,
    roberta_author_target: i64,
}

impl HpInstance {
    /// Selects the prefix, normalizes the secondary encoding and runs the
    /// shared instance pipeline.
    ///
    /// # Errors
    ///
    /// * `InstanceError::InvalidTokenId` - if a textual id list is malformed
    /// * `InstanceError::RobertaLength` - if the secondary encoding cannot be
    ///   normalized to its fixed width
    /// * any error of `Instance::new`
    pub fn new<T, R>(
        config: &RunConfig,
        tokenizer: &T,
        rng: &mut R,
        raw: &RawHpInstance,
    ) -> Result<Self>
    where
        T: TokenizerCapability + ?Sized,
        R: Rng,
    {
        let source = PrefixSource::select(config.context_input_type().input(), raw);
        let (sent1_tokens, sent1_tokens_tags) = source.resolve()?;
        let roberta_sentence = normalize_roberta_sentence(&raw.roberta_sentence)?;

        let instance = Instance::new(
            config,
            tokenizer,
            rng,
            sent1_tokens,
            raw.sentence.clone(),
            sent1_tokens_tags,
            raw.metadata.clone(),
        )?;

        Ok(Self {
            instance,
            original_sentence: raw.sentence.clone(),
            roberta_sentence,
            author_tag_str: raw.author_tag_str.clone(),
            author_tag_ids: raw.author_tag_ids.clone(),
            author_target: raw.author_target,
            original_author_target: raw.original_target,
            roberta_author_target: raw.roberta_author_target.unwrap_or(raw.author_target),
        })
    }

    /// The packed instance
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Getter for `original_sentence`
    pub fn original_sentence(&self) -> &[u32] {
        &self.original_sentence
    }

    /// Secondary encoding, always `MAX_ROBERTA_LENGTH` wide
    pub fn roberta_sentence(&self) -> &[i64] {
        &self.roberta_sentence
    }

    /// Getter for `author_tag_str`
    pub fn author_tag_str(&self) -> &str {
        &self.author_tag_str
    }

    /// Getter for `author_tag_ids`
    pub fn author_tag_ids(&self) -> &[String] {
        &self.author_tag_ids
    }

    /// Getter for `author_target`
    pub fn author_target(&self) -> i64 {
        self.author_target
    }

    /// Getter for `original_author_target`
    pub fn original_author_target(&self) -> i64 {
        self.original_author_target
    }

    /// Getter for `roberta_author_target`
    pub fn roberta_author_target(&self) -> i64 {
        self.roberta_author_target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{update_config, DatasetConfig, RunArgs},
        instance::{shuffle_rng, IGNORE_INDEX},
        mode::ContextInputType,
        roberta::{MAX_ROBERTA_LENGTH, ROBERTA_PAD_ID},
        tokenizer::mock::{MockTokenizer, EOS, PAD, PREFIX_TAG},
    };

    fn run_config(mode: &str) -> RunConfig {
        let args = RunArgs {
            data_dir: "datasets/shakespeare".to_string(),
            context_input_type: ContextInputType::from(mode),
            global_dense_feature_list: "none".to_string(),
            content_aggregation: 1000,
            upper_length: Default::default(),
        };
        let dataset = DatasetConfig {
            max_prefix_length: 4,
            max_suffix_length: 3,
            max_dense_length: 0,
            keys: Vec::new(),
        };
        update_config(&args, &dataset).unwrap()
    }

    fn raw() -> RawHpInstance {
        RawHpInstance {
            sentence: vec![30, 31],
            roberta_sentence: RobertaSentence::Text("0 7 8 2".to_string()),
            author_tag_str: "40 41".to_string(),
            author_tag_ids: vec!["<A0>".to_string(), "<V>".to_string()],
            author_target: 3,
            original_target: 1,
            roberta_author_target: None,
            metadata: String::new(),
        }
    }

    fn build(mode: &str, raw: &RawHpInstance) -> Result<HpInstance> {
        let tokenizer = MockTokenizer::new(&["<A0>", "<V>"]);
        HpInstance::new(&run_config(mode), &tokenizer, &mut shuffle_rng(), raw)
    }

    #[test]
    fn test_no_srl_input_source() {
        let hp = build("0_no_srl_input", &raw()).unwrap();
        assert!(hp.instance().sent1_tokens().is_empty());
        assert_eq!(hp.instance().sent1_tokens_tags(), None);
        assert_eq!(hp.instance().sent2_tokens(), &[30, 31]);
        assert_eq!(hp.instance().init_context_size(), 1);
    }

    #[test]
    fn test_roberta_input_source() {
        let hp = build("1_roberta_input", &raw()).unwrap();
        assert_eq!(hp.instance().sent1_tokens(), &[0, 7, 8, 2]);
        assert_eq!(hp.instance().sent1_tokens_tags(), None);
        assert_eq!(hp.instance().sentence()[..4], [0, 7, 8, 2]);
    }

    #[test]
    fn test_tag_input_source() {
        let hp = build("1_author_tags", &raw()).unwrap();
        let instance = hp.instance();
        assert_eq!(instance.sent1_tokens(), &[40, 41]);
        assert_eq!(
            instance.segment(),
            &[
                PAD as i64,
                PAD as i64,
                10,
                11,
                PREFIX_TAG as i64,
                PREFIX_TAG as i64,
                PREFIX_TAG as i64,
                PREFIX_TAG as i64,
                PREFIX_TAG as i64
            ]
        );
        assert_eq!(
            &instance.label()[5..],
            &[30, 31, EOS as i64, IGNORE_INDEX]
        );
    }

    #[test]
    fn test_secondary_encoding_is_normalized() {
        let hp = build("1_author_tags", &raw()).unwrap();
        assert_eq!(hp.roberta_sentence().len(), MAX_ROBERTA_LENGTH);
        assert_eq!(&hp.roberta_sentence()[..5], &[0, 7, 8, 2, ROBERTA_PAD_ID]);
    }

    #[test]
    fn test_roberta_target_defaults_to_author_target() {
        let hp = build("1_author_tags", &raw()).unwrap();
        assert_eq!(hp.roberta_author_target(), 3);
        assert_eq!(hp.original_author_target(), 1);

        let mut with_target = raw();
        with_target.roberta_author_target = Some(9);
        assert_eq!(build("1_author_tags", &with_target).unwrap().roberta_author_target(), 9);
    }

    #[test]
    fn test_malformed_author_tags() {
        let mut malformed = raw();
        malformed.author_tag_str = "40 x".to_string();
        assert!(matches!(
            build("1_author_tags", &malformed),
            Err(InstanceError::InvalidTokenId(token)) if token == "x"
        ));
    }

    #[test]
    fn test_negative_roberta_ids_cannot_be_prefix() {
        let mut negative = raw();
        negative.roberta_sentence = RobertaSentence::Ids(vec![0, -5]);
        assert!(matches!(
            build("1_roberta_input", &negative),
            Err(InstanceError::InvalidTokenId(_))
        ));
    }
}
