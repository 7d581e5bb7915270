use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokenizers::Tokenizer;

type Result<T> = std::result::Result<T, TokenizerError>;

/// Number of additional special tokens the segment layout relies on:
/// dense slot tag, prefix tag and suffix tag.
pub const NUM_SEGMENT_SPECIAL_TOKENS: usize = 3;

/// `TokenizerCapability` - the tokenizer operations instance construction
/// and generation rely on. Vocabulary construction is the implementor's
/// concern.
pub trait TokenizerCapability {
    /// Splits `text` into vocabulary tokens, without special tokens.
    fn tokenize(&self, text: &str) -> Result<Vec<String>>;
    /// Maps tokens to their vocabulary ids.
    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Result<Vec<u32>>;
    fn pad_token_id(&self) -> u32;
    fn bos_token_id(&self) -> u32;
    fn eos_token_id(&self) -> u32;
    /// Ids of the additional special tokens, in registration order.
    fn additional_special_tokens_ids(&self) -> &[u32];
    /// Maps ids back to text.
    fn decode(
        &self,
        ids: &[u32],
        skip_special_tokens: bool,
        clean_up_tokenization_spaces: bool,
    ) -> Result<String>;
}

/// Tokenizes `text` and converts the tokens to ids.
pub fn string_to_ids<T: TokenizerCapability + ?Sized>(text: &str, tokenizer: &T) -> Result<Vec<u32>> {
    tokenizer.convert_tokens_to_ids(&tokenizer.tokenize(text)?)
}

/// Names of the special tokens registered in the vocabulary.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SpecialTokenNames {
    pub pad_token: String,
    pub bos_token: String,
    pub eos_token: String,
    pub additional_special_tokens: Vec<String>,
}

/// `HfTokenizer` - `TokenizerCapability` over a `tokenizers::Tokenizer`,
/// with special token ids resolved once at construction.
#[derive(Clone)]
pub struct HfTokenizer {
    tokenizer: Tokenizer,
    pad_token_id: u32,
    bos_token_id: u32,
    eos_token_id: u32,
    additional_special_tokens_ids: Vec<u32>,
}

impl HfTokenizer {
    /// Constructor
    ///
    /// # Errors
    ///
    /// * `TokenizerError::UnknownToken` - if a special token is not in the vocabulary
    /// * `TokenizerError::MissingSpecialTokens` - if fewer than
    ///   `NUM_SEGMENT_SPECIAL_TOKENS` additional special tokens are named
    pub fn new(tokenizer: Tokenizer, names: &SpecialTokenNames) -> Result<Self> {
        if names.additional_special_tokens.len() < NUM_SEGMENT_SPECIAL_TOKENS {
            return Err(TokenizerError::MissingSpecialTokens(
                names.additional_special_tokens.len(),
            ));
        }
        let lookup = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| TokenizerError::UnknownToken(token.to_string()))
        };
        let pad_token_id = lookup(&names.pad_token)?;
        let bos_token_id = lookup(&names.bos_token)?;
        let eos_token_id = lookup(&names.eos_token)?;
        let additional_special_tokens_ids = names
            .additional_special_tokens
            .iter()
            .map(|token| lookup(token))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tokenizer,
            pad_token_id,
            bos_token_id,
            eos_token_id,
            additional_special_tokens_ids,
        })
    }

    /// Reads a serialized `tokenizer.json`.
    pub fn from_file<P: AsRef<Path>>(path: P, names: &SpecialTokenNames) -> Result<Self> {
        let tokenizer =
            Tokenizer::from_file(path).map_err(|e| TokenizerError::Tokenizer(e.to_string()))?;
        Self::new(tokenizer, names)
    }

    /// Outputs a reference to the underlying `Tokenizer`
    pub fn inner(&self) -> &Tokenizer {
        &self.tokenizer
    }
}

impl TokenizerCapability for HfTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| TokenizerError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_tokens().to_vec())
    }

    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Result<Vec<u32>> {
        tokens
            .iter()
            .map(|token| {
                self.tokenizer
                    .token_to_id(token)
                    .ok_or_else(|| TokenizerError::UnknownToken(token.clone()))
            })
            .collect()
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    fn bos_token_id(&self) -> u32 {
        self.bos_token_id
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    fn additional_special_tokens_ids(&self) -> &[u32] {
        &self.additional_special_tokens_ids
    }

    fn decode(
        &self,
        ids: &[u32],
        skip_special_tokens: bool,
        clean_up_tokenization_spaces: bool,
    ) -> Result<String> {
        let text = self
            .tokenizer
            .decode(ids, skip_special_tokens)
            .map_err(|e| TokenizerError::Tokenizer(e.to_string()))?;
        Ok(if clean_up_tokenization_spaces {
            clean_up_tokenization(&text)
        } else {
            text
        })
    }
}

/// Removes the spaces a word-piece decoder leaves before punctuation and
/// English contractions.
pub fn clean_up_tokenization(text: &str) -> String {
    const REPLACEMENTS: [(&str, &str); 10] = [
        (" .", "."),
        (" ?", "?"),
        (" !", "!"),
        (" ,", ","),
        (" ' ", "'"),
        (" n't", "n't"),
        (" 'm", "'m"),
        (" 's", "'s"),
        (" 've", "'ve"),
        (" 're", "'re"),
    ];
    REPLACEMENTS
        .iter()
        .fold(text.to_string(), |text, (from, to)| text.replace(from, to))
}

#[derive(Debug, Error)]
pub enum TokenizerError {
    #[error("Tokenizer error: `{0}`")]
    Tokenizer(String),
    #[error("Token `{0}` is not in the vocabulary")]
    UnknownToken(String),
    #[error("Expected at least 3 additional special tokens, got {0}")]
    MissingSpecialTokens(usize),
}
