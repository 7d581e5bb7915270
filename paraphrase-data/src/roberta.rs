//! Fixed-width secondary (RoBERTa) encoding of a sentence.

use serde::{Deserialize, Serialize};

use crate::{instance::InstanceError, padding::right_padding};

/// Input width of the secondary encoder.
pub const MAX_ROBERTA_LENGTH: usize = 502;

/// Padding id of the secondary encoder's vocabulary.
pub const ROBERTA_PAD_ID: i64 = 1;

/// A secondary encoding as found in a raw record: either the
/// whitespace-separated text written by the preprocessing scripts, or an
/// already numeric array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RobertaSentence {
    Text(String),
    Ids(Vec<i64>),
}

impl RobertaSentence {
    /// Token ids in their raw, un-normalized length.
    pub fn ids(&self) -> Result<Vec<i64>, InstanceError> {
        match self {
            Self::Text(text) => parse_ids(text),
            Self::Ids(ids) => Ok(ids.clone()),
        }
    }
}

/// Parses whitespace-separated integer ids.
pub fn parse_ids<T: std::str::FromStr>(text: &str) -> Result<Vec<T>, InstanceError> {
    text.split_whitespace()
        .map(|token| {
            token
                .parse()
                .map_err(|_| InstanceError::InvalidTokenId(token.to_string()))
        })
        .collect()
}

/// Right-pads with `ROBERTA_PAD_ID` or truncates to `MAX_ROBERTA_LENGTH`.
///
/// # Errors
///
/// * `InstanceError::InvalidTokenId` - if the text form holds a non-integer
/// * `InstanceError::RobertaLength` - if the result is not exactly
///   `MAX_ROBERTA_LENGTH` wide
pub fn normalize_roberta_sentence(sentence: &RobertaSentence) -> Result<Vec<i64>, InstanceError> {
    let mut ids = sentence.ids()?;
    if ids.len() < MAX_ROBERTA_LENGTH {
        ids = right_padding(&ids, ROBERTA_PAD_ID, MAX_ROBERTA_LENGTH)?;
    } else {
        ids.truncate(MAX_ROBERTA_LENGTH);
    }

    if ids.len() != MAX_ROBERTA_LENGTH {
        return Err(InstanceError::RobertaLength(ids.len()));
    }
    Ok(ids)
}
