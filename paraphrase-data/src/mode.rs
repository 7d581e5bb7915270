use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const NO_SRL_INPUT_MARKER: &str = "_no_srl_input";
const ROBERTA_INPUT_MARKER: &str = "_roberta_input";
const SHUFFLE_MARKER: &str = "_shuffle_";
const REVERSE_MARKER: &str = "_reverse_";
const PARAPHRASE_MARKER: &str = "_paraphrase";

/// Where an instance's prefix tokens come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMode {
    /// No prefix at all, the sentence starts at the separator.
    NoSrlInput,
    /// Prefix is the secondary (RoBERTa) encoding of the sentence.
    RobertaInput,
    /// Prefix is the author tag encoding, with parallel segment tags.
    TagInput,
}

/// Whether prefix and suffix get exchanged before padding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefixOrder {
    Keep,
    /// Swap with probability 0.5.
    Shuffle,
    /// Always swap.
    Reverse,
}

/// `ContextInputType` - the run's `context_input_type` string, decoded once
/// into the behaviours its markers select.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ContextInputType {
    raw: String,
    input: InputMode,
    order: PrefixOrder,
    paraphrase: bool,
}

impl ContextInputType {
    /// Getter for the prefix source
    pub fn input(&self) -> InputMode {
        self.input
    }

    /// Getter for the prefix/suffix ordering
    pub fn order(&self) -> PrefixOrder {
        self.order
    }

    /// True for paraphrase runs, which never use per-author dense tables
    pub fn is_paraphrase(&self) -> bool {
        self.paraphrase
    }

    pub fn is_no_srl_input(&self) -> bool {
        self.input == InputMode::NoSrlInput
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl From<&str> for ContextInputType {
    fn from(raw: &str) -> Self {
        let input = if raw.ends_with(NO_SRL_INPUT_MARKER) {
            InputMode::NoSrlInput
        } else if raw.ends_with(ROBERTA_INPUT_MARKER) {
            InputMode::RobertaInput
        } else {
            InputMode::TagInput
        };
        // shuffle wins when both markers are present
        let order = if raw.contains(SHUFFLE_MARKER) {
            PrefixOrder::Shuffle
        } else if raw.contains(REVERSE_MARKER) {
            PrefixOrder::Reverse
        } else {
            PrefixOrder::Keep
        };
        Self {
            raw: raw.to_string(),
            input,
            order,
            paraphrase: raw.ends_with(PARAPHRASE_MARKER),
        }
    }
}

impl From<String> for ContextInputType {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<ContextInputType> for String {
    fn from(value: ContextInputType) -> Self {
        value.raw
    }
}

impl fmt::Display for ContextInputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// `UpperLength` - how long a generated continuation may be.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum UpperLength {
    /// Stop at the end-of-sequence token.
    #[default]
    Eos,
    /// At most the context length plus the given number of extra tokens.
    SamePlus(usize),
}

impl FromStr for UpperLength {
    type Err = UpperLengthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "eos" {
            return Ok(Self::Eos);
        }
        if s.starts_with("same") {
            let extra = s
                .rsplit('_')
                .next()
                .and_then(|extra| extra.parse().ok())
                .ok_or_else(|| UpperLengthError(s.to_string()))?;
            return Ok(Self::SamePlus(extra));
        }
        Err(UpperLengthError(s.to_string()))
    }
}

impl TryFrom<String> for UpperLength {
    type Error = UpperLengthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UpperLength> for String {
    fn from(value: UpperLength) -> Self {
        value.to_string()
    }
}

impl fmt::Display for UpperLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eos => f.write_str("eos"),
            Self::SamePlus(extra) => write!(f, "same_{extra}"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid upper length policy `{0}`, expected `eos` or `same_<N>`")]
pub struct UpperLengthError(String);
