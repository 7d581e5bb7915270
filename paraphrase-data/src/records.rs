use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    config::DatasetConfig,
    roberta::RobertaSentence,
    tokenizer::{string_to_ids, TokenizerCapability, TokenizerError},
};

/// A raw `{sent1_tokens, sent2_tokens}` record.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RawInstance {
    pub sent1_tokens: Vec<u32>,
    pub sent2_tokens: Vec<u32>,
    #[serde(default)]
    pub metadata: String,
}

/// A raw record for author-conditioned (HP) instances.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct RawHpInstance {
    /// Token ids of the sentence itself, used as the suffix
    pub sentence: Vec<u32>,
    pub roberta_sentence: RobertaSentence,
    /// Prefix ids in tag-input mode, separated by whitespace. Multi-digit
    /// ids are one id each, not one id per character.
    pub author_tag_str: String,
    /// Segment tag tokens parallel to `author_tag_str`
    pub author_tag_ids: Vec<String>,
    pub author_target: i64,
    pub original_target: i64,
    /// Target aligned with the secondary encoder's label dictionary
    #[serde(default)]
    pub roberta_author_target: Option<i64>,
    #[serde(default)]
    pub metadata: String,
}

/// Turns one raw dataset row into a record, following the dataset's key
/// layout: each key reads `datum[position]`, tokenized into ids when
/// requested, and is echoed into `metadata` as `key = value` when flagged.
///
/// # Errors
///
/// * `RecordError::MissingColumn` - if a key points past the end of the row
/// * `RecordError::Tokenizer` - if tokenization fails
pub fn datum_to_dict<T>(
    config: &DatasetConfig,
    datum: &[String],
    tokenizer: &T,
) -> Result<Map<String, Value>, RecordError>
where
    T: TokenizerCapability + ?Sized,
{
    let mut instance_dict = Map::new();
    let mut metadata = Vec::new();

    for key in &config.keys {
        let element_value = datum.get(key.position).ok_or(RecordError::MissingColumn {
            key: key.key.clone(),
            position: key.position,
            columns: datum.len(),
        })?;
        let value = if key.tokenize {
            Value::from(string_to_ids(element_value, tokenizer)?)
        } else {
            Value::from(element_value.as_str())
        };
        instance_dict.insert(key.key.clone(), value);
        if key.metadata {
            metadata.push(format!("{} = {}", key.key, element_value));
        }
    }

    instance_dict.insert("metadata".to_string(), Value::from(metadata.join(", ")));
    Ok(instance_dict)
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Key `{key}` reads column {position}, but the row has {columns} columns")]
    MissingColumn {
        key: String,
        position: usize,
        columns: usize,
    },
    #[error("Tokenizer error: `{0}`")]
    Tokenizer(#[from] TokenizerError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::KeySpec, tokenizer::mock::MockTokenizer};

    fn key(key: &str, position: usize, tokenize: bool, metadata: bool) -> KeySpec {
        KeySpec {
            key: key.to_string(),
            position,
            tokenize,
            metadata,
        }
    }

    fn dataset_config(keys: Vec<KeySpec>) -> DatasetConfig {
        DatasetConfig {
            max_prefix_length: 4,
            max_suffix_length: 4,
            max_dense_length: 0,
            keys,
        }
    }

    #[test]
    fn test_datum_to_dict_builds_raw_instance() {
        let config = dataset_config(vec![
            key("sent1_tokens", 0, true, true),
            key("sent2_tokens", 1, true, false),
        ]);
        let tokenizer = MockTokenizer::new(&["hello", "world", "bye"]);
        let datum = vec!["hello world".to_string(), "bye".to_string()];

        let dict = datum_to_dict(&config, &datum, &tokenizer).unwrap();
        let raw: RawInstance = serde_json::from_value(Value::Object(dict)).unwrap();
        assert_eq!(
            raw,
            RawInstance {
                sent1_tokens: vec![10, 11],
                sent2_tokens: vec![12],
                metadata: "sent1_tokens = hello world".to_string(),
            }
        );
    }

    #[test]
    fn test_metadata_joins_flagged_keys() {
        let config = dataset_config(vec![key("author", 0, false, true), key("split", 1, false, true)]);
        let datum = vec!["austen".to_string(), "train".to_string()];
        let dict = datum_to_dict(&config, &datum, &MockTokenizer::new(&[])).unwrap();
        assert_eq!(dict["author"], Value::from("austen"));
        assert_eq!(dict["metadata"], Value::from("author = austen, split = train"));
    }

    #[test]
    fn test_missing_column() {
        let config = dataset_config(vec![key("sent2_tokens", 3, true, false)]);
        let err = datum_to_dict(&config, &["a".to_string()], &MockTokenizer::new(&[])).unwrap_err();
        assert!(matches!(err, RecordError::MissingColumn { position: 3, columns: 1, .. }));
    }

    #[test]
    fn test_hp_record_defaults() {
        let raw: RawHpInstance = serde_json::from_str(
            r#"{
                "sentence": [5, 6],
                "roberta_sentence": "0 7 2",
                "author_tag_str": "40 41",
                "author_tag_ids": ["<A0>", "<V>"],
                "author_target": 3,
                "original_target": 1
            }"#,
        )
        .unwrap();
        assert_eq!(raw.roberta_author_target, None);
        assert!(raw.metadata.is_empty());
        assert_eq!(raw.roberta_sentence, RobertaSentence::Text("0 7 2".to_string()));
    }
}
