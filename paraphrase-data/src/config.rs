use std::{collections::HashMap, path::Path};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::{
    mode::{ContextInputType, UpperLength},
    roberta::MAX_ROBERTA_LENGTH,
};

type Result<T> = std::result::Result<T, ConfigError>;

/// Sentinel used in `global_dense_feature_list` to disable global dense features.
pub const NO_DENSE_FEATURES: &str = "none";

/// Default stride, large enough that no content vectors are aggregated.
const DEFAULT_CONTENT_AGGREGATION: usize = 1000;

/// Column description used to turn a raw dataset row into an instance record.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct KeySpec {
    /// Name of the field in the produced record
    pub key: String,
    /// Column index in the raw row
    pub position: usize,
    /// Whether the column text is tokenized into ids
    pub tokenize: bool,
    /// Whether the column is echoed into the record's `metadata`
    pub metadata: bool,
}

/// Per-dataset length limits.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct DatasetConfig {
    pub max_prefix_length: usize,
    pub max_suffix_length: usize,
    pub max_dense_length: usize,
    #[serde(default)]
    pub keys: Vec<KeySpec>,
}

/// Training run arguments that affect how instances are laid out.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct RunArgs {
    /// Dataset directory, its suffix selects the `DatasetConfig`
    pub data_dir: String,
    pub context_input_type: ContextInputType,
    /// Comma-separated dense feature names, or `none`
    #[serde(default = "default_dense_feature_list")]
    pub global_dense_feature_list: String,
    /// Stride used when aggregating secondary encoder content vectors
    #[serde(default = "default_content_aggregation")]
    pub content_aggregation: usize,
    /// Length policy of generated continuations, not used for packing
    #[serde(default)]
    pub upper_length: UpperLength,
}

fn default_dense_feature_list() -> String {
    NO_DENSE_FEATURES.to_string()
}

fn default_content_aggregation() -> usize {
    DEFAULT_CONTENT_AGGREGATION
}

impl RunArgs {
    /// Loads run arguments from a configuration file, with `PARAPHRASE_RUN__*`
    /// environment variables taking precedence.
    ///
    /// # Errors
    ///
    /// * `ConfigError::InvalidPath` - if the path is not valid UTF-8
    /// * `ConfigError::Load` - if the file cannot be read or deserialized
    pub fn from_file_path<P: AsRef<Path>>(config_file_path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path_str(config_file_path.as_ref())?))
            .add_source(Environment::with_prefix("PARAPHRASE_RUN").separator("__"))
            .build()?;
        Ok(config.try_deserialize::<Self>()?)
    }

    /// Names of the configured global dense features, empty when disabled.
    pub fn global_dense_features(&self) -> Vec<&str> {
        if self.global_dense_feature_list == NO_DENSE_FEATURES {
            Vec::new()
        } else {
            self.global_dense_feature_list.split(',').collect()
        }
    }
}

/// `RunConfig` - the immutable per-run layout, derived once from the
/// dataset limits and run arguments and shared by every instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    context_input_type: ContextInputType,
    max_prefix_length: usize,
    max_suffix_length: usize,
    max_dense_length: usize,
    global_dense_length: usize,
    roberta_dense_length: usize,
}

impl RunConfig {
    /// Getter for `context_input_type`
    pub fn context_input_type(&self) -> &ContextInputType {
        &self.context_input_type
    }

    /// Getter for `max_prefix_length`
    pub fn max_prefix_length(&self) -> usize {
        self.max_prefix_length
    }

    /// Getter for `max_suffix_length`
    pub fn max_suffix_length(&self) -> usize {
        self.max_suffix_length
    }

    /// Getter for `max_dense_length`
    pub fn max_dense_length(&self) -> usize {
        self.max_dense_length
    }

    /// Getter for `global_dense_length`
    pub fn global_dense_length(&self) -> usize {
        self.global_dense_length
    }

    /// Getter for `roberta_dense_length`
    pub fn roberta_dense_length(&self) -> usize {
        self.roberta_dense_length
    }

    /// Number of leading dense feature slots in labels and segments.
    pub fn dense_length(&self) -> usize {
        self.global_dense_length + self.roberta_dense_length
    }

    /// Prefix slots plus the separator.
    pub fn init_context_size(&self) -> usize {
        self.max_prefix_length + 1
    }
}

/// Derives the run layout from the run arguments and dataset limits.
///
/// # Errors
///
/// * `ConfigError::InvalidContentAggregation` - if the stride is zero
/// * `ConfigError::DenseLengthExceeded` - if more global dense features are
///   requested than the dataset allows
#[instrument(level = "info", skip_all, fields(context_input_type = %args.context_input_type))]
pub fn update_config(args: &RunArgs, config: &DatasetConfig) -> Result<RunConfig> {
    let max_prefix_length = if args.context_input_type.is_no_srl_input() {
        0
    } else {
        config.max_prefix_length
    };

    let global_dense_length = args.global_dense_features().len();
    let roberta_dense_length = roberta_dense_length(args.content_aggregation)?;

    if global_dense_length > 0 {
        info!("Using {global_dense_length} dense feature vectors.");
    }
    if roberta_dense_length > 0 {
        info!("Using {roberta_dense_length} roberta feature vectors.");
    }

    if global_dense_length > config.max_dense_length {
        return Err(ConfigError::DenseLengthExceeded {
            global_dense_length,
            max_dense_length: config.max_dense_length,
        });
    }

    Ok(RunConfig {
        context_input_type: args.context_input_type.clone(),
        max_prefix_length,
        max_suffix_length: config.max_suffix_length,
        max_dense_length: config.max_dense_length,
        global_dense_length,
        roberta_dense_length,
    })
}

fn roberta_dense_length(content_aggregation: usize) -> Result<usize> {
    if content_aggregation == 0 {
        return Err(ConfigError::InvalidContentAggregation);
    }
    if content_aggregation > MAX_ROBERTA_LENGTH - 1 {
        return Ok(0);
    }
    Ok((0..MAX_ROBERTA_LENGTH - 1)
        .filter(|i| i % content_aggregation == 0)
        .count())
}

/// Known datasets, keyed by the directory-name suffix that identifies them.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DatasetRegistry {
    datasets: HashMap<String, DatasetConfig>,
}

impl DatasetRegistry {
    /// Constructor
    pub fn new(datasets: HashMap<String, DatasetConfig>) -> Self {
        Self { datasets }
    }

    /// Loads the registry from the `datasets` table of a configuration file.
    ///
    /// # Errors
    ///
    /// * `ConfigError::InvalidPath` - if the path is not valid UTF-8
    /// * `ConfigError::Load` - if the file cannot be read or deserialized
    pub fn from_file_path<P: AsRef<Path>>(config_file_path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path_str(config_file_path.as_ref())?))
            .build()?;
        Ok(config.try_deserialize::<Self>()?)
    }

    /// Finds the single dataset whose name is a suffix of `data_dir`.
    ///
    /// # Errors
    ///
    /// * `ConfigError::AmbiguousDataset` - unless exactly one dataset matches
    pub fn resolve(&self, data_dir: &str) -> Result<&DatasetConfig> {
        let mut matches = self
            .datasets
            .iter()
            .filter(|(name, _)| data_dir.ends_with(name.as_str()));
        match (matches.next(), matches.next()) {
            (Some((_, config)), None) => Ok(config),
            (first, second) => Err(ConfigError::AmbiguousDataset {
                data_dir: data_dir.to_string(),
                matches: first.iter().chain(second.iter()).count() + matches.count(),
            }),
        }
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| ConfigError::InvalidPath(path.display().to_string()))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Global dense length {global_dense_length} exceeds max dense length {max_dense_length}")]
    DenseLengthExceeded {
        global_dense_length: usize,
        max_dense_length: usize,
    },
    #[error("Content aggregation stride must be positive")]
    InvalidContentAggregation,
    #[error("Expected exactly one dataset config for `{data_dir}`, found {matches}")]
    AmbiguousDataset { data_dir: String, matches: usize },
    #[error("Configuration path is not valid UTF-8: `{0}`")]
    InvalidPath(String),
    #[error("Failed to load configuration: `{0}`")]
    Load(#[from] config::ConfigError),
}
