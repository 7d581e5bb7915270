//! Instance construction for conditional GPT-2 fine-tuning.
//!
//! Raw token-id records are packed into fixed-layout `sentence`, `label`
//! and `segment` arrays according to an immutable [`config::RunConfig`]
//! derived once per run.

pub mod aggregate;
pub mod config;
pub mod filters;
pub mod instance;
pub mod mode;
pub mod padding;
pub mod records;
pub mod roberta;
pub mod tokenizer;

pub use config::{update_config, DatasetConfig, DatasetRegistry, RunArgs, RunConfig};
pub use instance::{shuffle_rng, HpInstance, Instance, InstanceError, IGNORE_INDEX};
pub use mode::{ContextInputType, InputMode, PrefixOrder, UpperLength};
pub use tokenizer::{HfTokenizer, TokenizerCapability, TokenizerError};
