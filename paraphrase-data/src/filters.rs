use std::collections::HashMap;

use thiserror::Error;
use tracing::info;

use crate::records::RawHpInstance;

/// Author id meaning "keep every author".
const ALL_AUTHORS: i64 = -1;

/// Dataset split a collection was loaded from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    Train,
    Dev,
    Test,
}

/// Records that carry an author label.
pub trait AuthorTargeted {
    fn author_target(&self) -> i64;
}

impl AuthorTargeted for RawHpInstance {
    fn author_target(&self) -> i64 {
        self.author_target
    }
}

/// Keeps only the first `limit_examples` records, for debugging and generation.
pub fn limit_dataset_size<T>(mut dataset: Vec<T>, limit_examples: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit_examples {
        info!("Limiting dataset to {limit} examples");
        dataset.truncate(limit);
    }
    dataset
}

/// Keeps only records written by the comma-separated `specific_author_train`
/// ids. Only the train and test splits are filtered, and an id of `-1`
/// disables filtering.
///
/// # Errors
///
/// * `FilterError::InvalidAuthorId` - if an id is not an integer
/// * `FilterError::UnknownAuthor` - if an id has no name in `reverse_author_target_dict`
pub fn limit_authors<T: AuthorTargeted>(
    dataset: Vec<T>,
    specific_author_train: &str,
    split: Split,
    reverse_author_target_dict: &HashMap<i64, String>,
) -> Result<Vec<T>, FilterError> {
    let authors = specific_author_train
        .split(',')
        .map(|author| {
            author
                .trim()
                .parse::<i64>()
                .map_err(|_| FilterError::InvalidAuthorId(author.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if !matches!(split, Split::Train | Split::Test) || authors.contains(&ALL_AUTHORS) {
        return Ok(dataset);
    }

    let names = authors
        .iter()
        .map(|author| {
            reverse_author_target_dict
                .get(author)
                .map(String::as_str)
                .ok_or(FilterError::UnknownAuthor(*author))
        })
        .collect::<Result<Vec<_>, _>>()?;
    info!("Preserving authors = {}", names.join(", "));

    let original_dataset_size = dataset.len();
    let dataset: Vec<T> = dataset
        .into_iter()
        .filter(|instance| authors.contains(&instance.author_target()))
        .collect();
    info!(
        "Remaining instances after author filtering = {} / {original_dataset_size}",
        dataset.len()
    );
    Ok(dataset)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("Invalid author id `{0}`")]
    InvalidAuthorId(String),
    #[error("Author id {0} is not in the author dictionary")]
    UnknownAuthor(i64),
}
