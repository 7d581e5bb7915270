//! Global dense feature vectors fed in front of every instance.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use paraphrase_data::RunArgs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

type Result<T> = std::result::Result<T, DenseFeatureError>;

/// `[rows][width]` dense vectors of one instance.
pub type DenseVectors = Vec<Vec<f32>>;

/// Width of the zero vector used when no dense features are configured.
pub const ZERO_DENSE_WIDTH: usize = 768;

/// Shape of the synthetic bucket encoding.
pub const BUCKET_ROWS: usize = 2;
pub const BUCKET_WIDTH: usize = 20;
/// Offset of the second bucket inside its row.
const ED_BUCKET_OFFSET: usize = 10;

/// Prefix of placeholder entries in the author dictionary.
const MADEUP_WORD: &str = "madeupword";

/// Chooses the dense vectors of one generation input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DenseFeatureSelector {
    /// Averaged vectors of an author, by dictionary index.
    Author(usize),
    /// One-hot bucket indices, used when no per-author tables exist.
    Buckets { f1_bucket: usize, ed_bucket: usize },
}

/// Author names mapped to their label dictionary index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthorTargetDict {
    ids: HashMap<String, usize>,
}

impl AuthorTargetDict {
    /// Parses a label dictionary: the first field of each line is an author
    /// name and its line number is its index. Placeholder lines are skipped
    /// without renumbering the following ones.
    pub fn parse(text: &str) -> Self {
        let ids = text
            .trim()
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.starts_with(MADEUP_WORD))
            .filter_map(|(i, line)| line.split_whitespace().next().map(|name| (name.to_string(), i)))
            .collect();
        Self { ids }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| DenseFeatureError::Io(path.as_ref().to_path_buf(), e))?;
        Ok(Self::parse(&text))
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.ids.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Index to name mapping.
    pub fn reverse(&self) -> HashMap<usize, String> {
        self.ids.iter().map(|(name, &id)| (id, name.clone())).collect()
    }
}

/// Accumulated vector of one author, as written by the feature extraction step.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct DenseVectorSum {
    pub sum: Vec<f32>,
    pub total: f32,
}

/// Averaged per-author vectors of one named feature.
#[derive(Clone, Debug, PartialEq)]
pub struct DenseFeatureTable {
    name: String,
    width: usize,
    vectors: HashMap<usize, Vec<f32>>,
}

impl DenseFeatureTable {
    /// Averages `sum / total` for every author and keys it by dictionary index.
    pub fn from_sums(
        name: &str,
        sums: HashMap<String, DenseVectorSum>,
        author_target_dict: &AuthorTargetDict,
    ) -> Result<Self> {
        let mut width = None;
        let mut vectors = HashMap::with_capacity(sums.len());
        for (author, DenseVectorSum { sum, total }) in sums {
            let id = author_target_dict
                .get(&author)
                .ok_or_else(|| DenseFeatureError::UnknownAuthor(author.clone()))?;
            let expected = *width.get_or_insert(sum.len());
            if sum.len() != expected {
                return Err(DenseFeatureError::WidthMismatch {
                    feature: name.to_string(),
                    expected,
                    actual: sum.len(),
                });
            }
            vectors.insert(id, sum.into_iter().map(|x| x / total).collect());
        }
        Ok(Self {
            name: name.to_string(),
            width: width.unwrap_or(0),
            vectors,
        })
    }

    /// Reads `<data_dir>/<name>_dense_vectors.json`.
    pub fn from_file(
        data_dir: &Path,
        name: &str,
        author_target_dict: &AuthorTargetDict,
    ) -> Result<Self> {
        let path = data_dir.join(format!("{name}_dense_vectors.json"));
        let text = fs::read_to_string(&path).map_err(|e| DenseFeatureError::Io(path.clone(), e))?;
        let sums = serde_json::from_str(&text).map_err(|e| DenseFeatureError::Parse(path, e))?;
        Self::from_sums(name, sums, author_target_dict)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

/// `DenseFeatures` - how the dense vectors of a run are obtained.
#[derive(Clone, Debug, PartialEq)]
pub enum DenseFeatures {
    /// No global dense features are configured.
    Disabled,
    /// Precomputed per-author tables, one row per configured feature.
    Tables(Vec<DenseFeatureTable>),
    /// Features are configured but no tables exist; selectors carry buckets.
    Buckets,
}

impl DenseFeatures {
    /// Loads the dense features a run needs. Tables are read only for
    /// non-paraphrase runs with a feature list, from
    /// `<data_dir>-bin/label/dict.txt` and `<data_dir>/<feature>_dense_vectors.json`.
    ///
    /// # Errors
    ///
    /// * `DenseFeatureError::Io` / `DenseFeatureError::Parse` - if a file is unreadable
    /// * `DenseFeatureError::WidthMismatch` - if features disagree on their width
    #[instrument(level = "info", skip_all, fields(data_dir = %args.data_dir))]
    pub fn for_run(args: &RunArgs) -> Result<Self> {
        let features = args.global_dense_features();
        if features.is_empty() {
            return Ok(Self::Disabled);
        }
        if args.context_input_type.is_paraphrase() {
            return Ok(Self::Buckets);
        }

        let dict_path = PathBuf::from(format!("{}-bin/label/dict.txt", args.data_dir));
        let author_target_dict = AuthorTargetDict::from_file(dict_path)?;
        let data_dir = Path::new(&args.data_dir);
        let tables = features
            .iter()
            .map(|feature| DenseFeatureTable::from_file(data_dir, feature, &author_target_dict))
            .collect::<Result<Vec<_>>>()?;
        info!(
            "Loaded {} dense feature tables for {} authors",
            tables.len(),
            author_target_dict.len()
        );
        Self::from_tables(tables)
    }

    /// Wraps tables, checking that they stack into one matrix.
    pub fn from_tables(tables: Vec<DenseFeatureTable>) -> Result<Self> {
        if let Some(first) = tables.first() {
            if let Some(other) = tables.iter().find(|table| table.width != first.width) {
                return Err(DenseFeatureError::WidthMismatch {
                    feature: other.name.clone(),
                    expected: first.width,
                    actual: other.width,
                });
            }
        }
        Ok(Self::Tables(tables))
    }

    /// `(rows, width)` of the vectors this source produces.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Self::Disabled => (1, ZERO_DENSE_WIDTH),
            Self::Tables(tables) => (tables.len(), tables.first().map_or(0, |t| t.width)),
            Self::Buckets => (BUCKET_ROWS, BUCKET_WIDTH),
        }
    }

    /// Dense vectors for one input. Inputs without a selector, and every
    /// input of a run without dense features, get zeros of `shape()`.
    ///
    /// # Errors
    ///
    /// * `DenseFeatureError::MissingAuthor` - if a table has no vector for the author
    /// * `DenseFeatureError::SelectorMismatch` - if the selector kind does not
    ///   match the source
    /// * `DenseFeatureError::BucketOutOfRange` - if a bucket index overflows its row
    pub fn vectors(&self, selector: Option<&DenseFeatureSelector>) -> Result<DenseVectors> {
        let (rows, width) = self.shape();
        match (self, selector) {
            (Self::Disabled, _) | (_, None) => Ok(vec![vec![0.0; width]; rows]),
            (Self::Tables(tables), Some(DenseFeatureSelector::Author(author))) => tables
                .iter()
                .map(|table| {
                    table.vectors.get(author).cloned().ok_or_else(|| {
                        DenseFeatureError::MissingAuthor {
                            feature: table.name.clone(),
                            author: *author,
                        }
                    })
                })
                .collect(),
            (
                Self::Buckets,
                Some(DenseFeatureSelector::Buckets {
                    f1_bucket,
                    ed_bucket,
                }),
            ) => bucket_vectors(*f1_bucket, *ed_bucket),
            (_, Some(selector)) => Err(DenseFeatureError::SelectorMismatch(*selector)),
        }
    }
}

/// Two one-hot rows: `f1_bucket` in the first, `ed_bucket + 10` in the second.
pub fn bucket_vectors(f1_bucket: usize, ed_bucket: usize) -> Result<DenseVectors> {
    let ed_index = ed_bucket + ED_BUCKET_OFFSET;
    if f1_bucket >= BUCKET_WIDTH || ed_index >= BUCKET_WIDTH {
        return Err(DenseFeatureError::BucketOutOfRange {
            f1_bucket,
            ed_bucket,
        });
    }
    let mut vectors = vec![vec![0.0; BUCKET_WIDTH]; BUCKET_ROWS];
    vectors[0][f1_bucket] = 1.0;
    vectors[1][ed_index] = 1.0;
    Ok(vectors)
}

#[derive(Debug, Error)]
pub enum DenseFeatureError {
    #[error("Failed to read `{path}`: {err}", path = .0.display(), err = .1)]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse `{path}`: {err}", path = .0.display(), err = .1)]
    Parse(PathBuf, #[source] serde_json::Error),
    #[error("Author `{0}` is not in the author dictionary")]
    UnknownAuthor(String),
    #[error("Feature `{feature}` has no vector for author {author}")]
    MissingAuthor { feature: String, author: usize },
    #[error("Feature `{feature}` has width {actual}, expected {expected}")]
    WidthMismatch {
        feature: String,
        expected: usize,
        actual: usize,
    },
    #[error("Selector {0:?} does not match the configured dense features")]
    SelectorMismatch(DenseFeatureSelector),
    #[error("Buckets f1 = {f1_bucket}, ed = {ed_bucket} do not fit a row of width 20")]
    BucketOutOfRange { f1_bucket: usize, ed_bucket: usize },
}
