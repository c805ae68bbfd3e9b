//! Time-partitioned table loading.
//!
//! Each partition is one parquet file named `{prefix}{bucket}.parquet` inside
//! a single directory (e.g. `data/processed/table_2023-01.parquet`). Every file
//! shares one schema:
//! - a binary label column
//! - a time column (provenance only, never used as a feature)
//! - numeric and categorical feature columns
//!
//! [`TimePartitionedStore`] concatenates the tables for an ordered list of
//! buckets into a [`DatasetSlice`], preserving bucket order then row order.
//! Partitions are joined with a lazy `concat` after their schemas are checked.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use thiserror::Error;
use tracing::debug;

use super::types::{DatasetSlice, FeatureFrame, FeatureSchema, Table, TimeBucket};

/// Default filename prefix for partition files.
pub const DEFAULT_FILE_PREFIX: &str = "table_";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Missing partition: no table for bucket {0}")]
    MissingPartition(String),

    #[error("Schema mismatch: expected columns {expected:?}, found {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Buckets are not strictly increasing: {before} precedes {after}")]
    UnorderedBuckets { before: String, after: String },

    #[error("Invalid bucket id: '{0}'")]
    InvalidBucket(String),

    #[error("Invalid label in bucket {bucket}: {detail}")]
    InvalidLabel { bucket: String, detail: String },

    #[error("No buckets requested")]
    NoBuckets,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Column roles shared by every table of a dataset.
#[derive(Debug, Clone)]
pub struct TableLayout {
    pub label_col: String,
    pub time_col: String,
    /// Feature columns declared categorical. All other features are numeric.
    pub categorical_cols: BTreeSet<String>,
}

impl TableLayout {
    pub fn new(label_col: &str, time_col: &str) -> Self {
        Self {
            label_col: label_col.to_string(),
            time_col: time_col.to_string(),
            categorical_cols: BTreeSet::new(),
        }
    }

    pub fn with_categorical<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categorical_cols = columns.into_iter().map(Into::into).collect();
        self
    }
}

/// A source of per-bucket tables.
pub trait TableSource {
    /// Read the table for `bucket`, or `None` if the partition does not exist.
    fn read(&self, bucket: &TimeBucket) -> Result<Option<Table>, StoreError>;

    /// List every bucket the source holds, in any order.
    fn list_buckets(&self) -> Result<Vec<TimeBucket>, StoreError>;
}

/// Parquet files in one directory, one file per bucket.
pub struct ParquetDir {
    dir: PathBuf,
    prefix: String,
    layout: TableLayout,
}

impl ParquetDir {
    pub fn new(dir: impl Into<PathBuf>, layout: TableLayout) -> Self {
        Self {
            dir: dir.into(),
            prefix: DEFAULT_FILE_PREFIX.to_string(),
            layout,
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Path to the parquet file for `bucket`.
    pub fn path_for(&self, bucket: &TimeBucket) -> PathBuf {
        self.dir
            .join(format!("{}{}.parquet", self.prefix, bucket.as_str()))
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }
}

impl TableSource for ParquetDir {
    fn read(&self, bucket: &TimeBucket) -> Result<Option<Table>, StoreError> {
        let path = self.path_for(bucket);
        if !path.exists() {
            return Ok(None);
        }
        debug!("Reading partition {} from {}", bucket, path.display());
        let df = LazyFrame::scan_parquet(&path, ScanArgsParquet::default())?.collect()?;
        dataframe_to_table(&df, bucket, &self.layout).map(Some)
    }

    fn list_buckets(&self) -> Result<Vec<TimeBucket>, StoreError> {
        let path = Path::new(&self.dir);
        if !path.exists() {
            return Ok(vec![]);
        }

        let mut buckets = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if let Some(id) = name
                .strip_prefix(self.prefix.as_str())
                .and_then(|rest| rest.strip_suffix(".parquet"))
            {
                buckets.push(TimeBucket::new(id)?);
            }
        }
        Ok(buckets)
    }
}

/// In-memory tables keyed by bucket.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: BTreeMap<TimeBucket, Table>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: Table) {
        self.tables.insert(table.bucket.clone(), table);
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.insert(table);
        self
    }
}

impl TableSource for MemorySource {
    fn read(&self, bucket: &TimeBucket) -> Result<Option<Table>, StoreError> {
        Ok(self.tables.get(bucket).cloned())
    }

    fn list_buckets(&self) -> Result<Vec<TimeBucket>, StoreError> {
        Ok(self.tables.keys().cloned().collect())
    }
}

/// Loads and concatenates partitions for ordered bucket lists.
///
/// Nothing is cached: each call re-reads its buckets from the source.
pub struct TimePartitionedStore<S> {
    source: S,
}

impl<S: TableSource> TimePartitionedStore<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// All buckets held by the source, sorted and validated.
    pub fn available_buckets(&self) -> Result<Vec<TimeBucket>, StoreError> {
        let mut buckets = self.source.list_buckets()?;
        buckets.sort();
        TimeBucket::validate_sequence(&buckets)?;
        Ok(buckets)
    }

    /// Load `buckets` in the order given and concatenate them.
    ///
    /// Fails with `MissingPartition` if a bucket has no table and with
    /// `SchemaMismatch` if two tables disagree on their columns or column
    /// kinds. Columns are aligned by name to the first table. Rows are
    /// neither deduplicated nor reordered.
    pub fn load(&self, buckets: &[TimeBucket]) -> Result<DatasetSlice, StoreError> {
        let tables = buckets
            .iter()
            .map(|bucket| self.read_required(bucket))
            .collect::<Result<Vec<_>, _>>()?;
        let schema = tables.first().ok_or(StoreError::NoBuckets)?.schema();
        let order: Vec<Expr> = schema.names().into_iter().map(col).collect();

        let mut frames = Vec::with_capacity(tables.len());
        let mut labels = Vec::new();
        for table in tables {
            let found = table.schema();
            if !found.same_columns(&schema) {
                return Err(StoreError::SchemaMismatch {
                    expected: schema.names().into_iter().map(str::to_string).collect(),
                    found: found.names().into_iter().map(str::to_string).collect(),
                });
            }
            labels.extend_from_slice(&table.labels);
            frames.push(table.features.into_data().lazy().select(order.clone()));
        }

        let combined = concat(&frames, UnionArgs::default())?.collect()?;
        let features = FeatureFrame::from_dataframe(combined)?;

        debug!(
            "Loaded {} rows from {} buckets ({} columns)",
            labels.len(),
            buckets.len(),
            features.width()
        );

        Ok(DatasetSlice {
            buckets: buckets.to_vec(),
            features,
            labels,
        })
    }

    fn read_required(&self, bucket: &TimeBucket) -> Result<Table, StoreError> {
        self.source
            .read(bucket)?
            .ok_or_else(|| StoreError::MissingPartition(bucket.to_string()))
    }
}

/// Convert a partition DataFrame to a [`Table`].
///
/// Feature columns are every column except the label and time columns, in
/// file order. Their kinds come from the layout's declared categorical set.
fn dataframe_to_table(
    df: &DataFrame,
    bucket: &TimeBucket,
    layout: &TableLayout,
) -> Result<Table, StoreError> {
    let names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    for required in [&layout.label_col, &layout.time_col] {
        if !names.contains(required) {
            return Err(StoreError::MissingColumn(format!(
                "{} (bucket {})",
                required, bucket
            )));
        }
    }

    let labels = labels_from_column(df.column(&layout.label_col)?, bucket)?;

    let feature_names: Vec<String> = names
        .into_iter()
        .filter(|n| *n != layout.label_col && *n != layout.time_col)
        .collect();
    let schema = FeatureSchema::declare(&feature_names, &layout.categorical_cols);

    let mut columns = Vec::with_capacity(schema.len());
    for spec in schema.columns() {
        columns.push(df.column(&spec.name)?.cast(&spec.kind.dtype())?);
    }

    let features = FeatureFrame::from_dataframe(DataFrame::new(columns)?)?;
    Table::new(bucket.clone(), features, labels)
}

/// Read a label column as 0/1 bytes.
fn labels_from_column(column: &Column, bucket: &TimeBucket) -> Result<Vec<u8>, StoreError> {
    let cast = column.cast(&DataType::Int64)?;
    let mut labels = Vec::with_capacity(cast.len());
    for (idx, value) in cast.i64()?.into_iter().enumerate() {
        match value {
            Some(0) => labels.push(0),
            Some(1) => labels.push(1),
            Some(other) => {
                return Err(StoreError::InvalidLabel {
                    bucket: bucket.to_string(),
                    detail: format!("row {} has label {}", idx, other),
                })
            }
            None => {
                return Err(StoreError::InvalidLabel {
                    bucket: bucket.to_string(),
                    detail: format!("row {} has a missing label", idx),
                })
            }
        }
    }
    Ok(labels)
}
