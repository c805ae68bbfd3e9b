//! Core data types for time-partitioned tabular datasets.
//!
//! A dataset is a set of tables, one per [`TimeBucket`], that share a fixed
//! schema: a binary label column, a time column kept only for provenance, and
//! a set of numeric or categorical feature columns. Column kinds are declared
//! once at load time through a [`FeatureSchema`] rather than inferred per call.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use super::loader::StoreError;

/// Opaque, totally-ordered partition label (e.g. `"2023-01"` or `"202301"`).
///
/// Ordering is lexicographic. Upstream partitioning guarantees that this is
/// also chronological, and [`TimeBucket::validate_sequence`] checks that a
/// requested sequence respects it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeBucket(String);

impl TimeBucket {
    /// Create a bucket, rejecting ids that cannot name a partition file.
    pub fn new(id: impl Into<String>) -> Result<Self, StoreError> {
        let id = id.into();
        if id.is_empty() || id.contains('/') || id.contains('\\') {
            return Err(StoreError::InvalidBucket(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a list of ids into buckets, preserving order.
    pub fn parse_all<I, S>(ids: I) -> Result<Vec<Self>, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ids.into_iter().map(Self::new).collect()
    }

    /// Check that buckets are strictly increasing (sorted, no duplicates).
    pub fn validate_sequence(buckets: &[TimeBucket]) -> Result<(), StoreError> {
        for pair in buckets.windows(2) {
            if pair[0] >= pair[1] {
                return Err(StoreError::UnorderedBuckets {
                    before: pair[0].to_string(),
                    after: pair[1].to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declared kind of a feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

impl ColumnKind {
    /// Storage dtype of a column of this kind.
    pub fn dtype(&self) -> DataType {
        match self {
            Self::Numeric => DataType::Float64,
            Self::Categorical => DataType::String,
        }
    }

    pub fn of_dtype(dtype: &DataType) -> Option<Self> {
        match dtype {
            DataType::Float64 => Some(Self::Numeric),
            DataType::String => Some(Self::Categorical),
            _ => None,
        }
    }
}

/// A single declared feature column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

/// Ordered schema descriptor for the feature columns of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    columns: Vec<ColumnSpec>,
}

impl FeatureSchema {
    /// Declare a schema: every column listed in `categorical` is categorical,
    /// everything else numeric.
    pub fn declare(names: &[String], categorical: &BTreeSet<String>) -> Self {
        let columns = names
            .iter()
            .map(|name| ColumnSpec {
                name: name.clone(),
                kind: if categorical.contains(name) {
                    ColumnKind::Categorical
                } else {
                    ColumnKind::Numeric
                },
            })
            .collect();
        Self { columns }
    }

    pub fn from_specs(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn numeric_columns(&self) -> Vec<&str> {
        self.names_of(ColumnKind::Numeric)
    }

    pub fn categorical_columns(&self) -> Vec<&str> {
        self.names_of(ColumnKind::Categorical)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Same named columns with the same kinds, in any order.
    pub fn same_columns(&self, other: &FeatureSchema) -> bool {
        let key = |s: &FeatureSchema| -> BTreeSet<(String, ColumnKind)> {
            s.columns.iter().map(|c| (c.name.clone(), c.kind)).collect()
        };
        key(self) == key(other)
    }

    fn names_of(&self, kind: ColumnKind) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Typed values used to build a [`FeatureFrame`]. `None` marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureColumn {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

impl FeatureColumn {
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(v) => v.len(),
            Self::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Self::Numeric(_) => ColumnKind::Numeric,
            Self::Categorical(_) => ColumnKind::Categorical,
        }
    }

    fn into_column(self, name: &str) -> Column {
        match self {
            Self::Numeric(v) => Series::new(name.into(), v).into(),
            Self::Categorical(v) => Series::new(name.into(), v).into(),
        }
    }
}

/// Feature columns of a table or slice, held as a polars DataFrame.
///
/// Numeric columns are stored as `Float64` and categorical columns as
/// `String`, so a column's kind is its dtype.
#[derive(Debug, Clone)]
pub struct FeatureFrame {
    df: DataFrame,
}

impl FeatureFrame {
    /// Wrap a DataFrame whose columns are all `Float64` or `String`.
    pub fn from_dataframe(df: DataFrame) -> Result<Self, StoreError> {
        for column in df.get_columns() {
            if ColumnKind::of_dtype(column.dtype()).is_none() {
                return Err(StoreError::InvalidData(format!(
                    "column '{}' has dtype {}, expected f64 or str",
                    column.name(),
                    column.dtype()
                )));
            }
        }
        Ok(Self { df })
    }

    /// Build a frame from named columns. All columns must share one length.
    pub fn from_columns(
        rows: usize,
        columns: Vec<(String, FeatureColumn)>,
    ) -> Result<Self, StoreError> {
        let mut seen = BTreeSet::new();
        let mut built = Vec::with_capacity(columns.len());
        for (name, column) in columns {
            if column.len() != rows {
                return Err(StoreError::InvalidData(format!(
                    "column '{}' has {} rows, expected {}",
                    name,
                    column.len(),
                    rows
                )));
            }
            if !seen.insert(name.clone()) {
                return Err(StoreError::InvalidData(format!("duplicate column '{}'", name)));
            }
            built.push(column.into_column(&name));
        }
        Ok(Self {
            df: DataFrame::new(built)?,
        })
    }

    /// Build a single-row frame from a name -> value map, following `schema`.
    ///
    /// Missing entries become missing values. Numeric columns accept JSON
    /// numbers; categorical columns accept strings or numbers.
    pub fn from_row(
        schema: &FeatureSchema,
        row: &HashMap<String, serde_json::Value>,
    ) -> Result<Self, StoreError> {
        let mut columns = Vec::with_capacity(schema.len());
        for spec in schema.columns() {
            let value = row.get(&spec.name);
            let column = match spec.kind {
                ColumnKind::Numeric => {
                    let v = match value {
                        None | Some(serde_json::Value::Null) => None,
                        Some(serde_json::Value::Number(n)) => n.as_f64(),
                        Some(other) => {
                            return Err(StoreError::InvalidData(format!(
                                "numeric column '{}' got {}",
                                spec.name, other
                            )))
                        }
                    };
                    FeatureColumn::Numeric(vec![v])
                }
                ColumnKind::Categorical => {
                    let v = match value {
                        None | Some(serde_json::Value::Null) => None,
                        Some(serde_json::Value::String(s)) => Some(s.clone()),
                        Some(other) => Some(other.to_string()),
                    };
                    FeatureColumn::Categorical(vec![v])
                }
            };
            columns.push((spec.name.clone(), column));
        }
        Self::from_columns(1, columns)
    }

    /// The underlying DataFrame.
    pub fn data(&self) -> &DataFrame {
        &self.df
    }

    pub fn into_data(self) -> DataFrame {
        self.df
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn width(&self) -> usize {
        self.df.width()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.df.get_column_index(name).is_some()
    }

    /// Copy of one column's values, or `None` if the frame has no such column.
    pub fn column(&self, name: &str) -> Option<FeatureColumn> {
        let column = self.df.column(name).ok()?;
        match ColumnKind::of_dtype(column.dtype())? {
            ColumnKind::Numeric => Some(FeatureColumn::Numeric(
                column.f64().ok()?.into_iter().collect(),
            )),
            ColumnKind::Categorical => Some(FeatureColumn::Categorical(
                column
                    .str()
                    .ok()?
                    .into_iter()
                    .map(|v| v.map(str::to_string))
                    .collect(),
            )),
        }
    }

    /// Schema descriptor derived from the column dtypes.
    pub fn schema(&self) -> FeatureSchema {
        FeatureSchema::from_specs(
            self.df
                .get_columns()
                .iter()
                .filter_map(|column| {
                    ColumnKind::of_dtype(column.dtype()).map(|kind| ColumnSpec {
                        name: column.name().to_string(),
                        kind,
                    })
                })
                .collect(),
        )
    }

    /// Project onto `names`, in the given order. Fails on an absent column.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, StoreError> {
        if let Some(missing) = names.iter().find(|n| !self.contains(n.as_ref())) {
            return Err(StoreError::MissingColumn(missing.as_ref().to_string()));
        }
        Ok(Self {
            df: self.df.select(names.iter().map(|n| n.as_ref()))?,
        })
    }

    /// Append the rows of `other` below this frame.
    ///
    /// Both frames must hold the same column set with the same kinds. Column
    /// order in `other` may differ; values are matched by name.
    pub fn vstack(&mut self, other: &FeatureFrame) -> Result<(), StoreError> {
        if !self.schema().same_columns(&other.schema()) {
            return Err(StoreError::SchemaMismatch {
                expected: self.column_names(),
                found: other.column_names(),
            });
        }
        let aligned = other.df.select(self.column_names())?;
        self.df.vstack_mut(&aligned)?;
        Ok(())
    }
}

/// One loaded partition. Immutable once built.
#[derive(Debug, Clone)]
pub struct Table {
    pub bucket: TimeBucket,
    pub features: FeatureFrame,
    pub labels: Vec<u8>,
}

impl Table {
    pub fn new(
        bucket: TimeBucket,
        features: FeatureFrame,
        labels: Vec<u8>,
    ) -> Result<Self, StoreError> {
        if features.height() != labels.len() {
            return Err(StoreError::InvalidData(format!(
                "bucket {}: {} feature rows but {} labels",
                bucket,
                features.height(),
                labels.len()
            )));
        }
        Ok(Self {
            bucket,
            features,
            labels,
        })
    }

    pub fn schema(&self) -> FeatureSchema {
        self.features.schema()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Rows from an ordered list of buckets, concatenated in bucket order.
#[derive(Debug, Clone)]
pub struct DatasetSlice {
    pub buckets: Vec<TimeBucket>,
    pub features: FeatureFrame,
    pub labels: Vec<u8>,
}

impl DatasetSlice {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&y| y == 1).count()
    }

    /// True when the slice is non-empty but holds only one class.
    pub fn is_single_class(&self) -> bool {
        let pos = self.positives();
        !self.is_empty() && (pos == 0 || pos == self.len())
    }

    /// Restrict the feature columns, keeping labels and row order.
    pub fn with_features<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, StoreError> {
        Ok(Self {
            buckets: self.buckets.clone(),
            features: self.features.select(names)?,
            labels: self.labels.clone(),
        })
    }
}
