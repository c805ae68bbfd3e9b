//! Column preprocessing into a dense `ndarray` design matrix.
//!
//! - Numeric columns: median imputation, then standardization
//! - Categorical columns: most-frequent imputation, then one-hot encoding
//!
//! Categories unseen during fit encode as all zeros.

use std::collections::BTreeMap;

use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use super::pipeline::ModelError;
use crate::data::{ColumnKind, FeatureFrame, FeatureSchema};

/// Fitted transform for one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericTransform {
    pub name: String,
    pub median: f64,
    pub mean: f64,
    pub scale: f64,
}

/// Fitted transform for one categorical column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalTransform {
    pub name: String,
    /// Fill value for missing entries. `None` if the column was entirely missing.
    pub most_frequent: Option<String>,
    /// Known categories, sorted. One output column each.
    pub categories: Vec<String>,
}

/// Fitted column transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    pub numeric: Vec<NumericTransform>,
    pub categorical: Vec<CategoricalTransform>,
}

impl Preprocessor {
    /// Fit imputation, scaling, and encoding statistics on `frame`.
    pub fn fit(frame: &FeatureFrame, schema: &FeatureSchema) -> Result<Self, ModelError> {
        if schema.is_empty() {
            return Err(ModelError::NoFeatures);
        }
        if frame.height() == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }

        let mut numeric = Vec::new();
        let mut categorical = Vec::new();
        for spec in schema.columns() {
            let column = lookup(frame, &spec.name)?;
            match spec.kind {
                ColumnKind::Numeric => {
                    numeric.push(fit_numeric(&spec.name, numeric_values(column, &spec.name)?)?);
                }
                ColumnKind::Categorical => {
                    categorical.push(fit_categorical(
                        &spec.name,
                        categorical_values(column, &spec.name)?,
                    ));
                }
            }
        }

        Ok(Self {
            numeric,
            categorical,
        })
    }

    /// Width of the transformed matrix.
    pub fn n_outputs(&self) -> usize {
        self.numeric.len() + self.categorical.iter().map(|c| c.categories.len()).sum::<usize>()
    }

    /// Apply the fitted transforms to `frame`, one matrix row per frame row.
    pub fn transform(&self, frame: &FeatureFrame) -> Result<Array2<f64>, ModelError> {
        let mut matrix = Array2::<f64>::zeros((frame.height(), self.n_outputs()));

        let mut offset = 0;
        for t in &self.numeric {
            let values = numeric_values(lookup(frame, &t.name)?, &t.name)?;
            for (cell, v) in matrix.column_mut(offset).iter_mut().zip(values) {
                let filled = v.filter(|x| x.is_finite()).unwrap_or(t.median);
                *cell = (filled - t.mean) / t.scale;
            }
            offset += 1;
        }

        for t in &self.categorical {
            let values = categorical_values(lookup(frame, &t.name)?, &t.name)?;
            for (r, v) in values.into_iter().enumerate() {
                let filled = v.or(t.most_frequent.as_deref());
                if let Some(category) = filled {
                    if let Ok(idx) = t.categories.binary_search_by(|c| c.as_str().cmp(category)) {
                        matrix[[r, offset + idx]] = 1.0;
                    }
                }
            }
            offset += t.categories.len();
        }

        Ok(matrix)
    }
}

fn lookup<'a>(frame: &'a FeatureFrame, name: &str) -> Result<&'a Column, ModelError> {
    frame
        .data()
        .column(name)
        .map_err(|_| ModelError::MissingFeature(name.to_string()))
}

fn numeric_values<'a>(column: &'a Column, name: &str) -> Result<&'a Float64Chunked, ModelError> {
    column
        .f64()
        .map_err(|_| ModelError::KindMismatch(name.to_string()))
}

fn categorical_values<'a>(column: &'a Column, name: &str) -> Result<&'a StringChunked, ModelError> {
    column
        .str()
        .map_err(|_| ModelError::KindMismatch(name.to_string()))
}

fn fit_numeric(name: &str, values: &Float64Chunked) -> Result<NumericTransform, ModelError> {
    // NaN and infinities count as missing.
    let present: Float64Chunked = values
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect();
    let median = present.median().unwrap_or(0.0);

    let filled = present.fill_null_with_values(median)?;
    let mean = filled.mean().unwrap_or(0.0);
    let std = filled.std(0).unwrap_or(0.0);

    Ok(NumericTransform {
        name: name.to_string(),
        median,
        mean,
        scale: if std > 0.0 { std } else { 1.0 },
    })
}

fn fit_categorical(name: &str, values: &StringChunked) -> CategoricalTransform {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for v in values.into_iter().flatten() {
        *counts.entry(v).or_default() += 1;
    }

    // Ties go to the smallest category.
    let mut most_frequent: Option<(&str, usize)> = None;
    for (&category, &count) in &counts {
        if most_frequent.map_or(true, |(_, best)| count > best) {
            most_frequent = Some((category, count));
        }
    }

    CategoricalTransform {
        name: name.to_string(),
        most_frequent: most_frequent.map(|(c, _)| c.to_string()),
        categories: counts.keys().map(|c| c.to_string()).collect(),
    }
}
