//! Feature groups and column selection for ablation experiments.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::harness::AblationError;

/// Group name to key substrings. A column belongs to a group when its name
/// contains any of the group's keys.
pub type FeatureGroups = BTreeMap<String, Vec<String>>;

/// One ablation experiment.
///
/// If both `keep_groups` and `drop_groups` are given, `keep_groups` wins and
/// `drop_groups` is ignored. An experiment with neither uses every column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_groups: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_groups: Option<Vec<String>>,
}

impl ExperimentSpec {
    pub fn keep(name: &str, groups: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keep_groups: Some(groups.iter().map(|g| g.to_string()).collect()),
            drop_groups: None,
        }
    }

    pub fn drop(name: &str, groups: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keep_groups: None,
            drop_groups: Some(groups.iter().map(|g| g.to_string()).collect()),
        }
    }

    pub fn baseline(name: &str) -> Self {
        Self {
            name: name.to_string(),
            keep_groups: None,
            drop_groups: None,
        }
    }
}

/// Columns matched by the union of `requested` groups.
fn matched_columns<'a>(
    experiment: &str,
    columns: &'a [String],
    groups: &FeatureGroups,
    requested: &[String],
) -> Result<BTreeSet<&'a str>, AblationError> {
    let mut matched = BTreeSet::new();
    for group in requested {
        let keys = groups.get(group).ok_or_else(|| AblationError::UnknownGroup {
            experiment: experiment.to_string(),
            group: group.clone(),
        })?;
        for column in columns {
            if keys.iter().any(|key| column.contains(key.as_str())) {
                matched.insert(column.as_str());
            }
        }
    }
    Ok(matched)
}

/// Resolve the columns an experiment trains on, in `columns` order.
///
/// Keep semantics: only columns matching a kept group survive, so a column in
/// no group is excluded. Drop semantics: every column except those matching a
/// dropped group.
pub fn select_columns(
    columns: &[String],
    groups: &FeatureGroups,
    experiment: &ExperimentSpec,
) -> Result<Vec<String>, AblationError> {
    let non_empty = |g: &Option<Vec<String>>| g.as_ref().filter(|v| !v.is_empty()).cloned();

    if let Some(keep) = non_empty(&experiment.keep_groups) {
        let kept = matched_columns(&experiment.name, columns, groups, &keep)?;
        Ok(columns
            .iter()
            .filter(|c| kept.contains(c.as_str()))
            .cloned()
            .collect())
    } else if let Some(drop) = non_empty(&experiment.drop_groups) {
        let dropped = matched_columns(&experiment.name, columns, groups, &drop)?;
        Ok(columns
            .iter()
            .filter(|c| !dropped.contains(c.as_str()))
            .cloned()
            .collect())
    } else {
        Ok(columns.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups() -> FeatureGroups {
        let mut g = FeatureGroups::new();
        g.insert("time".to_string(), vec!["hour".to_string(), "dow".to_string()]);
        g.insert(
            "geo".to_string(),
            vec!["PULocationID".to_string(), "DOLocationID".to_string()],
        );
        g
    }

    fn columns() -> Vec<String> {
        [
            "hour",
            "dow",
            "PULocationID",
            "DOLocationID",
            "PULocationID_freq",
            "trip_distance",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn test_keep_geo() {
        let selected = select_columns(&columns(), &groups(), &ExperimentSpec::keep("geo_only", &["geo"])).unwrap();
        assert_eq!(
            selected,
            vec!["PULocationID", "DOLocationID", "PULocationID_freq"]
        );
    }

    #[test]
    fn test_drop_time() {
        let selected = select_columns(&columns(), &groups(), &ExperimentSpec::drop("no_time", &["time"])).unwrap();
        assert_eq!(
            selected,
            vec!["PULocationID", "DOLocationID", "PULocationID_freq", "trip_distance"]
        );
    }

    #[test]
    fn test_keep_wins_over_drop() {
        let spec = ExperimentSpec {
            name: "both".to_string(),
            keep_groups: Some(vec!["time".to_string()]),
            drop_groups: Some(vec!["time".to_string()]),
        };
        assert_eq!(select_columns(&columns(), &groups(), &spec).unwrap(), vec!["hour", "dow"]);
    }

    #[test]
    fn test_baseline_keeps_everything() {
        let selected = select_columns(&columns(), &groups(), &ExperimentSpec::baseline("all")).unwrap();
        assert_eq!(selected, columns());
    }

    #[test]
    fn test_column_in_two_groups() {
        let mut g = groups();
        g.insert("pickup".to_string(), vec!["PU".to_string()]);
        let selected = select_columns(&columns(), &g, &ExperimentSpec::drop("x", &["geo", "pickup"])).unwrap();
        assert_eq!(selected, vec!["hour", "dow", "trip_distance"]);
    }

    #[test]
    fn test_unknown_group() {
        let err = select_columns(&columns(), &groups(), &ExperimentSpec::keep("bad", &["weather"])).unwrap_err();
        assert!(matches!(err, AblationError::UnknownGroup { group, .. } if group == "weather"));
    }
}
