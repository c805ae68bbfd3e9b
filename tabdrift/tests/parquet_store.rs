//! Parquet partitions on disk through the time-partitioned store.

use std::fs::File;
use std::path::Path;

use polars::prelude::*;

use tabdrift::data::{
    ColumnKind, FeatureColumn, ParquetDir, StoreError, TableLayout, TimeBucket,
    TimePartitionedStore,
};

fn write_month(dir: &Path, month: &str, distances: &[f64], labels: &[i32], with_zone: bool) {
    let n = distances.len();
    let mut columns: Vec<Column> = vec![
        Series::new("pickup_datetime".into(), vec![format!("{}-01 08:00:00", month); n]).into(),
        Series::new("trip_distance".into(), distances.to_vec()).into(),
        Series::new(
            "payment_type".into(),
            (0..n).map(|i| if i % 2 == 0 { "card" } else { "cash" }).collect::<Vec<_>>(),
        )
        .into(),
    ];
    if with_zone {
        columns.push(Series::new("PULocationID".into(), (0..n as i64).collect::<Vec<_>>()).into());
    }
    columns.push(Series::new("tip20".into(), labels.to_vec()).into());

    let mut df = DataFrame::new(columns).unwrap();
    let path = dir.join(format!("table_{}.parquet", month));
    let mut file = File::create(path).unwrap();
    ParquetWriter::new(&mut file).finish(&mut df).unwrap();
}

fn store(dir: &Path) -> TimePartitionedStore<ParquetDir> {
    let layout = TableLayout::new("tip20", "pickup_datetime").with_categorical(["payment_type"]);
    TimePartitionedStore::new(ParquetDir::new(dir, layout))
}

fn buckets(ids: &[&str]) -> Vec<TimeBucket> {
    TimeBucket::parse_all(ids.iter().copied()).unwrap()
}

#[test]
fn test_lists_and_concatenates_in_bucket_order() {
    let dir = tempfile::tempdir().unwrap();
    write_month(dir.path(), "2023-02", &[3.0, 4.0], &[1, 0], true);
    write_month(dir.path(), "2023-01", &[1.0, 2.0, 2.5], &[0, 1, 0], true);
    std::fs::write(dir.path().join("notes.txt"), "not a partition").unwrap();

    let store = store(dir.path());
    assert_eq!(store.available_buckets().unwrap(), buckets(&["2023-01", "2023-02"]));

    let slice = store.load(&buckets(&["2023-02", "2023-01"])).unwrap();
    assert_eq!(slice.len(), 5);
    assert_eq!(slice.labels, vec![1, 0, 0, 1, 0]);
    assert_eq!(
        slice.features.column_names(),
        &["trip_distance", "payment_type", "PULocationID"]
    );

    match slice.features.column("trip_distance") {
        Some(FeatureColumn::Numeric(values)) => {
            assert_eq!(values[0], Some(3.0));
            assert_eq!(values[2], Some(1.0));
        }
        other => panic!("unexpected column: {:?}", other),
    }

    let schema = slice.features.schema();
    let kinds: Vec<ColumnKind> = schema.columns().iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![ColumnKind::Numeric, ColumnKind::Categorical, ColumnKind::Numeric]
    );
}

#[test]
fn test_missing_partition_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_month(dir.path(), "2023-01", &[1.0], &[0], true);

    let err = store(dir.path())
        .load(&buckets(&["2023-01", "2023-02"]))
        .unwrap_err();
    assert!(matches!(err, StoreError::MissingPartition(ref b) if b == "2023-02"));
}

#[test]
fn test_schema_mismatch_across_partitions() {
    let dir = tempfile::tempdir().unwrap();
    write_month(dir.path(), "2023-01", &[1.0, 2.0], &[0, 1], true);
    write_month(dir.path(), "2023-02", &[1.0, 2.0], &[0, 1], false);

    let err = store(dir.path())
        .load(&buckets(&["2023-01", "2023-02"]))
        .unwrap_err();
    assert!(matches!(err, StoreError::SchemaMismatch { .. }));
}

#[test]
fn test_non_binary_label_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_month(dir.path(), "2023-01", &[1.0, 2.0], &[0, 2], true);

    let err = store(dir.path()).load(&buckets(&["2023-01"])).unwrap_err();
    assert!(matches!(err, StoreError::InvalidLabel { .. }));
}
