pub mod loader;
pub mod types;

pub use loader::{
    MemorySource, ParquetDir, StoreError, TableLayout, TableSource, TimePartitionedStore,
    DEFAULT_FILE_PREFIX,
};
pub use types::{
    ColumnKind, ColumnSpec, DatasetSlice, FeatureColumn, FeatureFrame, FeatureSchema, Table,
    TimeBucket,
};
