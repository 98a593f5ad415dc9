// Pipeline processing: cleaning, merging, scoring and alerting

pub mod alerts;
pub mod clean;
pub mod merge;
pub mod regions;
pub mod scoring;

pub use clean::{clean, CleanStats, CleanedDataset, DatasetCleaner};
pub use merge::{merge, merge_datasets, JoinTable, MergedTable};
pub use scoring::{score_districts, score_table, DistrictScore, MetricEngine, ScoredTable};
