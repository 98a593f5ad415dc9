pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod types;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use pipeline::processing::alerts::{compute_aflb_alerts, compute_urrdf_alerts, AlertsResponse};
pub use pipeline::processing::merge::MergedTable;
pub use pipeline::processing::scoring::{DistrictScore, RiskTier, ScoredTable};
pub use pipeline::storage::{write_csv, WriteSummary};
pub use pipeline::{Pipeline, PipelineOutput, PipelineResult};
pub use types::{DatasetKind, KeyTuple};
