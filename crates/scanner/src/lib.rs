//! Block scanning pipeline: sequential block fetch, idempotent persistence of
//! chain data, receipt correlation and plugin dispatch.

pub mod address;
pub mod checkpoint;
pub mod persistence;
pub mod plugin;
pub mod plugins;
pub mod receipts;
pub mod scanner;
pub mod schema;

pub use checkpoint::Checkpoint;
pub use plugin::{OperationContext, PluginPipeline, ScanPlugin};
pub use plugins::default_pipeline;
pub use scanner::{Scanner, ScannerOptions};
