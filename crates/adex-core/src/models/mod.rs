//! Data models: configuration, datasets and run reports.

pub mod config;
pub mod dataset;
pub mod report;

pub use config::{AdexConfig, Pricing};
pub use dataset::{Answers, Document, Schema, load_dataset};
pub use report::{DocumentReport, RunSummary, evaluate_accuracy};
