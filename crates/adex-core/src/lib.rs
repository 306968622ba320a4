//! Core library for cache-first field extraction from document text.
//!
//! This crate provides:
//! - Extraction rules (regex or keyword anchored) with full-match validators
//! - A weighted, self-ordering rule cache per document label and field
//! - Atomic JSON persistence of learned rules
//! - A pipeline that falls back to an external oracle and learns new rules
//! - PDF text extraction and text normalization

pub mod cache;
pub mod error;
pub mod models;
pub mod oracle;
#[cfg(feature = "pdf")]
pub mod pdf;
pub mod pipeline;
pub mod rule;
pub mod text;

pub use cache::{CacheEntry, CacheRegistry, PriorityList, RuleCache};
pub use error::{AdexError, OracleError, PersistenceError, Result, RuleError};
pub use models::{AdexConfig, Answers, Document, DocumentReport, Pricing, RunSummary, Schema};
pub use oracle::{Metered, Oracle, RuleRequest, Usage};
#[cfg(feature = "pdf")]
pub use pdf::PdfDocument;
pub use pipeline::{Pipeline, PipelineOptions};
pub use rule::{Candidate, ExtractionOutcome, Rule, RuleKind, RuleRecord, Strategy};
