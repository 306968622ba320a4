//! Error types for the adex-core library.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the adex library.
#[derive(Error, Debug)]
pub enum AdexError {
    /// A proposed rule could not be turned into a usable rule.
    #[error("malformed rule: {0}")]
    Rule(#[from] RuleError),

    /// Saving or loading the rule store failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// PDF processing error.
    #[cfg(feature = "pdf")]
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// The external oracle failed.
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Reasons a rule proposal is rejected at construction time.
#[derive(Error, Debug)]
pub enum RuleError {
    /// The proposal does not say whether it is a regex or a keyword rule.
    #[error("missing rule kind")]
    MissingKind,

    /// A field required by the rule's kind or strategy is absent.
    #[error("{kind} rule requires `{field}`")]
    MissingField { kind: &'static str, field: &'static str },

    /// A field that belongs to the other rule kind is set.
    #[error("{kind} rule must not set `{field}`")]
    ConflictingField { kind: &'static str, field: &'static str },

    /// An anchor is present but empty.
    #[error("`{0}` must not be empty")]
    EmptyAnchor(&'static str),

    /// A pattern or validator does not compile.
    #[error("invalid regex in `{field}`: {source}")]
    InvalidRegex {
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    /// Extraction patterns must expose exactly one capture group.
    #[error("pattern must have exactly one capture group, found {0}")]
    CaptureGroups(usize),

    /// The reserved absence validator is paired with the wrong strategy.
    #[error("validator `^__NULL__$` is reserved for conditional_null rules")]
    ReservedValidator,

    /// A conditional_null rule with any other validator could never succeed.
    #[error("conditional_null rules must use the `^__NULL__$` validator, got `{0}`")]
    AbsenceValidator(String),

    /// The raw proposal is not valid JSON for a rule.
    #[error("invalid rule JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors related to saving and loading the rule store.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Reading or writing the store failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store contents could not be parsed.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The registry could not be serialized.
    #[error("failed to serialize rule store: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors related to PDF processing.
#[cfg(feature = "pdf")]
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// Failed to extract text from PDF.
    #[error("failed to extract text: {0}")]
    TextExtraction(String),

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// The PDF has more pages than the configured limit.
    #[error("PDF has {pages} pages, limit is {limit}")]
    TooManyPages { pages: usize, limit: usize },
}

/// Errors reported by an oracle implementation.
#[derive(Error, Debug)]
pub enum OracleError {
    /// Configuration error (missing API key, invalid settings).
    #[error("configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// API error (non-2xx response, rate limit, invalid request).
    #[error("API error: {0}")]
    Api(String),

    /// The oracle answered with something that is not the expected JSON.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Result type for the adex library.
pub type Result<T> = std::result::Result<T, AdexError>;
