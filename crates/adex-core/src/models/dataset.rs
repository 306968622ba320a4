//! Dataset files: documents to extract, with optional ground truth.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AdexError, Result};

/// Field name to free-text description, as handed to the oracle.
pub type Schema = BTreeMap<String, String>;

/// Field name to value, `None` meaning the field is empty.
pub type Answers = BTreeMap<String, Option<String>>;

/// One document of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Template the document belongs to; selects the rule cache.
    pub label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// PDF location, relative to the dataset file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<PathBuf>,

    /// Text of the document. Filled from `pdf_path` on load when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_text: Option<String>,

    pub extraction_schema: Schema,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_answer: Option<Answers>,
}

impl Document {
    /// Build an in-memory document.
    pub fn new(label: impl Into<String>, text: impl Into<String>, schema: Schema) -> Self {
        Self {
            label: label.into(),
            filename: None,
            pdf_path: None,
            pdf_text: Some(text.into()),
            extraction_schema: schema,
            expected_answer: None,
        }
    }

    pub fn text(&self) -> &str {
        self.pdf_text.as_deref().unwrap_or_default()
    }

    /// Field names in schema order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.extraction_schema.keys().map(String::as_str)
    }

    /// Something to call the document by in logs and reports.
    pub fn name(&self, index: usize) -> String {
        if let Some(filename) = &self.filename {
            return filename.clone();
        }
        if let Some(path) = &self.pdf_path {
            return path.display().to_string();
        }
        format!("#{index}")
    }
}

/// Read a dataset file and make sure every document has text.
///
/// Documents that only name a PDF get it read relative to the dataset's
/// directory, with at most `max_pages` pages (0 = unlimited).
pub fn load_dataset(path: impl AsRef<Path>, max_pages: usize) -> Result<Vec<Document>> {
    let path = path.as_ref();
    info!(path = %path.display(), "Reading dataset");

    let raw = std::fs::read_to_string(path)?;
    let mut documents: Vec<Document> = serde_json::from_str(&raw)
        .map_err(|e| AdexError::Config(format!("invalid dataset {}: {e}", path.display())))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for (index, document) in documents.iter_mut().enumerate() {
        if document.pdf_text.is_some() {
            continue;
        }
        let Some(pdf_path) = &document.pdf_path else {
            return Err(AdexError::Config(format!(
                "document {index} has neither pdf_text nor pdf_path"
            )));
        };
        document.pdf_text = Some(read_pdf(&base.join(pdf_path), max_pages)?);
        debug!(index, "Loaded document text from PDF");
    }

    info!(documents = documents.len(), "Dataset loaded");
    Ok(documents)
}

#[cfg(feature = "pdf")]
fn read_pdf(path: &Path, max_pages: usize) -> Result<String> {
    crate::pdf::read_text(path, max_pages)
}

#[cfg(not(feature = "pdf"))]
fn read_pdf(path: &Path, _max_pages: usize) -> Result<String> {
    Err(AdexError::Config(format!(
        "{} needs PDF support, which is disabled in this build",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_load_dataset_with_inline_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        std::fs::write(
            &path,
            r#"[{
                "label": "carteira_oab",
                "filename": "oab_1.pdf",
                "pdf_text": "Nome JOANA\nInscrição 101943",
                "extraction_schema": {"nome": "Nome do profissional", "inscricao": "Número de inscrição"},
                "expected_answer": {"nome": "JOANA", "inscricao": "101943"}
            }]"#,
        )
        .unwrap();

        let documents = load_dataset(&path, 1).unwrap();

        assert_eq!(documents.len(), 1);
        let doc = &documents[0];
        assert_eq!(doc.label, "carteira_oab");
        assert_eq!(doc.fields().collect::<Vec<_>>(), vec!["inscricao", "nome"]);
        assert_eq!(doc.name(0), "oab_1.pdf");
        assert_eq!(
            doc.expected_answer.as_ref().unwrap().get("inscricao"),
            Some(&Some("101943".to_string()))
        );
    }

    #[test]
    fn test_document_without_text_or_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        std::fs::write(&path, r#"[{"label": "x", "extraction_schema": {}}]"#).unwrap();

        assert!(matches!(load_dataset(&path, 0), Err(AdexError::Config(_))));
    }

    #[test]
    fn test_null_expected_values() {
        let doc: Document = serde_json::from_str(
            r#"{"label": "x", "pdf_text": "", "extraction_schema": {"categoria": "c"},
                "expected_answer": {"categoria": null}}"#,
        )
        .unwrap();

        assert_eq!(doc.expected_answer.unwrap().get("categoria"), Some(&None));
        assert_eq!(Document::new("x", "t", Schema::new()).name(3), "#3");
    }
}
