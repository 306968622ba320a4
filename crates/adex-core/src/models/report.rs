//! Per-document reports and run totals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::dataset::Answers;
use crate::oracle::Usage;

/// What happened to one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub index: usize,
    pub name: String,
    pub label: String,

    /// Final answer per schema field.
    pub answers: Answers,

    /// Ground truth, when the dataset has it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Answers>,

    /// Fields answered by cached rules.
    pub cache_hits: Vec<String>,

    /// Fields the cache could not answer.
    pub cache_misses: Vec<String>,

    pub rules_added: usize,

    /// Value extraction requests sent to the oracle (0 or 1).
    pub extractor_calls: usize,

    /// Rule proposals requested from the oracle.
    pub generator_calls: usize,

    /// Tokens spent on both kinds of oracle call.
    pub usage: Usage,

    /// `usage` priced with the configured rates, in USD.
    pub cost_usd: f64,

    /// Percentage of expected fields answered correctly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,

    pub elapsed_ms: u64,
}

impl DocumentReport {
    /// Every field came from the cache.
    pub fn fast_path(&self) -> bool {
        self.cache_misses.is_empty()
    }

    /// Score the answers against `expected` and keep both.
    pub fn score(&mut self, expected: &Answers) {
        self.accuracy = Some(evaluate_accuracy(&self.answers, expected));
        self.expected = Some(expected.clone());
    }
}

/// Totals over a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub documents: usize,
    pub fast_path_documents: usize,
    pub field_hits: usize,
    pub field_misses: usize,
    pub rules_added: usize,
    pub extractor_calls: usize,
    pub generator_calls: usize,
    pub usage: Usage,
    pub cost_usd: f64,
    pub mean_accuracy: Option<f64>,
    pub rules_in_cache: usize,
    pub elapsed_ms: u64,

    #[serde(skip)]
    accuracy_sum: f64,
    #[serde(skip)]
    scored: usize,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            documents: 0,
            fast_path_documents: 0,
            field_hits: 0,
            field_misses: 0,
            rules_added: 0,
            extractor_calls: 0,
            generator_calls: 0,
            usage: Usage::default(),
            cost_usd: 0.0,
            mean_accuracy: None,
            rules_in_cache: 0,
            elapsed_ms: 0,
            accuracy_sum: 0.0,
            scored: 0,
        }
    }

    /// Fold one document into the totals.
    pub fn record(&mut self, report: &DocumentReport) {
        self.documents += 1;
        if report.fast_path() {
            self.fast_path_documents += 1;
        }
        self.field_hits += report.cache_hits.len();
        self.field_misses += report.cache_misses.len();
        self.rules_added += report.rules_added;
        self.extractor_calls += report.extractor_calls;
        self.generator_calls += report.generator_calls;
        self.usage += report.usage;
        self.cost_usd += report.cost_usd;
        self.elapsed_ms += report.elapsed_ms;

        if let Some(accuracy) = report.accuracy {
            self.accuracy_sum += accuracy;
            self.scored += 1;
            self.mean_accuracy = Some(self.accuracy_sum / self.scored as f64);
        }
    }

    /// Share of documents fully answered by the cache, in percent.
    pub fn fast_path_rate(&self) -> f64 {
        if self.documents == 0 {
            return 0.0;
        }
        self.fast_path_documents as f64 / self.documents as f64 * 100.0
    }

    pub fn oracle_calls(&self) -> usize {
        self.extractor_calls + self.generator_calls
    }
}

/// Percentage of expected fields whose extracted value is exactly the
/// expected one. A field missing from `extracted` counts as wrong, even when
/// the expected value is null. Nothing expected scores 0.
pub fn evaluate_accuracy(extracted: &Answers, expected: &Answers) -> f64 {
    if expected.is_empty() {
        warn!("No expected fields to evaluate against");
        return 0.0;
    }

    let correct = expected
        .iter()
        .filter(|(field, value)| extracted.get(*field) == Some(*value))
        .count();

    for (field, value) in expected {
        if extracted.get(field) != Some(value) {
            debug!(field, expected = ?value, extracted = ?extracted.get(field), "Field mismatch");
        }
    }

    let accuracy = correct as f64 / expected.len() as f64 * 100.0;
    info!(
        "Performance: {}/{} fields correct ({:.2}%)",
        correct,
        expected.len(),
        accuracy
    );
    accuracy
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn answers(pairs: &[(&str, Option<&str>)]) -> Answers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_accuracy() {
        let expected = answers(&[("nome", Some("JOANA")), ("categoria", None), ("inscricao", Some("101943"))]);

        let all = expected.clone();
        assert_eq!(evaluate_accuracy(&all, &expected), 100.0);

        let partial = answers(&[("nome", Some("JOANA")), ("inscricao", Some("101944"))]);
        let score = evaluate_accuracy(&partial, &expected);
        assert!((score - 100.0 / 3.0).abs() < 1e-9);

        assert_eq!(evaluate_accuracy(&all, &Answers::new()), 0.0);
    }

    #[test]
    fn test_summary_totals() {
        let mut summary = RunSummary::new(Utc::now());

        let mut fast = DocumentReport {
            cache_hits: vec!["nome".to_string()],
            elapsed_ms: 5,
            ..Default::default()
        };
        fast.answers = answers(&[("nome", Some("JOANA"))]);
        fast.score(&answers(&[("nome", Some("JOANA"))]));

        let slow = DocumentReport {
            cache_misses: vec!["nome".to_string()],
            rules_added: 1,
            extractor_calls: 1,
            generator_calls: 2,
            usage: Usage::new(1200, 300),
            cost_usd: 0.0009,
            accuracy: Some(50.0),
            elapsed_ms: 10,
            ..Default::default()
        };

        summary.record(&fast);
        summary.record(&slow);

        assert_eq!(summary.documents, 2);
        assert_eq!(summary.fast_path_documents, 1);
        assert_eq!(summary.fast_path_rate(), 50.0);
        assert_eq!(summary.field_hits, 1);
        assert_eq!(summary.field_misses, 1);
        assert_eq!(summary.oracle_calls(), 3);
        assert_eq!(summary.usage, Usage::new(1200, 300));
        assert_eq!(summary.cost_usd, 0.0009);
        assert_eq!(summary.mean_accuracy, Some(75.0));
        assert_eq!(summary.elapsed_ms, 15);
    }
}
