//! Cache-first extraction with oracle fallback and rule learning.
//!
//! For each document the label's cached rules are tried first. Fields they
//! cannot answer go to the oracle in a single request, and for every value
//! the oracle returns a rule is requested, checked against the same text and
//! cached, so the next document of that label can skip the oracle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::cache::CacheRegistry;
use crate::models::{AdexConfig, Answers, Document, DocumentReport, Pricing, Schema};
use crate::oracle::{Oracle, RuleRequest, Usage};
use crate::rule::{ExtractionOutcome, Rule};
use crate::text::{flatten_whitespace, normalize_structure};

/// Knobs of a [`Pipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Try cached rules and learn new ones. Off means oracle-only.
    pub use_cache: bool,
    /// Rule proposals per field before giving up.
    pub max_attempts: u32,
    /// Run [`normalize_structure`] on document text first.
    pub normalize: bool,
    /// Rule store to write after changes.
    pub store_path: Option<PathBuf>,
    /// Write the store after every learned rule instead of once per document.
    pub save_after_each_rule: bool,
    /// Rates used to cost oracle tokens.
    pub pricing: Pricing,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&AdexConfig::default())
    }
}

impl From<&AdexConfig> for PipelineOptions {
    fn from(config: &AdexConfig) -> Self {
        Self {
            use_cache: config.cache.enabled,
            max_attempts: config.extraction.max_attempts,
            normalize: config.extraction.normalize,
            store_path: config.cache.path.clone(),
            save_after_each_rule: config.cache.save_after_each_rule,
            pricing: config.oracle.pricing,
        }
    }
}

/// Per-document orchestration over a [`CacheRegistry`].
pub struct Pipeline {
    oracle: Option<Arc<dyn Oracle>>,
    options: PipelineOptions,
}

impl Pipeline {
    /// A pipeline without oracle: cache misses stay unanswered.
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            oracle: None,
            options,
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn Oracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Extract every schema field of `document`, learning rules on the way.
    pub async fn process(
        &self,
        registry: &mut CacheRegistry,
        document: &Document,
        index: usize,
    ) -> DocumentReport {
        let start = Instant::now();
        let text = if self.options.normalize {
            normalize_structure(document.text())
        } else {
            document.text().to_string()
        };
        let fields: Vec<&str> = document.fields().collect();

        info!(
            index,
            label = %document.label,
            fields = fields.len(),
            "Processing document"
        );

        let mut report = DocumentReport {
            index,
            name: document.name(index),
            label: document.label.clone(),
            ..Default::default()
        };

        let misses = if self.options.use_cache {
            self.fast_path(registry, &document.label, &fields, &text, &mut report)
        } else {
            debug!("Cache disabled, sending every field to the oracle");
            fields.clone()
        };
        report.cache_misses = misses.iter().map(|f| f.to_string()).collect();

        if misses.is_empty() {
            info!("All fields extracted from cache");
        } else if let Some(oracle) = &self.oracle {
            self.slow_path(oracle.as_ref(), registry, document, &fields, &misses, &text, &mut report)
                .await;
        } else {
            debug!(misses = misses.len(), "No oracle configured, leaving misses unanswered");
        }

        // hits moved weights; rules may not have been saved yet
        let rules_unsaved = report.rules_added > 0 && !self.options.save_after_each_rule;
        if self.options.use_cache && (!report.cache_hits.is_empty() || rules_unsaved) {
            self.persist(registry);
        }

        if let Some(expected) = &document.expected_answer {
            report.score(expected);
        }
        report.cost_usd = self.options.pricing.cost(&report.usage);
        report.elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            hits = report.cache_hits.len(),
            misses = report.cache_misses.len(),
            rules_added = report.rules_added,
            elapsed_ms = report.elapsed_ms,
            "Document done"
        );
        report
    }

    /// Answer what the cache can; return the fields it could not.
    fn fast_path<'f>(
        &self,
        registry: &mut CacheRegistry,
        label: &str,
        fields: &[&'f str],
        text: &str,
        report: &mut DocumentReport,
    ) -> Vec<&'f str> {
        let cache = registry.get_or_create(label);
        let mut misses = Vec::new();

        for &field in fields {
            match cache.try_extract(field, text) {
                ExtractionOutcome::Value(value) => {
                    info!(field, value = %value, "Field extracted from cache");
                    report.answers.insert(field.to_string(), Some(value));
                    report.cache_hits.push(field.to_string());
                }
                ExtractionOutcome::ConfirmedAbsent => {
                    info!(field, "Field confirmed empty by cache");
                    report.answers.insert(field.to_string(), None);
                    report.cache_hits.push(field.to_string());
                }
                ExtractionOutcome::NoMatch => {
                    debug!(field, "No cached rule matched");
                    misses.push(field);
                }
            }
        }

        info!(
            hits = fields.len() - misses.len(),
            misses = misses.len(),
            "Cache pass done"
        );
        misses
    }

    #[allow(clippy::too_many_arguments)]
    async fn slow_path(
        &self,
        oracle: &dyn Oracle,
        registry: &mut CacheRegistry,
        document: &Document,
        fields: &[&str],
        misses: &[&str],
        text: &str,
        report: &mut DocumentReport,
    ) {
        let schema: Schema = misses
            .iter()
            .map(|f| {
                let description = document.extraction_schema.get(*f).cloned().unwrap_or_default();
                (f.to_string(), description)
            })
            .collect();

        info!(fields = misses.len(), "Asking oracle for missing fields");
        report.extractor_calls += 1;

        let extracted = match oracle.extract_fields(text, &schema).await {
            Ok(reply) => {
                report.usage += reply.usage;
                normalize_answers(reply.value, misses)
            }
            Err(e) => {
                warn!(error = %e, "Oracle extraction failed, skipping rule generation");
                for field in misses {
                    report.answers.insert(field.to_string(), None);
                }
                return;
            }
        };
        report.answers.extend(extracted.clone());

        if !self.options.use_cache {
            return;
        }

        for (field, value) in &extracted {
            let description = schema.get(field).map(String::as_str).unwrap_or_default();
            let other_fields = fields.iter().copied().filter(|f| *f != field.as_str()).collect();
            let request = RuleRequest {
                text,
                field: field.as_str(),
                value: value.as_deref(),
                description,
                other_fields,
                feedback: None,
            };

            let (rule, calls, usage) = self.learn_rule(oracle, request).await;
            report.generator_calls += calls;
            report.usage += usage;

            let Some(rule) = rule else {
                warn!(
                    field = %field,
                    attempts = self.options.max_attempts,
                    "No valid rule generated"
                );
                continue;
            };

            let cache = registry.get_or_create(&document.label);
            if cache.get(field).is_some_and(|list| list.contains(&rule)) {
                debug!(field = %field, "Rule already cached");
                continue;
            }
            cache.add_rule(field, rule);
            report.rules_added += 1;
            info!(
                field = %field,
                label = %document.label,
                total = cache.get(field).map_or(0, |list| list.len()),
                "Rule added"
            );

            if self.options.save_after_each_rule {
                self.persist(registry);
            }
        }

        info!(
            added = report.rules_added,
            requested = extracted.len(),
            "Rule generation done"
        );
    }

    /// Ask for proposals until one reproduces the value or attempts run out.
    async fn learn_rule(
        &self,
        oracle: &dyn Oracle,
        mut request: RuleRequest<'_>,
    ) -> (Option<Rule>, usize, Usage) {
        let mut calls = 0;
        let mut usage = Usage::default();

        for attempt in 1..=self.options.max_attempts {
            calls += 1;
            debug!(field = request.field, attempt, "Requesting rule proposal");

            let record = match oracle.propose_rule(&request).await {
                Ok(reply) => {
                    usage += reply.usage;
                    reply.value
                }
                Err(e) => {
                    warn!(field = request.field, attempt, error = %e, "Rule proposal failed");
                    continue;
                }
            };

            let rule = match Rule::from_proposal(record) {
                Ok(rule) => rule,
                Err(e) => {
                    debug!(field = request.field, attempt, error = %e, "Malformed rule proposal");
                    request.feedback = Some(format!("The previous rule was malformed: {e}."));
                    continue;
                }
            };

            match verify(&rule, request.text, request.value) {
                Ok(()) => {
                    debug!(field = request.field, attempt, rule = %rule, "Rule verified");
                    return (Some(rule), calls, usage);
                }
                Err(reason) => {
                    debug!(field = request.field, attempt, reason = %reason, "Rule rejected");
                    request.feedback = Some(reason);
                }
            }
        }

        (None, calls, usage)
    }

    fn persist(&self, registry: &CacheRegistry) {
        let Some(path) = &self.options.store_path else {
            return;
        };
        if let Err(e) = registry.save(path) {
            warn!(error = %e, "Failed to save rule store");
        }
    }
}

/// Keep only the asked fields, flatten whitespace, and treat blanks as empty.
fn normalize_answers(values: Answers, fields: &[&str]) -> Answers {
    fields
        .iter()
        .map(|field| {
            let value = values
                .get(*field)
                .cloned()
                .flatten()
                .map(|v| flatten_whitespace(&v))
                .filter(|v| !v.is_empty());
            (field.to_string(), value)
        })
        .collect()
}

/// Check that a freshly proposed rule reproduces `expected` on `text`.
/// The error is feedback for the next proposal.
fn verify(rule: &Rule, text: &str, expected: Option<&str>) -> Result<(), String> {
    match (rule.extract(text), expected) {
        (Some(ExtractionOutcome::Value(got)), Some(want)) => {
            if flatten_whitespace(&got) == flatten_whitespace(want) {
                Ok(())
            } else {
                Err(format!(
                    "The previous rule extracted {got:?}, but the value is {want:?}."
                ))
            }
        }
        (Some(ExtractionOutcome::ConfirmedAbsent), None) => Ok(()),
        (Some(ExtractionOutcome::Value(got)), None) => Err(format!(
            "The field is empty in this document, but the previous rule extracted {got:?}. \
             Use the conditional_null strategy."
        )),
        (Some(ExtractionOutcome::ConfirmedAbsent), Some(want)) => Err(format!(
            "The previous rule reported the field as empty, but the value is {want:?}."
        )),
        (Some(ExtractionOutcome::NoMatch), _) | (None, _) => match rule.apply(text) {
            Some(candidate) => Err(format!(
                "The previous rule matched {candidate:?}, but its validator `{}` rejected it.",
                rule.validator().as_str()
            )),
            None => Err("The previous rule did not match anything in the text.".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::oracle::Metered;
    use crate::rule::RuleRecord;
    use pretty_assertions::assert_eq;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    const TEXT: &str =
        "Nome\nJOANA D ARC\nInscrição: 101943\nCategoria\n\nEndereco Profissional: Rua ABC";

    const NOME_RULE: &str =
        r#"{"kind": "keyword", "anchor": "Nome", "strategy": "next_line", "validator": "[A-Z ]+"}"#;
    const INSCRICAO_RULE: &str =
        r#"{"kind": "regex", "pattern": "Inscri[^\\d]*(\\d{6})", "validator": "\\d{6}"}"#;
    const CATEGORIA_RULE: &str = r#"{"type": "keyword", "keyword": "Categoria", "strategy": "conditional_null",
        "stop_keyword": "Endereco", "validation_regex": "^__NULL__$"}"#;

    const EXTRACTION_USAGE: Usage = Usage {
        prompt_tokens: 800,
        completion_tokens: 40,
    };
    const PROPOSAL_USAGE: Usage = Usage {
        prompt_tokens: 1000,
        completion_tokens: 100,
    };

    #[derive(Default)]
    struct ScriptedOracle {
        answers: Answers,
        fail_extraction: bool,
        proposals: Mutex<HashMap<String, VecDeque<RuleRecord>>>,
        extraction_requests: Mutex<Vec<Vec<String>>>,
        feedback: Mutex<Vec<(String, Option<String>)>>,
    }

    impl ScriptedOracle {
        fn answering(pairs: &[(&str, Option<&str>)]) -> Self {
            Self {
                answers: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
                    .collect(),
                ..Default::default()
            }
        }

        fn propose(self, field: &str, raw: &str) -> Self {
            let record: RuleRecord = serde_json::from_str(raw).unwrap();
            self.proposals
                .lock()
                .unwrap()
                .entry(field.to_string())
                .or_default()
                .push_back(record);
            self
        }
    }

    #[async_trait::async_trait]
    impl Oracle for ScriptedOracle {
        async fn extract_fields(
            &self,
            _text: &str,
            schema: &Schema,
        ) -> Result<Metered<Answers>, OracleError> {
            self.extraction_requests
                .lock()
                .unwrap()
                .push(schema.keys().cloned().collect());
            if self.fail_extraction {
                return Err(OracleError::Network("timeout".to_string()));
            }
            Ok(Metered::new(self.answers.clone(), EXTRACTION_USAGE))
        }

        async fn propose_rule(
            &self,
            request: &RuleRequest<'_>,
        ) -> Result<Metered<RuleRecord>, OracleError> {
            self.feedback
                .lock()
                .unwrap()
                .push((request.field.to_string(), request.feedback.clone()));
            self.proposals
                .lock()
                .unwrap()
                .get_mut(request.field)
                .and_then(VecDeque::pop_front)
                .map(|record| Metered::new(record, PROPOSAL_USAGE))
                .ok_or_else(|| OracleError::Api("no proposal left".to_string()))
        }
    }

    fn document() -> Document {
        let schema: Schema = [
            ("nome", "Nome do profissional"),
            ("inscricao", "Número de inscrição"),
            ("categoria", "Categoria do profissional"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let mut doc = Document::new("carteira_oab", TEXT, schema);
        doc.expected_answer = Some(
            [
                ("nome", Some("JOANA D ARC")),
                ("inscricao", Some("101943")),
                ("categoria", None),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect(),
        );
        doc
    }

    fn full_oracle() -> ScriptedOracle {
        ScriptedOracle::answering(&[
            ("nome", Some("JOANA  D ARC")),
            ("inscricao", Some("101943")),
            ("categoria", None),
        ])
        .propose("nome", NOME_RULE)
        .propose("inscricao", INSCRICAO_RULE)
        .propose("categoria", CATEGORIA_RULE)
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            store_path: None,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cold_start_learns_then_hits() {
        let oracle = Arc::new(full_oracle());
        let pipeline = Pipeline::new(options()).with_oracle(oracle.clone());
        let mut registry = CacheRegistry::new();
        let doc = document();

        let first = pipeline.process(&mut registry, &doc, 0).await;

        assert_eq!(first.cache_misses.len(), 3);
        assert_eq!(first.rules_added, 3);
        assert_eq!(first.extractor_calls, 1);
        assert_eq!(first.generator_calls, 3);
        assert_eq!(first.accuracy, Some(100.0));
        assert_eq!(registry.rule_count(), 3);

        let second = pipeline.process(&mut registry, &doc, 1).await;

        assert!(second.fast_path());
        assert_eq!(second.extractor_calls, 0);
        assert_eq!(second.answers, doc.expected_answer.clone().unwrap());
        assert_eq!(second.accuracy, Some(100.0));
        let cache = registry.get("carteira_oab").unwrap();
        assert_eq!(cache.get("categoria").unwrap().weights(), vec![2]);
        assert_eq!(oracle.extraction_requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tokens_and_cost_are_tracked() {
        let pipeline = Pipeline::new(PipelineOptions {
            pricing: Pricing {
                input_per_million: 1.0,
                output_per_million: 10.0,
            },
            ..options()
        })
        .with_oracle(Arc::new(full_oracle()));
        let mut registry = CacheRegistry::new();

        let first = pipeline.process(&mut registry, &document(), 0).await;

        // one extraction plus three accepted proposals
        assert_eq!(first.usage, Usage::new(800 + 3 * 1000, 40 + 3 * 100));
        assert!((first.cost_usd - (3800.0 + 3400.0) / 1_000_000.0).abs() < 1e-12);

        let second = pipeline.process(&mut registry, &document(), 1).await;
        assert_eq!(second.usage, Usage::default());
        assert_eq!(second.cost_usd, 0.0);
    }

    #[tokio::test]
    async fn test_only_misses_go_to_oracle() {
        let oracle = Arc::new(full_oracle());
        let pipeline = Pipeline::new(options()).with_oracle(oracle.clone());
        let mut registry = CacheRegistry::new();
        registry
            .get_or_create("carteira_oab")
            .add_rule("inscricao", Rule::from_json(INSCRICAO_RULE).unwrap());

        let report = pipeline.process(&mut registry, &document(), 0).await;

        assert_eq!(report.cache_hits, vec!["inscricao".to_string()]);
        assert_eq!(
            oracle.extraction_requests.lock().unwrap().clone(),
            vec![vec!["categoria".to_string(), "nome".to_string()]]
        );
        assert_eq!(report.rules_added, 2);
    }

    #[tokio::test]
    async fn test_rejected_proposals_feed_back() {
        let oracle = Arc::new(
            ScriptedOracle::answering(&[("inscricao", Some("101943"))])
                .propose("inscricao", r#"{"kind": "regex", "pattern": "Inscri(\\d+", "validator": ".+"}"#)
                .propose("inscricao", r#"{"kind": "regex", "pattern": "(\\d{3})", "validator": "\\d+"}"#)
                .propose("inscricao", INSCRICAO_RULE),
        );
        let pipeline = Pipeline::new(options()).with_oracle(oracle.clone());
        let mut registry = CacheRegistry::new();
        let mut doc = document();
        doc.extraction_schema.retain(|k, _| k == "inscricao");
        doc.expected_answer = None;

        let report = pipeline.process(&mut registry, &doc, 0).await;

        assert_eq!(report.rules_added, 1);
        assert_eq!(report.generator_calls, 3);

        let feedback = oracle.feedback.lock().unwrap().clone();
        assert_eq!(feedback[0].1, None);
        assert!(feedback[1].1.as_deref().unwrap().contains("malformed"));
        assert!(feedback[2].1.as_deref().unwrap().contains("\"101\""));
    }

    #[tokio::test]
    async fn test_attempt_budget() {
        let oracle = Arc::new(ScriptedOracle::answering(&[("nome", Some("JOANA D ARC"))]));
        let pipeline = Pipeline::new(PipelineOptions {
            max_attempts: 2,
            ..options()
        })
        .with_oracle(oracle.clone());
        let mut registry = CacheRegistry::new();
        let mut doc = document();
        doc.extraction_schema.retain(|k, _| k == "nome");

        let report = pipeline.process(&mut registry, &doc, 0).await;

        assert_eq!(report.generator_calls, 2);
        assert_eq!(report.rules_added, 0);
        // failed proposals bill nothing
        assert_eq!(report.usage, EXTRACTION_USAGE);
        assert_eq!(report.answers.get("nome"), Some(&Some("JOANA D ARC".to_string())));
    }

    #[tokio::test]
    async fn test_oracle_failure_answers_null() {
        let oracle = Arc::new(ScriptedOracle {
            fail_extraction: true,
            ..full_oracle()
        });
        let pipeline = Pipeline::new(options()).with_oracle(oracle.clone());
        let mut registry = CacheRegistry::new();

        let report = pipeline.process(&mut registry, &document(), 0).await;

        assert_eq!(report.answers.values().filter(|v| v.is_none()).count(), 3);
        assert_eq!(report.generator_calls, 0);
        assert_eq!(registry.rule_count(), 0);
        assert!(oracle.feedback.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oracle_only_mode() {
        let oracle = Arc::new(full_oracle());
        let pipeline = Pipeline::new(PipelineOptions {
            use_cache: false,
            ..options()
        })
        .with_oracle(oracle.clone());
        let mut registry = CacheRegistry::new();
        registry
            .get_or_create("carteira_oab")
            .add_rule("inscricao", Rule::from_json(INSCRICAO_RULE).unwrap());

        let report = pipeline.process(&mut registry, &document(), 0).await;

        assert_eq!(report.cache_misses.len(), 3);
        assert_eq!(report.rules_added, 0);
        assert_eq!(report.accuracy, Some(100.0));
        assert_eq!(registry.rule_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_only_mode() {
        let pipeline = Pipeline::new(options());
        let mut registry = CacheRegistry::new();
        registry
            .get_or_create("carteira_oab")
            .add_rule("inscricao", Rule::from_json(INSCRICAO_RULE).unwrap());

        let report = pipeline.process(&mut registry, &document(), 0).await;

        assert_eq!(report.answers.len(), 1);
        assert_eq!(report.cache_misses, vec!["categoria".to_string(), "nome".to_string()]);
        assert_eq!(report.extractor_calls, 0);
    }

    #[tokio::test]
    async fn test_learned_rules_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let pipeline = Pipeline::new(PipelineOptions {
            store_path: Some(path.clone()),
            ..options()
        })
        .with_oracle(Arc::new(full_oracle()));
        let mut registry = CacheRegistry::new();

        pipeline.process(&mut registry, &document(), 0).await;

        assert_eq!(CacheRegistry::load(&path).unwrap(), registry);
    }

    #[test]
    fn test_verify_messages() {
        let rule = Rule::from_json(INSCRICAO_RULE).unwrap();
        assert!(verify(&rule, "Inscrição: 101943", Some("101943")).is_ok());
        assert!(verify(&rule, "Inscrição: 101943", None).unwrap_err().contains("conditional_null"));
        assert!(verify(&rule, "nada", Some("101943")).unwrap_err().contains("did not match"));

        let absent = Rule::from_json(CATEGORIA_RULE).unwrap();
        assert!(verify(&absent, "Categoria\nEndereco", None).is_ok());
        assert!(verify(&absent, "Categoria\nEndereco", Some("ADVOGADO")).is_err());
    }
}
