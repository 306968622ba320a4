//! OpenAI-compatible chat completions client acting as the oracle.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use adex_core::models::config::OracleConfig;
use adex_core::{Answers, Metered, Oracle, OracleError, RuleRecord, RuleRequest, Schema, Usage};

const EXTRACTION_PROMPT: &str = r#"You extract fields from document text.

Return one JSON object whose keys are exactly the fields of the schema.
- Copy each value verbatim from the text: same casing, accents and punctuation.
- Use the field description to decide what belongs to the field. Text next to
  the field's label that does not fit the description is not its value.
- If a field is missing or empty in the text, its value is null. Never guess
  from neighbouring text."#;

const RULE_PROMPT: &str = r#"You write extraction rules for semi-structured documents.

Given the document text, a field name, its value in this document and a
description, return one JSON object describing a rule that finds that value in
this and future documents of the same layout:

{
  "kind": "regex" | "keyword",
  "pattern": regex with exactly one capture group around the value (regex only),
  "anchor": literal label the value follows (keyword only),
  "strategy": "next_line" | "multiline_until_stop" | "conditional_null" (keyword only),
  "stop_anchor": literal label where the value ends, or null,
  "line_offset": 0-based line of the anchor when it occurs several times, or null,
  "validator": regex the whole value must match
}

Constraints:
- Anchor on the field's own label, never on the position of other fields.
- Patterns are case-insensitive; use Rust regex syntax (no lookaround, no backreferences).
- The validator must reject text belonging to the other fields listed.
- When the value is null, use kind "keyword" with strategy "conditional_null",
  the field's own label as anchor, the next label as stop_anchor (null if the
  field is last) and validator "^__NULL__$".
- Never hard-code the value itself in the pattern."#;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageRaw>,
}

#[derive(Debug, Deserialize)]
struct UsageRaw {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<UsageRaw> for Usage {
    fn from(raw: UsageRaw) -> Self {
        Usage::new(raw.prompt_tokens, raw.completion_tokens)
    }
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Oracle backed by an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiOracle {
    http_client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl OpenAiOracle {
    /// Build from config, reading the API key from the configured variable.
    pub fn from_config(config: &OracleConfig) -> Result<Self, OracleError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| OracleError::Config(format!("{} not set", config.api_key_env)))?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OracleError::Config(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    /// Send a system and a user message, return the JSON text of the reply.
    async fn chat_json(&self, system: &str, user: String) -> Result<Metered<String>, OracleError> {
        let mut attempt = 0;
        loop {
            match self.chat_once(system, user.clone()).await {
                Err(e @ (OracleError::Network(_) | OracleError::Api(_))) if attempt < self.max_retries => {
                    let delay = retry_delay(attempt);
                    attempt += 1;
                    warn!(error = %e, attempt, delay_ms = delay.as_millis(), "Retrying oracle request");
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    async fn chat_once(&self, system: &str, user: String) -> Result<Metered<String>, OracleError> {
        let start = std::time::Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system.to_string(),
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Oracle request failed");
                OracleError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "Oracle API error");
            return Err(OracleError::Api(format!("{status}: {error_text}")));
        }

        let chat_response: ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| OracleError::Parse(e.to_string()))?;

        let usage = chat_response.usage.map(Usage::from).unwrap_or_default();
        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::Api("empty response".into()))?;

        debug!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis(),
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Oracle chat completion"
        );
        Ok(Metered::new(content, usage))
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn extract_fields(
        &self,
        text: &str,
        schema: &Schema,
    ) -> Result<Metered<Answers>, OracleError> {
        let schema_json =
            serde_json::to_string_pretty(schema).map_err(|e| OracleError::Parse(e.to_string()))?;
        let user = format!("Input text:\n{text}\n\nExtraction schema:\n{schema_json}");

        let reply = self.chat_json(EXTRACTION_PROMPT, user).await?;
        Ok(Metered::new(parse_answers(&reply.value, schema)?, reply.usage))
    }

    async fn propose_rule(
        &self,
        request: &RuleRequest<'_>,
    ) -> Result<Metered<RuleRecord>, OracleError> {
        let mut user = format!(
            "Full text:\n{}\n\nField: {}\nValue: {}\nDescription: {}\nOther fields: {}",
            request.text,
            request.field,
            request.value.map_or_else(|| "null".to_string(), |v| format!("{v:?}")),
            request.description,
            request.other_fields.join(", "),
        );
        if let Some(feedback) = &request.feedback {
            user.push_str(&format!("\n\nYour previous rule was rejected. {feedback} Propose a different rule."));
        }

        let reply = self.chat_json(RULE_PROMPT, user).await?;
        Ok(Metered::new(parse_rule(&reply.value)?, reply.usage))
    }
}

/// 500ms, 1s, 2s, ... capped at 8s.
fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(500 * 2u64.pow(attempt.min(4)))
}

/// Some models wrap JSON in a markdown fence even in JSON mode.
fn strip_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn parse_answers(reply: &str, schema: &Schema) -> Result<Answers, OracleError> {
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(strip_fence(reply))
        .map_err(|e| OracleError::Parse(format!("extraction reply is not a JSON object: {e}")))?;

    Ok(schema
        .keys()
        .map(|field| {
            let value = match object.get(field) {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
            };
            (field.clone(), value)
        })
        .collect())
}

fn parse_rule(reply: &str) -> Result<RuleRecord, OracleError> {
    serde_json::from_str(strip_fence(reply))
        .map_err(|e| OracleError::Parse(format!("rule reply does not fit the rule shape: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use adex_core::{RuleKind, Strategy};
    use pretty_assertions::assert_eq;

    fn schema(fields: &[&str]) -> Schema {
        fields.iter().map(|f| (f.to_string(), String::new())).collect()
    }

    #[test]
    fn test_strip_fence() {
        assert_eq!(strip_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_fence("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_answers() {
        let reply = r#"{"nome": "JOANA", "inscricao": 101943, "categoria": null, "extra": "x"}"#;
        let answers = parse_answers(reply, &schema(&["nome", "inscricao", "categoria", "situacao"])).unwrap();

        assert_eq!(answers.get("nome"), Some(&Some("JOANA".to_string())));
        assert_eq!(answers.get("inscricao"), Some(&Some("101943".to_string())));
        assert_eq!(answers.get("categoria"), Some(&None));
        assert_eq!(answers.get("situacao"), Some(&None));
        assert!(answers.get("extra").is_none());

        assert!(matches!(parse_answers("[1, 2]", &schema(&["a"])), Err(OracleError::Parse(_))));
    }

    #[test]
    fn test_parse_rule_accepts_legacy_keys() {
        let reply = r#"```json
{"type": "keyword", "rule": null, "keyword": "Categoria", "strategy": "conditional_null",
 "stop_keyword": "Endereco", "line_number": null, "validation_regex": "^__NULL__$"}
```"#;
        let record = parse_rule(reply).unwrap();

        assert_eq!(record.kind, Some(RuleKind::Keyword));
        assert_eq!(record.strategy, Some(Strategy::ConditionalNull));
        assert_eq!(record.stop_anchor.as_deref(), Some("Endereco"));
    }

    #[test]
    fn test_retry_delay_backs_off() {
        assert_eq!(retry_delay(0), Duration::from_millis(500));
        assert_eq!(retry_delay(1), Duration::from_secs(1));
        assert_eq!(retry_delay(3), Duration::from_secs(4));
        assert_eq!(retry_delay(9), Duration::from_secs(8));
    }

    #[test]
    fn test_response_usage() {
        let raw = r#"{
            "choices": [{"message": {"content": "{}"}}],
            "usage": {"prompt_tokens": 812, "completion_tokens": 64, "total_tokens": 876}
        }"#;
        let response: ChatResponseRaw = serde_json::from_str(raw).unwrap();
        assert_eq!(response.usage.map(Usage::from), Some(Usage::new(812, 64)));

        let bare: ChatResponseRaw =
            serde_json::from_str(r#"{"choices": [{"message": {"content": "{}"}}]}"#).unwrap();
        assert!(bare.usage.is_none());
    }

    #[test]
    fn test_missing_api_key() {
        let config = OracleConfig {
            api_key_env: "ADEX_TEST_KEY_THAT_IS_NOT_SET".to_string(),
            ..Default::default()
        };
        assert!(matches!(OpenAiOracle::from_config(&config), Err(OracleError::Config(_))));
    }
}
