//! The external service asked for values and rules when the cache misses.

use std::ops::AddAssign;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OracleError;
use crate::models::{Answers, Schema};
use crate::rule::RuleRecord;

/// Everything the oracle needs to propose a rule for one field.
#[derive(Debug, Clone, Serialize)]
pub struct RuleRequest<'a> {
    /// Document text the rule has to work on.
    pub text: &'a str,
    pub field: &'a str,
    /// Value the rule must extract; `None` asks for an absence rule.
    pub value: Option<&'a str>,
    pub description: &'a str,
    /// Other fields of the schema, whose anchors the rule must not capture.
    pub other_fields: Vec<&'a str>,
    /// Why the previous proposal was rejected, if there was one.
    pub feedback: Option<String>,
}

/// Tokens billed for one or more oracle requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// An oracle answer together with what it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Metered<T> {
    pub value: T,
    pub usage: Usage,
}

impl<T> Metered<T> {
    pub fn new(value: T, usage: Usage) -> Self {
        Self { value, usage }
    }
}

/// Value extraction and rule proposal service, typically an LLM.
///
/// Failed requests report no usage; only answered requests are counted.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Extract the fields of `schema` from `text`. Empty fields come back as `None`.
    async fn extract_fields(
        &self,
        text: &str,
        schema: &Schema,
    ) -> Result<Metered<Answers>, OracleError>;

    /// Propose one extraction rule for a field.
    async fn propose_rule(
        &self,
        request: &RuleRequest<'_>,
    ) -> Result<Metered<RuleRecord>, OracleError>;
}
