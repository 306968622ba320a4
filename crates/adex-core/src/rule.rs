//! Extraction rules.
//!
//! A [`Rule`] pairs a matcher (a regex with one capture group, or a
//! case-insensitive keyword anchor plus a positional strategy) with a
//! validator the extracted candidate must fully match. Rules are immutable:
//! new knowledge about a field produces a new rule.
//!
//! Extraction is split in two steps. [`Rule::apply`] mechanically pulls a
//! [`Candidate`] out of the text, [`Rule::validate`] decides whether that
//! candidate has the right shape. A rule may fire and still be rejected.

use std::fmt;

use regex::{Match, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::RuleError;

/// Sentinel value the oracle uses for "this field is genuinely empty".
pub const NULL_SENTINEL: &str = "__NULL__";

/// Reserved validator of rules that assert a field is absent.
pub const NULL_VALIDATOR: &str = "^__NULL__$";

/// Matcher family of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Regular expression with a single capture group.
    Regex,
    /// Literal anchor plus a [`Strategy`].
    Keyword,
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Regex => "regex",
            Self::Keyword => "keyword",
        }
    }
}

/// How a keyword rule reads the value relative to its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// The trimmed line right after the anchor's line.
    NextLine,
    /// Everything after the anchor up to the stop anchor (or end of text).
    MultilineUntilStop,
    /// Asserts the field is empty: only whitespace between anchor and stop.
    ConditionalNull,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NextLine => "next_line",
            Self::MultilineUntilStop => "multiline_until_stop",
            Self::ConditionalNull => "conditional_null",
        }
    }
}

/// Flat, serde-visible shape of a rule.
///
/// This is both what the oracle proposes and what the rule store persists.
/// Legacy key names written by older stores are accepted on input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    #[serde(alias = "type")]
    pub kind: Option<RuleKind>,
    #[serde(alias = "rule")]
    pub pattern: Option<String>,
    #[serde(alias = "keyword")]
    pub anchor: Option<String>,
    pub strategy: Option<Strategy>,
    #[serde(alias = "stop_keyword")]
    pub stop_anchor: Option<String>,
    #[serde(alias = "line_number")]
    pub line_offset: Option<usize>,
    #[serde(alias = "validation_regex")]
    pub validator: Option<String>,
}

/// Something a rule pulled out of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// Extracted text, not yet judged.
    Text(String),
    /// The rule established that the field has no value.
    Absent,
}

/// Result of an extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    /// A rule fired and its validator accepted the value.
    Value(String),
    /// A rule positively established the field is empty in this document.
    ConfirmedAbsent,
    /// No rule both fired and validated; the caller should ask the oracle.
    NoMatch,
}

impl ExtractionOutcome {
    /// Whether a rule was credited (anything but [`ExtractionOutcome::NoMatch`]).
    pub fn is_hit(&self) -> bool {
        !matches!(self, Self::NoMatch)
    }

    /// The extracted value, if any.
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Collapse into an answer: `Some(Some(v))` for a value, `Some(None)` for
    /// a confirmed absence, `None` for a miss.
    pub fn into_answer(self) -> Option<Option<String>> {
        match self {
            Self::Value(value) => Some(Some(value)),
            Self::ConfirmedAbsent => Some(None),
            Self::NoMatch => None,
        }
    }
}

impl From<Candidate> for ExtractionOutcome {
    fn from(candidate: Candidate) -> Self {
        match candidate {
            Candidate::Text(text) => Self::Value(text),
            Candidate::Absent => Self::ConfirmedAbsent,
        }
    }
}

/// Compiled extraction pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    fn compile(source: &str) -> Result<Self, RuleError> {
        let regex = RegexBuilder::new(source)
            .case_insensitive(true)
            .multi_line(true)
            .build()
            .map_err(|source| RuleError::InvalidRegex {
                field: "pattern",
                source,
            })?;

        // captures_len counts the implicit whole-match group
        let groups = regex.captures_len() - 1;
        if groups != 1 {
            return Err(RuleError::CaptureGroups(groups));
        }

        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

/// Case-insensitive literal keyword.
#[derive(Debug, Clone)]
pub struct Anchor {
    text: String,
    regex: Regex,
}

impl Anchor {
    fn compile(field: &'static str, text: &str) -> Result<Self, RuleError> {
        if text.trim().is_empty() {
            return Err(RuleError::EmptyAnchor(field));
        }

        let regex = RegexBuilder::new(&regex::escape(text))
            .case_insensitive(true)
            .build()
            .map_err(|source| RuleError::InvalidRegex { field, source })?;

        Ok(Self {
            text: text.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    fn find<'t>(&self, haystack: &'t str) -> Option<Match<'t>> {
        self.regex.find(haystack)
    }
}

impl PartialEq for Anchor {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Anchor {}

/// Full-match acceptance test for candidates.
#[derive(Debug, Clone)]
pub struct Validator {
    source: String,
    regex: Regex,
    absence: bool,
}

impl Validator {
    fn compile(source: &str) -> Result<Self, RuleError> {
        let invalid = |source| RuleError::InvalidRegex {
            field: "validator",
            source,
        };
        // alone first: an unbalanced `)` would otherwise close the anchoring group
        Regex::new(source).map_err(invalid)?;
        let regex = Regex::new(&format!(r"\A(?:{source})\z")).map_err(invalid)?;

        Ok(Self {
            source: source.to_string(),
            regex,
            absence: source == NULL_VALIDATOR,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether this is the reserved absence validator.
    pub fn is_absence(&self) -> bool {
        self.absence
    }

    /// An absent candidate only passes the reserved validator, and text
    /// never does, even when it literally reads `__NULL__`.
    pub fn accepts(&self, candidate: &Candidate) -> bool {
        match candidate {
            Candidate::Absent => self.absence,
            Candidate::Text(text) => !self.absence && self.regex.is_match(text),
        }
    }
}

impl PartialEq for Validator {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Validator {}

/// One extraction strategy for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RuleRecord", into = "RuleRecord")]
pub enum Rule {
    Regex {
        pattern: Pattern,
        line_offset: Option<usize>,
        validator: Validator,
    },
    Keyword {
        anchor: Anchor,
        strategy: Strategy,
        stop_anchor: Option<Anchor>,
        line_offset: Option<usize>,
        validator: Validator,
    },
}

impl Rule {
    /// Build a rule from an oracle proposal, rejecting anything that could
    /// not work: missing fields, unparsable regexes, wrong group counts, or
    /// a validator that contradicts the strategy.
    pub fn from_proposal(record: RuleRecord) -> Result<Self, RuleError> {
        let kind = record.kind.ok_or(RuleError::MissingKind)?;

        match kind {
            RuleKind::Regex => {
                let source = record
                    .pattern
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .ok_or(RuleError::MissingField {
                        kind: "regex",
                        field: "pattern",
                    })?;
                let pattern = Pattern::compile(source)?;

                let validator = record.validator.as_deref().ok_or(RuleError::MissingField {
                    kind: "regex",
                    field: "validator",
                })?;
                let validator = Validator::compile(validator)?;
                if validator.is_absence() {
                    return Err(RuleError::ReservedValidator);
                }

                if record.anchor.is_some() {
                    return Err(RuleError::ConflictingField {
                        kind: "regex",
                        field: "anchor",
                    });
                }

                Ok(Self::Regex {
                    pattern,
                    line_offset: record.line_offset,
                    validator,
                })
            }
            RuleKind::Keyword => {
                let anchor = record.anchor.as_deref().ok_or(RuleError::MissingField {
                    kind: "keyword",
                    field: "anchor",
                })?;
                let anchor = Anchor::compile("anchor", anchor)?;

                let strategy = record.strategy.ok_or(RuleError::MissingField {
                    kind: "keyword",
                    field: "strategy",
                })?;

                if record.pattern.is_some() {
                    return Err(RuleError::ConflictingField {
                        kind: "keyword",
                        field: "pattern",
                    });
                }

                let stop_anchor = record
                    .stop_anchor
                    .as_deref()
                    .map(|s| Anchor::compile("stop_anchor", s))
                    .transpose()?;

                let validator = match (strategy, record.validator.as_deref()) {
                    (Strategy::ConditionalNull, None) => Validator::compile(NULL_VALIDATOR)?,
                    (Strategy::ConditionalNull, Some(source)) if source == NULL_VALIDATOR => {
                        Validator::compile(source)?
                    }
                    (Strategy::ConditionalNull, Some(other)) => {
                        return Err(RuleError::AbsenceValidator(other.to_string()));
                    }
                    (_, None) => {
                        return Err(RuleError::MissingField {
                            kind: "keyword",
                            field: "validator",
                        });
                    }
                    (_, Some(source)) => {
                        let validator = Validator::compile(source)?;
                        if validator.is_absence() {
                            return Err(RuleError::ReservedValidator);
                        }
                        validator
                    }
                };

                Ok(Self::Keyword {
                    anchor,
                    strategy,
                    stop_anchor,
                    line_offset: record.line_offset,
                    validator,
                })
            }
        }
    }

    /// Parse a raw JSON proposal (as returned by the oracle).
    pub fn from_json(raw: &str) -> Result<Self, RuleError> {
        let record: RuleRecord = serde_json::from_str(raw)?;
        Self::from_proposal(record)
    }

    /// Flatten back into the persisted shape.
    pub fn to_record(&self) -> RuleRecord {
        match self {
            Self::Regex {
                pattern,
                line_offset,
                validator,
            } => RuleRecord {
                kind: Some(RuleKind::Regex),
                pattern: Some(pattern.as_str().to_string()),
                anchor: None,
                strategy: None,
                stop_anchor: None,
                line_offset: *line_offset,
                validator: Some(validator.as_str().to_string()),
            },
            Self::Keyword {
                anchor,
                strategy,
                stop_anchor,
                line_offset,
                validator,
            } => RuleRecord {
                kind: Some(RuleKind::Keyword),
                pattern: None,
                anchor: Some(anchor.as_str().to_string()),
                strategy: Some(*strategy),
                stop_anchor: stop_anchor.as_ref().map(|s| s.as_str().to_string()),
                line_offset: *line_offset,
                validator: Some(validator.as_str().to_string()),
            },
        }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            Self::Regex { .. } => RuleKind::Regex,
            Self::Keyword { .. } => RuleKind::Keyword,
        }
    }

    pub fn strategy(&self) -> Option<Strategy> {
        match self {
            Self::Regex { .. } => None,
            Self::Keyword { strategy, .. } => Some(*strategy),
        }
    }

    pub fn validator(&self) -> &Validator {
        match self {
            Self::Regex { validator, .. } | Self::Keyword { validator, .. } => validator,
        }
    }

    pub fn line_offset(&self) -> Option<usize> {
        match self {
            Self::Regex { line_offset, .. } | Self::Keyword { line_offset, .. } => *line_offset,
        }
    }

    /// Extract a candidate from `text` without judging it.
    pub fn apply(&self, text: &str) -> Option<Candidate> {
        match self {
            Self::Regex {
                pattern,
                line_offset,
                ..
            } => {
                let caps = pick(pattern.regex.captures_iter(text), *line_offset, text, |c| {
                    c.get(0).map_or(0, |m| m.start())
                })?;
                caps.get(1).map(|m| Candidate::Text(m.as_str().to_string()))
            }
            Self::Keyword {
                anchor,
                strategy,
                stop_anchor,
                line_offset,
                ..
            } => {
                let found = pick(anchor.regex.find_iter(text), *line_offset, text, |m| m.start())?;
                let rest = &text[found.end()..];

                match strategy {
                    Strategy::NextLine => {
                        let newline = rest.find('\n')?;
                        rest[newline + 1..]
                            .lines()
                            .next()
                            .map(|line| Candidate::Text(line.trim().to_string()))
                    }
                    Strategy::MultilineUntilStop => {
                        let region = until_stop(rest, stop_anchor.as_ref());
                        Some(Candidate::Text(region.trim().to_string()))
                    }
                    Strategy::ConditionalNull => {
                        let region = until_stop(rest, stop_anchor.as_ref());
                        region.trim().is_empty().then_some(Candidate::Absent)
                    }
                }
            }
        }
    }

    /// Judge a candidate. No candidate always fails.
    pub fn validate(&self, candidate: Option<&Candidate>) -> bool {
        candidate.is_some_and(|c| self.validator().accepts(c))
    }

    /// Apply and validate in one go. Never touches any weight.
    pub fn extract(&self, text: &str) -> Option<ExtractionOutcome> {
        let candidate = self.apply(text);
        if self.validate(candidate.as_ref()) {
            candidate.map(ExtractionOutcome::from)
        } else {
            None
        }
    }
}

impl TryFrom<RuleRecord> for Rule {
    type Error = RuleError;

    fn try_from(record: RuleRecord) -> Result<Self, Self::Error> {
        Self::from_proposal(record)
    }
}

impl From<Rule> for RuleRecord {
    fn from(rule: Rule) -> Self {
        rule.to_record()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regex {
                pattern, validator, ..
            } => write!(f, "regex /{}/ => {}", pattern.as_str(), validator.as_str()),
            Self::Keyword {
                anchor,
                strategy,
                stop_anchor,
                validator,
                ..
            } => {
                write!(f, "keyword {:?} {}", anchor.as_str(), strategy.as_str())?;
                if let Some(stop) = stop_anchor {
                    write!(f, " until {:?}", stop.as_str())?;
                }
                write!(f, " => {}", validator.as_str())
            }
        }
    }
}

/// Pick the first occurrence, or the one starting on `line_offset` when the
/// hint is set and such an occurrence exists.
fn pick<T>(
    occurrences: impl Iterator<Item = T>,
    line_offset: Option<usize>,
    text: &str,
    start_of: impl Fn(&T) -> usize,
) -> Option<T> {
    let mut chosen = None;

    for occurrence in occurrences {
        let on_line = line_offset.is_some_and(|line| line_of(text, start_of(&occurrence)) == line);
        let done = line_offset.is_none() || on_line;
        if chosen.is_none() || on_line {
            chosen = Some(occurrence);
        }
        if done {
            break;
        }
    }

    chosen
}

fn line_of(text: &str, offset: usize) -> usize {
    text.as_bytes()[..offset].iter().filter(|&&b| b == b'\n').count()
}

fn until_stop<'t>(rest: &'t str, stop: Option<&Anchor>) -> &'t str {
    match stop.and_then(|s| s.find(rest)) {
        Some(m) => &rest[..m.start()],
        None => rest,
    }
}
