//! Compliance questionnaire scoring.
//!
//! A template is a list of weighted sections, each holding weighted items of a
//! given kind. Responses map item ids to loosely typed JSON answers. The rules
//! document carries the pass threshold, the red-flag rules, the red-flag
//! policy and optional per-section minimums.

mod scoring;
mod what_if;

pub use scoring::{calculate_overall_score, evaluate_red_flags};
pub use what_if::{what_if_analysis, SectionDelta, WhatIfResult};

use crate::AnalyticsError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use utoipa::ToSchema;

/// Item id → answer.
pub type Responses = BTreeMap<String, Value>;

fn default_weight() -> f64 {
    1.0
}

fn default_points() -> f64 {
    1.0
}

fn default_pass_threshold() -> f64 {
    75.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSection {
    pub id: String,
    pub title: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub items: Vec<TemplateItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateItem {
    pub id: String,
    pub question: String,
    #[serde(default = "default_points")]
    pub points: f64,
    #[serde(default)]
    pub required: bool,
    #[serde(flatten)]
    pub kind: ItemKind,
}

/// How an answer converts into credit (0..=1 of the item's points).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemKind {
    /// true / "yes" earns full credit
    Boolean,
    /// Linear between `min` and `max`, clamped
    Scale { min: f64, max: f64 },
    /// Each option carries its own credit
    Choice { options: Vec<ChoiceOption> },
    /// Full credit inside the acceptable range
    Numeric {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// Any non-empty answer earns full credit
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub value: String,
    pub credit: f64,
}

/// Whether a raised red flag fails the audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RedFlagPolicy {
    FailAudit,
    Advisory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagSeverity {
    Minor,
    #[default]
    Major,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Equals,
    NotEquals,
    LessThan,
    GreaterThan,
    Missing,
    In,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedFlagRule {
    pub id: String,
    pub item_id: String,
    pub operator: ConditionOp,
    /// Operand; unused by `missing`, an array for `in`
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub severity: FlagSeverity,
    pub message: String,
    /// Overrides the document-level policy for this rule
    #[serde(default)]
    pub fails_audit: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRules {
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
    pub red_flag_policy: RedFlagPolicy,
    #[serde(default)]
    pub red_flags: Vec<RedFlagRule>,
    /// Section id → minimum section percentage
    #[serde(default)]
    pub section_minimums: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SectionScore {
    pub section_id: String,
    pub title: String,
    pub weight: f64,
    pub earned: f64,
    pub possible: f64,
    /// None when every item in the section was not applicable
    pub percentage: Option<f64>,
    pub answered: usize,
    pub not_applicable: usize,
    pub below_minimum: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FlaggedIssue {
    pub rule_id: String,
    pub item_id: String,
    pub severity: FlagSeverity,
    pub message: String,
    pub fails_audit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InvalidResponse {
    pub item_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Pass,
    FailScore,
    FailSectionMinimum,
    FailRedFlag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ScoreBreakdown {
    /// Weighted percentage, two decimals
    pub score: f64,
    pub pass_threshold: f64,
    pub passed: bool,
    pub outcome: AuditOutcome,
    pub sections: Vec<SectionScore>,
    pub red_flags: Vec<FlaggedIssue>,
    pub missing_required: Vec<String>,
    pub invalid_responses: Vec<InvalidResponse>,
}

pub fn parse_sections(value: &Value) -> Result<Vec<TemplateSection>, AnalyticsError> {
    serde_json::from_value(value.clone()).map_err(|e| AnalyticsError::InvalidSections(e.to_string()))
}

pub fn parse_rules(value: &Value) -> Result<ScoringRules, AnalyticsError> {
    serde_json::from_value(value.clone()).map_err(|e| AnalyticsError::InvalidRules(e.to_string()))
}

/// Structural checks a template must pass before it is stored.
pub fn validate_template(sections: &[TemplateSection]) -> Result<(), AnalyticsError> {
    let bad = |msg: String| Err(AnalyticsError::InvalidSections(msg));
    if sections.is_empty() {
        return bad("template has no sections".into());
    }
    let mut section_ids = HashSet::new();
    let mut item_ids = HashSet::new();
    for section in sections {
        if section.id.trim().is_empty() {
            return bad("section id must not be empty".into());
        }
        if !section_ids.insert(section.id.as_str()) {
            return bad(format!("duplicate section id '{}'", section.id));
        }
        if !section.weight.is_finite() || section.weight < 0.0 {
            return bad(format!("section '{}' has a negative weight", section.id));
        }
        for item in &section.items {
            if item.id.trim().is_empty() {
                return bad(format!("section '{}' has an item without id", section.id));
            }
            if !item_ids.insert(item.id.as_str()) {
                return bad(format!("duplicate item id '{}'", item.id));
            }
            if !item.points.is_finite() || item.points < 0.0 {
                return bad(format!("item '{}' has negative points", item.id));
            }
            match &item.kind {
                ItemKind::Scale { min, max } if max <= min => {
                    return bad(format!("scale item '{}' needs max > min", item.id));
                }
                ItemKind::Choice { options } => {
                    if options.is_empty() {
                        return bad(format!("choice item '{}' has no options", item.id));
                    }
                    if let Some(opt) = options.iter().find(|o| !(0.0..=1.0).contains(&o.credit)) {
                        return bad(format!(
                            "option '{}' of item '{}' has credit outside 0..1",
                            opt.value, item.id
                        ));
                    }
                }
                ItemKind::Numeric {
                    min: Some(min),
                    max: Some(max),
                } if min > max => {
                    return bad(format!("numeric item '{}' has min above max", item.id));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Checks a rules document against the template it will score.
pub fn validate_rules(rules: &ScoringRules, sections: &[TemplateSection]) -> Result<(), AnalyticsError> {
    let bad = |msg: String| Err(AnalyticsError::InvalidRules(msg));
    if !(0.0..=100.0).contains(&rules.pass_threshold) {
        return bad("pass_threshold must be between 0 and 100".into());
    }
    let item_ids: HashSet<&str> = sections
        .iter()
        .flat_map(|s| s.items.iter().map(|i| i.id.as_str()))
        .collect();
    let mut rule_ids = HashSet::new();
    for rule in &rules.red_flags {
        if !rule_ids.insert(rule.id.as_str()) {
            return bad(format!("duplicate red flag id '{}'", rule.id));
        }
        if !item_ids.contains(rule.item_id.as_str()) {
            return bad(format!("red flag '{}' references unknown item '{}'", rule.id, rule.item_id));
        }
        let operand_ok = match rule.operator {
            ConditionOp::Missing => true,
            ConditionOp::LessThan | ConditionOp::GreaterThan => {
                rule.value.as_ref().and_then(Value::as_f64).is_some()
            }
            ConditionOp::In => matches!(rule.value, Some(Value::Array(_))),
            ConditionOp::Equals | ConditionOp::NotEquals => {
                rule.value.as_ref().is_some_and(|v| !v.is_null())
            }
        };
        if !operand_ok {
            return bad(format!("red flag '{}' has an operand unsuitable for its operator", rule.id));
        }
    }
    for (section_id, minimum) in &rules.section_minimums {
        if !sections.iter().any(|s| &s.id == section_id) {
            return bad(format!("section minimum for unknown section '{section_id}'"));
        }
        if !(0.0..=100.0).contains(minimum) {
            return bad(format!("section minimum for '{section_id}' must be between 0 and 100"));
        }
    }
    Ok(())
}

/// Parses, validates and scores in one step.
pub fn score_documents(
    sections: &Value,
    rules: &Value,
    responses: &Responses,
) -> Result<ScoreBreakdown, AnalyticsError> {
    let sections = parse_sections(sections)?;
    let rules = parse_rules(rules)?;
    validate_template(&sections)?;
    validate_rules(&rules, &sections)?;
    Ok(calculate_overall_score(&sections, responses, &rules))
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
