use super::{
    round2, AuditOutcome, ConditionOp, FlaggedIssue, InvalidResponse, ItemKind, RedFlagPolicy,
    RedFlagRule, Responses, ScoreBreakdown, ScoringRules, SectionScore, TemplateItem,
    TemplateSection,
};
use serde_json::Value;

/// Scores a response set against a template.
///
/// A missing answer to a required item costs its points; a missing answer to
/// an optional item drops out of the denominator. An answer the item cannot
/// interpret earns nothing and is reported in `invalid_responses`. JSON null
/// counts as missing. Responses for unknown item ids are ignored.
pub fn calculate_overall_score(
    sections: &[TemplateSection],
    responses: &Responses,
    rules: &ScoringRules,
) -> ScoreBreakdown {
    let mut section_scores = Vec::with_capacity(sections.len());
    let mut missing_required = Vec::new();
    let mut invalid_responses = Vec::new();

    for section in sections {
        let mut earned = 0.0;
        let mut possible = 0.0;
        let mut answered = 0;
        let mut not_applicable = 0;

        for item in &section.items {
            match answer(responses, &item.id) {
                None if item.required => {
                    possible += item.points;
                    missing_required.push(item.id.clone());
                }
                None => not_applicable += 1,
                Some(value) => {
                    possible += item.points;
                    answered += 1;
                    match item_credit(item, value) {
                        Ok(credit) => earned += credit * item.points,
                        Err(reason) => invalid_responses.push(InvalidResponse {
                            item_id: item.id.clone(),
                            reason,
                        }),
                    }
                }
            }
        }

        let percentage = (possible > 0.0).then(|| earned / possible * 100.0);
        let below_minimum = match (percentage, rules.section_minimums.get(&section.id)) {
            (Some(pct), Some(min)) => pct < *min,
            _ => false,
        };
        section_scores.push(SectionScore {
            section_id: section.id.clone(),
            title: section.title.clone(),
            weight: section.weight,
            earned: round2(earned),
            possible: round2(possible),
            percentage,
            answered,
            not_applicable,
            below_minimum,
        });
    }

    let (weighted, weight_sum) = section_scores
        .iter()
        .filter_map(|s| s.percentage.map(|pct| (pct, s.weight)))
        .fold((0.0, 0.0), |(acc, ws), (pct, w)| (acc + pct * w, ws + w));
    let score = if weight_sum > 0.0 {
        round2(weighted / weight_sum)
    } else {
        0.0
    };
    for s in &mut section_scores {
        s.percentage = s.percentage.map(round2);
    }

    let red_flags = evaluate_red_flags(rules, responses);
    let outcome = if red_flags.iter().any(|f| f.fails_audit) {
        AuditOutcome::FailRedFlag
    } else if section_scores.iter().any(|s| s.below_minimum) {
        AuditOutcome::FailSectionMinimum
    } else if weight_sum <= 0.0 || score < rules.pass_threshold {
        AuditOutcome::FailScore
    } else {
        AuditOutcome::Pass
    };

    ScoreBreakdown {
        score,
        pass_threshold: rules.pass_threshold,
        passed: outcome == AuditOutcome::Pass,
        outcome,
        sections: section_scores,
        red_flags,
        missing_required,
        invalid_responses,
    }
}

/// Evaluates every red-flag rule independently of the numeric score.
pub fn evaluate_red_flags(rules: &ScoringRules, responses: &Responses) -> Vec<FlaggedIssue> {
    let default_fails = rules.red_flag_policy == RedFlagPolicy::FailAudit;
    rules
        .red_flags
        .iter()
        .filter(|rule| triggers(rule, answer(responses, &rule.item_id)))
        .map(|rule| FlaggedIssue {
            rule_id: rule.id.clone(),
            item_id: rule.item_id.clone(),
            severity: rule.severity,
            message: rule.message.clone(),
            fails_audit: rule.fails_audit.unwrap_or(default_fails),
        })
        .collect()
}

fn answer<'a>(responses: &'a Responses, item_id: &str) -> Option<&'a Value> {
    responses.get(item_id).filter(|v| !v.is_null())
}

/// Only `missing` fires on an absent answer.
fn triggers(rule: &RedFlagRule, value: Option<&Value>) -> bool {
    let Some(value) = value else {
        return rule.operator == ConditionOp::Missing;
    };
    let operand = rule.value.as_ref();
    match rule.operator {
        ConditionOp::Missing => false,
        ConditionOp::Equals => operand.is_some_and(|o| loose_eq(value, o)),
        ConditionOp::NotEquals => operand.is_some_and(|o| !loose_eq(value, o)),
        ConditionOp::LessThan => compare(value, operand, |v, o| v < o),
        ConditionOp::GreaterThan => compare(value, operand, |v, o| v > o),
        ConditionOp::In => match operand {
            Some(Value::Array(options)) => options.iter().any(|o| loose_eq(value, o)),
            _ => false,
        },
    }
}

fn compare(value: &Value, operand: Option<&Value>, op: impl Fn(f64, f64) -> bool) -> bool {
    match (as_f64(value), operand.and_then(Value::as_f64)) {
        (Some(v), Some(o)) => op(v, o),
        _ => false,
    }
}

/// Equality with the operand's type deciding how the answer is read.
fn loose_eq(value: &Value, operand: &Value) -> bool {
    match operand {
        Value::Bool(b) => as_bool(value) == Some(*b),
        Value::Number(n) => match (as_f64(value), n.as_f64()) {
            (Some(v), Some(o)) => (v - o).abs() < 1e-9,
            _ => false,
        },
        Value::String(s) => as_text(value).is_some_and(|t| t.trim().eq_ignore_ascii_case(s.trim())),
        other => value == other,
    }
}

fn item_credit(item: &TemplateItem, value: &Value) -> Result<f64, String> {
    match &item.kind {
        ItemKind::Boolean => as_bool(value)
            .map(|b| if b { 1.0 } else { 0.0 })
            .ok_or_else(|| "expected a yes/no answer".to_string()),
        ItemKind::Scale { min, max } => {
            let x = as_f64(value).ok_or_else(|| "expected a number on the scale".to_string())?;
            if max <= min {
                return Ok(0.0);
            }
            Ok(((x - min) / (max - min)).clamp(0.0, 1.0))
        }
        ItemKind::Choice { options } => {
            let text = as_text(value).ok_or_else(|| "expected one of the options".to_string())?;
            options
                .iter()
                .find(|o| o.value.eq_ignore_ascii_case(text.trim()))
                .map(|o| o.credit.clamp(0.0, 1.0))
                .ok_or_else(|| format!("'{text}' is not one of the options"))
        }
        ItemKind::Numeric { min, max } => {
            let x = as_f64(value).ok_or_else(|| "expected a number".to_string())?;
            let in_range = min.map_or(true, |m| x >= m) && max.map_or(true, |m| x <= m);
            Ok(if in_range { 1.0 } else { 0.0 })
        }
        ItemKind::Text => Ok(match as_text(value) {
            Some(text) if !text.trim().is_empty() => 1.0,
            _ => 0.0,
        }),
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 1.0 => Some(true),
            Some(x) if x == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "y" | "1" => Some(true),
            "no" | "false" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|x| x.is_finite()),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
