use super::{
    calculate_overall_score, round2, FlaggedIssue, Responses, ScoreBreakdown, ScoringRules,
    TemplateSection,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SectionDelta {
    pub section_id: String,
    pub baseline: Option<f64>,
    pub projected: Option<f64>,
    /// None unless both sides were scored
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WhatIfResult {
    pub baseline: ScoreBreakdown,
    pub projected: ScoreBreakdown,
    pub score_delta: f64,
    pub section_deltas: Vec<SectionDelta>,
    pub new_red_flags: Vec<FlaggedIssue>,
    pub resolved_red_flags: Vec<FlaggedIssue>,
    pub outcome_changed: bool,
}

/// Re-scores the audit with `overrides` merged over a copy of `responses`.
///
/// A null override removes the answer. The caller's responses are untouched.
pub fn what_if_analysis(
    sections: &[TemplateSection],
    responses: &Responses,
    overrides: &Responses,
    rules: &ScoringRules,
) -> WhatIfResult {
    let baseline = calculate_overall_score(sections, responses, rules);

    let mut merged = responses.clone();
    for (item_id, value) in overrides {
        if value.is_null() {
            merged.remove(item_id);
        } else {
            merged.insert(item_id.clone(), value.clone());
        }
    }
    let projected = calculate_overall_score(sections, &merged, rules);

    let section_deltas = baseline
        .sections
        .iter()
        .zip(&projected.sections)
        .map(|(before, after)| SectionDelta {
            section_id: before.section_id.clone(),
            baseline: before.percentage,
            projected: after.percentage,
            delta: before
                .percentage
                .zip(after.percentage)
                .map(|(b, a)| round2(a - b)),
        })
        .collect();

    let raised_in = |flags: &[FlaggedIssue], rule_id: &str| flags.iter().any(|f| f.rule_id == rule_id);
    let new_red_flags = projected
        .red_flags
        .iter()
        .filter(|f| !raised_in(&baseline.red_flags, &f.rule_id))
        .cloned()
        .collect();
    let resolved_red_flags = baseline
        .red_flags
        .iter()
        .filter(|f| !raised_in(&projected.red_flags, &f.rule_id))
        .cloned()
        .collect();

    WhatIfResult {
        score_delta: round2(projected.score - baseline.score),
        outcome_changed: projected.outcome != baseline.outcome,
        section_deltas,
        new_red_flags,
        resolved_red_flags,
        baseline,
        projected,
    }
}
