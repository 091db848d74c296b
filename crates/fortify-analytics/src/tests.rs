use crate::compliance::{
    calculate_overall_score, parse_rules, parse_sections, score_documents, validate_rules,
    validate_template, what_if_analysis, AuditOutcome, Responses, ScoringRules, TemplateSection,
};
use crate::predictive::{
    aggregate_equipment, analyze_sensor, classify_risk, HeuristicConfig, Reading, RiskLevel,
    RecommendedAction, SensorMetrics, SensorThresholds,
};
use crate::threshold::evaluate_reading;
use crate::AnalyticsError;
use chrono::{DateTime, Duration, Utc};
use fortify_common::types::{AlertSeverity, SensorAlertType};
use serde_json::{json, Value};

fn sample_sections() -> Vec<TemplateSection> {
    parse_sections(&json!([
        {
            "id": "premix",
            "title": "Premix handling",
            "weight": 2,
            "items": [
                {"id": "premix_stored", "question": "Premix stored dry and sealed?", "type": "boolean", "points": 2, "required": true},
                {"id": "dosing_rate", "question": "Dosing rate (g/t)", "type": "numeric", "min": 150, "max": 250, "required": true},
                {"id": "storage_temp", "question": "Storage conditions (0-10)", "type": "scale", "min": 0, "max": 10}
            ]
        },
        {
            "id": "records",
            "title": "Records",
            "items": [
                {"id": "log_quality", "question": "Batch log quality", "type": "choice", "required": true,
                 "options": [
                    {"value": "complete", "credit": 1.0},
                    {"value": "partial", "credit": 0.5},
                    {"value": "none", "credit": 0.0}
                 ]},
                {"id": "notes", "question": "Inspector notes", "type": "text"}
            ]
        }
    ]))
    .unwrap()
}

fn rules_with(policy: &str, red_flags: Value) -> ScoringRules {
    parse_rules(&json!({
        "pass_threshold": 75,
        "red_flag_policy": policy,
        "red_flags": red_flags,
    }))
    .unwrap()
}

fn sample_rules() -> ScoringRules {
    rules_with(
        "fail_audit",
        json!([{
            "id": "no-premix",
            "item_id": "premix_stored",
            "operator": "equals",
            "value": false,
            "severity": "CRITICAL",
            "message": "Premix is not stored correctly"
        }]),
    )
}

fn responses(pairs: &[(&str, Value)]) -> Responses {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn full_answers() -> Responses {
    responses(&[
        ("premix_stored", json!(true)),
        ("dosing_rate", json!(200)),
        ("storage_temp", json!(10)),
        ("log_quality", json!("complete")),
        ("notes", json!("all good")),
    ])
}

fn partial_answers() -> Responses {
    responses(&[
        ("premix_stored", json!("yes")),
        ("dosing_rate", json!(300)),
        ("log_quality", json!("partial")),
    ])
}

#[test]
fn full_marks_score_one_hundred_without_flags() {
    let result = calculate_overall_score(&sample_sections(), &full_answers(), &sample_rules());
    assert_eq!(result.score, 100.0);
    assert!(result.passed);
    assert_eq!(result.outcome, AuditOutcome::Pass);
    assert!(result.red_flags.is_empty());
    assert!(result.missing_required.is_empty());
    assert!(result.invalid_responses.is_empty());
}

#[test]
fn weighted_mean_of_section_percentages() {
    let result = calculate_overall_score(&sample_sections(), &partial_answers(), &sample_rules());
    // premix 2/3 at weight 2, records 0.5/1 at weight 1
    assert_eq!(result.sections[0].percentage, Some(66.67));
    assert_eq!(result.sections[1].percentage, Some(50.0));
    assert_eq!(result.score, 61.11);
    assert!(!result.passed);
    assert_eq!(result.outcome, AuditOutcome::FailScore);
    assert_eq!(result.sections[0].not_applicable, 1);
    assert_eq!(result.sections[1].not_applicable, 1);
}

#[test]
fn scoring_ignores_response_order() {
    let sections = sample_sections();
    let rules = sample_rules();
    let forward: Responses = partial_answers().into_iter().collect();
    let reversed: Responses = partial_answers().into_iter().rev().collect();
    assert_eq!(
        calculate_overall_score(&sections, &forward, &rules),
        calculate_overall_score(&sections, &reversed, &rules)
    );
}

#[test]
fn missing_required_item_loses_points() {
    let mut answers = full_answers();
    answers.remove("dosing_rate");
    let result = calculate_overall_score(&sample_sections(), &answers, &sample_rules());
    assert_eq!(result.missing_required, vec!["dosing_rate".to_string()]);
    assert_eq!(result.sections[0].percentage, Some(75.0));
    assert_eq!(result.score, 83.33);
}

#[test]
fn missing_optional_item_is_not_applicable() {
    let mut answers = full_answers();
    answers.remove("storage_temp");
    answers.insert("notes".into(), Value::Null);
    let result = calculate_overall_score(&sample_sections(), &answers, &sample_rules());
    assert_eq!(result.score, 100.0);
    assert_eq!(result.sections[0].not_applicable, 1);
    assert_eq!(result.sections[1].not_applicable, 1);
    assert!(result.missing_required.is_empty());
}

#[test]
fn uninterpretable_answer_earns_nothing_and_is_reported() {
    let mut answers = full_answers();
    answers.insert("dosing_rate".into(), json!("lots"));
    answers.insert("log_quality".into(), json!("excellent"));
    let result = calculate_overall_score(&sample_sections(), &answers, &sample_rules());
    let invalid: Vec<&str> = result
        .invalid_responses
        .iter()
        .map(|r| r.item_id.as_str())
        .collect();
    assert_eq!(invalid, vec!["dosing_rate", "log_quality"]);
    assert_eq!(result.sections[0].percentage, Some(75.0));
    assert_eq!(result.sections[1].percentage, Some(50.0));
}

#[test]
fn scale_answers_are_linear_and_clamped() {
    let mut answers = full_answers();
    answers.insert("storage_temp".into(), json!("5"));
    let half = calculate_overall_score(&sample_sections(), &answers, &sample_rules());
    // premix: 2 + 1 + 0.5 of 4
    assert_eq!(half.sections[0].percentage, Some(87.5));

    answers.insert("storage_temp".into(), json!(25));
    let clamped = calculate_overall_score(&sample_sections(), &answers, &sample_rules());
    assert_eq!(clamped.sections[0].percentage, Some(100.0));
}

#[test]
fn red_flag_fails_full_score_only_under_fail_audit_policy() {
    let flag = json!([{
        "id": "pests",
        "item_id": "notes",
        "operator": "in",
        "value": ["pests", "contamination"],
        "message": "Inspector recorded an infestation"
    }]);
    let mut answers = full_answers();
    answers.insert("notes".into(), json!("Pests"));

    let failing = calculate_overall_score(&sample_sections(), &answers, &rules_with("fail_audit", flag.clone()));
    assert_eq!(failing.score, 100.0);
    assert!(!failing.passed);
    assert_eq!(failing.outcome, AuditOutcome::FailRedFlag);
    assert!(failing.red_flags[0].fails_audit);

    let advisory = calculate_overall_score(&sample_sections(), &answers, &rules_with("advisory", flag));
    assert_eq!(advisory.score, 100.0);
    assert!(advisory.passed);
    assert_eq!(advisory.red_flags.len(), 1);
    assert!(!advisory.red_flags[0].fails_audit);
}

#[test]
fn per_rule_override_beats_policy() {
    let flag = json!([{
        "id": "no-notes",
        "item_id": "notes",
        "operator": "missing",
        "message": "No inspector notes",
        "fails_audit": true
    }]);
    let mut answers = full_answers();
    answers.remove("notes");
    let result = calculate_overall_score(&sample_sections(), &answers, &rules_with("advisory", flag));
    assert_eq!(result.outcome, AuditOutcome::FailRedFlag);
}

#[test]
fn numeric_red_flag_conditions() {
    let flags = json!([
        {"id": "low", "item_id": "dosing_rate", "operator": "less_than", "value": 100, "message": "under-dosed"},
        {"id": "high", "item_id": "dosing_rate", "operator": "greater_than", "value": 400, "message": "over-dosed"},
        {"id": "incomplete", "item_id": "log_quality", "operator": "not_equals", "value": "complete", "message": "log incomplete"}
    ]);
    let rules = rules_with("advisory", flags);
    let mut answers = full_answers();
    answers.insert("dosing_rate".into(), json!("80"));
    let raised: Vec<String> = calculate_overall_score(&sample_sections(), &answers, &rules)
        .red_flags
        .into_iter()
        .map(|f| f.rule_id)
        .collect();
    assert_eq!(raised, vec!["low".to_string()]);

    answers.insert("log_quality".into(), json!("partial"));
    answers.insert("dosing_rate".into(), json!(500));
    let raised: Vec<String> = calculate_overall_score(&sample_sections(), &answers, &rules)
        .red_flags
        .into_iter()
        .map(|f| f.rule_id)
        .collect();
    assert_eq!(raised, vec!["high".to_string(), "incomplete".to_string()]);
}

#[test]
fn section_minimum_fails_an_otherwise_passing_audit() {
    let mut rules = sample_rules();
    rules.section_minimums.insert("records".into(), 80.0);
    let mut answers = full_answers();
    answers.insert("log_quality".into(), json!("partial"));
    let result = calculate_overall_score(&sample_sections(), &answers, &rules);
    assert_eq!(result.score, 91.67);
    assert!(result.sections[1].below_minimum);
    assert_eq!(result.outcome, AuditOutcome::FailSectionMinimum);
    assert!(!result.passed);
}

#[test]
fn template_with_nothing_to_score_fails_at_zero() {
    let sections = parse_sections(&json!([{"id": "empty", "title": "Empty"}])).unwrap();
    let result = calculate_overall_score(&sections, &Responses::new(), &sample_rules());
    assert_eq!(result.score, 0.0);
    assert!(!result.passed);
    assert_eq!(result.sections[0].percentage, None);
}

#[test]
fn what_if_with_no_overrides_reproduces_baseline() {
    let sections = sample_sections();
    let rules = sample_rules();
    let answers = partial_answers();
    let result = what_if_analysis(&sections, &answers, &Responses::new(), &rules);
    assert_eq!(result.baseline, result.projected);
    assert_eq!(result.score_delta, 0.0);
    assert_eq!(
        result.projected,
        calculate_overall_score(&sections, &answers, &rules)
    );
    assert!(result.new_red_flags.is_empty());
    assert!(!result.outcome_changed);
}

#[test]
fn what_if_projects_overrides_without_touching_responses() {
    let answers = partial_answers();
    let before = answers.clone();
    let overrides = responses(&[("dosing_rate", json!(200))]);
    let result = what_if_analysis(&sample_sections(), &answers, &overrides, &sample_rules());
    assert_eq!(answers, before);
    assert_eq!(result.baseline.score, 61.11);
    assert_eq!(result.projected.score, 83.33);
    assert_eq!(result.score_delta, 22.22);
    assert_eq!(result.section_deltas[0].delta, Some(33.33));
    assert_eq!(result.section_deltas[1].delta, Some(0.0));
    assert!(result.outcome_changed);
}

#[test]
fn what_if_reports_new_and_resolved_flags() {
    let sections = sample_sections();
    let rules = sample_rules();
    let raise = responses(&[("premix_stored", json!("no"))]);
    let result = what_if_analysis(&sections, &full_answers(), &raise, &rules);
    assert_eq!(result.new_red_flags.len(), 1);
    assert_eq!(result.new_red_flags[0].rule_id, "no-premix");
    assert_eq!(result.projected.outcome, AuditOutcome::FailRedFlag);

    let mut flagged = full_answers();
    flagged.insert("premix_stored".into(), json!(false));
    let clear = responses(&[("premix_stored", Value::Null)]);
    let result = what_if_analysis(&sections, &flagged, &clear, &rules);
    assert_eq!(result.resolved_red_flags.len(), 1);
    assert_eq!(result.projected.missing_required, vec!["premix_stored".to_string()]);
}

#[test]
fn rules_without_policy_are_rejected() {
    let err = parse_rules(&json!({"pass_threshold": 70, "red_flags": []})).unwrap_err();
    assert!(matches!(err, AnalyticsError::InvalidRules(_)));
}

#[test]
fn template_validation_catches_structural_errors() {
    let duplicate = parse_sections(&json!([
        {"id": "a", "title": "A", "items": [{"id": "x", "question": "?", "type": "text"}]},
        {"id": "b", "title": "B", "items": [{"id": "x", "question": "?", "type": "boolean"}]}
    ]))
    .unwrap();
    assert!(validate_template(&duplicate).is_err());

    let bad_scale = parse_sections(&json!([
        {"id": "a", "title": "A", "items": [{"id": "x", "question": "?", "type": "scale", "min": 5, "max": 5}]}
    ]))
    .unwrap();
    assert!(validate_template(&bad_scale).is_err());

    assert!(validate_template(&sample_sections()).is_ok());
}

#[test]
fn rule_validation_checks_items_and_operands() {
    let sections = sample_sections();
    let unknown_item = rules_with(
        "advisory",
        json!([{"id": "r", "item_id": "nope", "operator": "missing", "message": "m"}]),
    );
    assert!(validate_rules(&unknown_item, &sections).is_err());

    let bad_operand = rules_with(
        "advisory",
        json!([{"id": "r", "item_id": "dosing_rate", "operator": "less_than", "value": "low", "message": "m"}]),
    );
    assert!(validate_rules(&bad_operand, &sections).is_err());
    assert!(validate_rules(&sample_rules(), &sections).is_ok());
}

#[test]
fn score_documents_parses_and_scores() {
    let sections = json!([{"id": "s", "title": "S", "items": [
        {"id": "q", "question": "?", "type": "boolean", "required": true}
    ]}]);
    let rules = json!({"red_flag_policy": "advisory"});
    let result = score_documents(&sections, &rules, &responses(&[("q", json!("yes"))])).unwrap();
    assert_eq!(result.score, 100.0);
    assert_eq!(result.pass_threshold, 75.0);

    assert!(score_documents(&json!({"not": "a list"}), &rules, &Responses::new()).is_err());
}

// ---- predictive ----

fn hourly(values: &[f64], now: DateTime<Utc>) -> Vec<Reading> {
    let n = values.len() as i64;
    values
        .iter()
        .enumerate()
        .map(|(i, v)| Reading {
            value: *v,
            recorded_at: now - Duration::hours(n - 1 - i as i64),
        })
        .collect()
}

fn thresholds(max: f64, critical: f64) -> SensorThresholds {
    SensorThresholds {
        min: None,
        max: Some(max),
        critical: Some(critical),
    }
}

#[test]
fn fewer_than_ten_readings_is_insufficient_data() {
    let now = Utc::now();
    let cfg = HeuristicConfig::default();
    for n in 0..10 {
        let readings = hourly(&vec![1000.0; n], now);
        let p = analyze_sensor("s1", &readings, &thresholds(100.0, 150.0), now, &cfg);
        assert_eq!(p.risk_level, RiskLevel::InsufficientData);
        assert_eq!(p.confidence, 0.0);
        assert!(p.metrics.is_none());
    }
}

#[test]
fn configured_minimum_below_ten_is_ignored() {
    let now = Utc::now();
    let cfg = HeuristicConfig {
        min_readings: 5,
        ..HeuristicConfig::default()
    };
    let readings = hourly(&[80.0, 85.0, 90.0, 95.0, 99.0, 104.0], now);
    let p = analyze_sensor("s1", &readings, &thresholds(100.0, 150.0), now, &cfg);
    assert_eq!(p.risk_level, RiskLevel::InsufficientData);
    assert_eq!(p.confidence, 0.0);
}

#[test]
fn out_of_range_window_is_clamped() {
    let now = Utc::now();
    let readings = hourly(&[50.0; 12], now);
    for window_days in [0, -3, i64::MAX] {
        let cfg = HeuristicConfig {
            window_days,
            ..HeuristicConfig::default()
        };
        let p = analyze_sensor("s1", &readings, &thresholds(100.0, 150.0), now, &cfg);
        assert_eq!(p.risk_level, RiskLevel::Low);
    }
}

#[test]
fn readings_outside_the_window_are_ignored() {
    let now = Utc::now();
    let old: Vec<Reading> = (0..20)
        .map(|i| Reading {
            value: 500.0,
            recorded_at: now - Duration::days(10) + Duration::minutes(i),
        })
        .collect();
    let p = analyze_sensor("s1", &old, &thresholds(100.0, 150.0), now, &HeuristicConfig::default());
    assert_eq!(p.risk_level, RiskLevel::InsufficientData);
}

#[test]
fn stable_series_is_low_risk() {
    let now = Utc::now();
    let values: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 49.0 } else { 51.0 }).collect();
    let p = analyze_sensor("s1", &hourly(&values, now), &thresholds(100.0, 150.0), now, &HeuristicConfig::default());
    assert_eq!(p.risk_level, RiskLevel::Low);
    assert_eq!(p.recommended_action, RecommendedAction::RoutineMonitoring);
    assert!(p.days_to_breach.is_none());
    assert!(p.confidence > 0.5 && p.confidence <= 1.0);
}

#[test]
fn recent_mean_over_critical_is_critical() {
    let now = Utc::now();
    let p = analyze_sensor("s1", &hourly(&[160.0; 15], now), &thresholds(100.0, 150.0), now, &HeuristicConfig::default());
    assert_eq!(p.risk_level, RiskLevel::Critical);
    assert_eq!(p.recommended_action, RecommendedAction::ImmediateInspection);
}

#[test]
fn rising_series_extrapolates_breach() {
    let now = Utc::now();
    let values: Vec<f64> = (0..30).map(|i| 50.0 + i as f64).collect();
    let p = analyze_sensor("s1", &hourly(&values, now), &thresholds(100.0, 150.0), now, &HeuristicConfig::default());
    let metrics = p.metrics.as_ref().unwrap();
    assert_eq!(metrics.early_mean, 54.5);
    assert_eq!(metrics.recent_mean, 74.5);
    let days = p.days_to_breach.unwrap();
    assert!(days > 0.8 && days < 0.95, "days_to_breach = {days}");
    assert!(p.predicted_breach_at.unwrap() > now);
    assert_eq!(p.risk_level, RiskLevel::High);
}

#[test]
fn near_zero_early_mean_gives_null_drift() {
    let now = Utc::now();
    let values = [0.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 1.0, 1.0, 1.0, 1.0];
    let p = analyze_sensor("s1", &hourly(&values, now), &thresholds(100.0, 150.0), now, &HeuristicConfig::default());
    let metrics = p.metrics.as_ref().unwrap();
    assert!(metrics.drift_pct.is_none());
    assert!(metrics.cv_pct.is_finite());
    assert!(p.days_to_breach.is_none());
    assert!(p.reasons.iter().any(|r| r.contains("drift undefined")));
    assert!(p.confidence.is_finite() && p.confidence < 0.8);
    let json = serde_json::to_value(&p).unwrap();
    assert_eq!(json["metrics"]["drift_pct"], Value::Null);
}

fn metrics_with_recent(recent_mean: f64) -> SensorMetrics {
    SensorMetrics {
        count: 30,
        mean: 50.0,
        std_dev: 2.0,
        cv_pct: 4.0,
        early_mean: 50.0,
        recent_mean,
        drift_pct: Some(5.0),
        min: 45.0,
        max: 55.0,
        latest: recent_mean,
    }
}

#[test]
fn classification_is_monotonic_in_recent_mean() {
    let cfg = HeuristicConfig::default();
    let th = thresholds(100.0, 150.0);
    let mut previous = RiskLevel::InsufficientData;
    for step in 0..=400 {
        let recent = step as f64 * 0.5;
        let (level, _) = classify_risk(&metrics_with_recent(recent), None, &th, &cfg);
        assert!(level >= previous, "risk dropped at recent mean {recent}");
        previous = level;
    }
    assert_eq!(previous, RiskLevel::Critical);
    assert_eq!(classify_risk(&metrics_with_recent(92.0), None, &th, &cfg).0, RiskLevel::Medium);
    assert_eq!(classify_risk(&metrics_with_recent(100.0), None, &th, &cfg).0, RiskLevel::High);
}

#[test]
fn drift_and_imminent_breach_raise_risk() {
    let cfg = HeuristicConfig::default();
    let th = thresholds(100.0, 150.0);
    let mut m = metrics_with_recent(50.0);
    m.drift_pct = Some(-20.0);
    assert_eq!(classify_risk(&m, None, &th, &cfg).0, RiskLevel::Medium);
    m.drift_pct = Some(35.0);
    assert_eq!(classify_risk(&m, None, &th, &cfg).0, RiskLevel::High);
    m.drift_pct = Some(1.0);
    assert_eq!(classify_risk(&m, Some(3.0), &th, &cfg).0, RiskLevel::High);
    assert_eq!(classify_risk(&m, Some(30.0), &th, &cfg).0, RiskLevel::Low);
    m.cv_pct = 45.0;
    assert_eq!(classify_risk(&m, None, &th, &cfg).0, RiskLevel::Medium);
}

#[test]
fn equipment_risk_is_the_worst_sensor() {
    let now = Utc::now();
    let cfg = HeuristicConfig::default();
    let calm = analyze_sensor("a", &hourly(&[50.0; 20], now), &thresholds(100.0, 150.0), now, &cfg);
    let hot = analyze_sensor("b", &hourly(&[160.0; 20], now), &thresholds(100.0, 150.0), now, &cfg);
    let risk = aggregate_equipment("eq-1", vec![calm, hot]);
    assert_eq!(risk.risk_level, RiskLevel::Critical);
    assert_eq!(risk.sensors.len(), 2);
    assert!(risk.risk_level.needs_maintenance());

    let empty = aggregate_equipment("eq-2", Vec::new());
    assert_eq!(empty.risk_level, RiskLevel::InsufficientData);
    assert!(empty.earliest_breach_days.is_none());
}

// ---- threshold ----

#[test]
fn critical_threshold_takes_precedence() {
    let th = SensorThresholds {
        min: Some(10.0),
        max: Some(100.0),
        critical: Some(150.0),
    };
    let breach = evaluate_reading("Dryer temp", "C", 160.0, &th).unwrap();
    assert_eq!(breach.alert_type, SensorAlertType::Critical);
    assert_eq!(breach.severity, AlertSeverity::Critical);
    assert_eq!(breach.threshold, 150.0);

    let high = evaluate_reading("Dryer temp", "C", 120.0, &th).unwrap();
    assert_eq!(high.alert_type, SensorAlertType::ThresholdHigh);
    assert!(high.message.contains("above the max threshold"));

    let low = evaluate_reading("Dryer temp", "C", 5.0, &th).unwrap();
    assert_eq!(low.alert_type, SensorAlertType::ThresholdLow);
}

#[test]
fn readings_on_the_boundary_or_without_thresholds_pass() {
    let th = SensorThresholds {
        min: Some(10.0),
        max: Some(100.0),
        critical: None,
    };
    assert!(evaluate_reading("s", "", 100.0, &th).is_none());
    assert!(evaluate_reading("s", "", 10.0, &th).is_none());
    assert!(evaluate_reading("s", "", f64::NAN, &th).is_none());
    assert!(evaluate_reading("s", "", 1e9, &SensorThresholds::default()).is_none());
}
