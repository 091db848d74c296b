use super::stats::{coefficient_of_variation, drift_pct, mean, std_dev};
use super::{
    EquipmentRisk, HeuristicConfig, Reading, RiskLevel, SensorMetrics, SensorPrediction,
    SensorThresholds,
};
use crate::compliance::round2;
use chrono::{DateTime, Duration, Utc};

/// Forecasts further out than this are not reported.
const MAX_FORECAST_DAYS: f64 = 3650.0;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Analyses one sensor's readings inside the trailing window ending at `now`.
///
/// Readings outside the window or with non-finite values are ignored; the
/// rest need not be sorted.
pub fn analyze_sensor(
    sensor_id: &str,
    readings: &[Reading],
    thresholds: &SensorThresholds,
    now: DateTime<Utc>,
    config: &HeuristicConfig,
) -> SensorPrediction {
    let window_days = config.effective_window_days();
    let cutoff = now - Duration::days(window_days);
    let mut window: Vec<Reading> = readings
        .iter()
        .filter(|r| r.recorded_at > cutoff && r.recorded_at <= now && r.value.is_finite())
        .copied()
        .collect();
    window.sort_by_key(|r| r.recorded_at);

    let required = config.required_readings();
    if window.len() < required {
        return SensorPrediction {
            sensor_id: sensor_id.to_string(),
            risk_level: RiskLevel::InsufficientData,
            confidence: 0.0,
            reasons: vec![format!(
                "{} readings in the last {} days, at least {} required",
                window.len(),
                window_days,
                required
            )],
            metrics: None,
            days_to_breach: None,
            predicted_breach_at: None,
            recommended_action: RiskLevel::InsufficientData.recommended_action(),
        };
    }

    let values: Vec<f64> = window.iter().map(|r| r.value).collect();
    let n = values.len();
    let third = n / 3;
    let early = &window[..third];
    let recent = &window[n - third..];
    let early_mean = mean(&values[..third]);
    let recent_mean = mean(&values[n - third..]);

    let metrics = SensorMetrics {
        count: n,
        mean: mean(&values),
        std_dev: std_dev(&values),
        cv_pct: coefficient_of_variation(&values, config.drift_epsilon),
        early_mean,
        recent_mean,
        drift_pct: drift_pct(early_mean, recent_mean, config.drift_epsilon),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        latest: values[n - 1],
    };

    let breach = estimate_breach(&metrics, early, recent, thresholds, now);
    let days_to_breach = breach.map(|(days, _)| days);
    let (risk_level, reasons) = classify_risk(&metrics, days_to_breach, thresholds, config);

    SensorPrediction {
        sensor_id: sensor_id.to_string(),
        risk_level,
        confidence: confidence(&metrics),
        reasons,
        days_to_breach,
        predicted_breach_at: breach.map(|(_, at)| at),
        recommended_action: risk_level.recommended_action(),
        metrics: Some(metrics),
    }
}

struct Assessment {
    level: RiskLevel,
    reasons: Vec<String>,
}

impl Assessment {
    fn raise(&mut self, level: RiskLevel, reason: String) {
        self.level = self.level.max(level);
        self.reasons.push(reason);
    }
}

/// Maps computed metrics to a risk level and the reasons behind it.
///
/// The threshold rules only look at the recent mean, so for fixed
/// thresholds the level never decreases as the recent mean rises.
pub fn classify_risk(
    metrics: &SensorMetrics,
    days_to_breach: Option<f64>,
    thresholds: &SensorThresholds,
    config: &HeuristicConfig,
) -> (RiskLevel, Vec<String>) {
    let mut a = Assessment {
        level: RiskLevel::Low,
        reasons: Vec::new(),
    };
    let recent = metrics.recent_mean;

    match (thresholds.critical, thresholds.max) {
        (Some(critical), _) if recent >= critical => a.raise(
            RiskLevel::Critical,
            format!("recent mean {recent:.2} is at or above the critical threshold {critical}"),
        ),
        (_, Some(max)) if recent >= max => a.raise(
            RiskLevel::High,
            format!("recent mean {recent:.2} is at or above the max threshold {max}"),
        ),
        (_, Some(max)) if recent >= max * config.near_max_ratio => a.raise(
            RiskLevel::Medium,
            format!(
                "recent mean {recent:.2} is within {:.0}% of the max threshold {max}",
                (1.0 - config.near_max_ratio) * 100.0
            ),
        ),
        _ => {}
    }

    if metrics.cv_pct > config.cv_threshold_pct {
        a.raise(
            RiskLevel::Medium,
            format!("readings are unstable (CV {:.1}%)", metrics.cv_pct),
        );
    }

    match metrics.drift_pct {
        Some(drift) if drift.abs() > config.high_drift_threshold_pct => a.raise(
            RiskLevel::High,
            format!("strong drift of {drift:.1}% between early and recent readings"),
        ),
        Some(drift) if drift.abs() > config.drift_threshold_pct => a.raise(
            RiskLevel::Medium,
            format!("drift of {drift:.1}% between early and recent readings"),
        ),
        Some(_) => {}
        None => a
            .reasons
            .push("drift undefined: early readings average close to zero".to_string()),
    }

    if let Some(days) = days_to_breach {
        if days <= config.imminent_breach_days {
            a.raise(
                RiskLevel::High,
                format!("max threshold predicted to be reached in {days:.1} days"),
            );
        }
    }

    if a.reasons.is_empty() {
        a.reasons.push("readings within normal range".to_string());
    }
    (a.level, a.reasons)
}

/// Linear extrapolation from the early window centre to the recent window
/// centre, projected onto the max threshold.
fn estimate_breach(
    metrics: &SensorMetrics,
    early: &[Reading],
    recent: &[Reading],
    thresholds: &SensorThresholds,
    now: DateTime<Utc>,
) -> Option<(f64, DateTime<Utc>)> {
    let max = thresholds.max?;
    if metrics.drift_pct? <= 0.0 {
        return None;
    }
    if metrics.recent_mean >= max {
        return Some((0.0, now));
    }

    let base = early.first()?.recorded_at;
    let early_centre = centre_days(early, base);
    let recent_centre = centre_days(recent, base);
    let span = recent_centre - early_centre;
    if span <= 0.0 {
        return None;
    }
    let slope = (metrics.recent_mean - metrics.early_mean) / span;
    if slope <= 0.0 {
        return None;
    }

    let breach_offset = recent_centre + (max - metrics.recent_mean) / slope;
    let now_offset = (now - base).num_milliseconds() as f64 / MS_PER_DAY;
    let days = (breach_offset - now_offset).max(0.0);
    if days > MAX_FORECAST_DAYS {
        return None;
    }
    let at = now + Duration::milliseconds((days * MS_PER_DAY) as i64);
    Some((round2(days), at))
}

fn centre_days(window: &[Reading], base: DateTime<Utc>) -> f64 {
    let offsets: Vec<f64> = window
        .iter()
        .map(|r| (r.recorded_at - base).num_milliseconds() as f64 / MS_PER_DAY)
        .collect();
    mean(&offsets)
}

/// More readings and steadier values raise confidence; an undefined drift
/// costs 20%.
fn confidence(metrics: &SensorMetrics) -> f64 {
    let sample = (metrics.count as f64 / 50.0).min(1.0);
    let stability = 1.0 / (1.0 + metrics.cv_pct / 100.0);
    let mut c = 0.6 * sample + 0.4 * stability;
    if metrics.drift_pct.is_none() {
        c *= 0.8;
    }
    ((c * 1000.0).round() / 1000.0).clamp(0.0, 1.0)
}

/// Rolls sensor predictions up to their equipment.
pub fn aggregate_equipment(equipment_id: &str, sensors: Vec<SensorPrediction>) -> EquipmentRisk {
    let risk_level = sensors
        .iter()
        .map(|s| s.risk_level)
        .max()
        .unwrap_or(RiskLevel::InsufficientData);
    let earliest_breach_days = sensors
        .iter()
        .filter_map(|s| s.days_to_breach)
        .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.min(d))));
    EquipmentRisk {
        equipment_id: equipment_id.to_string(),
        risk_level,
        recommended_action: risk_level.recommended_action(),
        earliest_breach_days,
        sensors,
    }
}
