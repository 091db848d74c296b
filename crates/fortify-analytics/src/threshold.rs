//! Per-reading threshold check, run as each sensor reading is appended.

use crate::predictive::SensorThresholds;
use fortify_common::types::{AlertSeverity, SensorAlertType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    GreaterThan,
    LessThan,
    GreaterEqual,
}

impl CompareOp {
    fn check(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterEqual => value >= threshold,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::GreaterThan => "above",
            Self::LessThan => "below",
            Self::GreaterEqual => "at or above",
        }
    }
}

/// A reading that crossed one of its sensor's thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBreach {
    pub alert_type: SensorAlertType,
    pub severity: AlertSeverity,
    pub threshold: f64,
    pub message: String,
}

/// Checks one reading. The critical threshold wins over max, max over min.
pub fn evaluate_reading(
    sensor_name: &str,
    unit: &str,
    value: f64,
    thresholds: &SensorThresholds,
) -> Option<ThresholdBreach> {
    if !value.is_finite() {
        return None;
    }
    let checks = [
        (
            thresholds.critical,
            CompareOp::GreaterEqual,
            SensorAlertType::Critical,
            AlertSeverity::Critical,
            "critical",
        ),
        (
            thresholds.max,
            CompareOp::GreaterThan,
            SensorAlertType::ThresholdHigh,
            AlertSeverity::High,
            "max",
        ),
        (
            thresholds.min,
            CompareOp::LessThan,
            SensorAlertType::ThresholdLow,
            AlertSeverity::Medium,
            "min",
        ),
    ];
    checks
        .into_iter()
        .find_map(|(threshold, op, alert_type, severity, label)| {
            let threshold = threshold?;
            op.check(value, threshold).then(|| ThresholdBreach {
                alert_type,
                severity,
                threshold,
                message: format!(
                    "{sensor_name} reading {value}{unit} is {} the {label} threshold {threshold}{unit}",
                    op.describe()
                ),
            })
        })
}
