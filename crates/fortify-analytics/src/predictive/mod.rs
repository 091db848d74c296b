//! Predictive-maintenance heuristic over IoT sensor readings.
//!
//! Readings inside a trailing window are summarised (mean, standard deviation,
//! coefficient of variation, drift between the early and recent thirds), then
//! classified into a risk level with a linear time-to-threshold estimate.

mod heuristic;
mod stats;

pub use heuristic::{aggregate_equipment, analyze_sensor, classify_risk};
pub use stats::{coefficient_of_variation, drift_pct, mean, std_dev};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SensorThresholds {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub critical: Option<f64>,
}

/// Fewer readings than this inside the window always yield
/// `INSUFFICIENT_DATA`; `min_readings` can only raise the bar.
pub const MIN_READINGS: usize = 10;

/// Longest trailing window the heuristic accepts.
pub const MAX_WINDOW_DAYS: i64 = 365;

/// Tunables, loaded from the `[predictive]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicConfig {
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default = "default_min_readings")]
    pub min_readings: usize,
    #[serde(default = "default_cv_threshold")]
    pub cv_threshold_pct: f64,
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold_pct: f64,
    #[serde(default = "default_high_drift_threshold")]
    pub high_drift_threshold_pct: f64,
    #[serde(default = "default_near_max_ratio")]
    pub near_max_ratio: f64,
    #[serde(default = "default_imminent_breach_days")]
    pub imminent_breach_days: f64,
    #[serde(default = "default_drift_epsilon")]
    pub drift_epsilon: f64,
}

fn default_window_days() -> i64 {
    7
}

fn default_min_readings() -> usize {
    10
}

fn default_cv_threshold() -> f64 {
    30.0
}

fn default_drift_threshold() -> f64 {
    15.0
}

fn default_high_drift_threshold() -> f64 {
    30.0
}

fn default_near_max_ratio() -> f64 {
    0.9
}

fn default_imminent_breach_days() -> f64 {
    7.0
}

fn default_drift_epsilon() -> f64 {
    1e-9
}

impl HeuristicConfig {
    /// Reading count a sensor needs before it is classified.
    pub fn required_readings(&self) -> usize {
        self.min_readings.max(MIN_READINGS)
    }

    pub fn effective_window_days(&self) -> i64 {
        self.window_days.clamp(1, MAX_WINDOW_DAYS)
    }
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            min_readings: default_min_readings(),
            cv_threshold_pct: default_cv_threshold(),
            drift_threshold_pct: default_drift_threshold(),
            high_drift_threshold_pct: default_high_drift_threshold(),
            near_max_ratio: default_near_max_ratio(),
            imminent_breach_days: default_imminent_breach_days(),
            drift_epsilon: default_drift_epsilon(),
        }
    }
}

/// Ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    InsufficientData,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::InsufficientData => "INSUFFICIENT_DATA",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    pub fn recommended_action(self) -> RecommendedAction {
        match self {
            RiskLevel::InsufficientData | RiskLevel::Low => RecommendedAction::RoutineMonitoring,
            RiskLevel::Medium => RecommendedAction::MonitorClosely,
            RiskLevel::High => RecommendedAction::ScheduleMaintenance,
            RiskLevel::Critical => RecommendedAction::ImmediateInspection,
        }
    }

    /// HIGH and CRITICAL warrant a predictive maintenance task.
    pub fn needs_maintenance(self) -> bool {
        self >= RiskLevel::High
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
    RoutineMonitoring,
    MonitorClosely,
    ScheduleMaintenance,
    ImmediateInspection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SensorMetrics {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    /// Coefficient of variation in percent (0 when the mean is ~0)
    pub cv_pct: f64,
    pub early_mean: f64,
    pub recent_mean: f64,
    /// Percentage change early → recent; None when the early mean is ~0
    pub drift_pct: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub latest: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SensorPrediction {
    pub sensor_id: String,
    pub risk_level: RiskLevel,
    /// 0..=1
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub metrics: Option<SensorMetrics>,
    pub days_to_breach: Option<f64>,
    pub predicted_breach_at: Option<DateTime<Utc>>,
    pub recommended_action: RecommendedAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EquipmentRisk {
    pub equipment_id: String,
    /// Highest risk across the equipment's sensors
    pub risk_level: RiskLevel,
    pub recommended_action: RecommendedAction,
    pub earliest_breach_days: Option<f64>,
    pub sensors: Vec<SensorPrediction>,
}
