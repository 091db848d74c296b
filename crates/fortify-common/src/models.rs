//! Records returned by the store and serialized by the API.

use crate::types::{
    AlertSeverity, AlertStatus, AnnotationType, AuditStatus, BidStatus, EquipmentStatus,
    MaintenancePriority, MaintenanceStatus, MaintenanceTaskType, MillStatus, RfpStatus, Role,
    SensorAlertType, TrainingStatus, TripStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Portal account. The password hash never leaves the store.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    /// Assigned mill (mill roles only)
    pub mill_id: Option<String>,
    pub is_active: bool,
    pub token_version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Mill {
    pub id: String,
    pub name: String,
    /// Registry code, unique
    pub code: String,
    pub region: String,
    pub country: String,
    pub address: Option<String>,
    pub status: MillStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Equipment {
    pub id: String,
    pub mill_id: String,
    pub name: String,
    pub equipment_type: String,
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub status: EquipmentStatus,
    pub installed_at: Option<DateTime<Utc>>,
    pub last_maintenance_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IotSensor {
    pub id: String,
    pub equipment_id: String,
    pub mill_id: String,
    pub name: String,
    /// e.g. temperature, vibration, dosing_rate
    pub sensor_type: String,
    pub unit: String,
    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,
    pub critical_threshold: Option<f64>,
    pub calibration_date: Option<DateTime<Utc>>,
    pub next_calibration_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SensorReading {
    pub id: String,
    pub sensor_id: String,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SensorAlert {
    pub id: String,
    pub sensor_id: String,
    pub equipment_id: String,
    pub mill_id: String,
    pub alert_type: SensorAlertType,
    pub severity: AlertSeverity,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub is_resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MaintenanceTask {
    pub id: String,
    pub equipment_id: String,
    pub mill_id: String,
    pub title: String,
    pub description: Option<String>,
    pub task_type: MaintenanceTaskType,
    pub status: MaintenanceStatus,
    pub priority: MaintenancePriority,
    pub assignee_id: Option<String>,
    pub scheduled_date: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComplianceTemplate {
    pub id: String,
    pub name: String,
    pub version: i32,
    pub description: Option<String>,
    /// Section/item rubric
    #[schema(value_type = Object)]
    pub sections: Value,
    /// Pass threshold, red-flag rules and policy
    #[schema(value_type = Object)]
    pub scoring_rules: Value,
    pub is_active: bool,
    /// Template this version was cloned from
    pub parent_id: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComplianceAudit {
    pub id: String,
    pub mill_id: String,
    pub template_id: String,
    pub submitted_by: String,
    pub reviewer_id: Option<String>,
    /// item id → answer
    #[schema(value_type = Object)]
    pub responses: BTreeMap<String, Value>,
    pub score: Option<f64>,
    #[schema(value_type = Object)]
    pub section_scores: Option<Value>,
    #[schema(value_type = Object)]
    pub red_flags: Option<Value>,
    pub passed: Option<bool>,
    pub status: AuditStatus,
    pub review_notes: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComplianceAnnotation {
    pub id: String,
    pub audit_id: String,
    pub item_id: Option<String>,
    pub author_id: String,
    pub annotation_type: AnnotationType,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MillCertificate {
    pub id: String,
    pub mill_id: String,
    pub audit_id: String,
    pub certificate_number: String,
    pub score: f64,
    pub issued_by: String,
    pub issued_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrainingCourse {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub duration_minutes: i32,
    pub passing_score: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrainingProgress {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    /// 0..=100
    pub progress: f64,
    pub score: Option<f64>,
    pub status: TrainingStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub certificate_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrainingCertificate {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub certificate_number: String,
    pub score: f64,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Rfp {
    pub id: String,
    pub buyer_id: String,
    pub title: String,
    pub description: Option<String>,
    pub commodity: String,
    pub quantity: f64,
    pub unit: String,
    pub delivery_location: String,
    pub budget: Option<f64>,
    pub deadline: DateTime<Utc>,
    pub status: RfpStatus,
    pub awarded_bid_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RfpBid {
    pub id: String,
    pub rfp_id: String,
    pub mill_id: String,
    pub submitted_by: String,
    pub price_per_unit: f64,
    pub quantity: f64,
    pub notes: Option<String>,
    pub status: BidStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// One stop of a multi-drop delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeliveryStop {
    pub name: String,
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub delivered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryTrip {
    pub id: String,
    pub rfp_id: Option<String>,
    pub mill_id: String,
    pub driver_id: Option<String>,
    pub vehicle_number: String,
    pub origin: String,
    pub destination: String,
    pub status: TripStatus,
    pub current_location: Option<GeoPoint>,
    pub delivery_sequence: Vec<DeliveryStop>,
    pub departed_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TripTrackingPoint {
    pub id: String,
    pub trip_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: Option<f64>,
    pub heading: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Alert {
    pub id: String,
    /// e.g. SENSOR_THRESHOLD, AUDIT_REVIEW, MAINTENANCE_DUE
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub title: String,
    pub message: String,
    pub recipient_id: Option<String>,
    pub recipient_role: Option<Role>,
    pub mill_id: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: Option<Value>,
    pub read_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub category: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditLog {
    pub id: String,
    /// None for system actions
    pub user_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    #[schema(value_type = Object)]
    pub details: Option<Value>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}
