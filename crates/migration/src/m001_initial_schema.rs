use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

// Timestamps are RFC 3339 TEXT; JSON documents are serialized TEXT.
const UP_SQL: &str = "
CREATE TABLE IF NOT EXISTS mills (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    code TEXT NOT NULL UNIQUE,
    region TEXT NOT NULL,
    country TEXT NOT NULL,
    address TEXT,
    status TEXT NOT NULL DEFAULT 'ACTIVE',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_mills_region ON mills(region);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    email TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL,
    mill_id TEXT,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    token_version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
CREATE INDEX IF NOT EXISTS idx_users_mill_id ON users(mill_id);

CREATE TABLE IF NOT EXISTS equipment (
    id TEXT PRIMARY KEY NOT NULL,
    mill_id TEXT NOT NULL,
    name TEXT NOT NULL,
    equipment_type TEXT NOT NULL,
    manufacturer TEXT,
    model_number TEXT,
    serial_number TEXT,
    status TEXT NOT NULL DEFAULT 'OPERATIONAL',
    installed_at TEXT,
    last_maintenance_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_equipment_mill_id ON equipment(mill_id);

CREATE TABLE IF NOT EXISTS iot_sensors (
    id TEXT PRIMARY KEY NOT NULL,
    equipment_id TEXT NOT NULL,
    mill_id TEXT NOT NULL,
    name TEXT NOT NULL,
    sensor_type TEXT NOT NULL,
    unit TEXT NOT NULL,
    min_threshold REAL,
    max_threshold REAL,
    critical_threshold REAL,
    calibration_date TEXT,
    next_calibration_date TEXT,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_iot_sensors_equipment_id ON iot_sensors(equipment_id);
CREATE INDEX IF NOT EXISTS idx_iot_sensors_mill_id ON iot_sensors(mill_id);

CREATE TABLE IF NOT EXISTS sensor_readings (
    id TEXT PRIMARY KEY NOT NULL,
    sensor_id TEXT NOT NULL,
    value REAL NOT NULL,
    recorded_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sensor_readings_sensor_time ON sensor_readings(sensor_id, recorded_at DESC);

CREATE TABLE IF NOT EXISTS sensor_alerts (
    id TEXT PRIMARY KEY NOT NULL,
    sensor_id TEXT NOT NULL,
    equipment_id TEXT NOT NULL,
    mill_id TEXT NOT NULL,
    alert_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    value REAL NOT NULL,
    threshold REAL NOT NULL,
    message TEXT NOT NULL,
    is_resolved BOOLEAN NOT NULL DEFAULT 0,
    resolved_by TEXT,
    resolved_at TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sensor_alerts_sensor_id ON sensor_alerts(sensor_id);
CREATE INDEX IF NOT EXISTS idx_sensor_alerts_mill_id ON sensor_alerts(mill_id);

CREATE TABLE IF NOT EXISTS maintenance_tasks (
    id TEXT PRIMARY KEY NOT NULL,
    equipment_id TEXT NOT NULL,
    mill_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    task_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'SCHEDULED',
    priority TEXT NOT NULL DEFAULT 'MEDIUM',
    assignee_id TEXT,
    scheduled_date TEXT NOT NULL,
    completed_at TEXT,
    notes TEXT,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_maintenance_tasks_mill_id ON maintenance_tasks(mill_id);
CREATE INDEX IF NOT EXISTS idx_maintenance_tasks_equipment_id ON maintenance_tasks(equipment_id);
CREATE INDEX IF NOT EXISTS idx_maintenance_tasks_status ON maintenance_tasks(status);

CREATE TABLE IF NOT EXISTS compliance_templates (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    description TEXT,
    sections TEXT NOT NULL,
    scoring_rules TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    parent_id TEXT,
    created_by TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(name, version)
);

CREATE TABLE IF NOT EXISTS compliance_audits (
    id TEXT PRIMARY KEY NOT NULL,
    mill_id TEXT NOT NULL,
    template_id TEXT NOT NULL,
    submitted_by TEXT NOT NULL,
    reviewer_id TEXT,
    responses TEXT NOT NULL DEFAULT '{}',
    score REAL,
    section_scores TEXT,
    red_flags TEXT,
    passed BOOLEAN,
    status TEXT NOT NULL DEFAULT 'IN_PROGRESS',
    review_notes TEXT,
    submitted_at TEXT,
    reviewed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_compliance_audits_mill_id ON compliance_audits(mill_id);
CREATE INDEX IF NOT EXISTS idx_compliance_audits_status ON compliance_audits(status);

CREATE TABLE IF NOT EXISTS compliance_annotations (
    id TEXT PRIMARY KEY NOT NULL,
    audit_id TEXT NOT NULL,
    item_id TEXT,
    author_id TEXT NOT NULL,
    annotation_type TEXT NOT NULL,
    comment TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_compliance_annotations_audit_id ON compliance_annotations(audit_id);

CREATE TABLE IF NOT EXISTS mill_certificates (
    id TEXT PRIMARY KEY NOT NULL,
    mill_id TEXT NOT NULL,
    audit_id TEXT NOT NULL UNIQUE,
    certificate_number TEXT NOT NULL UNIQUE,
    score REAL NOT NULL,
    issued_by TEXT NOT NULL,
    issued_at TEXT NOT NULL,
    valid_until TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_mill_certificates_mill_id ON mill_certificates(mill_id);

CREATE TABLE IF NOT EXISTS training_courses (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    category TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL DEFAULT 0,
    passing_score REAL NOT NULL DEFAULT 70,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS training_progress (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    course_id TEXT NOT NULL,
    progress REAL NOT NULL DEFAULT 0,
    score REAL,
    status TEXT NOT NULL DEFAULT 'NOT_STARTED',
    started_at TEXT,
    completed_at TEXT,
    certificate_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(user_id, course_id)
);

CREATE TABLE IF NOT EXISTS training_certificates (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    course_id TEXT NOT NULL,
    certificate_number TEXT NOT NULL UNIQUE,
    score REAL NOT NULL,
    issued_at TEXT NOT NULL,
    UNIQUE(user_id, course_id)
);

CREATE TABLE IF NOT EXISTS rfps (
    id TEXT PRIMARY KEY NOT NULL,
    buyer_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    commodity TEXT NOT NULL,
    quantity REAL NOT NULL,
    unit TEXT NOT NULL,
    delivery_location TEXT NOT NULL,
    budget REAL,
    deadline TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'DRAFT',
    awarded_bid_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rfps_buyer_id ON rfps(buyer_id);
CREATE INDEX IF NOT EXISTS idx_rfps_status ON rfps(status);

CREATE TABLE IF NOT EXISTS rfp_bids (
    id TEXT PRIMARY KEY NOT NULL,
    rfp_id TEXT NOT NULL,
    mill_id TEXT NOT NULL,
    submitted_by TEXT NOT NULL,
    price_per_unit REAL NOT NULL,
    quantity REAL NOT NULL,
    notes TEXT,
    status TEXT NOT NULL DEFAULT 'SUBMITTED',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(rfp_id, mill_id)
);

CREATE TABLE IF NOT EXISTS delivery_trips (
    id TEXT PRIMARY KEY NOT NULL,
    rfp_id TEXT,
    mill_id TEXT NOT NULL,
    driver_id TEXT,
    vehicle_number TEXT NOT NULL,
    origin TEXT NOT NULL,
    destination TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'SCHEDULED',
    current_location TEXT,
    delivery_sequence TEXT NOT NULL DEFAULT '[]',
    departed_at TEXT,
    arrived_at TEXT,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_delivery_trips_driver_id ON delivery_trips(driver_id);
CREATE INDEX IF NOT EXISTS idx_delivery_trips_status ON delivery_trips(status);

CREATE TABLE IF NOT EXISTS trip_tracking (
    id TEXT PRIMARY KEY NOT NULL,
    trip_id TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    speed_kmh REAL,
    heading REAL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trip_tracking_trip_time ON trip_tracking(trip_id, recorded_at);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY NOT NULL,
    alert_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    recipient_id TEXT,
    recipient_role TEXT,
    mill_id TEXT,
    metadata TEXT,
    read_at TEXT,
    acknowledged_at TEXT,
    resolved_at TEXT,
    resolved_by TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_recipient_id ON alerts(recipient_id);
CREATE INDEX IF NOT EXISTS idx_alerts_role_mill ON alerts(recipient_role, mill_id);
CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status);

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    category TEXT NOT NULL,
    link TEXT,
    is_read BOOLEAN NOT NULL DEFAULT 0,
    read_at TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notifications_user_id ON notifications(user_id, is_read);

CREATE TABLE IF NOT EXISTS audit_logs (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT,
    action TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    details TEXT,
    ip_address TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_logs_resource ON audit_logs(resource_type, resource_id);
CREATE INDEX IF NOT EXISTS idx_audit_logs_created_at ON audit_logs(created_at DESC);
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS audit_logs;
DROP TABLE IF EXISTS notifications;
DROP TABLE IF EXISTS alerts;
DROP TABLE IF EXISTS trip_tracking;
DROP TABLE IF EXISTS delivery_trips;
DROP TABLE IF EXISTS rfp_bids;
DROP TABLE IF EXISTS rfps;
DROP TABLE IF EXISTS training_certificates;
DROP TABLE IF EXISTS training_progress;
DROP TABLE IF EXISTS training_courses;
DROP TABLE IF EXISTS mill_certificates;
DROP TABLE IF EXISTS compliance_annotations;
DROP TABLE IF EXISTS compliance_audits;
DROP TABLE IF EXISTS compliance_templates;
DROP TABLE IF EXISTS maintenance_tasks;
DROP TABLE IF EXISTS sensor_alerts;
DROP TABLE IF EXISTS sensor_readings;
DROP TABLE IF EXISTS iot_sensors;
DROP TABLE IF EXISTS equipment;
DROP TABLE IF EXISTS users;
DROP TABLE IF EXISTS mills;
";
