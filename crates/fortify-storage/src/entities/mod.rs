pub mod alert;
pub mod audit_log;
pub mod compliance_annotation;
pub mod compliance_audit;
pub mod compliance_template;
pub mod delivery_trip;
pub mod equipment;
pub mod iot_sensor;
pub mod maintenance_task;
pub mod mill;
pub mod mill_certificate;
pub mod notification;
pub mod rfp;
pub mod rfp_bid;
pub mod sensor_alert;
pub mod sensor_reading;
pub mod training_certificate;
pub mod training_course;
pub mod training_progress;
pub mod trip_tracking;
pub mod user;
