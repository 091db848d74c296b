use crate::store::*;
use crate::{auth, Actor, FortifyStore, StorageError};
use chrono::{Duration, Utc};
use fortify_analytics::compliance::score_documents;
use fortify_analytics::threshold::evaluate_reading;
use fortify_common::models::DeliveryStop;
use fortify_common::types::*;
use serde_json::json;
use std::collections::BTreeMap;
use tempfile::TempDir;

async fn setup() -> (TempDir, FortifyStore) {
    fortify_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}/fortify.db?mode=rwc", dir.path().display());
    let store = FortifyStore::new(&url, dir.path()).await.unwrap();
    (dir, store)
}

async fn make_mill(store: &FortifyStore, code: &str) -> String {
    store
        .create_mill(
            NewMill {
                name: format!("Mill {code}"),
                code: code.to_string(),
                region: "North".to_string(),
                country: "KE".to_string(),
                address: None,
            },
            &Actor::system(),
        )
        .await
        .unwrap()
        .id
}

async fn make_user(store: &FortifyStore, email: &str, role: Role, mill_id: Option<&str>) -> String {
    store
        .create_user(
            NewUser {
                email: email.to_string(),
                name: email.to_string(),
                password_hash: auth::hash_password_fast("secret-pass").unwrap(),
                role,
                mill_id: mill_id.map(str::to_string),
            },
            &Actor::system(),
        )
        .await
        .unwrap()
        .id
}

fn storage_error(err: &anyhow::Error) -> &StorageError {
    err.downcast_ref::<StorageError>()
        .unwrap_or_else(|| panic!("expected StorageError, got {err:?}"))
}

fn template_docs() -> (serde_json::Value, serde_json::Value) {
    let sections = json!([{
        "id": "premix",
        "title": "Premix handling",
        "weight": 1,
        "items": [
            {"id": "stored", "question": "Premix stored correctly?", "type": "boolean", "points": 2, "required": true},
            {"id": "dosing", "question": "Dosing rate", "type": "numeric", "min": 150, "max": 250, "required": true}
        ]
    }]);
    let rules = json!({
        "pass_threshold": 75,
        "red_flag_policy": "fail_audit",
        "red_flags": [
            {"id": "no-storage", "item_id": "stored", "operator": "equals", "value": false, "message": "Premix not stored"},
            {"id": "overdose", "item_id": "dosing", "operator": "greater_than", "value": 240, "message": "Dosing above safe limit"}
        ]
    });
    (sections, rules)
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let (_dir, store) = setup().await;
    make_user(&store, "ops@example.org", Role::Inspector, None).await;

    let err = store
        .create_user(
            NewUser {
                email: "OPS@example.org".to_string(),
                name: "again".to_string(),
                password_hash: "x".to_string(),
                role: Role::Inspector,
                mill_id: None,
            },
            &Actor::system(),
        )
        .await
        .unwrap_err();
    assert!(matches!(storage_error(&err), StorageError::Conflict(_)));
}

#[tokio::test]
async fn role_change_bumps_token_version() {
    let (_dir, store) = setup().await;
    let id = make_user(&store, "m@example.org", Role::MillOperator, None).await;

    let renamed = store
        .update_user(
            &id,
            UserUpdate {
                name: Some("Renamed".to_string()),
                ..Default::default()
            },
            &Actor::system(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renamed.token_version, 0);

    let promoted = store
        .update_user(
            &id,
            UserUpdate {
                role: Some(Role::MillManager),
                ..Default::default()
            },
            &Actor::system(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promoted.token_version, 1);
    assert_eq!(promoted.role, Role::MillManager);
}

#[tokio::test]
async fn mutations_write_audit_log_rows() {
    let (_dir, store) = setup().await;
    let admin = make_user(&store, "admin@example.org", Role::SystemAdmin, None).await;
    let actor = Actor::user(&admin, Some("10.0.0.1".to_string()));
    let mill = store
        .create_mill(
            NewMill {
                name: "Lakeside".to_string(),
                code: "lk-01".to_string(),
                region: "West".to_string(),
                country: "UG".to_string(),
                address: None,
            },
            &actor,
        )
        .await
        .unwrap();
    assert_eq!(mill.code, "LK-01");

    let filter = AuditLogFilter {
        resource_type: Some("mill".to_string()),
        ..Default::default()
    };
    let logs = store.list_audit_logs(&filter, 10, 0).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "CREATE");
    assert_eq!(logs[0].user_id.as_deref(), Some(admin.as_str()));
    assert_eq!(logs[0].ip_address.as_deref(), Some("10.0.0.1"));
    assert_eq!(logs[0].details.as_ref().unwrap()["code"], "LK-01");
}

#[tokio::test]
async fn equipment_is_filtered_by_mill() {
    let (_dir, store) = setup().await;
    let a = make_mill(&store, "A").await;
    let b = make_mill(&store, "B").await;
    for (mill, name) in [(&a, "Hammer mill"), (&a, "Doser"), (&b, "Mixer")] {
        store
            .create_equipment(
                NewEquipment {
                    mill_id: mill.clone(),
                    name: name.to_string(),
                    equipment_type: "MILL".to_string(),
                    manufacturer: None,
                    model_number: None,
                    serial_number: None,
                    installed_at: None,
                },
                &Actor::system(),
            )
            .await
            .unwrap();
    }
    let filter = EquipmentFilter {
        mill_id: Some(a.clone()),
        ..Default::default()
    };
    assert_eq!(store.count_equipment(&filter).await.unwrap(), 2);
    let items = store.list_equipment(&filter, 10, 0).await.unwrap();
    assert!(items.iter().all(|e| e.mill_id == a));
}

#[tokio::test]
async fn breaching_reading_raises_alerts_in_one_transaction() {
    let (_dir, store) = setup().await;
    let mill = make_mill(&store, "S1").await;
    let equipment = store
        .create_equipment(
            NewEquipment {
                mill_id: mill.clone(),
                name: "Doser".to_string(),
                equipment_type: "DOSER".to_string(),
                manufacturer: None,
                model_number: None,
                serial_number: None,
                installed_at: None,
            },
            &Actor::system(),
        )
        .await
        .unwrap();
    let sensor = store
        .create_sensor(
            NewSensor {
                equipment_id: equipment.id.clone(),
                mill_id: mill.clone(),
                name: "Motor temp".to_string(),
                sensor_type: "temperature".to_string(),
                unit: "C".to_string(),
                min_threshold: Some(10.0),
                max_threshold: Some(80.0),
                critical_threshold: Some(95.0),
                calibration_date: None,
                next_calibration_date: None,
            },
            &Actor::system(),
        )
        .await
        .unwrap();

    let thresholds = sensor.thresholds();
    let ok = evaluate_reading(&sensor.name, &sensor.unit, 50.0, &thresholds);
    let (_, alert) = store
        .append_reading(&sensor, 50.0, Utc::now(), ok.as_ref(), &Actor::system())
        .await
        .unwrap();
    assert!(alert.is_none());

    let hot = evaluate_reading(&sensor.name, &sensor.unit, 85.0, &thresholds);
    let (reading, alert) = store
        .append_reading(&sensor, 85.0, Utc::now(), hot.as_ref(), &Actor::system())
        .await
        .unwrap();
    let alert = alert.expect("breach should raise a sensor alert");
    assert_eq!(reading.value, 85.0);
    assert_eq!(alert.alert_type, SensorAlertType::ThresholdHigh);
    assert_eq!(alert.threshold, 80.0);

    // the mill manager sees the portal alert through role scoping
    let audience = AlertAudience {
        user_id: "someone".to_string(),
        role: Role::MillManager,
        mill_id: Some(mill.clone()),
    };
    let filter = AlertFilter {
        audience: Some(audience),
        ..Default::default()
    };
    let alerts = store.list_alerts(&filter, 10, 0).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, "SENSOR_THRESHOLD");

    let other_mill = AlertFilter {
        audience: Some(AlertAudience {
            user_id: "someone".to_string(),
            role: Role::MillManager,
            mill_id: Some("other".to_string()),
        }),
        ..Default::default()
    };
    assert_eq!(store.count_alerts(&other_mill).await.unwrap(), 0);

    assert_eq!(store.count_readings(&sensor.id, None, None).await.unwrap(), 2);
    let breaches = AuditLogFilter {
        action: Some("SENSOR_THRESHOLD_BREACH".to_string()),
        ..Default::default()
    };
    assert_eq!(store.count_audit_logs(&breaches).await.unwrap(), 1);

    let resolved = store
        .resolve_sensor_alert(&alert.id, &Actor::system())
        .await
        .unwrap()
        .unwrap();
    assert!(resolved.is_resolved);
    let err = store
        .resolve_sensor_alert(&alert.id, &Actor::system())
        .await
        .unwrap_err();
    assert!(matches!(storage_error(&err), StorageError::InvalidState(_)));
}

#[tokio::test]
async fn resolved_alert_rejects_further_transitions() {
    let (_dir, store) = setup().await;
    let alert = store
        .create_alert(
            NewAlert {
                alert_type: "MANUAL".to_string(),
                severity: AlertSeverity::Low,
                title: "Check dosing".to_string(),
                message: "Please check".to_string(),
                recipient_id: None,
                recipient_role: None,
                mill_id: None,
                metadata: None,
            },
            &Actor::system(),
        )
        .await
        .unwrap();

    let acked = store
        .update_alert_status(&alert.id, AlertStatus::Acknowledged, &Actor::system())
        .await
        .unwrap()
        .unwrap();
    assert!(acked.acknowledged_at.is_some());
    let resolved = store
        .update_alert_status(&alert.id, AlertStatus::Resolved, &Actor::user("u1", None))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.resolved_by.as_deref(), Some("u1"));

    let err = store
        .update_alert_status(&alert.id, AlertStatus::InProgress, &Actor::system())
        .await
        .unwrap_err();
    assert!(matches!(storage_error(&err), StorageError::Transition(_)));
}

#[tokio::test]
async fn completing_task_stamps_equipment_service_date() {
    let (_dir, store) = setup().await;
    let mill = make_mill(&store, "M1").await;
    let equipment = store
        .create_equipment(
            NewEquipment {
                mill_id: mill.clone(),
                name: "Sifter".to_string(),
                equipment_type: "SIFTER".to_string(),
                manufacturer: None,
                model_number: None,
                serial_number: None,
                installed_at: None,
            },
            &Actor::system(),
        )
        .await
        .unwrap();
    let task = store
        .create_task(
            NewTask {
                equipment_id: equipment.id.clone(),
                mill_id: mill.clone(),
                title: "Replace screen".to_string(),
                description: None,
                task_type: MaintenanceTaskType::Predictive,
                priority: MaintenancePriority::High,
                assignee_id: None,
                scheduled_date: Utc::now() + Duration::days(1),
                created_by: "system".to_string(),
            },
            &Actor::system(),
        )
        .await
        .unwrap();
    assert!(store.has_open_predictive_task(&equipment.id).await.unwrap());

    let skip = store
        .update_task(
            &task.id,
            TaskUpdate {
                status: Some(MaintenanceStatus::Completed),
                ..Default::default()
            },
            &Actor::system(),
        )
        .await
        .unwrap_err();
    assert!(matches!(storage_error(&skip), StorageError::Transition(_)));

    for status in [MaintenanceStatus::InProgress, MaintenanceStatus::Completed] {
        store
            .update_task(
                &task.id,
                TaskUpdate {
                    status: Some(status),
                    ..Default::default()
                },
                &Actor::system(),
            )
            .await
            .unwrap()
            .unwrap();
    }
    let done = store.get_task(&task.id).await.unwrap().unwrap();
    assert!(done.completed_at.is_some());
    let equipment = store.get_equipment(&equipment.id).await.unwrap().unwrap();
    assert!(equipment.last_maintenance_at.is_some());
    assert!(!store.has_open_predictive_task(&equipment.id).await.unwrap());
}

#[tokio::test]
async fn audit_lifecycle_through_certificate() {
    let (_dir, store) = setup().await;
    let mill = make_mill(&store, "C1").await;
    let manager = make_user(&store, "mgr@example.org", Role::MillManager, Some(&mill)).await;
    let inspector = make_user(&store, "insp@example.org", Role::Inspector, None).await;
    let (sections, rules) = template_docs();
    let template = store
        .create_template(
            NewTemplate {
                name: "Premix audit".to_string(),
                description: None,
                sections: sections.clone(),
                scoring_rules: rules.clone(),
            },
            &Actor::system(),
        )
        .await
        .unwrap();

    let mgr = Actor::user(&manager, None);
    let audit = store.start_audit(&mill, &template.id, &manager, &mgr).await.unwrap();
    assert_eq!(audit.status, AuditStatus::InProgress);

    let mut responses = BTreeMap::new();
    responses.insert("stored".to_string(), json!(true));
    responses.insert("dosing".to_string(), json!(200));
    responses.insert("scratch".to_string(), json!("x"));
    store.save_responses(&audit.id, &responses, &mgr).await.unwrap();
    let mut removal = BTreeMap::new();
    removal.insert("scratch".to_string(), serde_json::Value::Null);
    let saved = store.save_responses(&audit.id, &removal, &mgr).await.unwrap().unwrap();
    assert_eq!(saved.responses.len(), 2);

    let breakdown = score_documents(&sections, &rules, &saved.responses).unwrap();
    assert_eq!(breakdown.score, 100.0);
    let submitted = store.submit_audit(&audit.id, &breakdown, &mgr).await.unwrap().unwrap();
    assert_eq!(submitted.status, AuditStatus::Submitted);
    assert_eq!(submitted.passed, Some(true));
    assert_eq!(store.count_notifications(&inspector, true).await.unwrap(), 1);

    let err = store.save_responses(&audit.id, &responses, &mgr).await.unwrap_err();
    assert!(matches!(storage_error(&err), StorageError::InvalidState(_)));

    let insp = Actor::user(&inspector, None);
    let early = store.issue_certificate(&audit.id, 75.0, 365, &insp).await.unwrap_err();
    assert!(matches!(storage_error(&early), StorageError::NotEligible(_)));

    store
        .review_audit(&audit.id, AuditStatus::Approved, Some("Looks good".to_string()), &insp)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(store.count_notifications(&manager, true).await.unwrap(), 1);

    let cert = store.issue_certificate(&audit.id, 75.0, 365, &insp).await.unwrap().unwrap();
    assert!(cert.certificate_number.starts_with("FMC-"));
    assert_eq!(cert.score, 100.0);
    let again = store.issue_certificate(&audit.id, 75.0, 365, &insp).await.unwrap_err();
    assert!(matches!(storage_error(&again), StorageError::Conflict(_)));
}

#[tokio::test]
async fn red_flag_failure_blocks_certificate_after_approval() {
    let (_dir, store) = setup().await;
    let mill = make_mill(&store, "C2").await;
    let manager = make_user(&store, "mgr2@example.org", Role::MillManager, Some(&mill)).await;
    let inspector = make_user(&store, "insp2@example.org", Role::Inspector, None).await;
    let (sections, rules) = template_docs();
    let template = store
        .create_template(
            NewTemplate {
                name: "Premix audit".to_string(),
                description: None,
                sections: sections.clone(),
                scoring_rules: rules.clone(),
            },
            &Actor::system(),
        )
        .await
        .unwrap();

    let mgr = Actor::user(&manager, None);
    let audit = store.start_audit(&mill, &template.id, &manager, &mgr).await.unwrap();
    let mut responses = BTreeMap::new();
    responses.insert("stored".to_string(), json!(true));
    responses.insert("dosing".to_string(), json!(245));
    let saved = store.save_responses(&audit.id, &responses, &mgr).await.unwrap().unwrap();

    let breakdown = score_documents(&sections, &rules, &saved.responses).unwrap();
    assert_eq!(breakdown.score, 100.0);
    assert!(!breakdown.passed);
    let submitted = store.submit_audit(&audit.id, &breakdown, &mgr).await.unwrap().unwrap();
    assert_eq!(submitted.passed, Some(false));

    let insp = Actor::user(&inspector, None);
    store
        .review_audit(&audit.id, AuditStatus::Approved, None, &insp)
        .await
        .unwrap()
        .unwrap();
    let err = store.issue_certificate(&audit.id, 75.0, 365, &insp).await.unwrap_err();
    assert!(matches!(storage_error(&err), StorageError::NotEligible(_)));
    assert!(store.list_certificates(Some(&mill)).await.unwrap().is_empty());
}

#[tokio::test]
async fn new_template_version_deactivates_previous() {
    let (_dir, store) = setup().await;
    let (sections, rules) = template_docs();
    let v1 = store
        .create_template(
            NewTemplate {
                name: "Fortification".to_string(),
                description: Some("first".to_string()),
                sections,
                scoring_rules: rules,
            },
            &Actor::system(),
        )
        .await
        .unwrap();
    let v2 = store
        .create_template_version(&v1.id, TemplateRevision::default(), &Actor::system())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(v2.version, 2);
    assert_eq!(v2.parent_id.as_deref(), Some(v1.id.as_str()));
    assert_eq!(v2.sections, v1.sections);

    let old = store.get_template(&v1.id).await.unwrap().unwrap();
    assert!(!old.is_active);
    let active = TemplateFilter {
        active_only: true,
        ..Default::default()
    };
    assert_eq!(store.count_templates(&active).await.unwrap(), 1);

    let mill = make_mill(&store, "T1").await;
    let err = store
        .start_audit(&mill, &v1.id, "someone", &Actor::system())
        .await
        .unwrap_err();
    assert!(matches!(storage_error(&err), StorageError::InvalidState(_)));
}

#[tokio::test]
async fn training_certificate_is_issued_once() {
    let (_dir, store) = setup().await;
    let learner = make_user(&store, "op@example.org", Role::MillOperator, None).await;
    let course = store
        .create_course(
            NewCourse {
                title: "Premix safety".to_string(),
                description: None,
                category: "SAFETY".to_string(),
                duration_minutes: 45,
                passing_score: 70.0,
            },
            &Actor::system(),
        )
        .await
        .unwrap();
    let actor = Actor::user(&learner, None);

    let (p, cert) = store.upsert_progress(&learner, &course.id, 50.0, None, &actor).await.unwrap();
    assert_eq!(p.status, TrainingStatus::InProgress);
    assert!(cert.is_none());

    let (p, cert) = store
        .upsert_progress(&learner, &course.id, 100.0, Some(60.0), &actor)
        .await
        .unwrap();
    assert_eq!(p.status, TrainingStatus::Failed);
    assert!(cert.is_none());

    let (p, cert) = store
        .upsert_progress(&learner, &course.id, 30.0, Some(88.0), &actor)
        .await
        .unwrap();
    assert_eq!(p.progress, 100.0, "progress never goes backwards");
    assert_eq!(p.status, TrainingStatus::Completed);
    let cert = cert.expect("passing completion issues a certificate");
    assert_eq!(p.certificate_id.as_deref(), Some(cert.id.as_str()));

    let (_, again) = store
        .upsert_progress(&learner, &course.id, 100.0, Some(95.0), &actor)
        .await
        .unwrap();
    assert!(again.is_none());
    assert_eq!(store.list_training_certificates(Some(&learner)).await.unwrap().len(), 1);
    assert_eq!(store.count_notifications(&learner, false).await.unwrap(), 1);
}

#[tokio::test]
async fn awarding_a_bid_rejects_the_rest() {
    let (_dir, store) = setup().await;
    let buyer = make_user(&store, "buyer@example.org", Role::InstitutionalBuyer, None).await;
    let mill_a = make_mill(&store, "RA").await;
    let mill_b = make_mill(&store, "RB").await;
    let mgr_b = make_user(&store, "b@example.org", Role::MillManager, Some(&mill_b)).await;
    let rfp = store
        .create_rfp(
            NewRfp {
                buyer_id: buyer.clone(),
                title: "Fortified flour".to_string(),
                description: None,
                commodity: "MAIZE_FLOUR".to_string(),
                quantity: 100.0,
                unit: "t".to_string(),
                delivery_location: "Depot".to_string(),
                budget: None,
                deadline: Utc::now() + Duration::days(30),
            },
            &Actor::user(&buyer, None),
        )
        .await
        .unwrap();

    let bid = |mill: &str, price: f64| NewBid {
        mill_id: mill.to_string(),
        submitted_by: "someone".to_string(),
        price_per_unit: price,
        quantity: 100.0,
        notes: None,
    };
    let closed = store.create_bid(&rfp.id, bid(&mill_a, 10.0), &Actor::system()).await.unwrap_err();
    assert!(matches!(storage_error(&closed), StorageError::InvalidState(_)));

    store
        .update_rfp(
            &rfp.id,
            RfpUpdate {
                status: Some(RfpStatus::Open),
                ..Default::default()
            },
            &Actor::system(),
        )
        .await
        .unwrap();
    let a = store.create_bid(&rfp.id, bid(&mill_a, 10.0), &Actor::system()).await.unwrap();
    store.create_bid(&rfp.id, bid(&mill_b, 12.0), &Actor::system()).await.unwrap();
    let dup = store.create_bid(&rfp.id, bid(&mill_a, 9.0), &Actor::system()).await.unwrap_err();
    assert!(matches!(storage_error(&dup), StorageError::Conflict(_)));

    let awarded = store.award_bid(&rfp.id, &a.id, &Actor::system()).await.unwrap().unwrap();
    assert_eq!(awarded.status, RfpStatus::Awarded);
    assert_eq!(awarded.awarded_bid_id.as_deref(), Some(a.id.as_str()));

    let bids = store.list_bids(&rfp.id, None).await.unwrap();
    assert_eq!(bids[0].status, BidStatus::Accepted);
    assert_eq!(bids[1].status, BidStatus::Rejected);
    assert_eq!(store.count_notifications(&mgr_b, false).await.unwrap(), 1);
}

#[tokio::test]
async fn tracking_starts_trip_and_completion_closes_it() {
    let (_dir, store) = setup().await;
    let mill = make_mill(&store, "L1").await;
    let trip = store
        .create_trip(
            NewTrip {
                rfp_id: None,
                mill_id: mill,
                driver_id: Some("driver-1".to_string()),
                vehicle_number: "KDA 123A".to_string(),
                origin: "Mill".to_string(),
                destination: "School".to_string(),
                delivery_sequence: vec![
                    DeliveryStop {
                        name: "School A".to_string(),
                        location: None,
                        delivered: false,
                    },
                    DeliveryStop {
                        name: "School B".to_string(),
                        location: None,
                        delivered: false,
                    },
                ],
                created_by: "system".to_string(),
            },
            &Actor::system(),
        )
        .await
        .unwrap();
    assert_eq!(trip.status, TripStatus::Scheduled);

    let (moving, point) = store
        .append_tracking(
            &trip.id,
            NewTrackingPoint {
                latitude: -1.28,
                longitude: 36.82,
                speed_kmh: Some(40.0),
                heading: None,
                recorded_at: Utc::now(),
            },
            &Actor::system(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(moving.status, TripStatus::InTransit);
    assert!(moving.departed_at.is_some());
    assert_eq!(moving.current_location.unwrap().latitude, point.latitude);

    let done = store.complete_trip(&trip.id, &Actor::system()).await.unwrap().unwrap();
    assert_eq!(done.status, TripStatus::Delivered);
    assert!(done.arrived_at.is_some());
    assert!(done.delivery_sequence.iter().all(|s| s.delivered));

    let late = store
        .append_tracking(
            &trip.id,
            NewTrackingPoint {
                latitude: 0.0,
                longitude: 0.0,
                speed_kmh: None,
                heading: None,
                recorded_at: Utc::now(),
            },
            &Actor::system(),
        )
        .await
        .unwrap_err();
    assert!(matches!(storage_error(&late), StorageError::InvalidState(_)));
    assert_eq!(store.count_tracking(&trip.id).await.unwrap(), 1);
}

#[tokio::test]
async fn notifications_are_private_to_their_owner() {
    let (_dir, store) = setup().await;
    let learner = make_user(&store, "n@example.org", Role::MillOperator, None).await;
    let course = store
        .create_course(
            NewCourse {
                title: "Hygiene".to_string(),
                description: None,
                category: "QA".to_string(),
                duration_minutes: 10,
                passing_score: 50.0,
            },
            &Actor::system(),
        )
        .await
        .unwrap();
    store
        .upsert_progress(&learner, &course.id, 100.0, Some(90.0), &Actor::system())
        .await
        .unwrap();
    let list = store.list_notifications(&learner, true, 10, 0).await.unwrap();
    assert_eq!(list.len(), 1);

    let foreign = store
        .mark_notification_read(&list[0].id, "someone-else", &Actor::system())
        .await
        .unwrap();
    assert!(foreign.is_none());

    assert_eq!(store.mark_all_notifications_read(&learner, &Actor::system()).await.unwrap(), 1);
    assert_eq!(store.count_notifications(&learner, true).await.unwrap(), 0);
}
