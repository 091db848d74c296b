mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{
    admin_token, assert_err_envelope, assert_ok_envelope, build_test_context, data_id, login,
    make_mill, make_user, request_json, request_no_body, TestContext, ADMIN_EMAIL, PASSWORD,
};
use fortify_common::types::Role;
use serde_json::{json, Value};

async fn ctx() -> TestContext {
    build_test_context().await.expect("test context should build")
}

async fn create_equipment(ctx: &TestContext, token: &str, mill_id: &str) -> String {
    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/equipment",
        Some(token),
        Some(json!({ "mill_id": mill_id, "name": "Doser 1", "equipment_type": "doser" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    data_id(&body)
}

async fn register_sensor(ctx: &TestContext, token: &str, equipment_id: &str) -> String {
    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/sensors",
        Some(token),
        Some(json!({
            "equipment_id": equipment_id,
            "name": "Motor temperature",
            "sensor_type": "temperature",
            "unit": "C",
            "min_threshold": 10.0,
            "max_threshold": 80.0,
            "critical_threshold": 95.0
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    data_id(&body)
}

fn template_body(name: &str) -> Value {
    json!({
        "name": name,
        "description": "Dosing and premix checks",
        "sections": [
            {
                "id": "premix",
                "title": "Premix",
                "weight": 1.0,
                "items": [
                    { "id": "stored_dry", "question": "Premix stored dry?", "type": "boolean" }
                ]
            },
            {
                "id": "dosing",
                "title": "Dosing",
                "weight": 2.0,
                "items": [
                    { "id": "feeder_calibrated", "question": "Feeder calibrated?", "type": "boolean" },
                    { "id": "dose_rate", "question": "Dose rate (g/t)", "type": "numeric", "min": 180.0, "max": 220.0 }
                ]
            }
        ],
        "scoring_rules": {
            "pass_threshold": 75.0,
            "red_flag_policy": "fail_audit",
            "red_flags": [{
                "id": "rf-feeder",
                "item_id": "feeder_calibrated",
                "operator": "equals",
                "value": false,
                "severity": "CRITICAL",
                "message": "Feeder not calibrated"
            }]
        }
    })
}

#[tokio::test]
async fn health_should_return_ok_envelope() {
    let ctx = ctx().await;
    let (status, body, trace) = request_no_body(&ctx.app, "GET", "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);
    assert!(body["data"]["version"].is_string());
    assert_eq!(body["data"]["storage_status"], "ok");
    assert_eq!(trace.as_deref(), body["trace_id"].as_str());
}

#[tokio::test]
async fn login_success_and_failure_cases() {
    let ctx = ctx().await;

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/auth/login",
        None,
        Some(json!({ "email": ADMIN_EMAIL, "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);
    assert!(body["data"]["access_token"].is_string());
    assert_eq!(body["data"]["user"]["role"], "SYSTEM_ADMIN");

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/auth/login",
        None,
        Some(json!({ "email": ADMIN_EMAIL, "password": "wrong-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_err_envelope(&body, 1002);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/auth/login",
        None,
        Some(json!({ "email": "", "password": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let ctx = ctx().await;
    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/mills", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_err_envelope(&body, 1002);

    let (status, _, _) = request_no_body(&ctx.app, "GET", "/v1/mills", Some("not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn password_change_revokes_existing_tokens() {
    let ctx = ctx().await;
    let token = admin_token(&ctx.app).await;

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/auth/password",
        Some(&token),
        Some(json!({ "current_password": PASSWORD, "new_password": "brand-new-secret" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, _, _) = request_no_body(&ctx.app, "GET", "/v1/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let fresh = login(&ctx.app, ADMIN_EMAIL, "brand-new-secret").await;
    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/auth/me", Some(&fresh)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], ADMIN_EMAIL);
}

#[tokio::test]
async fn role_matrix_denies_routes_outside_a_roles_prefixes() {
    let ctx = ctx().await;
    let mill = make_mill(&ctx, "M-001").await;
    let (_, operator) = make_user(&ctx, "op@example.com", Role::MillOperator, Some(&mill)).await;
    let (_, buyer) = make_user(&ctx, "buyer@example.com", Role::InstitutionalBuyer, None).await;

    let (status, body, _) =
        request_no_body(&ctx.app, "GET", "/v1/compliance/audits", Some(&operator)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_err_envelope(&body, 1006);

    let (status, _, _) = request_no_body(&ctx.app, "GET", "/v1/users", Some(&buyer)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = request_no_body(&ctx.app, "GET", "/v1/equipment", Some(&operator)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = request_no_body(&ctx.app, "GET", "/v1/dashboard", Some(&buyer)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn admin_creates_users_and_validates_input() {
    let ctx = ctx().await;
    let token = admin_token(&ctx.app).await;
    let mill = make_mill(&ctx, "M-002").await;

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/users",
        Some(&token),
        Some(json!({
            "email": "manager@example.com",
            "name": "Mill Manager",
            "password": "long-enough-pass",
            "role": "MILL_MANAGER",
            "mill_id": mill
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["mill_id"], mill);
    assert!(body["data"].get("password_hash").is_none());

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/users",
        Some(&token),
        Some(json!({
            "email": "not-an-email",
            "name": "Bad",
            "password": "long-enough-pass",
            "role": "INSPECTOR"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1007);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/users",
        Some(&token),
        Some(json!({
            "email": "manager@example.com",
            "name": "Duplicate",
            "password": "long-enough-pass",
            "role": "MILL_MANAGER",
            "mill_id": mill
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_err_envelope(&body, 1005);
}

#[tokio::test]
async fn mill_roles_only_see_their_own_mill() {
    let ctx = ctx().await;
    let admin = admin_token(&ctx.app).await;
    let mill_a = make_mill(&ctx, "A-001").await;
    let mill_b = make_mill(&ctx, "B-001").await;
    let (_, manager_a) = make_user(&ctx, "a@example.com", Role::MillManager, Some(&mill_a)).await;

    create_equipment(&ctx, &admin, &mill_a).await;
    let other = create_equipment(&ctx, &admin, &mill_b).await;

    let (status, body, _) =
        request_no_body(&ctx.app, "GET", "/v1/equipment", Some(&manager_a)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["mill_id"], mill_a);

    let uri = format!("/v1/equipment?mill_id__eq={mill_b}");
    let (status, _, _) = request_no_body(&ctx.app, "GET", &uri, Some(&manager_a)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let uri = format!("/v1/equipment/{other}");
    let (status, _, _) = request_no_body(&ctx.app, "GET", &uri, Some(&manager_a)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/equipment",
        Some(&manager_a),
        Some(json!({ "mill_id": mill_b, "name": "Intruder", "equipment_type": "mixer" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/equipment", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);
}

#[tokio::test]
async fn threshold_breach_raises_sensor_and_portal_alerts() {
    let ctx = ctx().await;
    let admin = admin_token(&ctx.app).await;
    let mill = make_mill(&ctx, "S-001").await;
    let (_, manager) = make_user(&ctx, "m@example.com", Role::MillManager, Some(&mill)).await;
    let equipment = create_equipment(&ctx, &admin, &mill).await;
    let sensor = register_sensor(&ctx, &manager, &equipment).await;

    let readings = format!("/v1/sensors/{sensor}/readings");
    let (status, body, _) =
        request_json(&ctx.app, "POST", &readings, Some(&manager), Some(json!({ "value": 50.0 }))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert!(body["data"]["alert"].is_null());

    let (status, body, _) =
        request_json(&ctx.app, "POST", &readings, Some(&manager), Some(json!({ "value": 99.0 }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["alert"]["alert_type"], "CRITICAL");
    let sensor_alert = body["data"]["alert"]["id"].as_str().unwrap().to_string();

    let future = (Utc::now() + Duration::hours(1)).to_rfc3339();
    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        &readings,
        Some(&manager),
        Some(json!({ "value": 1.0, "recorded_at": future })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body, _) = request_no_body(&ctx.app, "GET", &readings, Some(&manager)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);

    let (_, body, _) = request_no_body(
        &ctx.app,
        "GET",
        "/v1/sensors/alerts?is_resolved__eq=false",
        Some(&manager),
    )
    .await;
    assert_eq!(body["data"]["total"], 1);

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/alerts", Some(&manager)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["mill_id"], mill);

    let resolve = format!("/v1/sensors/alerts/{sensor_alert}/resolve");
    let (status, body, _) = request_no_body(&ctx.app, "POST", &resolve, Some(&manager)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_resolved"], true);
    let (status, _, _) = request_no_body(&ctx.app, "POST", &resolve, Some(&manager)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn predictive_report_schedules_one_task_per_risky_equipment() {
    let ctx = ctx().await;
    let admin = admin_token(&ctx.app).await;
    let mill = make_mill(&ctx, "P-001").await;
    let hot = create_equipment(&ctx, &admin, &mill).await;
    let quiet = create_equipment(&ctx, &admin, &mill).await;
    let sensor = register_sensor(&ctx, &admin, &hot).await;
    register_sensor(&ctx, &admin, &quiet).await;

    let readings = format!("/v1/sensors/{sensor}/readings");
    for hours_ago in 1..=12 {
        let at = (Utc::now() - Duration::hours(hours_ago)).to_rfc3339();
        let (status, _, _) = request_json(
            &ctx.app,
            "POST",
            &readings,
            Some(&admin),
            Some(json!({ "value": 100.0, "recorded_at": at })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let uri = "/v1/maintenance/predictive?create_tasks=true";
    let (status, body, _) = request_no_body(&ctx.app, "GET", uri, Some(&admin)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let equipment = body["data"]["equipment"].as_array().unwrap();
    assert_eq!(equipment.len(), 2);
    assert_eq!(equipment[0]["equipment_id"], hot);
    assert_eq!(equipment[0]["risk_level"], "CRITICAL");
    assert_eq!(equipment[1]["risk_level"], "INSUFFICIENT_DATA");
    let created = body["data"]["created_tasks"].as_array().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["task_type"], "PREDICTIVE");
    assert_eq!(created[0]["priority"], "CRITICAL");

    let (_, body, _) = request_no_body(&ctx.app, "GET", uri, Some(&admin)).await;
    assert_eq!(body["data"]["created_tasks"].as_array().unwrap().len(), 0);

    let (_, body, _) = request_no_body(
        &ctx.app,
        "GET",
        "/v1/maintenance/tasks?task_type__eq=PREDICTIVE",
        Some(&admin),
    )
    .await;
    assert_eq!(body["data"]["total"], 1);
}

#[tokio::test]
async fn audit_flow_from_start_to_certificate() {
    let ctx = ctx().await;
    let admin = admin_token(&ctx.app).await;
    let mill = make_mill(&ctx, "C-001").await;
    let (_, manager) = make_user(&ctx, "mm@example.com", Role::MillManager, Some(&mill)).await;
    let (_, inspector) = make_user(&ctx, "insp@example.com", Role::Inspector, None).await;

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/compliance/templates",
        Some(&admin),
        Some(template_body("Maize flour audit")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let template = data_id(&body);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/compliance/audits",
        Some(&manager),
        Some(json!({ "template_id": template })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["mill_id"], mill);
    assert_eq!(body["data"]["status"], "IN_PROGRESS");
    let audit = data_id(&body);

    let (status, _, _) = request_json(
        &ctx.app,
        "PUT",
        &format!("/v1/compliance/audits/{audit}/responses"),
        Some(&manager),
        Some(json!({ "responses": {
            "stored_dry": true,
            "feeder_calibrated": true,
            "dose_rate": 200.0
        }})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/compliance/audits/{audit}/what-if"),
        Some(&manager),
        Some(json!({ "overrides": { "feeder_calibrated": false } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["baseline"]["score"], 100.0);
    assert_eq!(body["data"]["projected"]["passed"], false);
    assert_eq!(body["data"]["outcome_changed"], true);

    let (status, body, _) = request_no_body(
        &ctx.app,
        "POST",
        &format!("/v1/compliance/audits/{audit}/submit"),
        Some(&manager),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "SUBMITTED");
    assert_eq!(body["data"]["score"], 100.0);
    assert_eq!(body["data"]["passed"], true);

    let (_, body, _) =
        request_no_body(&ctx.app, "GET", "/v1/notifications?unread_only=true", Some(&inspector)).await;
    assert_eq!(body["data"]["total"], 1);

    let certificate = format!("/v1/compliance/audits/{audit}/certificate");
    let (status, body, _) = request_no_body(&ctx.app, "POST", &certificate, Some(&inspector)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1011);

    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/compliance/audits/{audit}/review"),
        Some(&manager),
        Some(json!({ "decision": "APPROVED" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/compliance/audits/{audit}/review"),
        Some(&inspector),
        Some(json!({ "decision": "APPROVED", "notes": "All good" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "APPROVED");

    let (status, body, _) = request_no_body(&ctx.app, "POST", &certificate, Some(&inspector)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["mill_id"], mill);
    assert!(body["data"]["certificate_number"].is_string());

    let (status, _, _) = request_no_body(&ctx.app, "POST", &certificate, Some(&inspector)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body, _) =
        request_no_body(&ctx.app, "GET", "/v1/compliance/certificates", Some(&manager)).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn inspectors_with_a_home_mill_review_every_mill() {
    let ctx = ctx().await;
    let admin = admin_token(&ctx.app).await;
    let home = make_mill(&ctx, "H-001").await;
    let other = make_mill(&ctx, "O-001").await;
    let (_, manager) = make_user(&ctx, "om@example.com", Role::MillManager, Some(&other)).await;
    let (_, inspector) = make_user(&ctx, "hi@example.com", Role::Inspector, Some(&home)).await;
    let (_, pm) = make_user(&ctx, "hp@example.com", Role::ProgramManager, Some(&home)).await;

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/compliance/templates",
        Some(&admin),
        Some(template_body("Wheat flour audit")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let template = data_id(&body);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/compliance/audits",
        Some(&manager),
        Some(json!({ "template_id": template })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let audit = data_id(&body);

    let (status, body, _) = request_no_body(
        &ctx.app,
        "GET",
        &format!("/v1/compliance/audits/{audit}"),
        Some(&inspector),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["mill_id"], other);

    for token in [&inspector, &pm] {
        let (status, body, _) =
            request_no_body(&ctx.app, "GET", "/v1/compliance/audits", Some(token.as_str())).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["total"], 1);
        assert_eq!(body["data"]["items"][0]["mill_id"], other);
    }

    let (status, body, _) = request_no_body(
        &ctx.app,
        "GET",
        &format!("/v1/compliance/audits?mill_id__eq={other}"),
        Some(&inspector),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["total"], 1);
}

#[tokio::test]
async fn notifications_are_private_and_can_be_marked_read() {
    let ctx = ctx().await;
    let admin = admin_token(&ctx.app).await;
    let mill = make_mill(&ctx, "N-001").await;
    let (_, manager) = make_user(&ctx, "nm@example.com", Role::MillManager, Some(&mill)).await;
    make_user(&ctx, "i1@example.com", Role::Inspector, None).await;
    let (_, inspector) = make_user(&ctx, "i2@example.com", Role::Inspector, None).await;

    let (_, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/compliance/templates",
        Some(&admin),
        Some(template_body("Notification audit")),
    )
    .await;
    let template = data_id(&body);
    for _ in 0..2 {
        let (_, body, _) = request_json(
            &ctx.app,
            "POST",
            "/v1/compliance/audits",
            Some(&manager),
            Some(json!({ "template_id": template })),
        )
        .await;
        let audit = data_id(&body);
        let (status, _, _) = request_no_body(
            &ctx.app,
            "POST",
            &format!("/v1/compliance/audits/{audit}/submit"),
            Some(&manager),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/notifications", Some(&inspector)).await;
    assert_eq!(body["data"]["total"], 2);
    let first = body["data"]["items"][0]["id"].as_str().unwrap().to_string();

    let (status, _, _) = request_no_body(
        &ctx.app,
        "POST",
        &format!("/v1/notifications/{first}/read"),
        Some(&manager),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body, _) = request_no_body(
        &ctx.app,
        "POST",
        &format!("/v1/notifications/{first}/read"),
        Some(&inspector),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_read"], true);

    let (_, body, _) =
        request_no_body(&ctx.app, "POST", "/v1/notifications/read-all", Some(&inspector)).await;
    assert_eq!(body["data"]["updated"], 1);

    let (_, body, _) =
        request_no_body(&ctx.app, "GET", "/v1/notifications?unread_only=true", Some(&inspector)).await;
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn drivers_track_and_complete_their_trips() {
    let ctx = ctx().await;
    let mill = make_mill(&ctx, "L-001").await;
    let (_, manager) = make_user(&ctx, "lm@example.com", Role::MillManager, Some(&mill)).await;
    let (driver_id, driver) =
        make_user(&ctx, "driver@example.com", Role::LogisticsCoordinator, None).await;
    let (_, other_driver) =
        make_user(&ctx, "other@example.com", Role::LogisticsCoordinator, None).await;

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/logistics/trips",
        Some(&manager),
        Some(json!({
            "mill_id": mill,
            "driver_id": driver_id,
            "vehicle_number": "KBX 123A",
            "origin": "Mill L-001",
            "destination": "County depot",
            "delivery_sequence": [{ "name": "Depot A", "delivered": false }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["status"], "SCHEDULED");
    let trip = data_id(&body);

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/logistics/trips", Some(&driver)).await;
    assert_eq!(body["data"]["total"], 1);
    let (_, body, _) =
        request_no_body(&ctx.app, "GET", "/v1/logistics/trips", Some(&other_driver)).await;
    assert_eq!(body["data"]["total"], 0);

    let tracking = format!("/v1/logistics/trips/{trip}/tracking");
    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        &tracking,
        Some(&other_driver),
        Some(json!({ "latitude": -1.28, "longitude": 36.82 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        &tracking,
        Some(&driver),
        Some(json!({ "latitude": 123.0, "longitude": 36.82 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &tracking,
        Some(&driver),
        Some(json!({ "latitude": -1.28, "longitude": 36.82, "speed_kmh": 60.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["trip"]["status"], "IN_TRANSIT");

    let (_, body, _) = request_no_body(&ctx.app, "GET", &tracking, Some(&manager)).await;
    assert_eq!(body["data"]["total"], 1);

    let (status, body, _) = request_no_body(
        &ctx.app,
        "POST",
        &format!("/v1/logistics/trips/{trip}/complete"),
        Some(&driver),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "DELIVERED");

    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        &tracking,
        Some(&driver),
        Some(json!({ "latitude": -1.3, "longitude": 36.9 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn audit_trail_is_restricted_to_program_staff() {
    let ctx = ctx().await;
    let admin = admin_token(&ctx.app).await;
    let (_, pm) = make_user(&ctx, "pm@example.com", Role::ProgramManager, None).await;
    let (_, inspector) = make_user(&ctx, "x@example.com", Role::Inspector, None).await;

    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/mills",
        Some(&admin),
        Some(json!({ "name": "Audited mill", "code": "AU-1", "region": "West", "country": "KE" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body, _) = request_no_body(
        &ctx.app,
        "GET",
        "/v1/audit-logs?resource_type__eq=mill&action__eq=CREATE",
        Some(&pm),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);

    let (status, _, _) = request_no_body(&ctx.app, "GET", "/v1/audit-logs", Some(&inspector)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn dashboard_cards_follow_the_role() {
    let ctx = ctx().await;
    let admin = admin_token(&ctx.app).await;
    let (_, buyer) = make_user(&ctx, "b@example.com", Role::InstitutionalBuyer, None).await;

    let keys = |body: &Value| -> Vec<String> {
        body["data"]["cards"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["key"].as_str().unwrap().to_string())
            .collect()
    };

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/dashboard", Some(&buyer)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        keys(&body),
        ["open_alerts", "unread_notifications", "my_rfps", "open_rfps"]
    );

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/dashboard", Some(&admin)).await;
    let admin_keys = keys(&body);
    assert!(admin_keys.contains(&"active_users".to_string()));
    let users = body["data"]["cards"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["key"] == "active_users")
        .unwrap()["value"]
        .clone();
    assert_eq!(users, 2);
}

#[tokio::test]
async fn openapi_documents_are_served() {
    let ctx = ctx().await;
    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/v1/compliance/audits/{id}/what-if"].is_object());
    assert!(body["components"]["securitySchemes"]["bearer_auth"].is_object());

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/openapi.yaml", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("/v1/maintenance/predictive"));
}
