use crate::api::{store_error, success_response};
use crate::auth::Identity;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use fortify_common::types::{
    AuditStatus, EquipmentStatus, MillStatus, RfpStatus, Role, TrainingStatus, TripStatus,
};
use fortify_storage::store::{
    AlertAudience, AuditFilter, EquipmentFilter, MillFilter, ProgressFilter, RfpFilter,
    SensorAlertFilter, TaskFilter, TripFilter, UserFilter,
};
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kpi {
    OpenAlerts,
    UnreadNotifications,
    ActiveUsers,
    ActiveMills,
    OperationalEquipment,
    FaultyEquipment,
    UnresolvedSensorAlerts,
    OpenMaintenanceTasks,
    MyOpenTasks,
    AuditsInProgress,
    AuditsAwaitingReview,
    CompletedCourses,
    OpenRfps,
    MyRfps,
    TripsScheduled,
    TripsInTransit,
}

impl Kpi {
    fn key(self) -> &'static str {
        match self {
            Kpi::OpenAlerts => "open_alerts",
            Kpi::UnreadNotifications => "unread_notifications",
            Kpi::ActiveUsers => "active_users",
            Kpi::ActiveMills => "active_mills",
            Kpi::OperationalEquipment => "operational_equipment",
            Kpi::FaultyEquipment => "faulty_equipment",
            Kpi::UnresolvedSensorAlerts => "unresolved_sensor_alerts",
            Kpi::OpenMaintenanceTasks => "open_maintenance_tasks",
            Kpi::MyOpenTasks => "my_open_tasks",
            Kpi::AuditsInProgress => "audits_in_progress",
            Kpi::AuditsAwaitingReview => "audits_awaiting_review",
            Kpi::CompletedCourses => "completed_courses",
            Kpi::OpenRfps => "open_rfps",
            Kpi::MyRfps => "my_rfps",
            Kpi::TripsScheduled => "trips_scheduled",
            Kpi::TripsInTransit => "trips_in_transit",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Kpi::OpenAlerts => "Open alerts",
            Kpi::UnreadNotifications => "Unread notifications",
            Kpi::ActiveUsers => "Active users",
            Kpi::ActiveMills => "Active mills",
            Kpi::OperationalEquipment => "Operational equipment",
            Kpi::FaultyEquipment => "Faulty equipment",
            Kpi::UnresolvedSensorAlerts => "Unresolved sensor alerts",
            Kpi::OpenMaintenanceTasks => "Open maintenance tasks",
            Kpi::MyOpenTasks => "My open tasks",
            Kpi::AuditsInProgress => "Audits in progress",
            Kpi::AuditsAwaitingReview => "Audits awaiting review",
            Kpi::CompletedCourses => "Completed courses",
            Kpi::OpenRfps => "Open RFPs",
            Kpi::MyRfps => "My RFPs",
            Kpi::TripsScheduled => "Scheduled trips",
            Kpi::TripsInTransit => "Trips in transit",
        }
    }
}

/// Cards shown to each role, after the shared alert and notification cards.
fn role_cards(role: Role) -> &'static [Kpi] {
    use Kpi::*;
    match role {
        Role::SystemAdmin => &[
            ActiveUsers,
            ActiveMills,
            FaultyEquipment,
            UnresolvedSensorAlerts,
            OpenMaintenanceTasks,
            AuditsAwaitingReview,
            OpenRfps,
            TripsInTransit,
        ],
        Role::ProgramManager => &[
            ActiveMills,
            FaultyEquipment,
            UnresolvedSensorAlerts,
            OpenMaintenanceTasks,
            AuditsAwaitingReview,
            OpenRfps,
            TripsInTransit,
        ],
        Role::Inspector => &[ActiveMills, AuditsAwaitingReview, CompletedCourses],
        Role::MillManager => &[
            OperationalEquipment,
            FaultyEquipment,
            UnresolvedSensorAlerts,
            OpenMaintenanceTasks,
            AuditsInProgress,
            OpenRfps,
            TripsScheduled,
            TripsInTransit,
        ],
        Role::MillOperator => &[
            FaultyEquipment,
            UnresolvedSensorAlerts,
            MyOpenTasks,
            CompletedCourses,
        ],
        Role::InstitutionalBuyer => &[MyRfps, OpenRfps],
        Role::LogisticsCoordinator => &[TripsScheduled, TripsInTransit],
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KpiCard {
    pub key: String,
    pub label: String,
    pub value: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardResponse {
    pub role: Role,
    pub mill_id: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub cards: Vec<KpiCard>,
}

/// Trips are counted per mill for mill roles and per driver for coordinators.
fn trip_filter(identity: &Identity, status: TripStatus) -> TripFilter {
    let mut filter = TripFilter {
        status: Some(status),
        ..Default::default()
    };
    if identity.role == Role::LogisticsCoordinator {
        filter.driver_id = Some(identity.user_id.clone());
    } else {
        filter.mill_id = identity.mill_scope().map(str::to_string);
    }
    filter
}

async fn count(state: &AppState, identity: &Identity, kpi: Kpi) -> anyhow::Result<u64> {
    let store = &state.store;
    let mill = identity.mill_scope().map(str::to_string);
    match kpi {
        Kpi::OpenAlerts => {
            let audience = (!identity.is_any(&[Role::SystemAdmin, Role::ProgramManager])).then(|| {
                AlertAudience {
                    user_id: identity.user_id.clone(),
                    role: identity.role,
                    mill_id: identity.mill_id.clone(),
                }
            });
            store.count_open_alerts(audience.as_ref()).await
        }
        Kpi::UnreadNotifications => store.count_notifications(&identity.user_id, true).await,
        Kpi::ActiveUsers => {
            store
                .count_users(&UserFilter {
                    is_active: Some(true),
                    ..Default::default()
                })
                .await
        }
        Kpi::ActiveMills => {
            store
                .count_mills(&MillFilter {
                    status: Some(MillStatus::Active),
                    id: mill,
                    ..Default::default()
                })
                .await
        }
        Kpi::OperationalEquipment | Kpi::FaultyEquipment => {
            let status = if kpi == Kpi::FaultyEquipment {
                EquipmentStatus::Faulty
            } else {
                EquipmentStatus::Operational
            };
            store
                .count_equipment(&EquipmentFilter {
                    mill_id: mill,
                    status: Some(status),
                    ..Default::default()
                })
                .await
        }
        Kpi::UnresolvedSensorAlerts => {
            store
                .count_sensor_alerts(&SensorAlertFilter {
                    mill_id: mill,
                    is_resolved: Some(false),
                    ..Default::default()
                })
                .await
        }
        Kpi::OpenMaintenanceTasks | Kpi::MyOpenTasks => {
            let assignee_id = (kpi == Kpi::MyOpenTasks).then(|| identity.user_id.clone());
            store
                .count_tasks(&TaskFilter {
                    mill_id: mill,
                    assignee_id,
                    open_only: true,
                    ..Default::default()
                })
                .await
        }
        Kpi::AuditsInProgress | Kpi::AuditsAwaitingReview => {
            let status = if kpi == Kpi::AuditsInProgress {
                AuditStatus::InProgress
            } else {
                AuditStatus::Submitted
            };
            store
                .count_audits(&AuditFilter {
                    mill_id: mill,
                    status: Some(status),
                    ..Default::default()
                })
                .await
        }
        Kpi::CompletedCourses => {
            store
                .count_progress(&ProgressFilter {
                    user_id: Some(identity.user_id.clone()),
                    status: Some(TrainingStatus::Completed),
                    ..Default::default()
                })
                .await
        }
        Kpi::OpenRfps => {
            store
                .count_rfps(&RfpFilter {
                    statuses: vec![RfpStatus::Open],
                    ..Default::default()
                })
                .await
        }
        Kpi::MyRfps => {
            store
                .count_rfps(&RfpFilter {
                    buyer_id: Some(identity.user_id.clone()),
                    ..Default::default()
                })
                .await
        }
        Kpi::TripsScheduled => store.count_trips(&trip_filter(identity, TripStatus::Scheduled)).await,
        Kpi::TripsInTransit => store.count_trips(&trip_filter(identity, TripStatus::InTransit)).await,
    }
}

/// Role-specific KPI cards computed from live counts.
#[utoipa::path(
    get,
    path = "/v1/dashboard",
    tag = "Dashboard",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "KPI cards for the caller's role", body = DashboardResponse),
        (status = 401, description = "Unauthenticated", body = crate::api::ApiError)
    )
)]
async fn get_dashboard(
    Extension(trace_id): Extension<TraceId>,
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let kinds = [Kpi::OpenAlerts, Kpi::UnreadNotifications]
        .into_iter()
        .chain(role_cards(identity.role).iter().copied());
    let mut cards = Vec::new();
    for kpi in kinds {
        match count(&state, &identity, kpi).await {
            Ok(value) => cards.push(KpiCard {
                key: kpi.key().to_string(),
                label: kpi.label().to_string(),
                value,
            }),
            Err(e) => return store_error(&trace_id, e),
        }
    }
    tracing::debug!(role = %identity.role, cards = cards.len(), "dashboard built");
    success_response(
        StatusCode::OK,
        &trace_id,
        DashboardResponse {
            role: identity.role,
            mill_id: identity.mill_id.clone(),
            generated_at: Utc::now(),
            cards,
        },
    )
}

pub fn dashboard_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(get_dashboard))
}
