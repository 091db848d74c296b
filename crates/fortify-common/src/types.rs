use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Declares a string-backed enum whose wire form, database form and
/// `Display` output are the same upper-case literal.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
        )]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(format!("unknown {}: {s}", stringify!($name))),
                }
            }
        }
    };
}

string_enum! {
    /// Portal role carried in the session token.
    Role {
        SystemAdmin => "SYSTEM_ADMIN",
        ProgramManager => "PROGRAM_MANAGER",
        Inspector => "INSPECTOR",
        MillManager => "MILL_MANAGER",
        MillOperator => "MILL_OPERATOR",
        InstitutionalBuyer => "INSTITUTIONAL_BUYER",
        LogisticsCoordinator => "LOGISTICS_COORDINATOR",
    }
}

impl Role {
    pub fn is_admin(self) -> bool {
        self == Role::SystemAdmin
    }

    /// Roles bound to a single mill's data.
    pub fn is_mill_role(self) -> bool {
        matches!(self, Role::MillManager | Role::MillOperator)
    }

    /// Roles that oversee every mill's compliance work.
    pub fn is_oversight(self) -> bool {
        matches!(
            self,
            Role::SystemAdmin | Role::ProgramManager | Role::Inspector
        )
    }
}

string_enum! {
    AlertSeverity {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Critical => "CRITICAL",
    }
}

string_enum! {
    AlertStatus {
        Pending => "PENDING",
        Acknowledged => "ACKNOWLEDGED",
        InProgress => "IN_PROGRESS",
        Resolved => "RESOLVED",
        Escalated => "ESCALATED",
    }
}

string_enum! {
    AuditStatus {
        InProgress => "IN_PROGRESS",
        Submitted => "SUBMITTED",
        Approved => "APPROVED",
        Rejected => "REJECTED",
        RevisionRequested => "REVISION_REQUESTED",
    }
}

impl AuditStatus {
    /// Responses may only be edited while the mill still owns the audit.
    pub fn is_editable(self) -> bool {
        matches!(self, AuditStatus::InProgress | AuditStatus::RevisionRequested)
    }
}

string_enum! {
    MaintenanceStatus {
        Scheduled => "SCHEDULED",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
        Overdue => "OVERDUE",
    }
}

impl MaintenanceStatus {
    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }
}

string_enum! {
    MaintenancePriority {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Critical => "CRITICAL",
    }
}

string_enum! {
    MaintenanceTaskType {
        Preventive => "PREVENTIVE",
        Corrective => "CORRECTIVE",
        Predictive => "PREDICTIVE",
        Calibration => "CALIBRATION",
    }
}

string_enum! {
    TrainingStatus {
        NotStarted => "NOT_STARTED",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
        Failed => "FAILED",
    }
}

string_enum! {
    RfpStatus {
        Draft => "DRAFT",
        Open => "OPEN",
        Closed => "CLOSED",
        Awarded => "AWARDED",
        Cancelled => "CANCELLED",
    }
}

string_enum! {
    BidStatus {
        Submitted => "SUBMITTED",
        Accepted => "ACCEPTED",
        Rejected => "REJECTED",
    }
}

string_enum! {
    TripStatus {
        Scheduled => "SCHEDULED",
        InTransit => "IN_TRANSIT",
        Delivered => "DELIVERED",
        Cancelled => "CANCELLED",
    }
}

string_enum! {
    EquipmentStatus {
        Operational => "OPERATIONAL",
        Maintenance => "MAINTENANCE",
        Faulty => "FAULTY",
        Decommissioned => "DECOMMISSIONED",
    }
}

string_enum! {
    MillStatus {
        Active => "ACTIVE",
        Inactive => "INACTIVE",
        Suspended => "SUSPENDED",
    }
}

string_enum! {
    AnnotationType {
        Comment => "COMMENT",
        Issue => "ISSUE",
        Evidence => "EVIDENCE",
    }
}

string_enum! {
    SensorAlertType {
        ThresholdHigh => "THRESHOLD_HIGH",
        ThresholdLow => "THRESHOLD_LOW",
        Critical => "CRITICAL",
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub to: String,
}

/// Static transition table for a status enum.
///
/// An empty `allowed_next` marks a terminal state.
pub trait StatusTransition: Copy + PartialEq + fmt::Display + 'static {
    const ENTITY: &'static str;

    fn allowed_next(self) -> &'static [Self];

    fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next().contains(&next)
    }

    fn transition_to(self, next: Self) -> Result<Self, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                entity: Self::ENTITY,
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl StatusTransition for AlertStatus {
    const ENTITY: &'static str = "alert";

    fn allowed_next(self) -> &'static [Self] {
        use AlertStatus::*;
        match self {
            Pending => &[Acknowledged, InProgress, Resolved, Escalated],
            Acknowledged => &[InProgress, Resolved, Escalated],
            InProgress => &[Resolved, Escalated],
            Escalated => &[InProgress, Resolved],
            Resolved => &[],
        }
    }
}

impl StatusTransition for AuditStatus {
    const ENTITY: &'static str = "compliance audit";

    fn allowed_next(self) -> &'static [Self] {
        use AuditStatus::*;
        match self {
            InProgress => &[Submitted, Approved, Rejected, RevisionRequested],
            Submitted => &[Approved, Rejected, RevisionRequested],
            RevisionRequested => &[InProgress, Submitted],
            Approved | Rejected => &[],
        }
    }
}

impl StatusTransition for MaintenanceStatus {
    const ENTITY: &'static str = "maintenance task";

    fn allowed_next(self) -> &'static [Self] {
        use MaintenanceStatus::*;
        match self {
            Scheduled => &[InProgress, Cancelled, Overdue],
            Overdue => &[InProgress, Cancelled],
            InProgress => &[Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }
}

impl StatusTransition for TripStatus {
    const ENTITY: &'static str = "delivery trip";

    fn allowed_next(self) -> &'static [Self] {
        use TripStatus::*;
        match self {
            Scheduled => &[InTransit, Cancelled],
            InTransit => &[Delivered, Cancelled],
            Delivered | Cancelled => &[],
        }
    }
}

impl StatusTransition for RfpStatus {
    const ENTITY: &'static str = "rfp";

    fn allowed_next(self) -> &'static [Self] {
        use RfpStatus::*;
        match self {
            Draft => &[Open, Cancelled],
            Open => &[Closed, Awarded, Cancelled],
            Closed => &[Awarded, Cancelled],
            Awarded | Cancelled => &[],
        }
    }
}

/// Login request body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Account e-mail
    pub email: String,
    /// Plain-text password (send over TLS only)
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_round_trips_through_text() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), *role);
        }
        assert_eq!("in_progress".parse::<AuditStatus>(), Ok(AuditStatus::InProgress));
        assert!("SOMETHING".parse::<AlertStatus>().is_err());
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&AuditStatus::RevisionRequested).unwrap();
        assert_eq!(json, "\"REVISION_REQUESTED\"");
        let back: AlertStatus = serde_json::from_str("\"IN_PROGRESS\"").unwrap();
        assert_eq!(back, AlertStatus::InProgress);
    }

    #[test]
    fn resolved_alert_is_terminal() {
        assert!(AlertStatus::Resolved.is_terminal());
        for next in AlertStatus::ALL {
            assert!(AlertStatus::Resolved.transition_to(*next).is_err());
        }
    }

    #[test]
    fn alert_can_escalate_then_resolve() {
        let s = AlertStatus::Pending
            .transition_to(AlertStatus::Escalated)
            .unwrap();
        assert_eq!(
            s.transition_to(AlertStatus::Resolved),
            Ok(AlertStatus::Resolved)
        );
        assert!(AlertStatus::InProgress
            .transition_to(AlertStatus::Acknowledged)
            .is_err());
    }

    #[test]
    fn audit_review_outcomes_are_terminal() {
        assert!(AuditStatus::Approved.is_terminal());
        assert!(AuditStatus::Rejected.is_terminal());
        assert!(AuditStatus::Submitted.can_transition_to(AuditStatus::RevisionRequested));
        assert!(AuditStatus::RevisionRequested.can_transition_to(AuditStatus::InProgress));
        assert!(!AuditStatus::Submitted.can_transition_to(AuditStatus::InProgress));
    }

    #[test]
    fn transition_error_names_entity_and_states() {
        let err = TripStatus::Delivered
            .transition_to(TripStatus::InTransit)
            .unwrap_err();
        assert_eq!(err.to_string(), "delivery trip cannot move from DELIVERED to IN_TRANSIT");
    }

    #[test]
    fn role_groups() {
        assert!(Role::MillOperator.is_mill_role());
        assert!(!Role::Inspector.is_mill_role());
        assert!(Role::Inspector.is_oversight());
        assert!(!Role::InstitutionalBuyer.is_oversight());
        assert!(Role::SystemAdmin.is_admin());
    }
}
