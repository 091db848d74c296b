use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "alerts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub alert_type: String,
    pub severity: String,
    pub status: String,
    pub title: String,
    pub message: String,
    pub recipient_id: Option<String>,
    pub recipient_role: Option<String>,
    pub mill_id: Option<String>,
    /// Serialized JSON
    pub metadata: Option<String>,
    pub read_at: Option<DateTimeWithTimeZone>,
    pub acknowledged_at: Option<DateTimeWithTimeZone>,
    pub resolved_at: Option<DateTimeWithTimeZone>,
    pub resolved_by: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
