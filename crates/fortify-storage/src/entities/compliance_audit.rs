use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "compliance_audits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub mill_id: String,
    pub template_id: String,
    pub submitted_by: String,
    pub reviewer_id: Option<String>,
    /// Serialized JSON
    pub responses: String,
    pub score: Option<f64>,
    /// Serialized JSON
    pub section_scores: Option<String>,
    /// Serialized JSON
    pub red_flags: Option<String>,
    pub passed: Option<bool>,
    pub status: String,
    pub review_notes: Option<String>,
    pub submitted_at: Option<DateTimeWithTimeZone>,
    pub reviewed_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
