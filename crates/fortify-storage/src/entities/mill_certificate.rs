use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "mill_certificates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub mill_id: String,
    #[sea_orm(unique)]
    pub audit_id: String,
    #[sea_orm(unique)]
    pub certificate_number: String,
    pub score: f64,
    pub issued_by: String,
    pub issued_at: DateTimeWithTimeZone,
    pub valid_until: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
