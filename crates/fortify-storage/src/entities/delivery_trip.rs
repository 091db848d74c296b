use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "delivery_trips")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub rfp_id: Option<String>,
    pub mill_id: String,
    pub driver_id: Option<String>,
    pub vehicle_number: String,
    pub origin: String,
    pub destination: String,
    pub status: String,
    /// Serialized JSON
    pub current_location: Option<String>,
    /// Serialized JSON
    pub delivery_sequence: String,
    pub departed_at: Option<DateTimeWithTimeZone>,
    pub arrived_at: Option<DateTimeWithTimeZone>,
    pub created_by: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
