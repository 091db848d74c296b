use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rfps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub buyer_id: String,
    pub title: String,
    pub description: Option<String>,
    pub commodity: String,
    pub quantity: f64,
    pub unit: String,
    pub delivery_location: String,
    pub budget: Option<f64>,
    pub deadline: DateTimeWithTimeZone,
    pub status: String,
    pub awarded_bid_id: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
