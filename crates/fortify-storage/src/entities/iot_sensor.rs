use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "iot_sensors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub equipment_id: String,
    pub mill_id: String,
    pub name: String,
    pub sensor_type: String,
    pub unit: String,
    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,
    pub critical_threshold: Option<f64>,
    pub calibration_date: Option<DateTimeWithTimeZone>,
    pub next_calibration_date: Option<DateTimeWithTimeZone>,
    pub is_active: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
