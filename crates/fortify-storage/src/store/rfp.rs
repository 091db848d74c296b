use anyhow::Result;
use chrono::{DateTime, Utc};
use fortify_common::models::{Rfp, RfpBid};
use fortify_common::types::{BidStatus, RfpStatus, Role, StatusTransition};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, TransactionTrait,
};
use serde_json::json;

use crate::entities::{rfp, rfp_bid};
use crate::error::StorageError;
use crate::store::user::users_with_role;
use crate::store::{
    conflict_on_unique, not_found, notify, now, parse_enum, record_audit, utc, Actor, FortifyStore,
};

pub struct NewRfp {
    pub buyer_id: String,
    pub title: String,
    pub description: Option<String>,
    pub commodity: String,
    pub quantity: f64,
    pub unit: String,
    pub delivery_location: String,
    pub budget: Option<f64>,
    pub deadline: DateTime<Utc>,
}

/// Field edits are only accepted while the RFP is a DRAFT.
#[derive(Debug, Clone, Default)]
pub struct RfpUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub commodity: Option<String>,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub delivery_location: Option<String>,
    pub budget: Option<f64>,
    pub deadline: Option<DateTime<Utc>>,
    pub status: Option<RfpStatus>,
}

impl RfpUpdate {
    fn edits_fields(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.commodity.is_some()
            || self.quantity.is_some()
            || self.unit.is_some()
            || self.delivery_location.is_some()
            || self.budget.is_some()
            || self.deadline.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RfpFilter {
    pub buyer_id: Option<String>,
    /// Empty means any status
    pub statuses: Vec<RfpStatus>,
    pub commodity: Option<String>,
}

pub struct NewBid {
    pub mill_id: String,
    pub submitted_by: String,
    pub price_per_unit: f64,
    pub quantity: f64,
    pub notes: Option<String>,
}

fn to_rfp(m: rfp::Model) -> Result<Rfp> {
    Ok(Rfp {
        status: parse_enum("rfps.status", &m.status)?,
        id: m.id,
        buyer_id: m.buyer_id,
        title: m.title,
        description: m.description,
        commodity: m.commodity,
        quantity: m.quantity,
        unit: m.unit,
        delivery_location: m.delivery_location,
        budget: m.budget,
        deadline: utc(m.deadline),
        awarded_bid_id: m.awarded_bid_id,
        created_at: utc(m.created_at),
        updated_at: utc(m.updated_at),
    })
}

fn to_bid(m: rfp_bid::Model) -> Result<RfpBid> {
    Ok(RfpBid {
        status: parse_enum("rfp_bids.status", &m.status)?,
        id: m.id,
        rfp_id: m.rfp_id,
        mill_id: m.mill_id,
        submitted_by: m.submitted_by,
        price_per_unit: m.price_per_unit,
        quantity: m.quantity,
        notes: m.notes,
        created_at: utc(m.created_at),
        updated_at: utc(m.updated_at),
    })
}

fn filtered(filter: &RfpFilter) -> Select<rfp::Entity> {
    use rfp::Column;
    let mut q = rfp::Entity::find();
    if let Some(buyer_id) = &filter.buyer_id {
        q = q.filter(Column::BuyerId.eq(buyer_id.as_str()));
    }
    if !filter.statuses.is_empty() {
        q = q.filter(Column::Status.is_in(filter.statuses.iter().map(|s| s.as_str())));
    }
    if let Some(commodity) = &filter.commodity {
        q = q.filter(Column::Commodity.eq(commodity.as_str()));
    }
    q
}

impl FortifyStore {
    pub async fn create_rfp(&self, new: NewRfp, actor: &Actor) -> Result<Rfp> {
        let now = now();
        let txn = self.db().begin().await?;
        let am = rfp::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            buyer_id: Set(new.buyer_id),
            title: Set(new.title),
            description: Set(new.description),
            commodity: Set(new.commodity),
            quantity: Set(new.quantity),
            unit: Set(new.unit),
            delivery_location: Set(new.delivery_location),
            budget: Set(new.budget),
            deadline: Set(new.deadline.fixed_offset()),
            status: Set(RfpStatus::Draft.as_str().to_owned()),
            awarded_bid_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(&txn).await?;
        record_audit(
            &txn,
            actor,
            "CREATE",
            "rfp",
            &model.id,
            Some(json!({ "commodity": model.commodity, "quantity": model.quantity })),
        )
        .await?;
        txn.commit().await?;
        to_rfp(model)
    }

    pub async fn get_rfp(&self, id: &str) -> Result<Option<Rfp>> {
        let model = rfp::Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_rfp).transpose()
    }

    pub async fn list_rfps(&self, filter: &RfpFilter, limit: u64, offset: u64) -> Result<Vec<Rfp>> {
        let rows = filtered(filter)
            .order_by(rfp::Column::CreatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_rfp).collect()
    }

    pub async fn count_rfps(&self, filter: &RfpFilter) -> Result<u64> {
        Ok(filtered(filter).count(self.db()).await?)
    }

    pub async fn update_rfp(&self, id: &str, update: RfpUpdate, actor: &Actor) -> Result<Option<Rfp>> {
        let txn = self.db().begin().await?;
        let Some(m) = rfp::Entity::find_by_id(id).one(&txn).await? else {
            return Ok(None);
        };
        let current: RfpStatus = parse_enum("rfps.status", &m.status)?;
        if update.edits_fields() && current != RfpStatus::Draft {
            return Err(StorageError::InvalidState(format!(
                "rfp fields can only be edited while DRAFT (current: {current})"
            ))
            .into());
        }
        let mut am: rfp::ActiveModel = m.into();
        if let Some(next) = update.status {
            if next != current {
                if next == RfpStatus::Awarded {
                    return Err(StorageError::InvalidState("award an rfp through one of its bids".into()).into());
                }
                let next = current.transition_to(next).map_err(StorageError::from)?;
                am.status = Set(next.as_str().to_owned());
            }
        }
        if let Some(title) = &update.title {
            am.title = Set(title.clone());
        }
        if let Some(description) = &update.description {
            am.description = Set(Some(description.clone()));
        }
        if let Some(commodity) = &update.commodity {
            am.commodity = Set(commodity.clone());
        }
        if let Some(quantity) = update.quantity {
            am.quantity = Set(quantity);
        }
        if let Some(unit) = &update.unit {
            am.unit = Set(unit.clone());
        }
        if let Some(location) = &update.delivery_location {
            am.delivery_location = Set(location.clone());
        }
        if let Some(budget) = update.budget {
            am.budget = Set(Some(budget));
        }
        if let Some(deadline) = update.deadline {
            am.deadline = Set(deadline.fixed_offset());
        }
        am.updated_at = Set(now());
        let updated = am.update(&txn).await?;
        record_audit(
            &txn,
            actor,
            "UPDATE",
            "rfp",
            id,
            Some(json!({ "from_status": current, "status": update.status })),
        )
        .await?;
        txn.commit().await?;
        Ok(Some(to_rfp(updated)?))
    }

    /// One bid per mill per RFP, only while the RFP is OPEN.
    pub async fn create_bid(&self, rfp_id: &str, new: NewBid, actor: &Actor) -> Result<RfpBid> {
        let now = now();
        let txn = self.db().begin().await?;
        let parent = rfp::Entity::find_by_id(rfp_id)
            .one(&txn)
            .await?
            .ok_or_else(|| not_found("rfp", rfp_id))?;
        let status: RfpStatus = parse_enum("rfps.status", &parent.status)?;
        if status != RfpStatus::Open {
            return Err(StorageError::InvalidState(format!("rfp is not open for bids (current: {status})")).into());
        }
        let am = rfp_bid::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            rfp_id: Set(rfp_id.to_owned()),
            mill_id: Set(new.mill_id),
            submitted_by: Set(new.submitted_by),
            price_per_unit: Set(new.price_per_unit),
            quantity: Set(new.quantity),
            notes: Set(new.notes),
            status: Set(BidStatus::Submitted.as_str().to_owned()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am
            .insert(&txn)
            .await
            .map_err(|e| conflict_on_unique(e, "this mill has already bid on the rfp"))?;
        notify(
            &txn,
            &parent.buyer_id,
            "RFP",
            "New bid received".to_owned(),
            format!("A mill bid {:.2} per {} on '{}'", model.price_per_unit, parent.unit, parent.title),
            Some(format!("/v1/rfps/{rfp_id}/bids")),
        )
        .await?;
        record_audit(
            &txn,
            actor,
            "CREATE",
            "rfp_bid",
            &model.id,
            Some(json!({ "rfp_id": rfp_id, "mill_id": model.mill_id, "price_per_unit": model.price_per_unit })),
        )
        .await?;
        txn.commit().await?;
        to_bid(model)
    }

    /// Lowest price first.
    pub async fn list_bids(&self, rfp_id: &str, mill_id: Option<&str>) -> Result<Vec<RfpBid>> {
        use rfp_bid::Column;
        let mut q = rfp_bid::Entity::find().filter(Column::RfpId.eq(rfp_id));
        if let Some(mill_id) = mill_id {
            q = q.filter(Column::MillId.eq(mill_id));
        }
        let rows = q
            .order_by(Column::PricePerUnit, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_bid).collect()
    }

    /// Accepts `bid_id`, rejects every other bid, marks the RFP AWARDED and
    /// notifies the managers of every bidding mill.
    pub async fn award_bid(&self, rfp_id: &str, bid_id: &str, actor: &Actor) -> Result<Option<Rfp>> {
        use rfp_bid::Column;
        let now = now();
        let txn = self.db().begin().await?;
        let Some(parent) = rfp::Entity::find_by_id(rfp_id).one(&txn).await? else {
            return Ok(None);
        };
        let current: RfpStatus = parse_enum("rfps.status", &parent.status)?;
        let next = current
            .transition_to(RfpStatus::Awarded)
            .map_err(StorageError::from)?;
        let bids = rfp_bid::Entity::find()
            .filter(Column::RfpId.eq(rfp_id))
            .all(&txn)
            .await?;
        if !bids.iter().any(|b| b.id == bid_id) {
            return Err(not_found("rfp bid", bid_id));
        }

        let title = parent.title.clone();
        let mut am: rfp::ActiveModel = parent.into();
        am.status = Set(next.as_str().to_owned());
        am.awarded_bid_id = Set(Some(bid_id.to_owned()));
        am.updated_at = Set(now);
        let updated = am.update(&txn).await?;

        for bid in bids {
            let accepted = bid.id == bid_id;
            let mill_id = bid.mill_id.clone();
            let submitted_by = bid.submitted_by.clone();
            let mut bid: rfp_bid::ActiveModel = bid.into();
            bid.status = Set(if accepted { BidStatus::Accepted } else { BidStatus::Rejected }
                .as_str()
                .to_owned());
            bid.updated_at = Set(now);
            bid.update(&txn).await?;

            let (subject, message) = if accepted {
                ("Bid accepted", format!("Your bid on '{title}' was accepted"))
            } else {
                ("Bid not selected", format!("Another bid was selected for '{title}'"))
            };
            let mut recipients: Vec<String> = users_with_role(&txn, Role::MillManager, Some(&mill_id))
                .await?
                .into_iter()
                .map(|u| u.id)
                .collect();
            if !recipients.contains(&submitted_by) {
                recipients.push(submitted_by);
            }
            for user_id in recipients {
                notify(
                    &txn,
                    &user_id,
                    "RFP",
                    subject.to_owned(),
                    message.clone(),
                    Some(format!("/v1/rfps/{rfp_id}")),
                )
                .await?;
            }
        }

        record_audit(
            &txn,
            actor,
            "AWARD",
            "rfp",
            rfp_id,
            Some(json!({ "bid_id": bid_id })),
        )
        .await?;
        txn.commit().await?;
        tracing::info!(rfp_id = %rfp_id, bid_id = %bid_id, "Awarded rfp");
        Ok(Some(to_rfp(updated)?))
    }
}
