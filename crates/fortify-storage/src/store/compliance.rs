use anyhow::Result;
use chrono::Duration;
use fortify_analytics::compliance::{Responses, ScoreBreakdown};
use fortify_common::models::{
    ComplianceAnnotation, ComplianceAudit, ComplianceTemplate, MillCertificate,
};
use fortify_common::types::{AnnotationType, AuditStatus, Role, StatusTransition};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, TransactionTrait,
};
use serde_json::{json, Value};

use crate::entities::{
    compliance_annotation, compliance_audit, compliance_template, mill_certificate,
};
use crate::error::StorageError;
use crate::store::user::users_with_role;
use crate::store::{
    conflict_on_unique, from_json, not_found, notify, now, parse_enum, record_audit, to_json, utc,
    Actor, FortifyStore,
};

pub struct NewTemplate {
    pub name: String,
    pub description: Option<String>,
    pub sections: Value,
    pub scoring_rules: Value,
}

/// Fields replaced in a new template version; unset fields are copied.
#[derive(Debug, Clone, Default)]
pub struct TemplateRevision {
    pub description: Option<String>,
    pub sections: Option<Value>,
    pub scoring_rules: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateFilter {
    pub active_only: bool,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub mill_id: Option<String>,
    pub template_id: Option<String>,
    pub status: Option<AuditStatus>,
}

fn to_template(m: compliance_template::Model) -> Result<ComplianceTemplate> {
    Ok(ComplianceTemplate {
        sections: from_json("compliance_templates.sections", &m.sections)?,
        scoring_rules: from_json("compliance_templates.scoring_rules", &m.scoring_rules)?,
        id: m.id,
        name: m.name,
        version: m.version,
        description: m.description,
        is_active: m.is_active,
        parent_id: m.parent_id,
        created_by: m.created_by,
        created_at: utc(m.created_at),
        updated_at: utc(m.updated_at),
    })
}

fn to_audit(m: compliance_audit::Model) -> Result<ComplianceAudit> {
    Ok(ComplianceAudit {
        responses: from_json("compliance_audits.responses", &m.responses)?,
        section_scores: m
            .section_scores
            .as_deref()
            .map(|t| from_json("compliance_audits.section_scores", t))
            .transpose()?,
        red_flags: m
            .red_flags
            .as_deref()
            .map(|t| from_json("compliance_audits.red_flags", t))
            .transpose()?,
        status: parse_enum("compliance_audits.status", &m.status)?,
        id: m.id,
        mill_id: m.mill_id,
        template_id: m.template_id,
        submitted_by: m.submitted_by,
        reviewer_id: m.reviewer_id,
        score: m.score,
        passed: m.passed,
        review_notes: m.review_notes,
        submitted_at: m.submitted_at.map(utc),
        reviewed_at: m.reviewed_at.map(utc),
        created_at: utc(m.created_at),
        updated_at: utc(m.updated_at),
    })
}

fn to_annotation(m: compliance_annotation::Model) -> Result<ComplianceAnnotation> {
    Ok(ComplianceAnnotation {
        annotation_type: parse_enum("compliance_annotations.annotation_type", &m.annotation_type)?,
        id: m.id,
        audit_id: m.audit_id,
        item_id: m.item_id,
        author_id: m.author_id,
        comment: m.comment,
        created_at: utc(m.created_at),
    })
}

fn to_certificate(m: mill_certificate::Model) -> MillCertificate {
    MillCertificate {
        id: m.id,
        mill_id: m.mill_id,
        audit_id: m.audit_id,
        certificate_number: m.certificate_number,
        score: m.score,
        issued_by: m.issued_by,
        issued_at: utc(m.issued_at),
        valid_until: utc(m.valid_until),
    }
}

fn templates_filtered(filter: &TemplateFilter) -> Select<compliance_template::Entity> {
    use compliance_template::Column;
    let mut q = compliance_template::Entity::find();
    if filter.active_only {
        q = q.filter(Column::IsActive.eq(true));
    }
    if let Some(name) = &filter.name {
        q = q.filter(Column::Name.eq(name.as_str()));
    }
    q
}

fn audits_filtered(filter: &AuditFilter) -> Select<compliance_audit::Entity> {
    use compliance_audit::Column;
    let mut q = compliance_audit::Entity::find();
    if let Some(mill_id) = &filter.mill_id {
        q = q.filter(Column::MillId.eq(mill_id.as_str()));
    }
    if let Some(template_id) = &filter.template_id {
        q = q.filter(Column::TemplateId.eq(template_id.as_str()));
    }
    if let Some(status) = filter.status {
        q = q.filter(Column::Status.eq(status.as_str()));
    }
    q
}

impl FortifyStore {
    // ---- templates ----

    /// Stores version 1 of a new template. Callers validate the documents first.
    pub async fn create_template(&self, new: NewTemplate, actor: &Actor) -> Result<ComplianceTemplate> {
        let now = now();
        let txn = self.db().begin().await?;
        let am = compliance_template::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            name: Set(new.name),
            version: Set(1),
            description: Set(new.description),
            sections: Set(to_json("compliance_templates.sections", &new.sections)?),
            scoring_rules: Set(to_json("compliance_templates.scoring_rules", &new.scoring_rules)?),
            is_active: Set(true),
            parent_id: Set(None),
            created_by: Set(actor.user_id.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am
            .insert(&txn)
            .await
            .map_err(|e| conflict_on_unique(e, "a template with this name already exists"))?;
        record_audit(
            &txn,
            actor,
            "CREATE",
            "compliance_template",
            &model.id,
            Some(json!({ "name": model.name, "version": model.version })),
        )
        .await?;
        txn.commit().await?;
        to_template(model)
    }

    pub async fn get_template(&self, id: &str) -> Result<Option<ComplianceTemplate>> {
        let model = compliance_template::Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_template).transpose()
    }

    pub async fn list_templates(
        &self,
        filter: &TemplateFilter,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<ComplianceTemplate>> {
        use compliance_template::Column;
        let rows = templates_filtered(filter)
            .order_by(Column::Name, Order::Asc)
            .order_by(Column::Version, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_template).collect()
    }

    pub async fn count_templates(&self, filter: &TemplateFilter) -> Result<u64> {
        Ok(templates_filtered(filter).count(self.db()).await?)
    }

    /// Clones `parent_id` into the next version of its template family and
    /// deactivates every earlier version. Old versions are never deleted.
    pub async fn create_template_version(
        &self,
        parent_id: &str,
        revision: TemplateRevision,
        actor: &Actor,
    ) -> Result<Option<ComplianceTemplate>> {
        use compliance_template::{Column, Entity};
        let now = now();
        let txn = self.db().begin().await?;
        let Some(parent) = Entity::find_by_id(parent_id).one(&txn).await? else {
            return Ok(None);
        };
        let latest = Entity::find()
            .filter(Column::Name.eq(parent.name.as_str()))
            .order_by(Column::Version, Order::Desc)
            .one(&txn)
            .await?
            .map(|m| m.version)
            .unwrap_or(parent.version);

        Entity::update_many()
            .col_expr(Column::IsActive, Expr::value(false))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Name.eq(parent.name.as_str()))
            .exec(&txn)
            .await?;

        let sections = match &revision.sections {
            Some(v) => to_json("compliance_templates.sections", v)?,
            None => parent.sections.clone(),
        };
        let scoring_rules = match &revision.scoring_rules {
            Some(v) => to_json("compliance_templates.scoring_rules", v)?,
            None => parent.scoring_rules.clone(),
        };
        let am = compliance_template::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            name: Set(parent.name.clone()),
            version: Set(latest + 1),
            description: Set(revision.description.or(parent.description.clone())),
            sections: Set(sections),
            scoring_rules: Set(scoring_rules),
            is_active: Set(true),
            parent_id: Set(Some(parent.id.clone())),
            created_by: Set(actor.user_id.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am
            .insert(&txn)
            .await
            .map_err(|e| conflict_on_unique(e, "template version already exists"))?;
        record_audit(
            &txn,
            actor,
            "NEW_VERSION",
            "compliance_template",
            &model.id,
            Some(json!({ "parent_id": parent.id, "version": model.version })),
        )
        .await?;
        txn.commit().await?;
        tracing::info!(
            template = %model.name,
            version = model.version,
            "Published new compliance template version"
        );
        Ok(Some(to_template(model)?))
    }

    // ---- audits ----

    /// Opens an IN_PROGRESS audit against an active template.
    pub async fn start_audit(
        &self,
        mill_id: &str,
        template_id: &str,
        submitted_by: &str,
        actor: &Actor,
    ) -> Result<ComplianceAudit> {
        let now = now();
        let txn = self.db().begin().await?;
        let template = compliance_template::Entity::find_by_id(template_id)
            .one(&txn)
            .await?
            .ok_or_else(|| not_found("compliance template", template_id))?;
        if !template.is_active {
            return Err(StorageError::InvalidState(format!(
                "template '{}' v{} is no longer active",
                template.name, template.version
            ))
            .into());
        }
        let am = compliance_audit::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            mill_id: Set(mill_id.to_owned()),
            template_id: Set(template_id.to_owned()),
            submitted_by: Set(submitted_by.to_owned()),
            reviewer_id: Set(None),
            responses: Set("{}".to_owned()),
            score: Set(None),
            section_scores: Set(None),
            red_flags: Set(None),
            passed: Set(None),
            status: Set(AuditStatus::InProgress.as_str().to_owned()),
            review_notes: Set(None),
            submitted_at: Set(None),
            reviewed_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(&txn).await?;
        record_audit(
            &txn,
            actor,
            "CREATE",
            "compliance_audit",
            &model.id,
            Some(json!({ "mill_id": mill_id, "template_id": template_id })),
        )
        .await?;
        txn.commit().await?;
        to_audit(model)
    }

    pub async fn get_audit(&self, id: &str) -> Result<Option<ComplianceAudit>> {
        let model = compliance_audit::Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_audit).transpose()
    }

    pub async fn list_audits(&self, filter: &AuditFilter, limit: u64, offset: u64) -> Result<Vec<ComplianceAudit>> {
        let rows = audits_filtered(filter)
            .order_by(compliance_audit::Column::CreatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_audit).collect()
    }

    pub async fn count_audits(&self, filter: &AuditFilter) -> Result<u64> {
        Ok(audits_filtered(filter).count(self.db()).await?)
    }

    /// Merges `updates` into the stored responses; a null value removes the answer.
    pub async fn save_responses(
        &self,
        id: &str,
        updates: &Responses,
        actor: &Actor,
    ) -> Result<Option<ComplianceAudit>> {
        let txn = self.db().begin().await?;
        let Some(m) = compliance_audit::Entity::find_by_id(id).one(&txn).await? else {
            return Ok(None);
        };
        let status: AuditStatus = parse_enum("compliance_audits.status", &m.status)?;
        if !status.is_editable() {
            return Err(StorageError::InvalidState(format!(
                "responses cannot be edited while the audit is {status}"
            ))
            .into());
        }
        let mut responses: Responses = from_json("compliance_audits.responses", &m.responses)?;
        for (item_id, value) in updates {
            if value.is_null() {
                responses.remove(item_id);
            } else {
                responses.insert(item_id.clone(), value.clone());
            }
        }
        let mut am: compliance_audit::ActiveModel = m.into();
        am.responses = Set(to_json("compliance_audits.responses", &responses)?);
        am.updated_at = Set(now());
        let updated = am.update(&txn).await?;
        record_audit(
            &txn,
            actor,
            "SAVE_RESPONSES",
            "compliance_audit",
            id,
            Some(json!({ "items": updates.keys().collect::<Vec<_>>() })),
        )
        .await?;
        txn.commit().await?;
        Ok(Some(to_audit(updated)?))
    }

    /// Stores the score breakdown, moves the audit to SUBMITTED and notifies
    /// every active inspector.
    pub async fn submit_audit(
        &self,
        id: &str,
        breakdown: &ScoreBreakdown,
        actor: &Actor,
    ) -> Result<Option<ComplianceAudit>> {
        let now = now();
        let txn = self.db().begin().await?;
        let Some(m) = compliance_audit::Entity::find_by_id(id).one(&txn).await? else {
            return Ok(None);
        };
        let current: AuditStatus = parse_enum("compliance_audits.status", &m.status)?;
        let next = current
            .transition_to(AuditStatus::Submitted)
            .map_err(StorageError::from)?;
        let mill_id = m.mill_id.clone();
        let mut am: compliance_audit::ActiveModel = m.into();
        am.status = Set(next.as_str().to_owned());
        am.score = Set(Some(breakdown.score));
        am.section_scores = Set(Some(to_json("compliance_audits.section_scores", &breakdown.sections)?));
        am.red_flags = Set(Some(to_json("compliance_audits.red_flags", &breakdown.red_flags)?));
        am.passed = Set(Some(breakdown.passed));
        am.submitted_at = Set(Some(now));
        am.updated_at = Set(now);
        let updated = am.update(&txn).await?;

        for inspector in users_with_role(&txn, Role::Inspector, None).await? {
            notify(
                &txn,
                &inspector.id,
                "COMPLIANCE",
                "Compliance audit submitted".to_owned(),
                format!("Audit {id} scored {:.2} and awaits review", breakdown.score),
                Some(format!("/v1/compliance/audits/{id}")),
            )
            .await?;
        }

        record_audit(
            &txn,
            actor,
            "SUBMIT",
            "compliance_audit",
            id,
            Some(json!({
                "score": breakdown.score,
                "passed": breakdown.passed,
                "outcome": breakdown.outcome,
                "red_flags": breakdown.red_flags.len(),
            })),
        )
        .await?;
        txn.commit().await?;
        tracing::info!(
            audit_id = %id,
            mill_id = %mill_id,
            score = breakdown.score,
            passed = breakdown.passed,
            "Compliance audit submitted"
        );
        Ok(Some(to_audit(updated)?))
    }

    /// Records an inspector's decision and notifies the mill's managers.
    ///
    /// `decision` must be APPROVED, REJECTED or REVISION_REQUESTED.
    pub async fn review_audit(
        &self,
        id: &str,
        decision: AuditStatus,
        notes: Option<String>,
        actor: &Actor,
    ) -> Result<Option<ComplianceAudit>> {
        if !matches!(
            decision,
            AuditStatus::Approved | AuditStatus::Rejected | AuditStatus::RevisionRequested
        ) {
            return Err(StorageError::InvalidState(format!("{decision} is not a review decision")).into());
        }
        let now = now();
        let txn = self.db().begin().await?;
        let Some(m) = compliance_audit::Entity::find_by_id(id).one(&txn).await? else {
            return Ok(None);
        };
        let current: AuditStatus = parse_enum("compliance_audits.status", &m.status)?;
        let next = current.transition_to(decision).map_err(StorageError::from)?;
        let mill_id = m.mill_id.clone();
        let mut am: compliance_audit::ActiveModel = m.into();
        am.status = Set(next.as_str().to_owned());
        am.reviewer_id = Set(actor.user_id.clone());
        am.review_notes = Set(notes.clone());
        am.reviewed_at = Set(Some(now));
        am.updated_at = Set(now);
        let updated = am.update(&txn).await?;

        for manager in users_with_role(&txn, Role::MillManager, Some(&mill_id)).await? {
            notify(
                &txn,
                &manager.id,
                "COMPLIANCE",
                format!("Compliance audit {}", next.as_str().to_lowercase().replace('_', " ")),
                notes.clone().unwrap_or_else(|| format!("Audit {id} was reviewed")),
                Some(format!("/v1/compliance/audits/{id}")),
            )
            .await?;
        }

        record_audit(
            &txn,
            actor,
            "REVIEW",
            "compliance_audit",
            id,
            Some(json!({ "from": current, "decision": next })),
        )
        .await?;
        txn.commit().await?;
        Ok(Some(to_audit(updated)?))
    }

    // ---- annotations ----

    pub async fn add_annotation(
        &self,
        audit_id: &str,
        item_id: Option<String>,
        annotation_type: AnnotationType,
        comment: String,
        actor: &Actor,
    ) -> Result<ComplianceAnnotation> {
        let author_id = actor
            .user_id
            .clone()
            .ok_or_else(|| StorageError::InvalidState("annotations need an author".into()))?;
        let txn = self.db().begin().await?;
        if compliance_audit::Entity::find_by_id(audit_id).one(&txn).await?.is_none() {
            return Err(not_found("compliance audit", audit_id));
        }
        let am = compliance_annotation::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            audit_id: Set(audit_id.to_owned()),
            item_id: Set(item_id),
            author_id: Set(author_id),
            annotation_type: Set(annotation_type.as_str().to_owned()),
            comment: Set(comment),
            created_at: Set(now()),
        };
        let model = am.insert(&txn).await?;
        record_audit(
            &txn,
            actor,
            "ANNOTATE",
            "compliance_audit",
            audit_id,
            Some(json!({ "annotation_id": model.id, "item_id": model.item_id })),
        )
        .await?;
        txn.commit().await?;
        to_annotation(model)
    }

    /// Oldest first.
    pub async fn list_annotations(&self, audit_id: &str) -> Result<Vec<ComplianceAnnotation>> {
        use compliance_annotation::Column;
        let rows = compliance_annotation::Entity::find()
            .filter(Column::AuditId.eq(audit_id))
            .order_by(Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_annotation).collect()
    }

    // ---- certificates ----

    /// Issues the mill certificate for an APPROVED audit scoring at least
    /// `min_score` whose stored outcome passed. At most one certificate
    /// exists per audit.
    pub async fn issue_certificate(
        &self,
        audit_id: &str,
        min_score: f64,
        validity_days: i64,
        actor: &Actor,
    ) -> Result<Option<MillCertificate>> {
        let now = now();
        let txn = self.db().begin().await?;
        let Some(audit) = compliance_audit::Entity::find_by_id(audit_id).one(&txn).await? else {
            return Ok(None);
        };
        let status: AuditStatus = parse_enum("compliance_audits.status", &audit.status)?;
        if status != AuditStatus::Approved {
            return Err(StorageError::NotEligible(format!(
                "audit must be APPROVED to issue a certificate (current: {status})"
            ))
            .into());
        }
        let score = audit.score.unwrap_or(0.0);
        if score < min_score {
            return Err(StorageError::NotEligible(format!(
                "audit score {score:.2} is below the certificate minimum {min_score:.2}"
            ))
            .into());
        }
        if audit.passed == Some(false) {
            return Err(StorageError::NotEligible(
                "audit failed its scoring rules and cannot be certified".into(),
            )
            .into());
        }
        let existing = mill_certificate::Entity::find()
            .filter(mill_certificate::Column::AuditId.eq(audit_id))
            .one(&txn)
            .await?;
        if existing.is_some() {
            return Err(StorageError::Conflict("a certificate was already issued for this audit".into()).into());
        }

        let am = mill_certificate::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            mill_id: Set(audit.mill_id.clone()),
            audit_id: Set(audit_id.to_owned()),
            certificate_number: Set(fortify_common::id::document_number("FMC")),
            score: Set(score),
            issued_by: Set(actor.user_id.clone().unwrap_or_else(|| "system".to_owned())),
            issued_at: Set(now),
            valid_until: Set(now + Duration::days(validity_days)),
        };
        let model = am
            .insert(&txn)
            .await
            .map_err(|e| conflict_on_unique(e, "a certificate was already issued for this audit"))?;
        record_audit(
            &txn,
            actor,
            "ISSUE_CERTIFICATE",
            "compliance_audit",
            audit_id,
            Some(json!({ "certificate_number": model.certificate_number, "score": score })),
        )
        .await?;
        txn.commit().await?;
        tracing::info!(
            audit_id = %audit_id,
            mill_id = %model.mill_id,
            certificate = %model.certificate_number,
            "Issued mill certificate"
        );
        Ok(Some(to_certificate(model)))
    }

    pub async fn list_certificates(&self, mill_id: Option<&str>) -> Result<Vec<MillCertificate>> {
        use mill_certificate::Column;
        let mut q = mill_certificate::Entity::find();
        if let Some(mill_id) = mill_id {
            q = q.filter(Column::MillId.eq(mill_id));
        }
        let rows = q.order_by(Column::IssuedAt, Order::Desc).all(self.db()).await?;
        Ok(rows.into_iter().map(to_certificate).collect())
    }
}
