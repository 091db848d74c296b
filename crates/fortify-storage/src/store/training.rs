use anyhow::Result;
use fortify_common::models::{TrainingCertificate, TrainingCourse, TrainingProgress};
use fortify_common::types::TrainingStatus;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, TransactionTrait,
};
use serde_json::json;

use crate::entities::{training_certificate, training_course, training_progress};
use crate::store::{
    conflict_on_unique, not_found, notify, now, parse_enum, record_audit, utc, Actor, FortifyStore,
};

pub struct NewCourse {
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub duration_minutes: i32,
    pub passing_score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CourseUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub duration_minutes: Option<i32>,
    pub passing_score: Option<f64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct CourseFilter {
    pub category: Option<String>,
    pub active_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressFilter {
    pub user_id: Option<String>,
    pub course_id: Option<String>,
    pub status: Option<TrainingStatus>,
}

fn to_course(m: training_course::Model) -> TrainingCourse {
    TrainingCourse {
        id: m.id,
        title: m.title,
        description: m.description,
        category: m.category,
        duration_minutes: m.duration_minutes,
        passing_score: m.passing_score,
        is_active: m.is_active,
        created_at: utc(m.created_at),
        updated_at: utc(m.updated_at),
    }
}

fn to_progress(m: training_progress::Model) -> Result<TrainingProgress> {
    Ok(TrainingProgress {
        status: parse_enum("training_progress.status", &m.status)?,
        id: m.id,
        user_id: m.user_id,
        course_id: m.course_id,
        progress: m.progress,
        score: m.score,
        started_at: m.started_at.map(utc),
        completed_at: m.completed_at.map(utc),
        certificate_id: m.certificate_id,
        created_at: utc(m.created_at),
        updated_at: utc(m.updated_at),
    })
}

fn to_certificate(m: training_certificate::Model) -> TrainingCertificate {
    TrainingCertificate {
        id: m.id,
        user_id: m.user_id,
        course_id: m.course_id,
        certificate_number: m.certificate_number,
        score: m.score,
        issued_at: utc(m.issued_at),
    }
}

fn courses_filtered(filter: &CourseFilter) -> Select<training_course::Entity> {
    use training_course::Column;
    let mut q = training_course::Entity::find();
    if let Some(category) = &filter.category {
        q = q.filter(Column::Category.eq(category.as_str()));
    }
    if filter.active_only {
        q = q.filter(Column::IsActive.eq(true));
    }
    q
}

fn progress_filtered(filter: &ProgressFilter) -> Select<training_progress::Entity> {
    use training_progress::Column;
    let mut q = training_progress::Entity::find();
    if let Some(user_id) = &filter.user_id {
        q = q.filter(Column::UserId.eq(user_id.as_str()));
    }
    if let Some(course_id) = &filter.course_id {
        q = q.filter(Column::CourseId.eq(course_id.as_str()));
    }
    if let Some(status) = filter.status {
        q = q.filter(Column::Status.eq(status.as_str()));
    }
    q
}

/// Status after an update: 100% with a passing (or absent) score completes
/// the course, 100% with a failing score fails it.
fn progress_status(progress: f64, score: Option<f64>, passing_score: f64) -> TrainingStatus {
    if progress >= 100.0 {
        match score {
            Some(s) if s < passing_score => TrainingStatus::Failed,
            _ => TrainingStatus::Completed,
        }
    } else if progress > 0.0 {
        TrainingStatus::InProgress
    } else {
        TrainingStatus::NotStarted
    }
}

impl FortifyStore {
    pub async fn create_course(&self, new: NewCourse, actor: &Actor) -> Result<TrainingCourse> {
        let now = now();
        let txn = self.db().begin().await?;
        let am = training_course::ActiveModel {
            id: Set(fortify_common::id::next_id()),
            title: Set(new.title),
            description: Set(new.description),
            category: Set(new.category),
            duration_minutes: Set(new.duration_minutes),
            passing_score: Set(new.passing_score),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(&txn).await?;
        record_audit(
            &txn,
            actor,
            "CREATE",
            "training_course",
            &model.id,
            Some(json!({ "title": model.title, "passing_score": model.passing_score })),
        )
        .await?;
        txn.commit().await?;
        Ok(to_course(model))
    }

    pub async fn get_course(&self, id: &str) -> Result<Option<TrainingCourse>> {
        let model = training_course::Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(to_course))
    }

    pub async fn list_courses(&self, filter: &CourseFilter, limit: u64, offset: u64) -> Result<Vec<TrainingCourse>> {
        let rows = courses_filtered(filter)
            .order_by(training_course::Column::Title, Order::Asc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_course).collect())
    }

    pub async fn count_courses(&self, filter: &CourseFilter) -> Result<u64> {
        Ok(courses_filtered(filter).count(self.db()).await?)
    }

    pub async fn update_course(&self, id: &str, update: CourseUpdate, actor: &Actor) -> Result<Option<TrainingCourse>> {
        let txn = self.db().begin().await?;
        let Some(m) = training_course::Entity::find_by_id(id).one(&txn).await? else {
            return Ok(None);
        };
        let mut am: training_course::ActiveModel = m.into();
        if let Some(title) = &update.title {
            am.title = Set(title.clone());
        }
        if let Some(description) = &update.description {
            am.description = Set(Some(description.clone()));
        }
        if let Some(category) = &update.category {
            am.category = Set(category.clone());
        }
        if let Some(minutes) = update.duration_minutes {
            am.duration_minutes = Set(minutes);
        }
        if let Some(score) = update.passing_score {
            am.passing_score = Set(score);
        }
        if let Some(active) = update.is_active {
            am.is_active = Set(active);
        }
        am.updated_at = Set(now());
        let updated = am.update(&txn).await?;
        record_audit(
            &txn,
            actor,
            "UPDATE",
            "training_course",
            id,
            Some(json!({
                "title": update.title,
                "passing_score": update.passing_score,
                "is_active": update.is_active,
            })),
        )
        .await?;
        txn.commit().await?;
        Ok(Some(to_course(updated)))
    }

    pub async fn list_progress(
        &self,
        filter: &ProgressFilter,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<TrainingProgress>> {
        let rows = progress_filtered(filter)
            .order_by(training_progress::Column::UpdatedAt, Order::Desc)
            .limit(limit)
            .offset(offset)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_progress).collect()
    }

    pub async fn count_progress(&self, filter: &ProgressFilter) -> Result<u64> {
        Ok(progress_filtered(filter).count(self.db()).await?)
    }

    /// Records a learner's progress on a course.
    ///
    /// Progress never goes backwards and the best score is kept. Completing
    /// the course with a score at or above its passing score mints the
    /// certificate once and notifies the learner.
    pub async fn upsert_progress(
        &self,
        user_id: &str,
        course_id: &str,
        progress: f64,
        score: Option<f64>,
        actor: &Actor,
    ) -> Result<(TrainingProgress, Option<TrainingCertificate>)> {
        use training_progress::Column;
        let now = now();
        let txn = self.db().begin().await?;
        let course = training_course::Entity::find_by_id(course_id)
            .one(&txn)
            .await?
            .ok_or_else(|| not_found("training course", course_id))?;

        let existing = training_progress::Entity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::CourseId.eq(course_id))
            .one(&txn)
            .await?;

        let progress = progress.clamp(0.0, 100.0);
        let (merged_progress, merged_score, started_at, completed_at, certificate_id) = match &existing {
            Some(m) => (
                m.progress.max(progress),
                match (m.score, score) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                },
                m.started_at,
                m.completed_at,
                m.certificate_id.clone(),
            ),
            None => (progress, score, None, None, None),
        };
        let status = progress_status(merged_progress, merged_score, course.passing_score);
        let started_at = started_at.or((merged_progress > 0.0).then_some(now));
        let completed_at = match status {
            TrainingStatus::Completed => completed_at.or(Some(now)),
            _ => completed_at,
        };

        let mut certificate = None;
        let mut certificate_id = certificate_id;
        if status == TrainingStatus::Completed && certificate_id.is_none() {
            if let Some(s) = merged_score.filter(|s| *s >= course.passing_score) {
                let cert = training_certificate::ActiveModel {
                    id: Set(fortify_common::id::next_id()),
                    user_id: Set(user_id.to_owned()),
                    course_id: Set(course_id.to_owned()),
                    certificate_number: Set(fortify_common::id::document_number("TC")),
                    score: Set(s),
                    issued_at: Set(now),
                }
                .insert(&txn)
                .await
                .map_err(|e| conflict_on_unique(e, "a certificate was already issued for this course"))?;
                notify(
                    &txn,
                    user_id,
                    "TRAINING",
                    "Training certificate issued".to_owned(),
                    format!("You completed '{}' with a score of {s:.1}", course.title),
                    Some("/v1/training/certificates".to_owned()),
                )
                .await?;
                certificate_id = Some(cert.id.clone());
                certificate = Some(to_certificate(cert));
            }
        }

        let model = match existing {
            Some(m) => {
                let mut am: training_progress::ActiveModel = m.into();
                am.progress = Set(merged_progress);
                am.score = Set(merged_score);
                am.status = Set(status.as_str().to_owned());
                am.started_at = Set(started_at);
                am.completed_at = Set(completed_at);
                am.certificate_id = Set(certificate_id);
                am.updated_at = Set(now);
                am.update(&txn).await?
            }
            None => {
                training_progress::ActiveModel {
                    id: Set(fortify_common::id::next_id()),
                    user_id: Set(user_id.to_owned()),
                    course_id: Set(course_id.to_owned()),
                    progress: Set(merged_progress),
                    score: Set(merged_score),
                    status: Set(status.as_str().to_owned()),
                    started_at: Set(started_at),
                    completed_at: Set(completed_at),
                    certificate_id: Set(certificate_id),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };

        record_audit(
            &txn,
            actor,
            "UPSERT_PROGRESS",
            "training_progress",
            &model.id,
            Some(json!({
                "course_id": course_id,
                "progress": merged_progress,
                "score": merged_score,
                "status": status,
                "certificate_issued": certificate.is_some(),
            })),
        )
        .await?;
        txn.commit().await?;
        if let Some(cert) = &certificate {
            tracing::info!(
                user_id = %user_id,
                course_id = %course_id,
                certificate = %cert.certificate_number,
                "Issued training certificate"
            );
        }
        Ok((to_progress(model)?, certificate))
    }

    pub async fn list_training_certificates(&self, user_id: Option<&str>) -> Result<Vec<TrainingCertificate>> {
        use training_certificate::Column;
        let mut q = training_certificate::Entity::find();
        if let Some(user_id) = user_id {
            q = q.filter(Column::UserId.eq(user_id));
        }
        let rows = q.order_by(Column::IssuedAt, Order::Desc).all(self.db()).await?;
        Ok(rows.into_iter().map(to_certificate).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_progress_and_score() {
        assert_eq!(progress_status(0.0, None, 70.0), TrainingStatus::NotStarted);
        assert_eq!(progress_status(40.0, Some(10.0), 70.0), TrainingStatus::InProgress);
        assert_eq!(progress_status(100.0, Some(69.9), 70.0), TrainingStatus::Failed);
        assert_eq!(progress_status(100.0, Some(70.0), 70.0), TrainingStatus::Completed);
        assert_eq!(progress_status(100.0, None, 70.0), TrainingStatus::Completed);
    }
}
