use anyhow::Result;
use chrono::Utc;
use oxtrack_common::types::{Alert, AlertCondition, AlertStatus, AlertTimeframe};
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ActiveValue::Set, ColumnTrait, EntityTrait, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};

use crate::entities::alert::{self, Column, Entity};
use crate::store::Registry;

/// Alert creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    pub project_id: i64,
    pub project_name: String,
    pub team_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub threshold: i64,
    pub condition: AlertCondition,
    pub timeframe: AlertTimeframe,
    pub high_priority: bool,
}

/// Partial alert update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub threshold: Option<i64>,
    pub condition: Option<AlertCondition>,
    pub timeframe: Option<AlertTimeframe>,
    pub high_priority: Option<bool>,
}

/// One page of alerts plus the unpaginated total.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPage {
    pub alerts: Vec<Alert>,
    pub total: u64,
}

fn to_alert(m: alert::Model) -> Result<Alert> {
    Ok(Alert {
        id: m.id,
        project_id: m.project_id,
        project_name: m.project_name,
        team_id: m.team_id,
        name: m.name,
        description: m.description,
        threshold: m.threshold,
        condition: m.condition.parse().map_err(anyhow::Error::msg)?,
        timeframe: m.timeframe.parse().map_err(anyhow::Error::msg)?,
        high_priority: m.high_priority,
        status: m.status.parse().map_err(anyhow::Error::msg)?,
        last_triggered_at: m.last_triggered_at.map(|t| t.with_timezone(&Utc)),
        resolved_at: m.resolved_at.map(|t| t.with_timezone(&Utc)),
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

impl Registry {
    pub async fn create_alert(&self, new: &NewAlert) -> Result<Alert> {
        let now = Utc::now().fixed_offset();
        let am = alert::ActiveModel {
            id: NotSet,
            project_id: Set(new.project_id),
            project_name: Set(new.project_name.clone()),
            team_id: Set(new.team_id),
            name: Set(new.name.clone()),
            description: Set(new.description.clone()),
            threshold: Set(new.threshold),
            condition: Set(new.condition.to_string()),
            timeframe: Set(new.timeframe.to_string()),
            high_priority: Set(new.high_priority),
            status: Set(AlertStatus::Active.to_string()),
            last_triggered_at: Set(None),
            resolved_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        to_alert(model)
    }

    pub async fn get_alert(&self, id: i64) -> Result<Option<Alert>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        model.map(to_alert).transpose()
    }

    /// Alerts visible to a team set, newest first, optionally narrowed by a
    /// case-sensitive project-name substring.
    pub async fn list_alerts(
        &self,
        team_ids: &[i64],
        project_name_contains: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<AlertPage> {
        let mut q = Entity::find().filter(Column::TeamId.is_in(team_ids.to_vec()));
        if let Some(fragment) = project_name_contains {
            q = q.filter(Column::ProjectName.contains(fragment));
        }
        let total = q.clone().count(self.db()).await?;
        let rows = q
            .order_by(Column::CreatedAt, Order::Desc)
            .offset(offset as u64)
            .limit(limit as u64)
            .all(self.db())
            .await?;
        let alerts = rows.into_iter().map(to_alert).collect::<Result<_>>()?;
        Ok(AlertPage { alerts, total })
    }

    pub async fn update_alert(&self, id: i64, patch: &AlertPatch) -> Result<Option<Alert>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        let Some(m) = model else {
            return Ok(None);
        };
        let mut am: alert::ActiveModel = m.into();
        if let Some(name) = &patch.name {
            am.name = Set(name.clone());
        }
        if let Some(description) = &patch.description {
            am.description = Set(description.clone());
        }
        if let Some(threshold) = patch.threshold {
            am.threshold = Set(threshold);
        }
        if let Some(condition) = patch.condition {
            am.condition = Set(condition.to_string());
        }
        if let Some(timeframe) = patch.timeframe {
            am.timeframe = Set(timeframe.to_string());
        }
        if let Some(high_priority) = patch.high_priority {
            am.high_priority = Set(high_priority);
        }
        am.updated_at = Set(Utc::now().fixed_offset());
        let updated = am.update(self.db()).await?;
        Ok(Some(to_alert(updated)?))
    }

    /// All alerts watching one project, newest first.
    pub async fn list_alerts_by_project(&self, project_id: i64) -> Result<Vec<Alert>> {
        let rows = Entity::find()
            .filter(Column::ProjectId.eq(project_id))
            .order_by(Column::CreatedAt, Order::Desc)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_alert).collect()
    }

    pub async fn delete_alert(&self, id: i64) -> Result<bool> {
        let res = Entity::delete_by_id(id).exec(self.db()).await?;
        Ok(res.rows_affected > 0)
    }

    /// Every alert, for the evaluation sweep. Oldest first so long-lived
    /// alerts are not starved by newly created ones.
    pub async fn list_evaluatable_alerts(&self) -> Result<Vec<Alert>> {
        let rows = Entity::find()
            .order_by(Column::Id, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(to_alert).collect()
    }

    /// Threshold breached: record the trigger time and flip the status.
    pub async fn mark_triggered(&self, id: i64) -> Result<Option<Alert>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        let Some(m) = model else {
            return Ok(None);
        };
        let now = Utc::now().fixed_offset();
        let mut am: alert::ActiveModel = m.into();
        am.status = Set(AlertStatus::Triggered.to_string());
        am.last_triggered_at = Set(Some(now));
        am.updated_at = Set(now);
        let updated = am.update(self.db()).await?;
        Ok(Some(to_alert(updated)?))
    }

    /// Metric back under threshold: record the resolution time and return
    /// the alert to its armed state.
    pub async fn mark_resolved(&self, id: i64) -> Result<Option<Alert>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        let Some(m) = model else {
            return Ok(None);
        };
        let now = Utc::now().fixed_offset();
        let mut am: alert::ActiveModel = m.into();
        am.status = Set(AlertStatus::Active.to_string());
        am.resolved_at = Set(Some(now));
        am.updated_at = Set(now);
        let updated = am.update(self.db()).await?;
        Ok(Some(to_alert(updated)?))
    }
}
