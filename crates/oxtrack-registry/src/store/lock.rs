use anyhow::Result;
use chrono::{Duration, Utc};
use oxtrack_common::types::AlertLock;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ActiveValue::Set, ColumnTrait, DbErr, EntityTrait, QueryFilter};

use crate::entities::alert_lock::{self, Column, Entity};
use crate::store::Registry;

impl Registry {
    /// Try to acquire the evaluation lock for one alert.
    ///
    /// An insert guarded by `ON CONFLICT DO NOTHING` wins the uncontended
    /// case; on conflict a takeover update succeeds only if the existing
    /// lock has expired. Both paths are single atomic statements, so two
    /// instances can never both hold an unexpired lock.
    pub async fn acquire_alert_lock(
        &self,
        alert_id: i64,
        instance_id: &str,
        lease: Duration,
    ) -> Result<bool> {
        let now = Utc::now().fixed_offset();
        let expires_at = (Utc::now() + lease).fixed_offset();

        let am = alert_lock::ActiveModel {
            alert_id: Set(alert_id),
            instance_id: Set(instance_id.to_string()),
            locked_at: Set(now),
            expires_at: Set(expires_at),
        };
        let insert = Entity::insert(am)
            .on_conflict(
                OnConflict::column(Column::AlertId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(self.db())
            .await;

        match insert {
            Ok(_) => Ok(true),
            Err(DbErr::RecordNotInserted) => {
                // Row exists; take it over only if the lease has lapsed.
                let res = Entity::update_many()
                    .col_expr(Column::InstanceId, Expr::value(instance_id))
                    .col_expr(Column::LockedAt, Expr::value(now))
                    .col_expr(Column::ExpiresAt, Expr::value(expires_at))
                    .filter(Column::AlertId.eq(alert_id))
                    .filter(Column::ExpiresAt.lte(now))
                    .exec(self.db())
                    .await?;
                Ok(res.rows_affected > 0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Release a lock this instance holds. A lock taken over by another
    /// instance after expiry is left alone.
    pub async fn release_alert_lock(&self, alert_id: i64, instance_id: &str) -> Result<bool> {
        let res = Entity::delete_many()
            .filter(Column::AlertId.eq(alert_id))
            .filter(Column::InstanceId.eq(instance_id))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected > 0)
    }

    /// Remove every expired lock. Returns the number removed.
    pub async fn cleanup_expired_locks(&self) -> Result<u64> {
        let now = Utc::now().fixed_offset();
        let res = Entity::delete_many()
            .filter(Column::ExpiresAt.lte(now))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }

    pub async fn get_alert_lock(&self, alert_id: i64) -> Result<Option<AlertLock>> {
        let model = Entity::find_by_id(alert_id).one(self.db()).await?;
        Ok(model.map(|m| AlertLock {
            alert_id: m.alert_id,
            instance_id: m.instance_id,
            locked_at: m.locked_at.with_timezone(&Utc),
            expires_at: m.expires_at.with_timezone(&Utc),
        }))
    }
}
