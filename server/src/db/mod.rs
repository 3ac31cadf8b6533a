use async_trait::async_trait;
use shared::{ConfigScope, LevelThresholds, MemberAggregate, PointConfigPatch, TeamAggregate};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use crate::error::ProcessError;

pub mod memory;
pub mod types;

use types::{Award, AwardOutcome, LeaderboardPage, LeaderboardRow};

/// Transactional persistence of point history and running totals. The
/// pipeline only sees this trait so it can run against [`memory::MemStore`]
/// in tests and local setups.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Atomically: history insert, member increment, team increment,
    /// level recomputation. Re-applying an already-seen activity id is a
    /// no-op reported via `duplicate`.
    async fn apply_award(&self, award: &Award) -> Result<AwardOutcome, ProcessError>;

    async fn member(&self, team_member_id: Uuid) -> Result<MemberAggregate, ProcessError>;

    async fn team(&self, team_id: Uuid) -> Result<TeamAggregate, ProcessError>;

    async fn leaderboard(
        &self,
        team_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<LeaderboardPage, ProcessError>;

    async fn config_patch(
        &self,
        scope: ConfigScope,
    ) -> Result<Option<PointConfigPatch>, ProcessError>;

    async fn put_config_patch(
        &self,
        scope: ConfigScope,
        patch: &PointConfigPatch,
    ) -> Result<(), ProcessError>;
}

fn storage(err: sqlx::Error) -> ProcessError {
    ProcessError::Storage(err.into())
}

fn scope_key(scope: ConfigScope) -> (&'static str, Uuid) {
    match scope {
        ConfigScope::Company(id) => ("company", id),
        ConfigScope::Organization(id) => ("organization", id),
    }
}

/// Postgres-backed store. Member rows serialize concurrent awards via
/// `FOR UPDATE`; team counters are incremented in place so awards to
/// different members of one team never race each other.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    thresholds: LevelThresholds,
}

impl PgStore {
    pub fn new(pool: PgPool, thresholds: LevelThresholds) -> Self {
        Self { pool, thresholds }
    }

    async fn insert_history(
        tx: &mut Transaction<'static, Postgres>,
        award: &Award,
    ) -> Result<(), ProcessError> {
        sqlx::query(
            r#"
            INSERT INTO points_history
                (id, activity_id, team_member_id, tenant_id, activity_type,
                 base_points, ai_modifier, final_points, breakdown,
                 occurred_month, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(award.activity_id)
        .bind(award.team_member_id)
        .bind(award.tenant_id)
        .bind(award.activity_type.to_string())
        .bind(award.breakdown.base_points as i32)
        .bind(award.breakdown.ai_modifier_applied)
        .bind(award.breakdown.final_points as i32)
        .bind(serde_json::to_value(&award.breakdown).unwrap_or_default())
        .bind(award.occurred_month())
        .execute(tx.as_mut())
        .await
        .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl AggregateStore for PgStore {
    #[instrument(skip(self, award), fields(activity_id = %award.activity_id))]
    async fn apply_award(&self, award: &Award) -> Result<AwardOutcome, ProcessError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        // Lock the member row so concurrent awards to one member serialize
        let member = sqlx::query(
            r#"
            SELECT team_id, total_points, current_level
            FROM member_aggregates
            WHERE team_member_id = $1
            FOR UPDATE
            "#,
        )
        .bind(award.team_member_id)
        .fetch_optional(tx.as_mut())
        .await
        .map_err(storage)?
        .ok_or(ProcessError::MemberNotFound(award.team_member_id))?;

        let team_id: Uuid = member.get("team_id");
        let old_total: i64 = member.get("total_points");
        let old_level: i32 = member.get("current_level");

        // Dedup under the member lock. A redelivered event parked behind
        // another worker's transaction reads here only after that
        // transaction commits, so its history row is visible.
        let seen = sqlx::query("SELECT 1 FROM points_history WHERE activity_id = $1")
            .bind(award.activity_id)
            .fetch_optional(tx.as_mut())
            .await
            .map_err(storage)?;

        if seen.is_some() {
            let team_total: i64 =
                sqlx::query("SELECT total_points FROM team_aggregates WHERE team_id = $1")
                    .bind(team_id)
                    .fetch_one(tx.as_mut())
                    .await
                    .map_err(storage)?
                    .get("total_points");
            tx.commit().await.map_err(storage)?;
            return Ok(AwardOutcome {
                team_id,
                new_member_total: old_total,
                new_team_total: team_total,
                new_level: old_level as u32,
                leveled_up: false,
                duplicate: true,
            });
        }

        Self::insert_history(&mut tx, award).await?;

        let points = i64::from(award.breakdown.final_points);
        let new_member_total = old_total + points;
        // Levels are monotonic: recomputation never lowers an earned level
        let new_level = self
            .thresholds
            .level_for(new_member_total)
            .max(old_level as u32);
        let leveled_up = new_level > old_level as u32;

        sqlx::query(
            r#"
            UPDATE member_aggregates
            SET total_points = $2, current_level = $3, last_awarded_at = now()
            WHERE team_member_id = $1
            "#,
        )
        .bind(award.team_member_id)
        .bind(new_member_total)
        .bind(new_level as i32)
        .execute(tx.as_mut())
        .await
        .map_err(storage)?;

        let (ai_delta, standard_delta) = if award.is_ai_generated {
            (points, 0)
        } else {
            (0, points)
        };
        let team = sqlx::query(
            r#"
            UPDATE team_aggregates
            SET total_points = total_points + $2,
                ai_generated_points = ai_generated_points + $3,
                standard_points = standard_points + $4
            WHERE team_id = $1
            RETURNING total_points
            "#,
        )
        .bind(team_id)
        .bind(points)
        .bind(ai_delta)
        .bind(standard_delta)
        .fetch_optional(tx.as_mut())
        .await
        .map_err(storage)?
        .ok_or(ProcessError::TeamNotFound(team_id))?;
        let new_team_total: i64 = team.get("total_points");

        if leveled_up {
            sqlx::query(
                r#"
                INSERT INTO level_achievements (id, team_member_id, level, total_points, achieved_at)
                VALUES ($1, $2, $3, $4, now())
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(award.team_member_id)
            .bind(new_level as i32)
            .bind(new_member_total)
            .execute(tx.as_mut())
            .await
            .map_err(storage)?;
        }

        tx.commit().await.map_err(storage)?;

        Ok(AwardOutcome {
            team_id,
            new_member_total,
            new_team_total,
            new_level,
            leveled_up,
            duplicate: false,
        })
    }

    async fn member(&self, team_member_id: Uuid) -> Result<MemberAggregate, ProcessError> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, team_id, organization_id, total_points,
                   current_level, last_awarded_at
            FROM member_aggregates
            WHERE team_member_id = $1
            "#,
        )
        .bind(team_member_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?
        .ok_or(ProcessError::MemberNotFound(team_member_id))?;

        Ok(MemberAggregate {
            team_member_id,
            tenant_id: row.get("tenant_id"),
            team_id: row.get("team_id"),
            organization_id: row.get("organization_id"),
            total_points: row.get("total_points"),
            current_level: row.get::<i32, _>("current_level") as u32,
            last_awarded_at: row.get("last_awarded_at"),
        })
    }

    async fn team(&self, team_id: Uuid) -> Result<TeamAggregate, ProcessError> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, total_points, ai_generated_points,
                   standard_points, member_count
            FROM team_aggregates
            WHERE team_id = $1
            "#,
        )
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?
        .ok_or(ProcessError::TeamNotFound(team_id))?;

        Ok(TeamAggregate {
            team_id,
            tenant_id: row.get("tenant_id"),
            total_points: row.get("total_points"),
            ai_generated_points: row.get("ai_generated_points"),
            standard_points: row.get("standard_points"),
            member_count: row.get::<i32, _>("member_count") as u32,
        })
    }

    async fn leaderboard(
        &self,
        team_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<LeaderboardPage, ProcessError> {
        let items: Vec<LeaderboardRow> = sqlx::query_as(
            r#"
            SELECT RANK() OVER (ORDER BY total_points DESC) as rank,
                   team_member_id, total_points, current_level
            FROM member_aggregates
            WHERE team_id = $1
            ORDER BY total_points DESC, team_member_id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(team_id)
        .bind(i64::from(page_size))
        .bind(i64::from(page) * i64::from(page_size))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let total: i64 =
            sqlx::query("SELECT COUNT(*) as total FROM member_aggregates WHERE team_id = $1")
                .bind(team_id)
                .fetch_one(&self.pool)
                .await
                .map_err(storage)?
                .get("total");

        Ok(LeaderboardPage {
            items,
            total: total as u64,
        })
    }

    async fn config_patch(
        &self,
        scope: ConfigScope,
    ) -> Result<Option<PointConfigPatch>, ProcessError> {
        let (scope_type, scope_id) = scope_key(scope);
        let row =
            sqlx::query("SELECT patch FROM config_patches WHERE scope_type = $1 AND scope_id = $2")
                .bind(scope_type)
                .bind(scope_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;

        match row {
            Some(row) => {
                let value: serde_json::Value = row.get("patch");
                let patch =
                    serde_json::from_value(value).map_err(|e| ProcessError::Storage(e.into()))?;
                Ok(Some(patch))
            }
            None => Ok(None),
        }
    }

    async fn put_config_patch(
        &self,
        scope: ConfigScope,
        patch: &PointConfigPatch,
    ) -> Result<(), ProcessError> {
        let (scope_type, scope_id) = scope_key(scope);
        let value = serde_json::to_value(patch).map_err(|e| ProcessError::Storage(e.into()))?;
        sqlx::query(
            r#"
            INSERT INTO config_patches (scope_type, scope_id, patch, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (scope_type, scope_id)
            DO UPDATE SET patch = $3, updated_at = now()
            "#,
        )
        .bind(scope_type)
        .bind(scope_id)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }
}
