use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use shared::{ActivityType, PointsBreakdown, TenantId};
use uuid::Uuid;

/// A calculated award ready to be applied to the aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Award {
    pub activity_id: Uuid,
    pub tenant_id: TenantId,
    pub team_member_id: Uuid,
    pub activity_type: ActivityType,
    pub is_ai_generated: bool,
    pub breakdown: PointsBreakdown,
    pub occurred_at: DateTime<Utc>,
}

impl Award {
    /// History rows are logically partitioned by month for retention
    /// pruning, e.g. "202608".
    pub fn occurred_month(&self) -> String {
        format!(
            "{:04}{:02}",
            self.occurred_at.year(),
            self.occurred_at.month()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwardOutcome {
    pub team_id: Uuid,
    pub new_member_total: i64,
    pub new_team_total: i64,
    pub new_level: u32,
    pub leveled_up: bool,
    /// The activity id had already been applied; nothing changed.
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub rank: i64,
    pub team_member_id: Uuid,
    pub total_points: i64,
    pub current_level: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardPage {
    pub items: Vec<LeaderboardRow>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberProgress {
    pub total_points: i64,
    pub current_level: u32,
    pub next_threshold: Option<i64>,
    pub progress_percent: u8,
}
