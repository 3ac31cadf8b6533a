use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages pushed to subscribed clients. Delivery is best-effort and
/// at-most-once; reconnecting clients re-fetch state via the read path.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum RealtimeEvent {
    PointsUpdate {
        team_member_id: Uuid,
        team_id: Uuid,
        final_points: u32,
        new_member_total: i64,
        new_team_total: i64,
    },
    LevelUp {
        team_member_id: Uuid,
        new_level: u32,
        total_points: i64,
    },
    LeaderboardUpdate {
        team_id: Uuid,
    },
}
