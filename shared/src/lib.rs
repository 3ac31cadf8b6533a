use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use uuid::Uuid;

mod calculator;
mod config;
mod event;
mod level;

pub use calculator::*;
pub use config::*;
pub use event::*;
pub use level::*;

pub use strum::IntoEnumIterator;

pub type TenantId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, Display)]
pub enum ActivityType {
    CheckIn,
    PullRequest,
    Review,
    BugFix,
    StoryClosure,
}

/// Normalized activity record delivered by the ingestion collaborator.
/// Immutable once created; `id` doubles as the pipeline's dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: Uuid,
    pub team_member_id: Uuid,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub is_ai_generated: bool,
    pub size: u32,
    pub complexity: u32,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ActivityEvent {
    /// Structural checks on an inbound event. Unknown activity types are
    /// already rejected at the serde boundary.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.id.is_nil() {
            return Err(EventError::MissingField("id"));
        }
        if self.team_member_id.is_nil() {
            return Err(EventError::MissingField("teamMemberId"));
        }
        if self.tenant_id.is_nil() {
            return Err(EventError::MissingField("tenantId"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("required field is missing or empty: {0}")]
    MissingField(&'static str),
}

/// Running totals for a single team member. Level only ever goes up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberAggregate {
    pub team_member_id: Uuid,
    pub tenant_id: TenantId,
    pub team_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub total_points: i64,
    pub current_level: u32,
    pub last_awarded_at: Option<DateTime<Utc>>,
}

/// Running totals for a team. `total_points` is always the sum of the
/// ai-generated and standard buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamAggregate {
    pub team_id: Uuid,
    pub tenant_id: TenantId,
    pub total_points: i64,
    pub ai_generated_points: i64,
    pub standard_points: i64,
    pub member_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> ActivityEvent {
        ActivityEvent {
            id: Uuid::new_v4(),
            team_member_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            organization_id: None,
            activity_type: ActivityType::CheckIn,
            is_ai_generated: false,
            size: 0,
            complexity: 0,
            occurred_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn valid_event_passes() {
        assert!(event().validate().is_ok());
    }

    #[test]
    fn nil_ids_are_rejected() {
        let mut e = event();
        e.team_member_id = Uuid::nil();
        assert_eq!(e.validate(), Err(EventError::MissingField("teamMemberId")));
    }

    #[test]
    fn inbound_json_round_trips() {
        let raw = serde_json::json!({
            "id": "7f0c0f51-7bb8-4bb8-9b63-9f0f4c1f2a10",
            "teamMemberId": "37d9dd0a-5cb0-45c8-97a6-6b2a8a54d6dd",
            "tenantId": "a1a533f0-11ab-4a2a-90cc-0fbe28a2a222",
            "type": "PullRequest",
            "isAiGenerated": true,
            "size": 120,
            "complexity": 4,
            "occurredAt": "2026-08-01T10:00:00Z",
            "metadata": {"source": "ado"}
        });
        let event: ActivityEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.activity_type, ActivityType::PullRequest);
        assert!(event.is_ai_generated);
        assert!(event.organization_id.is_none());
    }

    #[test]
    fn unknown_activity_type_fails_deserialization() {
        let raw = serde_json::json!({
            "id": "7f0c0f51-7bb8-4bb8-9b63-9f0f4c1f2a10",
            "teamMemberId": "37d9dd0a-5cb0-45c8-97a6-6b2a8a54d6dd",
            "tenantId": "a1a533f0-11ab-4a2a-90cc-0fbe28a2a222",
            "type": "Deployment",
            "isAiGenerated": false,
            "size": 0,
            "complexity": 0,
            "occurredAt": "2026-08-01T10:00:00Z"
        });
        assert!(serde_json::from_value::<ActivityEvent>(raw).is_err());
    }
}
