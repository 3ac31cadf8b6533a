use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    ConfigScope, LevelThresholds, MemberAggregate, PointConfigPatch, TeamAggregate, TenantId,
};
use uuid::Uuid;

use crate::error::ProcessError;

use super::types::{Award, AwardOutcome, LeaderboardPage, LeaderboardRow};
use super::AggregateStore;

#[derive(Debug, Clone)]
pub struct AchievementRecord {
    pub team_member_id: Uuid,
    pub level: u32,
    pub total_points: i64,
}

#[derive(Default)]
struct Inner {
    history: HashMap<Uuid, Award>,
    members: HashMap<Uuid, MemberAggregate>,
    teams: HashMap<Uuid, TeamAggregate>,
    achievements: Vec<AchievementRecord>,
    config_patches: HashMap<(&'static str, Uuid), PointConfigPatch>,
}

/// In-memory store with the same semantics as [`super::PgStore`]. The
/// single mutex gives the per-member serialization guarantee; awards are
/// short critical sections with no await points inside.
pub struct MemStore {
    thresholds: LevelThresholds,
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new(thresholds: LevelThresholds) -> Self {
        Self {
            thresholds,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn insert_team(&self, team_id: Uuid, tenant_id: TenantId) {
        let mut inner = self.inner.lock().unwrap();
        inner.teams.insert(
            team_id,
            TeamAggregate {
                team_id,
                tenant_id,
                total_points: 0,
                ai_generated_points: 0,
                standard_points: 0,
                member_count: 0,
            },
        );
    }

    pub fn insert_member(
        &self,
        team_member_id: Uuid,
        team_id: Uuid,
        tenant_id: TenantId,
        organization_id: Option<Uuid>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.members.insert(
            team_member_id,
            MemberAggregate {
                team_member_id,
                tenant_id,
                team_id,
                organization_id,
                total_points: 0,
                current_level: 1,
                last_awarded_at: None,
            },
        );
        if let Some(team) = inner.teams.get_mut(&team_id) {
            team.member_count += 1;
        }
    }

    /// Seed helper for levels granted outside the award path.
    pub fn set_member_level(&self, team_member_id: Uuid, level: u32) {
        if let Some(member) = self
            .inner
            .lock()
            .unwrap()
            .members
            .get_mut(&team_member_id)
        {
            member.current_level = level;
        }
    }

    pub fn achievements(&self) -> Vec<AchievementRecord> {
        self.inner.lock().unwrap().achievements.clone()
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().unwrap().history.len()
    }
}

#[async_trait]
impl AggregateStore for MemStore {
    async fn apply_award(&self, award: &Award) -> Result<AwardOutcome, ProcessError> {
        let mut inner = self.inner.lock().unwrap();

        let member = inner
            .members
            .get(&award.team_member_id)
            .cloned()
            .ok_or(ProcessError::MemberNotFound(award.team_member_id))?;
        let team_id = member.team_id;

        if inner.history.contains_key(&award.activity_id) {
            let team_total = inner
                .teams
                .get(&team_id)
                .map(|t| t.total_points)
                .unwrap_or_default();
            return Ok(AwardOutcome {
                team_id,
                new_member_total: member.total_points,
                new_team_total: team_total,
                new_level: member.current_level,
                leveled_up: false,
                duplicate: true,
            });
        }

        if !inner.teams.contains_key(&team_id) {
            return Err(ProcessError::TeamNotFound(team_id));
        }

        inner.history.insert(award.activity_id, award.clone());

        let points = i64::from(award.breakdown.final_points);
        let new_member_total = member.total_points + points;
        let new_level = self
            .thresholds
            .level_for(new_member_total)
            .max(member.current_level);
        let leveled_up = new_level > member.current_level;

        let entry = inner.members.get_mut(&award.team_member_id).unwrap();
        entry.total_points = new_member_total;
        entry.current_level = new_level;
        entry.last_awarded_at = Some(Utc::now());

        let team = inner.teams.get_mut(&team_id).unwrap();
        team.total_points += points;
        if award.is_ai_generated {
            team.ai_generated_points += points;
        } else {
            team.standard_points += points;
        }
        let new_team_total = team.total_points;

        if leveled_up {
            inner.achievements.push(AchievementRecord {
                team_member_id: award.team_member_id,
                level: new_level,
                total_points: new_member_total,
            });
        }

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
        self.inner
            .lock()
            .unwrap()
            .members
            .get(&team_member_id)
            .cloned()
            .ok_or(ProcessError::MemberNotFound(team_member_id))
    }

    async fn team(&self, team_id: Uuid) -> Result<TeamAggregate, ProcessError> {
        self.inner
            .lock()
            .unwrap()
            .teams
            .get(&team_id)
            .cloned()
            .ok_or(ProcessError::TeamNotFound(team_id))
    }

    async fn leaderboard(
        &self,
        team_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<LeaderboardPage, ProcessError> {
        let inner = self.inner.lock().unwrap();
        let mut members: Vec<&MemberAggregate> = inner
            .members
            .values()
            .filter(|m| m.team_id == team_id)
            .collect();
        members.sort_by(|a, b| {
            b.total_points
                .cmp(&a.total_points)
                .then(a.team_member_id.cmp(&b.team_member_id))
        });

        let total = members.len() as u64;
        let offset = page as usize * page_size as usize;
        let items = members
            .iter()
            .enumerate()
            .skip(offset)
            .take(page_size as usize)
            .map(|(idx, m)| LeaderboardRow {
                rank: idx as i64 + 1,
                team_member_id: m.team_member_id,
                total_points: m.total_points,
                current_level: m.current_level as i32,
            })
            .collect();

        Ok(LeaderboardPage { items, total })
    }

    async fn config_patch(
        &self,
        scope: ConfigScope,
    ) -> Result<Option<PointConfigPatch>, ProcessError> {
        let key = super::scope_key(scope);
        Ok(self.inner.lock().unwrap().config_patches.get(&key).cloned())
    }

    async fn put_config_patch(
        &self,
        scope: ConfigScope,
        patch: &PointConfigPatch,
    ) -> Result<(), ProcessError> {
        let key = super::scope_key(scope);
        self.inner
            .lock()
            .unwrap()
            .config_patches
            .insert(key, patch.clone());
        Ok(())
    }
}
