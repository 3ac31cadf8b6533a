use std::sync::Arc;

use shared::{LevelThresholds, TenantId};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::cache::CacheClient;
use crate::db::types::{LeaderboardPage, MemberProgress};
use crate::db::AggregateStore;
use crate::error::ProcessError;

/// Read surface consumed by the UI collaborator. Calls are tenant-scoped
/// so the cache key exists up front: a cache hit answers without any
/// store round-trip, a miss goes to the store and repopulates the cache.
pub struct ProgressService {
    store: Arc<dyn AggregateStore>,
    cache: CacheClient,
    thresholds: LevelThresholds,
}

impl ProgressService {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        cache: CacheClient,
        thresholds: LevelThresholds,
    ) -> Self {
        Self {
            store,
            cache,
            thresholds,
        }
    }

    #[instrument(skip(self))]
    pub async fn member_progress(
        &self,
        tenant: TenantId,
        team_member_id: Uuid,
    ) -> Result<MemberProgress, ProcessError> {
        match self
            .cache
            .member_totals::<MemberProgress>(tenant, team_member_id)
            .await
        {
            Ok(Some(progress)) => return Ok(progress),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "cache read failed, serving from store"),
        }

        let member = self.store.member(team_member_id).await?;
        // Never serve or cache another tenant's member under this key
        if member.tenant_id != tenant {
            return Err(ProcessError::MemberNotFound(team_member_id));
        }

        let progress = MemberProgress {
            total_points: member.total_points,
            current_level: member.current_level,
            next_threshold: self.thresholds.next_threshold(member.current_level),
            progress_percent: self.thresholds.progress_percent(member.total_points),
        };

        if let Err(err) = self
            .cache
            .put_member_totals(tenant, team_member_id, &progress)
            .await
        {
            warn!(error = %err, "failed to populate member totals cache");
        }

        Ok(progress)
    }

    #[instrument(skip(self))]
    pub async fn leaderboard(
        &self,
        tenant: TenantId,
        team_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<LeaderboardPage, ProcessError> {
        match self
            .cache
            .leaderboard_page::<LeaderboardPage>(tenant, team_id, page, page_size)
            .await
        {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "cache read failed, serving from store"),
        }

        let team = self.store.team(team_id).await?;
        if team.tenant_id != tenant {
            return Err(ProcessError::TeamNotFound(team_id));
        }

        let result = self.store.leaderboard(team_id, page, page_size).await?;

        if let Err(err) = self
            .cache
            .put_leaderboard_page(tenant, team_id, page, page_size, &result)
            .await
        {
            warn!(error = %err, "failed to populate leaderboard cache");
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use shared::{
        ActivityType, ConfigScope, MemberAggregate, PointConfigPatch, PointsBreakdown,
        TeamAggregate,
    };

    use crate::cache::MemoryCache;
    use crate::db::memory::MemStore;
    use crate::db::types::{Award, AwardOutcome};

    use super::*;

    /// Store wrapper that counts reads, for cache-absorption checks.
    struct CountingStore {
        inner: Arc<MemStore>,
        member_reads: AtomicU32,
        team_reads: AtomicU32,
    }

    #[async_trait]
    impl AggregateStore for CountingStore {
        async fn apply_award(&self, award: &Award) -> Result<AwardOutcome, ProcessError> {
            self.inner.apply_award(award).await
        }

        async fn member(&self, id: Uuid) -> Result<MemberAggregate, ProcessError> {
            self.member_reads.fetch_add(1, Ordering::SeqCst);
            self.inner.member(id).await
        }

        async fn team(&self, id: Uuid) -> Result<TeamAggregate, ProcessError> {
            self.team_reads.fetch_add(1, Ordering::SeqCst);
            self.inner.team(id).await
        }

        async fn leaderboard(
            &self,
            team_id: Uuid,
            page: u32,
            page_size: u32,
        ) -> Result<LeaderboardPage, ProcessError> {
            self.inner.leaderboard(team_id, page, page_size).await
        }

        async fn config_patch(
            &self,
            scope: ConfigScope,
        ) -> Result<Option<PointConfigPatch>, ProcessError> {
            self.inner.config_patch(scope).await
        }

        async fn put_config_patch(
            &self,
            scope: ConfigScope,
            patch: &PointConfigPatch,
        ) -> Result<(), ProcessError> {
            self.inner.put_config_patch(scope, patch).await
        }
    }

    struct Seeded {
        service: ProgressService,
        counts: Arc<CountingStore>,
        tenant: TenantId,
        team: Uuid,
        member: Uuid,
    }

    async fn seeded() -> Seeded {
        let store = Arc::new(MemStore::new(LevelThresholds::default()));
        let tenant = Uuid::new_v4();
        let team = Uuid::new_v4();
        let member = Uuid::new_v4();
        store.insert_team(team, tenant);
        store.insert_member(member, team, tenant, None);
        store
            .apply_award(&Award {
                activity_id: Uuid::new_v4(),
                tenant_id: tenant,
                team_member_id: member,
                activity_type: ActivityType::PullRequest,
                is_ai_generated: false,
                breakdown: PointsBreakdown {
                    base_points: 300,
                    ai_modifier_applied: None,
                    ai_adjusted: 300.0,
                    size_adjusted: 300.0,
                    complexity_adjusted: 300.0,
                    final_points: 300,
                },
                occurred_at: Utc::now(),
            })
            .await
            .unwrap();

        let counts = Arc::new(CountingStore {
            inner: store,
            member_reads: AtomicU32::new(0),
            team_reads: AtomicU32::new(0),
        });
        let service = ProgressService::new(
            counts.clone(),
            CacheClient::new(Arc::new(MemoryCache::default())),
            LevelThresholds::default(),
        );
        Seeded {
            service,
            counts,
            tenant,
            team,
            member,
        }
    }

    #[tokio::test]
    async fn progress_reports_level_and_next_threshold() {
        let s = seeded().await;
        let progress = s.service.member_progress(s.tenant, s.member).await.unwrap();
        assert_eq!(progress.total_points, 300);
        assert_eq!(progress.current_level, 2);
        assert_eq!(progress.next_threshold, Some(500));
        assert_eq!(progress.progress_percent, 20);
    }

    #[tokio::test]
    async fn warm_cache_absorbs_the_store_round_trip() {
        let s = seeded().await;
        let first = s.service.member_progress(s.tenant, s.member).await.unwrap();
        assert_eq!(s.counts.member_reads.load(Ordering::SeqCst), 1);

        let second = s.service.member_progress(s.tenant, s.member).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(s.counts.member_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn leaderboard_pages_are_cached() {
        let s = seeded().await;
        let page = s
            .service
            .leaderboard(s.tenant, s.team, 0, 50)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].team_member_id, s.member);
        assert_eq!(s.counts.team_reads.load(Ordering::SeqCst), 1);

        let again = s
            .service
            .leaderboard(s.tenant, s.team, 0, 50)
            .await
            .unwrap();
        assert_eq!(page, again);
        assert_eq!(s.counts.team_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_member_is_surfaced() {
        let s = seeded().await;
        let err = s
            .service
            .member_progress(s.tenant, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::MemberNotFound(_)));
    }

    #[tokio::test]
    async fn wrong_tenant_cannot_read_the_member() {
        let s = seeded().await;
        let err = s
            .service
            .member_progress(Uuid::new_v4(), s.member)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::MemberNotFound(_)));
    }
}
