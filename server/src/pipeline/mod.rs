use std::sync::Arc;
use std::time::Instant;

use shared::{
    calculate, resolve_config, ActivityEvent, ConfigScope, PointConfig, RealtimeEvent,
};
use tracing::{error, info, instrument, warn};

use crate::broadcast::{Broadcaster, PublishOutcome};
use crate::cache::CacheClient;
use crate::db::types::{Award, AwardOutcome};
use crate::db::AggregateStore;
use crate::error::ProcessError;
use crate::health::HealthMonitor;
use crate::metrics::{EventOutcome, PipelineMetrics};
use crate::queue::ActivityQueue;

pub mod breaker;
pub mod retry;

use breaker::CircuitBreaker;
use retry::{with_backoff, RetryPolicy, SlaBudget, AWARD_SLA};

/// Coordinator of record for activity processing. Each worker drives one
/// event at a time through resolve, calculate, persist, cache and
/// broadcast; the queue's lease mechanics cover workers that die
/// mid-event.
pub struct Pipeline {
    store: Arc<dyn AggregateStore>,
    cache: CacheClient,
    broadcaster: Arc<Broadcaster>,
    queue: Arc<ActivityQueue>,
    metrics: Arc<PipelineMetrics>,
    store_breaker: CircuitBreaker,
    cache_breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        cache: CacheClient,
        broadcaster: Arc<Broadcaster>,
        queue: Arc<ActivityQueue>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            store,
            cache,
            broadcaster,
            queue,
            metrics,
            store_breaker: CircuitBreaker::new("store"),
            cache_breaker: CircuitBreaker::new("cache"),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breakers(
        mut self,
        store_breaker: CircuitBreaker,
        cache_breaker: CircuitBreaker,
    ) -> Self {
        self.store_breaker = store_breaker;
        self.cache_breaker = cache_breaker;
        self
    }

    /// Full state machine for one event. Classification of the returned
    /// error (retry vs dead-letter) happens in [`Pipeline::step`]; no
    /// stage below makes that call on its own.
    #[instrument(skip(self, event), fields(activity_id = %event.id))]
    pub async fn process(&self, event: &ActivityEvent) -> Result<AwardOutcome, ProcessError> {
        event.validate()?;
        let mut budget = SlaBudget::new(AWARD_SLA);

        let config = self.resolve(event, &mut budget).await?;
        let breakdown = calculate(event, &config)?;
        let award = Award {
            activity_id: event.id,
            tenant_id: event.tenant_id,
            team_member_id: event.team_member_id,
            activity_type: event.activity_type,
            is_ai_generated: event.is_ai_generated,
            breakdown,
            occurred_at: event.occurred_at,
        };

        let outcome = with_backoff(self.retry, &mut budget, "persisting", || {
            let award = award.clone();
            async move {
                self.store_breaker.check()?;
                match self.store.apply_award(&award).await {
                    Ok(outcome) => {
                        self.store_breaker.record_success();
                        Ok(outcome)
                    }
                    Err(err) => {
                        if err.is_retryable() {
                            self.store_breaker.record_failure();
                        }
                        Err(err)
                    }
                }
            }
        })
        .await;
        self.metrics
            .set_breaker_open("store", self.store_breaker.is_open());
        let outcome = outcome?;

        if outcome.duplicate {
            info!(activity_id = %event.id, "already applied, skipping side effects");
            return Ok(outcome);
        }

        // Cache correctness is best-effort; the store is the source of
        // truth, so invalidation failure never fails the award.
        if let Err(err) = self.invalidate(event, &outcome, &mut budget).await {
            warn!(error = %err, "cache invalidation failed, readers may see stale totals");
        }
        self.metrics
            .set_breaker_open("cache", self.cache_breaker.is_open());

        self.broadcast(event, &award, &outcome);

        Ok(outcome)
    }

    /// Effective config for the event's tenant scope, read through the
    /// cache.
    async fn resolve(
        &self,
        event: &ActivityEvent,
        budget: &mut SlaBudget,
    ) -> Result<PointConfig, ProcessError> {
        if self.cache_breaker.check().is_ok() {
            match self
                .cache
                .resolved_config::<PointConfig>(event.tenant_id, event.organization_id)
                .await
            {
                Ok(Some(config)) => {
                    self.cache_breaker.record_success();
                    return Ok(config);
                }
                Ok(None) => self.cache_breaker.record_success(),
                Err(err) => {
                    self.cache_breaker.record_failure();
                    warn!(error = %err, "config cache read failed, resolving from store");
                }
            }
        }

        let (company, organization) = with_backoff(self.retry, budget, "resolving", || async {
            self.store_breaker.check()?;
            let result: Result<_, ProcessError> = async {
                let company = self
                    .store
                    .config_patch(ConfigScope::Company(event.tenant_id))
                    .await?;
                let organization = match event.organization_id {
                    Some(org) => {
                        self.store
                            .config_patch(ConfigScope::Organization(org))
                            .await?
                    }
                    None => None,
                };
                Ok((company, organization))
            }
            .await;
            match &result {
                Ok(_) => self.store_breaker.record_success(),
                Err(err) if err.is_retryable() => self.store_breaker.record_failure(),
                Err(_) => {}
            }
            result
        })
        .await?;

        let config = resolve_config(company.as_ref(), organization.as_ref())?;

        if let Err(err) = self
            .cache
            .put_resolved_config(event.tenant_id, event.organization_id, &config)
            .await
        {
            warn!(error = %err, "failed to cache resolved config");
        }

        Ok(config)
    }

    async fn invalidate(
        &self,
        event: &ActivityEvent,
        outcome: &AwardOutcome,
        budget: &mut SlaBudget,
    ) -> Result<(), ProcessError> {
        with_backoff(self.retry, budget, "caching", || async {
            self.cache_breaker.check()?;
            let result: Result<(), ProcessError> = async {
                self.cache
                    .invalidate_member(event.tenant_id, event.team_member_id)
                    .await?;
                self.cache
                    .invalidate_leaderboard(event.tenant_id, outcome.team_id)
                    .await?;
                Ok(())
            }
            .await;
            match &result {
                Ok(_) => self.cache_breaker.record_success(),
                Err(_) => self.cache_breaker.record_failure(),
            }
            result
        })
        .await
    }

    fn broadcast(&self, event: &ActivityEvent, award: &Award, outcome: &AwardOutcome) {
        let updates = [
            Some(RealtimeEvent::PointsUpdate {
                team_member_id: event.team_member_id,
                team_id: outcome.team_id,
                final_points: award.breakdown.final_points,
                new_member_total: outcome.new_member_total,
                new_team_total: outcome.new_team_total,
            }),
            outcome.leveled_up.then_some(RealtimeEvent::LevelUp {
                team_member_id: event.team_member_id,
                new_level: outcome.new_level,
                total_points: outcome.new_member_total,
            }),
            Some(RealtimeEvent::LeaderboardUpdate {
                team_id: outcome.team_id,
            }),
        ];
        for update in updates.into_iter().flatten() {
            if self.broadcaster.publish(event.tenant_id, update) == PublishOutcome::Throttled {
                self.metrics.inc_throttled();
            }
        }
    }

    /// Leases one event, processes it and settles the lease.
    pub async fn step(&self) {
        let delivery = self.queue.pop().await;
        self.metrics.set_queue_depth(self.queue.depth());
        let started = Instant::now();
        let activity_id = delivery.event.id;

        match self.process(&delivery.event).await {
            Ok(outcome) => {
                self.queue.ack(activity_id);
                let label = if outcome.duplicate {
                    EventOutcome::Duplicate
                } else {
                    EventOutcome::Done
                };
                self.metrics.record_event(label, started.elapsed());
            }
            Err(err) if err.is_retryable() => {
                warn!(%activity_id, attempt = delivery.attempt, error = %err, "returning event to the queue");
                self.queue.nack(activity_id);
                self.metrics
                    .record_event(EventOutcome::Redelivered, started.elapsed());
            }
            Err(err) => {
                if err.is_data_integrity() {
                    error!(%activity_id, error = %err, "data integrity alert, dead-lettering");
                } else {
                    warn!(%activity_id, error = %err, "dead-lettering event");
                }
                self.queue.dead_letter(activity_id, &err.to_string());
                self.metrics
                    .record_event(EventOutcome::DeadLettered, started.elapsed());
            }
        }
    }

    /// Fixed-size worker pool; each worker owns one event end to end.
    pub fn run_workers(self: &Arc<Self>, count: usize, health: Arc<HealthMonitor>) {
        for worker in 0..count {
            let pipeline = self.clone();
            let health = health.clone();
            let name = format!("pipeline-worker-{worker}");
            tokio::spawn(async move {
                info!(worker, "pipeline worker started");
                loop {
                    pipeline.step().await;
                    health.im_alive(&name);
                }
            });
        }
    }
}
