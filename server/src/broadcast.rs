use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use shared::{RealtimeEvent, TenantId};
use tokio::sync::broadcast;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    /// Bounded per-tenant channel; the slowest subscriber loses the
    /// oldest messages rather than blocking anyone.
    pub channel_capacity: usize,
    pub rate_per_sec: f64,
    pub burst: f64,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            rate_per_sec: 50.0,
            burst: 100.0,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered(usize),
    NoSubscribers,
    Throttled,
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(burst: f64) -> Self {
        Self {
            tokens: burst,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self, rate_per_sec: f64, burst: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_sec).min(burst);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Fans point/level/leaderboard deltas out to subscribed clients,
/// partitioned by tenant. Best-effort and at-most-once: clients that
/// miss messages re-fetch via the read path.
pub struct Broadcaster {
    settings: BroadcastSettings,
    channels: Mutex<HashMap<TenantId, broadcast::Sender<RealtimeEvent>>>,
    buckets: Mutex<HashMap<TenantId, TokenBucket>>,
}

impl Broadcaster {
    pub fn new(settings: BroadcastSettings) -> Self {
        Self {
            settings,
            channels: Mutex::new(HashMap::new()),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, tenant: TenantId) -> broadcast::Receiver<RealtimeEvent> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(tenant)
            .or_insert_with(|| broadcast::channel(self.settings.channel_capacity).0)
            .subscribe()
    }

    /// Never blocks: a tenant over its rate gets `Throttled` and the
    /// pipeline moves on. A channel whose last subscriber is gone is
    /// evicted here, together with the tenant's token bucket, so the
    /// per-tenant maps track live tenants rather than every tenant seen.
    pub fn publish(&self, tenant: TenantId, event: RealtimeEvent) -> PublishOutcome {
        let sender = {
            let mut channels = self.channels.lock().unwrap();
            match channels.get(&tenant) {
                Some(sender) if sender.receiver_count() > 0 => sender.clone(),
                Some(_) => {
                    channels.remove(&tenant);
                    self.buckets.lock().unwrap().remove(&tenant);
                    return PublishOutcome::NoSubscribers;
                }
                None => return PublishOutcome::NoSubscribers,
            }
        };

        {
            let mut buckets = self.buckets.lock().unwrap();
            let bucket = buckets
                .entry(tenant)
                .or_insert_with(|| TokenBucket::new(self.settings.burst));
            if !bucket.try_take(self.settings.rate_per_sec, self.settings.burst) {
                warn!(%tenant, "publish throttled by tenant rate limit");
                return PublishOutcome::Throttled;
            }
        }

        match sender.send(event) {
            Ok(subscribers) => PublishOutcome::Delivered(subscribers),
            Err(_) => PublishOutcome::NoSubscribers,
        }
    }

    /// Live (subscribed at last publish) tenant channels.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }
}
