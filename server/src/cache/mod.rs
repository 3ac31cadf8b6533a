use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::TenantId;
use tracing::instrument;
use uuid::Uuid;

use crate::error::ProcessError;

pub mod memory;
pub mod redis;

pub use memory::MemoryCache;
pub use redis::RedisCache;

/// Staleness bounds: short enough for a leaderboard UI, long enough to
/// absorb read bursts.
pub const MEMBER_TOTALS_TTL: Duration = Duration::from_secs(60 * 60);
pub const LEADERBOARD_TTL: Duration = Duration::from_secs(5 * 60);
pub const CONFIG_TTL: Duration = Duration::from_secs(10 * 60);

/// Payloads above this many serialized bytes are gzip-compressed.
pub const COMPRESSION_THRESHOLD: usize = 1024;

const MARKER_RAW: u8 = 0;
const MARKER_GZIP: u8 = 1;

fn cache_err(err: impl Into<anyhow::Error>) -> ProcessError {
    ProcessError::Cache(err.into())
}

/// Raw byte-level cache operations. Implemented by the redis client and
/// by an in-memory fake for tests.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ProcessError>;
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), ProcessError>;
    async fn delete(&self, key: &str) -> Result<(), ProcessError>;
}

/// Typed cache facade: tenant-namespaced keys, json encoding, gzip for
/// large payloads, per-kind TTLs. Leaderboard invalidation works by
/// bumping a per-team generation stamp baked into the page keys, so a
/// single write invalidates every cached page of that team.
#[derive(Clone)]
pub struct CacheClient {
    backend: Arc<dyn CacheBackend>,
}

impl CacheClient {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    fn member_key(tenant: TenantId, member: Uuid) -> String {
        format!("{tenant}:member:{member}:totals")
    }

    fn config_key(tenant: TenantId, organization: Option<Uuid>) -> String {
        match organization {
            Some(org) => format!("{tenant}:config:{org}"),
            None => format!("{tenant}:config:company"),
        }
    }

    fn generation_key(tenant: TenantId, team: Uuid) -> String {
        format!("{tenant}:team:{team}:lb_gen")
    }

    fn leaderboard_key(tenant: TenantId, team: Uuid, gen: u64, page: u32, size: u32) -> String {
        format!("{tenant}:team:{team}:leaderboard:{gen}:{page}:{size}")
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ProcessError> {
        match self.backend.get(key).await? {
            Some(framed) => {
                let bytes = decode_frame(&framed)?;
                let value = serde_json::from_slice(&bytes).map_err(cache_err)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), ProcessError> {
        let bytes = serde_json::to_vec(value).map_err(cache_err)?;
        self.backend.put(key, encode_frame(&bytes)?, ttl).await
    }

    async fn team_generation(&self, tenant: TenantId, team: Uuid) -> Result<u64, ProcessError> {
        let key = Self::generation_key(tenant, team);
        match self.backend.get(&key).await? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.try_into().unwrap_or_default();
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    pub async fn member_totals<T: DeserializeOwned>(
        &self,
        tenant: TenantId,
        member: Uuid,
    ) -> Result<Option<T>, ProcessError> {
        self.get_json(&Self::member_key(tenant, member)).await
    }

    pub async fn put_member_totals<T: Serialize>(
        &self,
        tenant: TenantId,
        member: Uuid,
        value: &T,
    ) -> Result<(), ProcessError> {
        self.put_json(&Self::member_key(tenant, member), value, MEMBER_TOTALS_TTL)
            .await
    }

    #[instrument(skip(self))]
    pub async fn invalidate_member(
        &self,
        tenant: TenantId,
        member: Uuid,
    ) -> Result<(), ProcessError> {
        self.backend.delete(&Self::member_key(tenant, member)).await
    }

    pub async fn leaderboard_page<T: DeserializeOwned>(
        &self,
        tenant: TenantId,
        team: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<Option<T>, ProcessError> {
        let gen = self.team_generation(tenant, team).await?;
        self.get_json(&Self::leaderboard_key(tenant, team, gen, page, page_size))
            .await
    }

    pub async fn put_leaderboard_page<T: Serialize>(
        &self,
        tenant: TenantId,
        team: Uuid,
        page: u32,
        page_size: u32,
        value: &T,
    ) -> Result<(), ProcessError> {
        let gen = self.team_generation(tenant, team).await?;
        self.put_json(
            &Self::leaderboard_key(tenant, team, gen, page, page_size),
            value,
            LEADERBOARD_TTL,
        )
        .await
    }

    /// Bumps the generation stamp; stale pages fall out via their TTL.
    #[instrument(skip(self))]
    pub async fn invalidate_leaderboard(
        &self,
        tenant: TenantId,
        team: Uuid,
    ) -> Result<(), ProcessError> {
        let gen = self.team_generation(tenant, team).await?;
        self.backend
            .put(
                &Self::generation_key(tenant, team),
                (gen + 1).to_be_bytes().to_vec(),
                LEADERBOARD_TTL * 2,
            )
            .await
    }

    pub async fn resolved_config<T: DeserializeOwned>(
        &self,
        tenant: TenantId,
        organization: Option<Uuid>,
    ) -> Result<Option<T>, ProcessError> {
        self.get_json(&Self::config_key(tenant, organization)).await
    }

    pub async fn put_resolved_config<T: Serialize>(
        &self,
        tenant: TenantId,
        organization: Option<Uuid>,
        value: &T,
    ) -> Result<(), ProcessError> {
        self.put_json(&Self::config_key(tenant, organization), value, CONFIG_TTL)
            .await
    }

    pub async fn invalidate_config(
        &self,
        tenant: TenantId,
        organization: Option<Uuid>,
    ) -> Result<(), ProcessError> {
        self.backend
            .delete(&Self::config_key(tenant, organization))
            .await
    }
}

fn encode_frame(bytes: &[u8]) -> Result<Vec<u8>, ProcessError> {
    if bytes.len() <= COMPRESSION_THRESHOLD {
        let mut framed = Vec::with_capacity(bytes.len() + 1);
        framed.push(MARKER_RAW);
        framed.extend_from_slice(bytes);
        return Ok(framed);
    }
    let mut encoder = GzEncoder::new(vec![MARKER_GZIP], Compression::default());
    encoder.write_all(bytes).map_err(cache_err)?;
    encoder.finish().map_err(cache_err)
}

fn decode_frame(framed: &[u8]) -> Result<Vec<u8>, ProcessError> {
    match framed.split_first() {
        Some((&MARKER_RAW, rest)) => Ok(rest.to_vec()),
        Some((&MARKER_GZIP, rest)) => {
            let mut bytes = Vec::new();
            GzDecoder::new(rest)
                .read_to_end(&mut bytes)
                .map_err(cache_err)?;
            Ok(bytes)
        }
        _ => Err(cache_err(anyhow::anyhow!("unrecognized cache frame"))),
    }
}
