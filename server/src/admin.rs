use std::sync::Arc;

use shared::{resolve_config, ConfigScope, PointConfig, PointConfigPatch, TenantId};
use tracing::{instrument, warn};

use crate::cache::CacheClient;
use crate::db::AggregateStore;
use crate::error::ProcessError;

/// Configuration write surface for the tenant-admin collaborator.
pub struct ConfigService {
    store: Arc<dyn AggregateStore>,
    cache: CacheClient,
}

impl ConfigService {
    pub fn new(store: Arc<dyn AggregateStore>, cache: CacheClient) -> Self {
        Self { store, cache }
    }

    /// Validates the patch against the scope's effective merge before
    /// anything is persisted, then returns the full resolved config. An
    /// invalid patch leaves the stored configuration untouched.
    #[instrument(skip(self, patch))]
    pub async fn apply_patch(
        &self,
        tenant: TenantId,
        scope: ConfigScope,
        patch: PointConfigPatch,
    ) -> Result<PointConfig, ProcessError> {
        let (company, organization) = match scope {
            ConfigScope::Company(_) => (Some(patch.clone()), None),
            ConfigScope::Organization(_) => {
                let company = self
                    .store
                    .config_patch(ConfigScope::Company(tenant))
                    .await?;
                (company, Some(patch.clone()))
            }
        };
        let resolved = resolve_config(company.as_ref(), organization.as_ref())?;

        self.store.put_config_patch(scope, &patch).await?;

        // Org-scope entries that merge an updated company patch age out
        // via the config TTL
        let cache_org = match scope {
            ConfigScope::Company(_) => None,
            ConfigScope::Organization(org) => Some(org),
        };
        if let Err(err) = self.cache.invalidate_config(tenant, cache_org).await {
            warn!(error = %err, "failed to invalidate cached config");
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use shared::{ActivityType, LevelThresholds};
    use uuid::Uuid;

    use crate::cache::MemoryCache;
    use crate::db::memory::MemStore;

    use super::*;

    fn service() -> (ConfigService, Arc<MemStore>, TenantId) {
        let store = Arc::new(MemStore::new(LevelThresholds::default()));
        let service = ConfigService::new(
            store.clone(),
            CacheClient::new(Arc::new(MemoryCache::default())),
        );
        (service, store, Uuid::new_v4())
    }

    #[tokio::test]
    async fn valid_patch_returns_the_effective_config() {
        let (service, _, tenant) = service();
        let patch = PointConfigPatch {
            base_points: [(ActivityType::PullRequest, 30)].into_iter().collect(),
            ..Default::default()
        };
        let resolved = service
            .apply_patch(tenant, ConfigScope::Company(tenant), patch)
            .await
            .unwrap();
        assert_eq!(resolved.base_points[&ActivityType::PullRequest], 30);
        assert_eq!(resolved.base_points[&ActivityType::BugFix], 20);
    }

    #[tokio::test]
    async fn invalid_patch_is_rejected_and_not_persisted() {
        let (service, store, tenant) = service();
        let patch = PointConfigPatch {
            ai_modifier: Some(2.0),
            ..Default::default()
        };
        let err = service
            .apply_patch(tenant, ConfigScope::Company(tenant), patch)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::ConfigInvalid(_)));
        assert!(store
            .config_patch(ConfigScope::Company(tenant))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn org_patch_merges_over_the_stored_company_patch() {
        let (service, _, tenant) = service();
        let org = Uuid::new_v4();

        service
            .apply_patch(
                tenant,
                ConfigScope::Company(tenant),
                PointConfigPatch {
                    base_points: [(ActivityType::BugFix, 35)].into_iter().collect(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let resolved = service
            .apply_patch(
                tenant,
                ConfigScope::Organization(org),
                PointConfigPatch {
                    base_points: [(ActivityType::PullRequest, 50)].into_iter().collect(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(resolved.base_points[&ActivityType::PullRequest], 50);
        assert_eq!(resolved.base_points[&ActivityType::BugFix], 35);
    }
}
