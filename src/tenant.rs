//! Tenant discovery (spec.md §1 "Out-of-scope collaborators: tenant
//! provisioning"): the core never creates or deletes a tenant, but boot
//! still needs to know which tenant namespaces to warm. Reads the same
//! `TRACTCORE_*`-prefixed env var style as `config::Config::from_env`.

use crate::cache::{CacheManager, TenantCache};
use crate::ids::TenantId;
use std::sync::Arc;

const DEFAULT_TENANT_ID: &str = "default";

/// Comma-separated `TRACTCORE_TENANTS`, falling back to a single
/// `"default"` tenant for the unconfigured demo case.
pub fn discover_tenant_ids() -> Vec<TenantId> {
    match std::env::var("TRACTCORE_TENANTS") {
        Ok(raw) => {
            let ids: Vec<TenantId> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if ids.is_empty() {
                vec![DEFAULT_TENANT_ID.to_string()]
            } else {
                ids
            }
        }
        Err(_) => vec![DEFAULT_TENANT_ID.to_string()],
    }
}

/// Registers every discovered tenant with the cache manager so the warmer
/// and cleanup worker both see it via `CacheManager::active_tenant_ids`.
pub fn initialize_tenants(cache: &CacheManager, tenant_ids: &[TenantId]) -> Vec<Arc<TenantCache>> {
    tenant_ids
        .iter()
        .map(|id| cache.initialize_tenant(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_falls_back_to_a_single_default_tenant() {
        std::env::remove_var("TRACTCORE_TENANTS");
        assert_eq!(discover_tenant_ids(), vec!["default".to_string()]);
    }

    #[test]
    fn initialize_tenants_registers_every_id_with_the_cache_manager() {
        let cache = CacheManager::new();
        initialize_tenants(&cache, &["acme".to_string(), "globex".to_string()]);
        let mut ids = cache.active_tenant_ids();
        ids.sort();
        assert_eq!(ids, vec!["acme".to_string(), "globex".to_string()]);
    }
}
