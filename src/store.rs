//! Per-tenant data partitions: allowed domains, the crawl admission queue and
//! tenant settings.
//!
//! Every read and write is keyed by tenant id. Nothing in here ever looks
//! across partitions; isolation holds as long as callers resolve the tenant
//! from the request context and not from payload data.

use crate::identity::now_ms;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// An allow-listed domain within a tenant.
#[derive(Debug, Clone)]
pub struct DomainRecord {
    pub domain: String,
    pub added_by: String,
    pub notes: Option<String>,
    pub added_at: i64,
}

/// A URL admitted to the crawl queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub url: String,
    pub domain: String,
    pub priority: i32,
    pub attempt_count: i32,
    pub scheduled_at: i64,
    pub created_at: i64,
}

#[derive(Debug)]
struct TenantData {
    domains: BTreeMap<String, DomainRecord>,
    queue: Vec<QueueEntry>,
    crawling_enabled: bool,
}

impl Default for TenantData {
    fn default() -> Self {
        Self {
            domains: BTreeMap::new(),
            queue: Vec::new(),
            crawling_enabled: true,
        }
    }
}

/// Tenant-partitioned store. Partitions materialize lazily on first write;
/// reads against an untouched tenant see empty data and default settings.
#[derive(Default)]
pub struct TenantStore {
    tenants: RwLock<HashMap<String, TenantData>>,
}

impl TenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- allowed domains ----

    /// Add a domain to the tenant's allow list. Returns false when the domain
    /// is already present.
    pub fn add_domain(
        &self,
        tenant_id: &str,
        domain: &str,
        added_by: &str,
        notes: Option<String>,
    ) -> bool {
        let domain = domain.trim().to_lowercase();
        let mut tenants = self.tenants.write();
        let data = tenants.entry(tenant_id.to_string()).or_default();
        if data.domains.contains_key(&domain) {
            return false;
        }
        data.domains.insert(
            domain.clone(),
            DomainRecord {
                domain,
                added_by: added_by.to_string(),
                notes,
                added_at: now_ms(),
            },
        );
        true
    }

    pub fn list_domains(&self, tenant_id: &str) -> Vec<DomainRecord> {
        self.tenants
            .read()
            .get(tenant_id)
            .map(|d| d.domains.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn delete_domain(&self, tenant_id: &str, domain: &str) -> bool {
        let domain = domain.trim().to_lowercase();
        self.tenants
            .write()
            .get_mut(tenant_id)
            .map(|d| d.domains.remove(&domain).is_some())
            .unwrap_or(false)
    }

    /// Exact-match allow check. Subdomains are distinct entries; `example.com`
    /// does not admit `docs.example.com`.
    pub fn is_domain_allowed(&self, tenant_id: &str, domain: &str) -> bool {
        let domain = domain.trim().to_lowercase();
        self.tenants
            .read()
            .get(tenant_id)
            .map(|d| d.domains.contains_key(&domain))
            .unwrap_or(false)
    }

    // ---- crawl queue ----

    pub fn enqueue(&self, tenant_id: &str, url: &str, domain: &str, priority: i32) -> QueueEntry {
        let now = now_ms();
        let entry = QueueEntry {
            url: url.to_string(),
            domain: domain.to_string(),
            priority,
            attempt_count: 0,
            scheduled_at: now,
            created_at: now,
        };
        self.tenants
            .write()
            .entry(tenant_id.to_string())
            .or_default()
            .queue
            .push(entry.clone());
        entry
    }

    pub fn queue_len(&self, tenant_id: &str) -> usize {
        self.tenants
            .read()
            .get(tenant_id)
            .map(|d| d.queue.len())
            .unwrap_or(0)
    }

    // ---- settings ----

    pub fn crawling_enabled(&self, tenant_id: &str) -> bool {
        self.tenants
            .read()
            .get(tenant_id)
            .map(|d| d.crawling_enabled)
            .unwrap_or(true)
    }

    pub fn set_crawling_enabled(&self, tenant_id: &str, enabled: bool) {
        self.tenants
            .write()
            .entry(tenant_id.to_string())
            .or_default()
            .crawling_enabled = enabled;
    }
}
