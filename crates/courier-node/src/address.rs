//! Endpoint address resolution.
//!
//! Repositories resolve `(service, action, ASID | ODS code)` to a single
//! transport endpoint. They compose: a layered chain consults delegates in
//! order, and a caching decorator memoizes any repository.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AddressError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupType {
    Asid,
    Ods,
}

impl LookupType {
    fn label(self) -> &'static str {
        match self {
            LookupType::Asid => "ASID",
            LookupType::Ods => "ODS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointAddressIdentifier {
    /// `service:action`.
    pub workflow_id: String,
    pub lookup: LookupType,
    pub code: String,
}

impl EndpointAddressIdentifier {
    pub fn new(service: &str, action: &str, lookup: LookupType, code: &str) -> Self {
        Self {
            workflow_id: format!("{service}:{action}"),
            lookup,
            code: code.to_string(),
        }
    }

    /// `{service}:{action}/{ASID|ODS}/{code}`.
    pub fn cache_key(&self) -> String {
        format!("{}/{}/{}", self.workflow_id, self.lookup.label(), self.code)
    }
}

impl fmt::Display for EndpointAddressIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

/// Resolved transport endpoint for a workflow and party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAddress {
    pub service: String,
    pub action: String,
    #[serde(default)]
    pub asid: Option<String>,
    #[serde(default)]
    pub ods_code: Option<String>,
    pub cpa_id: String,
    pub party_key: String,
    pub endpoint_url: String,
    #[serde(default)]
    pub changed_at: Option<NaiveDateTime>,
}

impl EndpointAddress {
    fn matches(&self, id: &EndpointAddressIdentifier) -> bool {
        let workflow = format!("{}:{}", self.service, self.action);
        if workflow != id.workflow_id {
            return false;
        }
        let code = match id.lookup {
            LookupType::Asid => self.asid.as_deref(),
            LookupType::Ods => self.ods_code.as_deref(),
        };
        code == Some(id.code.as_str())
    }
}

#[async_trait]
pub trait EndpointAddressRepository: Send + Sync {
    async fn find(
        &self,
        id: &EndpointAddressIdentifier,
    ) -> Result<Option<EndpointAddress>, AddressError>;

    async fn find_by_asid(
        &self,
        service: &str,
        action: &str,
        asid: &str,
    ) -> Result<Option<EndpointAddress>, AddressError> {
        self.find(&EndpointAddressIdentifier::new(
            service,
            action,
            LookupType::Asid,
            asid,
        ))
        .await
    }

    async fn find_by_ods_code(
        &self,
        service: &str,
        action: &str,
        ods_code: &str,
    ) -> Result<Option<EndpointAddress>, AddressError> {
        self.find(&EndpointAddressIdentifier::new(
            service,
            action,
            LookupType::Ods,
            ods_code,
        ))
        .await
    }
}

/// Fixed address list, typically loaded from configuration.
///
/// When several entries match, the most recently changed one wins.
#[derive(Debug, Clone, Default)]
pub struct StaticEndpointAddressRepository {
    addresses: Vec<EndpointAddress>,
}

impl StaticEndpointAddressRepository {
    pub fn new(addresses: Vec<EndpointAddress>) -> Self {
        Self { addresses }
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[async_trait]
impl EndpointAddressRepository for StaticEndpointAddressRepository {
    async fn find(
        &self,
        id: &EndpointAddressIdentifier,
    ) -> Result<Option<EndpointAddress>, AddressError> {
        Ok(self
            .addresses
            .iter()
            .filter(|address| address.matches(id))
            .max_by_key(|address| address.changed_at)
            .cloned())
    }
}

/// Ordered chain of repositories; the first hit wins.
#[derive(Clone, Default)]
pub struct LayeredEndpointAddressRepository {
    delegates: Vec<Arc<dyn EndpointAddressRepository>>,
}

impl LayeredEndpointAddressRepository {
    pub fn new(delegates: Vec<Arc<dyn EndpointAddressRepository>>) -> Self {
        Self { delegates }
    }

    pub fn push(&mut self, delegate: Arc<dyn EndpointAddressRepository>) {
        self.delegates.push(delegate);
    }
}

#[async_trait]
impl EndpointAddressRepository for LayeredEndpointAddressRepository {
    async fn find(
        &self,
        id: &EndpointAddressIdentifier,
    ) -> Result<Option<EndpointAddress>, AddressError> {
        for (layer, delegate) in self.delegates.iter().enumerate() {
            if let Some(address) = delegate.find(id).await? {
                debug!(%id, layer, "endpoint address resolved");
                return Ok(Some(address));
            }
        }
        Ok(None)
    }
}

/// Memoizing decorator over any repository.
///
/// Only successful resolutions are cached unless `cache_misses` is set.
pub struct CachingEndpointAddressRepository {
    delegate: Arc<dyn EndpointAddressRepository>,
    cache: Mutex<LruCache<String, Option<EndpointAddress>>>,
    cache_misses: bool,
}

impl CachingEndpointAddressRepository {
    pub fn new(
        delegate: Arc<dyn EndpointAddressRepository>,
        capacity: usize,
        cache_misses: bool,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            delegate,
            cache: Mutex::new(LruCache::new(capacity)),
            cache_misses,
        }
    }

    pub fn cached_len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Option<EndpointAddress>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EndpointAddressRepository for CachingEndpointAddressRepository {
    async fn find(
        &self,
        id: &EndpointAddressIdentifier,
    ) -> Result<Option<EndpointAddress>, AddressError> {
        let key = id.cache_key();
        let cached = self.lock().get(&key).cloned();
        if let Some(hit) = cached {
            debug!(%key, found = hit.is_some(), "endpoint address cache hit");
            return Ok(hit);
        }

        let resolved = self.delegate.find(id).await?;
        if resolved.is_some() || self.cache_misses {
            self.lock().put(key, resolved.clone());
        }
        Ok(resolved)
    }
}
