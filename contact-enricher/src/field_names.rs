use std::time::Duration;

use moka::sync::{Cache, CacheBuilder};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::UpstreamError;
use crate::metric_consts::{FIELD_NAME_LOOKUPS, FIELD_NAME_REFRESHES};
use crate::upstream::{with_timeout, CaseStore};

/// Display names of case fields, keyed by field id. Filled by listing every field of a
/// domain, at most once per lookup that misses.
pub struct FieldNameCache {
    names: Cache<String, String>,
}

impl FieldNameCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let names = CacheBuilder::new(capacity).time_to_live(ttl).build();
        Self { names }
    }

    pub fn get(&self, field_id: &str) -> Option<String> {
        self.names.get(field_id)
    }

    pub fn clear(&self) {
        self.names.invalidate_all();
    }

    /// List every field in the domain and cache its name. Returns how many were seen.
    pub async fn refresh(
        &self,
        cases: &dyn CaseStore,
        domain_id: &str,
        timeout: Duration,
    ) -> Result<usize, UpstreamError> {
        metrics::counter!(FIELD_NAME_REFRESHES).increment(1);

        let mut seen = 0;
        let mut next_token = None;
        loop {
            let page = with_timeout(
                "ListFields",
                timeout,
                cases.list_fields(domain_id, next_token),
            )
            .await?;

            seen += page.items.len();
            for field in page.items {
                self.names.insert(field.field_id, field.name);
            }

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        info!(domain_id, fields = seen, "refreshed case field names");
        Ok(seen)
    }

    /// Names for `field_ids`, refreshing once if any are missing. A failed refresh only
    /// costs us the names we didn't have.
    pub async fn display_names(
        &self,
        cases: &dyn CaseStore,
        domain_id: &str,
        field_ids: &[String],
        timeout: Duration,
    ) -> Map<String, Value> {
        let misses = field_ids.iter().filter(|id| self.get(id).is_none()).count();
        metrics::counter!(FIELD_NAME_LOOKUPS, "outcome" => "hit")
            .increment((field_ids.len() - misses) as u64);
        metrics::counter!(FIELD_NAME_LOOKUPS, "outcome" => "miss").increment(misses as u64);

        if misses > 0 {
            if let Err(e) = self.refresh(cases, domain_id, timeout).await {
                warn!(domain_id, class = e.class(), "could not list case fields: {}", e);
            }
        }

        field_ids
            .iter()
            .filter_map(|id| Some((id.clone(), Value::String(self.get(id)?))))
            .collect()
    }

    pub async fn display_name(
        &self,
        cases: &dyn CaseStore,
        domain_id: &str,
        field_id: &str,
        timeout: Duration,
    ) -> Option<String> {
        let wanted = [field_id.to_owned()];
        self.display_names(cases, domain_id, &wanted, timeout)
            .await
            .remove(field_id)
            .and_then(|name| name.as_str().map(str::to_owned))
    }
}
