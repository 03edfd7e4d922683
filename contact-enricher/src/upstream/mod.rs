//! The services we call out to, behind traits so handlers can be exercised against
//! in-memory fakes. The AWS backed implementations live in [`aws`].
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{StoreError, UpstreamError};
use crate::metric_consts::UPSTREAM_TIMEOUTS;

pub mod aws;

/// A record as written to or read from the key-value store.
pub type Item = Map<String, Value>;

pub const INITIATION_TIMESTAMP: &str = "InitiationTimestamp";
pub const DISCONNECT_TIMESTAMP: &str = "DisconnectTimestamp";
pub const LAST_UPDATE_TIMESTAMP: &str = "LastUpdateTimestamp";
pub const ENQUEUE_TIMESTAMP: &str = "EnqueueTimestamp";
pub const CONNECTED_TO_AGENT_TIMESTAMP: &str = "ConnectedToAgentTimestamp";
pub const AFTER_CONTACT_WORK_START_TIMESTAMP: &str = "AfterContactWorkStartTimestamp";
pub const AFTER_CONTACT_WORK_END_TIMESTAMP: &str = "AfterContactWorkEndTimestamp";
pub const SCHEDULED_TIMESTAMP: &str = "ScheduledTimestamp";
pub const CONNECTED_TO_SYSTEM_TIMESTAMP: &str = "ConnectedToSystemTimestamp";
pub const LAST_PAUSED_TIMESTAMP: &str = "LastPausedTimestamp";
pub const LAST_RESUMED_TIMESTAMP: &str = "LastResumedTimestamp";

/// Every lifecycle timestamp we know how to carry, in reporting order.
pub const TIMESTAMP_FIELDS: [&str; 11] = [
    INITIATION_TIMESTAMP,
    DISCONNECT_TIMESTAMP,
    CONNECTED_TO_SYSTEM_TIMESTAMP,
    LAST_UPDATE_TIMESTAMP,
    LAST_PAUSED_TIMESTAMP,
    LAST_RESUMED_TIMESTAMP,
    ENQUEUE_TIMESTAMP,
    CONNECTED_TO_AGENT_TIMESTAMP,
    AFTER_CONTACT_WORK_START_TIMESTAMP,
    AFTER_CONTACT_WORK_END_TIMESTAMP,
    SCHEDULED_TIMESTAMP,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactRecord {
    pub id: String,
    pub channel: Option<String>,
    pub related_contact_id: Option<String>,
    /// Lifecycle timestamps keyed by the names in [`TIMESTAMP_FIELDS`], as ISO-8601.
    pub timestamps: BTreeMap<String, String>,
    pub agent_id: Option<String>,
    pub campaign_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl UserRecord {
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.first_name, &self.last_name]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.is_empty())
            .collect();

        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignRecord {
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewRecord {
    pub name: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
    /// The view template, either as the raw JSON text or already parsed.
    pub template: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSummary {
    pub field_id: String,
    pub name: String,
}

/// One field of a case, with its value still in tagged form.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseField {
    pub id: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub partition: (String, String),
    pub sort: Option<(String, String)>,
}

impl RecordKey {
    pub fn partition(attr: &str, value: &str) -> Self {
        Self {
            partition: (attr.to_owned(), value.to_owned()),
            sort: None,
        }
    }

    pub fn composite(attr: &str, value: &str, sort_attr: &str, sort_value: &str) -> Self {
        Self {
            partition: (attr.to_owned(), value.to_owned()),
            sort: Some((sort_attr.to_owned(), sort_value.to_owned())),
        }
    }
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn describe_contact(
        &self,
        instance_id: &str,
        contact_id: &str,
    ) -> Result<ContactRecord, UpstreamError>;

    async fn describe_user(
        &self,
        instance_id: &str,
        user_id: &str,
    ) -> Result<UserRecord, UpstreamError>;

    /// One page of view ARNs for an instance.
    async fn list_views(
        &self,
        instance_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<String>, UpstreamError>;

    async fn describe_view(
        &self,
        instance_id: &str,
        view_id: &str,
    ) -> Result<ViewRecord, UpstreamError>;
}

#[async_trait]
pub trait CampaignDirectory: Send + Sync {
    async fn describe_campaign(&self, campaign_id: &str) -> Result<CampaignRecord, UpstreamError>;
}

#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn list_fields(
        &self,
        domain_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<FieldSummary>, UpstreamError>;

    /// Fetch the requested fields of a case. Fields the case doesn't have are left out.
    async fn get_case(
        &self,
        domain_id: &str,
        case_id: &str,
        field_ids: &[String],
    ) -> Result<Vec<CaseField>, UpstreamError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish a message, returning its id if the service gave us one.
    async fn publish(
        &self,
        topic_arn: &str,
        subject: &str,
        message: &str,
    ) -> Result<Option<String>, UpstreamError>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create or wholly replace the item stored under `key`.
    async fn upsert(&self, table: &str, key: &RecordKey, item: Item) -> Result<(), StoreError>;

    /// The first item whose `key_attr` equals `key_value`, if any.
    async fn query_first(
        &self,
        table: &str,
        key_attr: &str,
        key_value: &str,
    ) -> Result<Option<Item>, StoreError>;
}

/// Errors able to stand for a call that ran out of time.
pub trait TimedOut {
    fn timed_out(operation: &'static str) -> Self;
}

impl TimedOut for UpstreamError {
    fn timed_out(operation: &'static str) -> Self {
        UpstreamError::Timeout { operation }
    }
}

impl TimedOut for StoreError {
    fn timed_out(operation: &'static str) -> Self {
        StoreError::timeout(operation)
    }
}

/// Bound an upstream call by `timeout`. Running out of time is reported as the call's
/// own error type, so callers handle it like any other failure of that call.
pub async fn with_timeout<T, E, F>(operation: &'static str, timeout: Duration, call: F) -> Result<T, E>
where
    E: TimedOut,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = timeout.as_millis() as u64, "upstream call timed out");
            metrics::counter!(UPSTREAM_TIMEOUTS, "operation" => operation).increment(1);
            Err(E::timed_out(operation))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        let user = UserRecord {
            first_name: Some("Ada".to_owned()),
            last_name: Some("Lovelace".to_owned()),
            username: None,
        };
        assert_eq!(user.display_name().as_deref(), Some("Ada Lovelace"));

        let user = UserRecord {
            first_name: Some("".to_owned()),
            last_name: Some("Lovelace".to_owned()),
            username: None,
        };
        assert_eq!(user.display_name().as_deref(), Some("Lovelace"));

        assert_eq!(UserRecord::default().display_name(), None);
    }

    #[tokio::test]
    async fn test_with_timeout_passes_results_through() {
        let result = with_timeout("Fast", Duration::from_secs(1), async { Ok::<_, UpstreamError>(5) }).await;

        assert_eq!(result, Ok(5));
    }

    #[tokio::test]
    async fn test_with_timeout_gives_up_on_slow_calls() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, UpstreamError>(())
        };

        let result = with_timeout("Slow", Duration::from_millis(10), slow).await;

        assert_eq!(result, Err(UpstreamError::Timeout { operation: "Slow" }));
    }

    #[tokio::test]
    async fn test_with_timeout_speaks_the_store_error() {
        let hung = futures::future::pending::<Result<(), StoreError>>();

        let result = with_timeout("Query", Duration::from_millis(10), hung).await;

        assert_eq!(result, Err(StoreError::timeout("Query")));
    }
}
