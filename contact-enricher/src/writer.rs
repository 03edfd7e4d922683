//! Assembling and persisting the enriched record for a contact.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::lineage::LineageRecord;
use crate::metric_consts::{LABEL_LOOKUPS, RECORD_WRITES};
use crate::upstream::{with_timeout, Item, RecordKey, RecordStore};

pub const CREATED_AT_ATTR: &str = "CreatedAt";
/// Reserved answer key carrying the button the agent pressed. Never looked up as a label.
pub const ACTION_KEY: &str = "viewAction";
pub const LABEL_SUFFIX: &str = "_Label";

/// Render `now` the way people reading the table expect, e.g.
/// `March 05, 2024 09:30:00 AM EST`.
pub fn display_timestamp(now: DateTime<Utc>, offset: FixedOffset, label: &str) -> String {
    format!(
        "{} {}",
        now.with_timezone(&offset).format("%B %d, %Y %I:%M:%S %p"),
        label
    )
}

/// Resolves the human readable label of an answer key.
#[async_trait]
pub trait LabelLookup: Send + Sync {
    async fn label_for(&self, key: &str) -> Option<String>;
}

/// Reads labels from the view question catalog. Lookup failures are logged and treated
/// as a missing label.
pub struct TableLabelLookup {
    store: Arc<dyn RecordStore>,
    table: String,
    key_attr: String,
    label_attr: String,
    timeout: Duration,
}

impl TableLabelLookup {
    pub fn new(store: Arc<dyn RecordStore>, config: &Config) -> Option<Self> {
        let table = config.view_questions_table()?;
        Some(Self {
            store,
            table: table.to_owned(),
            key_attr: config.view_questions_pk_name.clone(),
            label_attr: config.view_questions_sk_name.clone(),
            timeout: config.upstream_timeout.0,
        })
    }
}

#[async_trait]
impl LabelLookup for TableLabelLookup {
    async fn label_for(&self, key: &str) -> Option<String> {
        let query = self.store.query_first(&self.table, &self.key_attr, key);
        let label = match with_timeout("Query", self.timeout, query).await {
            Ok(item) => item.and_then(|item| {
                item.get(&self.label_attr)
                    .and_then(Value::as_str)
                    .filter(|label| !label.is_empty())
                    .map(str::to_owned)
            }),
            Err(e) => {
                warn!(key, class = %e.class, "label lookup failed: {}", e);
                metrics::counter!(LABEL_LOOKUPS, "outcome" => "failed").increment(1);
                return None;
            }
        };

        let outcome = if label.is_some() { "hit" } else { "miss" };
        metrics::counter!(LABEL_LOOKUPS, "outcome" => outcome).increment(1);
        label
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingPrimaryKey,
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WriteOutcome {
    Skipped { reason: SkipReason },
    Written,
    Failed { class: String },
}

impl WriteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOutcome::Skipped { .. } => "skipped",
            WriteOutcome::Written => "written",
            WriteOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub primary_key: String,
    pub item: Item,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteResult {
    /// The record as built, when there was a key to build it for.
    pub record: Option<EnrichedRecord>,
    pub outcome: WriteOutcome,
}

#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub table: Option<(String, String)>,
    pub ttl_attr: String,
    pub retention: Duration,
    pub display_offset: FixedOffset,
    pub display_label: String,
    pub timeout: Duration,
}

impl WriterSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            table: config
                .enrichment_table()
                .map(|(table, key)| (table.to_owned(), key.to_owned())),
            ttl_attr: config.ddb_ttl_attr.clone(),
            retention: Duration::from_secs(u64::from(config.retention_days) * 24 * 60 * 60),
            display_offset: config.display_offset(),
            display_label: config.tz_label.clone(),
            timeout: config.upstream_timeout.0,
        }
    }
}

pub struct EnrichmentWriter {
    store: Arc<dyn RecordStore>,
    settings: WriterSettings,
}

impl EnrichmentWriter {
    pub fn new(store: Arc<dyn RecordStore>, settings: WriterSettings) -> Self {
        Self { store, settings }
    }

    pub async fn write(
        &self,
        primary_key: Option<&str>,
        answers: &Map<String, Value>,
        context: &Map<String, Value>,
        lineage: &LineageRecord,
        labels: Option<&dyn LabelLookup>,
    ) -> WriteResult {
        self.write_at(primary_key, answers, context, lineage, labels, Utc::now())
            .await
    }

    /// Build the record for `primary_key` and upsert it. Attributes are layered with
    /// later layers winning: contact context, lineage, answers, answer labels, then the
    /// bookkeeping attributes and the key itself.
    pub async fn write_at(
        &self,
        primary_key: Option<&str>,
        answers: &Map<String, Value>,
        context: &Map<String, Value>,
        lineage: &LineageRecord,
        labels: Option<&dyn LabelLookup>,
        now: DateTime<Utc>,
    ) -> WriteResult {
        let Some(primary_key) = primary_key.filter(|k| !k.is_empty()) else {
            warn!("no primary key on event, not writing record");
            return self.finish(None, WriteOutcome::Skipped {
                reason: SkipReason::MissingPrimaryKey,
            });
        };

        let mut item = context.clone();
        item.extend(lineage.to_attributes());
        item.extend(answers.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(labels) = labels {
            item.extend(resolve_labels(labels, answers).await);
        }
        item.insert(
            CREATED_AT_ATTR.to_owned(),
            Value::String(display_timestamp(
                now,
                self.settings.display_offset,
                &self.settings.display_label,
            )),
        );
        item.insert(
            self.settings.ttl_attr.clone(),
            Value::from(expires_at(now, self.settings.retention)),
        );

        let Some((table, key_attr)) = &self.settings.table else {
            warn!(primary_key, "record table not configured, not writing record");
            let record = record(primary_key, item);
            return self.finish(Some(record), WriteOutcome::Skipped {
                reason: SkipReason::NotConfigured,
            });
        };
        item.insert(key_attr.clone(), Value::String(primary_key.to_owned()));

        let key = RecordKey::partition(key_attr, primary_key);
        let upsert = self.store.upsert(table, &key, item.clone());
        let outcome = match with_timeout("PutItem", self.settings.timeout, upsert).await {
            Ok(()) => {
                info!(table = %table, primary_key, attributes = item.len(), "record written");
                WriteOutcome::Written
            }
            Err(e) => {
                error!(table = %table, primary_key, class = %e.class, "record write failed: {}", e);
                WriteOutcome::Failed { class: e.class }
            }
        };

        self.finish(Some(record(primary_key, item)), outcome)
    }

    fn finish(&self, record: Option<EnrichedRecord>, outcome: WriteOutcome) -> WriteResult {
        metrics::counter!(RECORD_WRITES, "outcome" => outcome.as_str()).increment(1);
        WriteResult { record, outcome }
    }
}

fn record(primary_key: &str, item: Item) -> EnrichedRecord {
    EnrichedRecord {
        primary_key: primary_key.to_owned(),
        item,
    }
}

fn expires_at(now: DateTime<Utc>, retention: Duration) -> i64 {
    now.timestamp() + retention.as_secs() as i64
}

/// Look up every answer's label at once, returning `<key>_Label` attributes for those
/// that have one.
async fn resolve_labels(
    labels: &dyn LabelLookup,
    answers: &Map<String, Value>,
) -> Map<String, Value> {
    let keys = answers.keys().filter(|key| key.as_str() != ACTION_KEY);
    let lookups = keys.map(|key| async move {
        labels
            .label_for(key)
            .await
            .map(|label| (format!("{}{}", key, LABEL_SUFFIX), Value::String(label)))
    });

    join_all(lookups).await.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use mockall::mock;
    use serde_json::json;

    use crate::error::StoreError;
    use crate::test_utils::{test_config, MemoryStore};

    use super::*;

    mock! {
        pub Store {}

        #[async_trait]
        impl RecordStore for Store {
            async fn upsert(&self, table: &str, key: &RecordKey, item: Item) -> Result<(), StoreError>;
            async fn query_first(
                &self,
                table: &str,
                key_attr: &str,
                key_value: &str,
            ) -> Result<Option<Item>, StoreError>;
        }
    }

    struct StaticLabels(HashMap<&'static str, &'static str>);

    #[async_trait]
    impl LabelLookup for StaticLabels {
        async fn label_for(&self, key: &str) -> Option<String> {
            self.0.get(key).map(|l| l.to_string())
        }
    }

    fn configured() -> WriterSettings {
        WriterSettings::from_config(&test_config(&[
            ("DDB_TABLE_NAME", "ContactViewData"),
            ("DDB_PK_NAME", "InitialContactId"),
        ]))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap()
    }

    fn answers(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_display_timestamp() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();

        assert_eq!(
            display_timestamp(now(), offset, "EST"),
            "March 05, 2024 09:30:00 AM EST"
        );
    }

    #[tokio::test]
    async fn test_missing_primary_key_touches_nothing() {
        let mut store = MockStore::new();
        store.expect_upsert().never();
        store.expect_query_first().never();
        let writer = EnrichmentWriter::new(Arc::new(store), configured());
        let labels = StaticLabels(HashMap::new());

        let result = writer
            .write_at(
                None,
                &answers(json!({"q": "a"})),
                &Map::new(),
                &LineageRecord::default(),
                Some(&labels),
                now(),
            )
            .await;

        assert_eq!(
            result,
            WriteResult {
                record: None,
                outcome: WriteOutcome::Skipped {
                    reason: SkipReason::MissingPrimaryKey
                }
            }
        );
    }

    #[tokio::test]
    async fn test_unconfigured_table_builds_but_does_not_write() {
        let mut store = MockStore::new();
        store.expect_upsert().never();
        let writer = EnrichmentWriter::new(
            Arc::new(store),
            WriterSettings::from_config(&test_config(&[])),
        );

        let result = writer
            .write_at(
                Some("pk-1"),
                &answers(json!({"q": "a"})),
                &Map::new(),
                &LineageRecord::default(),
                None,
                now(),
            )
            .await;

        assert_eq!(
            result.outcome,
            WriteOutcome::Skipped {
                reason: SkipReason::NotConfigured
            }
        );
        let record = result.record.unwrap();
        assert_eq!(record.primary_key, "pk-1");
        assert_eq!(record.item["q"], json!("a"));
    }

    #[tokio::test]
    async fn test_record_layers_and_bookkeeping() {
        let store = Arc::new(MemoryStore::default());
        let writer = EnrichmentWriter::new(store.clone(), configured());
        let lineage = LineageRecord {
            hops: 1,
            agent_id: Some("lineage-agent".to_owned()),
            ..Default::default()
        };
        let context = answers(json!({
            "Channel": "TASK",
            "AgentId": "context-agent",
            "InitialContactId": "spoofed",
            "ttl": 1
        }));
        let labels = StaticLabels(HashMap::from([("REDE_Q2", "Was the call transferred?")]));

        let result = writer
            .write_at(
                Some("pk-1"),
                &answers(json!({"REDE_Q2": "Yes", "AgentId": "answer-agent"})),
                &context,
                &lineage,
                Some(&labels),
                now(),
            )
            .await;

        assert_eq!(result.outcome, WriteOutcome::Written);
        let stored = store.get("ContactViewData", "InitialContactId", "pk-1").unwrap();
        assert_eq!(
            Value::Object(stored),
            json!({
                "InitialContactId": "pk-1",
                "Channel": "TASK",
                "AgentId": "answer-agent",
                "LineageHops": 1,
                "REDE_Q2": "Yes",
                "REDE_Q2_Label": "Was the call transferred?",
                "CreatedAt": "March 05, 2024 09:30:00 AM EST",
                "ttl": now().timestamp() + 365 * 24 * 60 * 60
            })
        );
    }

    #[tokio::test]
    async fn test_writing_twice_is_idempotent() {
        let store = Arc::new(MemoryStore::default());
        let writer = EnrichmentWriter::new(store.clone(), configured());
        let fields = answers(json!({"q": "a"}));

        for _ in 0..2 {
            writer
                .write_at(
                    Some("pk-1"),
                    &fields,
                    &Map::new(),
                    &LineageRecord::default(),
                    None,
                    now(),
                )
                .await;
        }

        assert_eq!(store.len("ContactViewData"), 1);
        assert_eq!(store.upsert_count(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_not_raised() {
        let mut store = MockStore::new();
        store.expect_upsert().times(1).returning(|_, _, _| {
            Err(StoreError {
                class: "ProvisionedThroughputExceededException".to_owned(),
                message: "slow down".to_owned(),
            })
        });
        let writer = EnrichmentWriter::new(Arc::new(store), configured());

        let result = writer
            .write_at(
                Some("pk-1"),
                &Map::new(),
                &Map::new(),
                &LineageRecord::default(),
                None,
                now(),
            )
            .await;

        assert_eq!(
            result.outcome,
            WriteOutcome::Failed {
                class: "ProvisionedThroughputExceededException".to_owned()
            }
        );
        assert!(result.record.is_some());
    }

    #[tokio::test]
    async fn test_table_label_lookup_reads_catalog() {
        let store = Arc::new(MemoryStore::default());
        store
            .upsert(
                "ViewQuestions",
                &RecordKey::composite("Name", "REDE_Q2", "Label", "Transferred?"),
                answers(json!({"Name": "REDE_Q2", "Label": "Transferred?"})),
            )
            .await
            .unwrap();
        let config = test_config(&[("VIEW_QUESTIONS_TABLE", "ViewQuestions")]);
        let lookup = TableLabelLookup::new(store, &config).unwrap();

        assert_eq!(lookup.label_for("REDE_Q2").await.as_deref(), Some("Transferred?"));
        assert_eq!(lookup.label_for("unknown").await, None);
    }

    #[tokio::test]
    async fn test_table_label_lookup_swallows_failures() {
        let mut store = MockStore::new();
        store.expect_query_first().returning(|_, _, _| {
            Err(StoreError {
                class: "ResourceNotFoundException".to_owned(),
                message: "no table".to_owned(),
            })
        });
        let config = test_config(&[("VIEW_QUESTIONS_TABLE", "ViewQuestions")]);
        let lookup = TableLabelLookup::new(Arc::new(store), &config).unwrap();

        assert_eq!(lookup.label_for("REDE_Q2").await, None);
    }

    /// A store whose calls never complete.
    struct HungStore;

    #[async_trait]
    impl RecordStore for HungStore {
        async fn upsert(&self, _: &str, _: &RecordKey, _: Item) -> Result<(), StoreError> {
            futures::future::pending().await
        }

        async fn query_first(&self, _: &str, _: &str, _: &str) -> Result<Option<Item>, StoreError> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_hung_store_times_out_like_any_failure() {
        let config = test_config(&[
            ("DDB_TABLE_NAME", "ContactViewData"),
            ("DDB_PK_NAME", "InitialContactId"),
            ("VIEW_QUESTIONS_TABLE", "ViewQuestions"),
            ("UPSTREAM_TIMEOUT_MS", "50"),
        ]);
        let store: Arc<dyn RecordStore> = Arc::new(HungStore);
        let labels = TableLabelLookup::new(store.clone(), &config).unwrap();
        let writer = EnrichmentWriter::new(store, WriterSettings::from_config(&config));

        let view_answers = answers(json!({"REDE_Q2": "Yes"}));
        let other = Map::new();
        let lineage = LineageRecord::default();
        let write = writer.write(
            Some("pk-1"),
            &view_answers,
            &other,
            &lineage,
            Some(&labels),
        );
        let result = tokio::time::timeout(Duration::from_secs(2), write)
            .await
            .expect("write should give up on the store");

        assert_eq!(
            result.outcome,
            WriteOutcome::Failed {
                class: "Timeout".to_owned()
            }
        );
        let record = result.record.unwrap();
        assert_eq!(record.item["REDE_Q2"], json!("Yes"));
        assert!(!record.item.contains_key("REDE_Q2_Label"));
    }

    #[test]
    fn test_no_catalog_table_means_no_lookup() {
        let store = Arc::new(MemoryStore::default());

        assert!(TableLabelLookup::new(store, &test_config(&[])).is_none());
    }
}
