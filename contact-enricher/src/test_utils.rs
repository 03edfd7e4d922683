use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use envconfig::Envconfig;
use serde_json::Value;

use crate::app_context::AppContext;
use crate::config::Config;
use crate::error::{StoreError, UpstreamError};
use crate::upstream::{
    CampaignDirectory, CampaignRecord, CaseField, CaseStore, ContactDirectory, ContactRecord,
    FieldSummary, Item, Notifier, Page, RecordKey, RecordStore, UserRecord, ViewRecord,
};

pub fn test_config(pairs: &[(&str, &str)]) -> Config {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::init_from_hashmap(&vars).expect("test config is valid")
}

pub fn contact(id: &str, channel: &str, related: Option<&str>) -> ContactRecord {
    ContactRecord {
        id: id.to_owned(),
        channel: Some(channel.to_owned()),
        related_contact_id: related.map(str::to_owned),
        ..Default::default()
    }
}

fn not_found(operation: &'static str, what: &str) -> UpstreamError {
    UpstreamError::Call {
        operation,
        class: "ResourceNotFoundException".to_owned(),
        message: format!("{} not found", what),
    }
}

fn page_token(pages: usize, index: usize) -> Option<String> {
    (index + 1 < pages).then(|| (index + 1).to_string())
}

fn page_index(token: Option<String>) -> usize {
    token.and_then(|t| t.parse().ok()).unwrap_or(0)
}

#[derive(Default)]
pub struct FakeConnect {
    contacts: HashMap<String, ContactRecord>,
    users: HashMap<String, UserRecord>,
    views: HashMap<String, ViewRecord>,
    view_pages: Vec<Vec<String>>,
    failing: HashSet<String>,
    contact_calls: Mutex<Vec<String>>,
    user_calls: Mutex<usize>,
    view_calls: Mutex<Vec<String>>,
}

impl FakeConnect {
    pub fn with_contact(mut self, contact: ContactRecord) -> Self {
        self.contacts.insert(contact.id.clone(), contact);
        self
    }

    pub fn with_user(mut self, id: &str, user: UserRecord) -> Self {
        self.users.insert(id.to_owned(), user);
        self
    }

    pub fn with_view(mut self, view_id: &str, view: ViewRecord) -> Self {
        self.views.insert(view_id.to_owned(), view);
        self
    }

    pub fn with_view_pages(mut self, pages: Vec<Vec<String>>) -> Self {
        self.view_pages = pages;
        self
    }

    pub fn failing_contact(mut self, id: &str) -> Self {
        self.failing.insert(id.to_owned());
        self
    }

    pub fn describe_contact_calls(&self) -> Vec<String> {
        self.contact_calls.lock().unwrap().clone()
    }

    pub fn describe_user_calls(&self) -> usize {
        *self.user_calls.lock().unwrap()
    }

    pub fn describe_view_calls(&self) -> Vec<String> {
        self.view_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContactDirectory for FakeConnect {
    async fn describe_contact(
        &self,
        _instance_id: &str,
        contact_id: &str,
    ) -> Result<ContactRecord, UpstreamError> {
        self.contact_calls
            .lock()
            .unwrap()
            .push(contact_id.to_owned());

        if self.failing.contains(contact_id) {
            return Err(UpstreamError::Call {
                operation: "DescribeContact",
                class: "ThrottlingException".to_owned(),
                message: "rate exceeded".to_owned(),
            });
        }
        self.contacts
            .get(contact_id)
            .cloned()
            .ok_or_else(|| not_found("DescribeContact", contact_id))
    }

    async fn describe_user(
        &self,
        _instance_id: &str,
        user_id: &str,
    ) -> Result<UserRecord, UpstreamError> {
        *self.user_calls.lock().unwrap() += 1;
        self.users
            .get(user_id)
            .cloned()
            .ok_or_else(|| not_found("DescribeUser", user_id))
    }

    async fn list_views(
        &self,
        _instance_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<String>, UpstreamError> {
        let index = page_index(next_token);
        Ok(Page {
            items: self.view_pages.get(index).cloned().unwrap_or_default(),
            next_token: page_token(self.view_pages.len(), index),
        })
    }

    async fn describe_view(
        &self,
        _instance_id: &str,
        view_id: &str,
    ) -> Result<ViewRecord, UpstreamError> {
        self.view_calls.lock().unwrap().push(view_id.to_owned());
        self.views
            .get(view_id)
            .cloned()
            .ok_or_else(|| not_found("DescribeView", view_id))
    }
}

#[derive(Default)]
pub struct FakeCampaigns {
    campaigns: HashMap<String, CampaignRecord>,
    calls: Mutex<usize>,
}

impl FakeCampaigns {
    pub fn with_campaign(mut self, id: &str, campaign: CampaignRecord) -> Self {
        self.campaigns.insert(id.to_owned(), campaign);
        self
    }

    pub fn describe_campaign_calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl CampaignDirectory for FakeCampaigns {
    async fn describe_campaign(&self, campaign_id: &str) -> Result<CampaignRecord, UpstreamError> {
        *self.calls.lock().unwrap() += 1;
        self.campaigns
            .get(campaign_id)
            .cloned()
            .ok_or_else(|| not_found("DescribeCampaign", campaign_id))
    }
}

#[derive(Default)]
pub struct FakeCases {
    fields: HashMap<String, Value>,
    field_pages: Vec<Vec<FieldSummary>>,
    fail_get_case: bool,
    fail_list_fields: bool,
    get_case_batches: Mutex<Vec<usize>>,
    list_fields_calls: Mutex<usize>,
}

impl FakeCases {
    /// Add a field to the case, with its value in tagged form.
    pub fn with_case_field(mut self, id: &str, tagged: Value) -> Self {
        self.fields.insert(id.to_owned(), tagged);
        self
    }

    pub fn with_field_pages(mut self, pages: Vec<Vec<FieldSummary>>) -> Self {
        self.field_pages = pages;
        self
    }

    pub fn failing_get_case(mut self) -> Self {
        self.fail_get_case = true;
        self
    }

    pub fn failing_list_fields(mut self) -> Self {
        self.fail_list_fields = true;
        self
    }

    /// How many field ids each GetCase call asked for.
    pub fn get_case_batches(&self) -> Vec<usize> {
        self.get_case_batches.lock().unwrap().clone()
    }

    pub fn list_fields_calls(&self) -> usize {
        *self.list_fields_calls.lock().unwrap()
    }
}

#[async_trait]
impl CaseStore for FakeCases {
    async fn list_fields(
        &self,
        _domain_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<FieldSummary>, UpstreamError> {
        *self.list_fields_calls.lock().unwrap() += 1;
        if self.fail_list_fields {
            return Err(UpstreamError::Call {
                operation: "ListFields",
                class: "AccessDeniedException".to_owned(),
                message: "denied".to_owned(),
            });
        }

        let index = page_index(next_token);
        Ok(Page {
            items: self.field_pages.get(index).cloned().unwrap_or_default(),
            next_token: page_token(self.field_pages.len(), index),
        })
    }

    async fn get_case(
        &self,
        _domain_id: &str,
        case_id: &str,
        field_ids: &[String],
    ) -> Result<Vec<CaseField>, UpstreamError> {
        self.get_case_batches.lock().unwrap().push(field_ids.len());
        if self.fail_get_case {
            return Err(not_found("GetCase", case_id));
        }

        Ok(field_ids
            .iter()
            .filter_map(|id| {
                Some(CaseField {
                    id: id.clone(),
                    value: self.fields.get(id)?.clone(),
                })
            })
            .collect())
    }
}

/// Tables of items kept in memory, keyed the way the real store keys them.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, BTreeMap<RecordKey, Item>>>,
    upserts: Mutex<usize>,
}

impl MemoryStore {
    pub fn get(&self, table: &str, key_attr: &str, key_value: &str) -> Option<Item> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)?
            .iter()
            .find(|(key, _)| key.partition.0 == key_attr && key.partition.1 == key_value)
            .map(|(_, item)| item.clone())
    }

    pub fn items(&self, table: &str) -> Vec<Item> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, table: &str) -> usize {
        self.items(table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.lock().unwrap().values().all(BTreeMap::is_empty)
    }

    pub fn upsert_count(&self) -> usize {
        *self.upserts.lock().unwrap()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert(&self, table: &str, key: &RecordKey, mut item: Item) -> Result<(), StoreError> {
        for (attr, value) in std::iter::once(&key.partition).chain(key.sort.as_ref()) {
            item.insert(attr.clone(), Value::String(value.clone()));
        }

        *self.upserts.lock().unwrap() += 1;
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_owned())
            .or_default()
            .insert(key.clone(), item);
        Ok(())
    }

    async fn query_first(
        &self,
        table: &str,
        key_attr: &str,
        key_value: &str,
    ) -> Result<Option<Item>, StoreError> {
        let tables = self.tables.lock().unwrap();
        let Some(items) = tables.get(table) else {
            return Err(StoreError {
                class: "ResourceNotFoundException".to_owned(),
                message: format!("table {} does not exist", table),
            });
        };

        Ok(items
            .values()
            .find(|item| item.get(key_attr).and_then(Value::as_str) == Some(key_value))
            .cloned())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    published: Mutex<Vec<(String, String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Every `(topic, subject, message)` published so far.
    pub fn published(&self) -> Vec<(String, String, String)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(
        &self,
        topic_arn: &str,
        subject: &str,
        message: &str,
    ) -> Result<Option<String>, UpstreamError> {
        if self.fail {
            return Err(UpstreamError::Call {
                operation: "Publish",
                class: "AuthorizationErrorException".to_owned(),
                message: "not allowed".to_owned(),
            });
        }

        let mut published = self.published.lock().unwrap();
        published.push((topic_arn.to_owned(), subject.to_owned(), message.to_owned()));
        Ok(Some(format!("msg-{}", published.len())))
    }
}

/// The fakes behind an `AppContext`, kept around so tests can inspect them.
#[derive(Default, Clone)]
pub struct TestServices {
    pub connect: Arc<FakeConnect>,
    pub campaigns: Arc<FakeCampaigns>,
    pub cases: Arc<FakeCases>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<MemoryStore>,
}

impl TestServices {
    pub fn context(&self, config: Config) -> Arc<AppContext> {
        Arc::new(AppContext::new(
            config,
            self.connect.clone(),
            self.campaigns.clone(),
            self.cases.clone(),
            self.notifier.clone(),
            self.store.clone(),
        ))
    }
}
