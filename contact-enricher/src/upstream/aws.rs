use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use aws_sdk_connect::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_connect::primitives::DateTime;
use aws_sdk_connect::types::Contact;
use aws_sdk_connectcases::types::{FieldIdentifier, FieldValueUnion};
use aws_sdk_dynamodb::types::AttributeValue;
use contact_common::tagged::TaggedValue;
use serde_json::{Map, Number, Value};

use super::{
    CampaignDirectory, CampaignRecord, CaseField, CaseStore, ContactDirectory, ContactRecord,
    FieldSummary, Item, Notifier, Page, RecordKey, RecordStore, UserRecord, ViewRecord,
    AFTER_CONTACT_WORK_END_TIMESTAMP, AFTER_CONTACT_WORK_START_TIMESTAMP,
    CONNECTED_TO_AGENT_TIMESTAMP, DISCONNECT_TIMESTAMP, ENQUEUE_TIMESTAMP, INITIATION_TIMESTAMP,
    LAST_PAUSED_TIMESTAMP, LAST_RESUMED_TIMESTAMP, LAST_UPDATE_TIMESTAMP, SCHEDULED_TIMESTAMP,
};
use crate::error::{StoreError, UpstreamError};

// Thin wrappers around the SDK clients, exposing only what we use.

pub struct AwsConnect {
    inner: aws_sdk_connect::Client,
}

pub struct AwsCampaigns {
    inner: aws_sdk_connectcampaigns::Client,
}

pub struct AwsCases {
    inner: aws_sdk_connectcases::Client,
}

pub struct AwsSns {
    inner: aws_sdk_sns::Client,
}

pub struct AwsDynamo {
    inner: aws_sdk_dynamodb::Client,
}

impl AwsConnect {
    pub fn new(inner: aws_sdk_connect::Client) -> Self {
        Self { inner }
    }
}

impl AwsCampaigns {
    pub fn new(inner: aws_sdk_connectcampaigns::Client) -> Self {
        Self { inner }
    }
}

impl AwsCases {
    pub fn new(inner: aws_sdk_connectcases::Client) -> Self {
        Self { inner }
    }
}

impl AwsSns {
    pub fn new(inner: aws_sdk_sns::Client) -> Self {
        Self { inner }
    }
}

impl AwsDynamo {
    pub fn new(inner: aws_sdk_dynamodb::Client) -> Self {
        Self { inner }
    }
}

/// The service error code if there is one, otherwise the kind of transport failure.
fn error_class<E, R>(err: &SdkError<E, R>) -> String
where
    E: ProvideErrorMetadata,
{
    if let Some(code) = err.code() {
        return code.to_owned();
    }

    match err {
        SdkError::ConstructionFailure(_) => "ConstructionFailure",
        SdkError::TimeoutError(_) => "TimeoutError",
        SdkError::DispatchFailure(_) => "DispatchFailure",
        SdkError::ResponseError(_) => "ResponseError",
        SdkError::ServiceError(_) => "ServiceError",
        _ => "Unknown",
    }
    .to_owned()
}

fn call_failed<E, R>(operation: &'static str, err: SdkError<E, R>) -> UpstreamError
where
    E: ProvideErrorMetadata + Error + 'static,
    R: Debug,
{
    UpstreamError::Call {
        operation,
        class: error_class(&err),
        message: DisplayErrorContext(&err).to_string(),
    }
}

fn store_failed<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + Error + 'static,
    R: Debug,
{
    StoreError {
        class: error_class(&err),
        message: DisplayErrorContext(&err).to_string(),
    }
}

fn to_iso8601(ts: &DateTime) -> Option<String> {
    chrono::DateTime::from_timestamp(ts.secs(), ts.subsec_nanos()).map(|dt| dt.to_rfc3339())
}

fn contact_record(contact_id: &str, contact: &Contact) -> ContactRecord {
    let mut timestamps = BTreeMap::new();
    let mut put = |name: &str, ts: Option<&DateTime>| {
        if let Some(iso) = ts.and_then(to_iso8601) {
            timestamps.insert(name.to_owned(), iso);
        }
    };

    put(INITIATION_TIMESTAMP, contact.initiation_timestamp());
    put(DISCONNECT_TIMESTAMP, contact.disconnect_timestamp());
    put(LAST_UPDATE_TIMESTAMP, contact.last_update_timestamp());
    put(LAST_PAUSED_TIMESTAMP, contact.last_paused_timestamp());
    put(LAST_RESUMED_TIMESTAMP, contact.last_resumed_timestamp());
    put(SCHEDULED_TIMESTAMP, contact.scheduled_timestamp());
    if let Some(queue) = contact.queue_info() {
        put(ENQUEUE_TIMESTAMP, queue.enqueue_timestamp());
    }
    if let Some(agent) = contact.agent_info() {
        put(CONNECTED_TO_AGENT_TIMESTAMP, agent.connected_to_agent_timestamp());
        put(
            AFTER_CONTACT_WORK_START_TIMESTAMP,
            agent.after_contact_work_start_timestamp(),
        );
        put(
            AFTER_CONTACT_WORK_END_TIMESTAMP,
            agent.after_contact_work_end_timestamp(),
        );
    }

    ContactRecord {
        id: contact.id().unwrap_or(contact_id).to_owned(),
        channel: contact.channel().map(|c| c.as_str().to_owned()),
        related_contact_id: contact.related_contact_id().map(str::to_owned),
        timestamps,
        agent_id: contact
            .agent_info()
            .and_then(|a| a.id())
            .map(str::to_owned),
        campaign_id: contact
            .campaign()
            .and_then(|c| c.campaign_id())
            .map(str::to_owned),
    }
}

#[async_trait]
impl ContactDirectory for AwsConnect {
    async fn describe_contact(
        &self,
        instance_id: &str,
        contact_id: &str,
    ) -> Result<ContactRecord, UpstreamError> {
        let output = self
            .inner
            .describe_contact()
            .instance_id(instance_id)
            .contact_id(contact_id)
            .send()
            .await
            .map_err(|e| call_failed("DescribeContact", e))?;

        let contact = output.contact().ok_or(UpstreamError::MissingData {
            operation: "DescribeContact",
            missing: "contact",
        })?;

        Ok(contact_record(contact_id, contact))
    }

    async fn describe_user(
        &self,
        instance_id: &str,
        user_id: &str,
    ) -> Result<UserRecord, UpstreamError> {
        let output = self
            .inner
            .describe_user()
            .instance_id(instance_id)
            .user_id(user_id)
            .send()
            .await
            .map_err(|e| call_failed("DescribeUser", e))?;

        let user = output.user().ok_or(UpstreamError::MissingData {
            operation: "DescribeUser",
            missing: "user",
        })?;
        let identity = user.identity_info();

        Ok(UserRecord {
            first_name: identity.and_then(|i| i.first_name()).map(str::to_owned),
            last_name: identity.and_then(|i| i.last_name()).map(str::to_owned),
            username: user.username().map(str::to_owned),
        })
    }

    async fn list_views(
        &self,
        instance_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<String>, UpstreamError> {
        let output = self
            .inner
            .list_views()
            .instance_id(instance_id)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| call_failed("ListViews", e))?;

        Ok(Page {
            items: output
                .views_summary_list()
                .iter()
                .filter_map(|v| v.arn())
                .map(str::to_owned)
                .collect(),
            next_token: output.next_token().map(str::to_owned),
        })
    }

    async fn describe_view(
        &self,
        instance_id: &str,
        view_id: &str,
    ) -> Result<ViewRecord, UpstreamError> {
        let output = self
            .inner
            .describe_view()
            .instance_id(instance_id)
            .view_id(view_id)
            .send()
            .await
            .map_err(|e| call_failed("DescribeView", e))?;

        let view = output.view().ok_or(UpstreamError::MissingData {
            operation: "DescribeView",
            missing: "view",
        })?;
        let template = view
            .content()
            .and_then(|c| c.template())
            .map(|t| Value::String(t.to_owned()))
            .unwrap_or(Value::Null);

        Ok(ViewRecord {
            name: view.name().map(str::to_owned),
            status: view.status().map(|s| s.as_str().to_owned()),
            description: view.description().map(str::to_owned),
            template,
        })
    }
}

#[async_trait]
impl CampaignDirectory for AwsCampaigns {
    async fn describe_campaign(&self, campaign_id: &str) -> Result<CampaignRecord, UpstreamError> {
        let output = self
            .inner
            .describe_campaign()
            .id(campaign_id)
            .send()
            .await
            .map_err(|e| call_failed("DescribeCampaign", e))?;

        let name = output.campaign().and_then(|campaign| {
            let name: Option<&str> = campaign.name().into();
            name.map(str::to_owned)
        });

        Ok(CampaignRecord { name })
    }
}

/// Re-tag an SDK field value into the wire form `TaggedValue::decode` understands.
fn tag_field_value(value: Option<&FieldValueUnion>) -> Value {
    let tagged = match value {
        Some(FieldValueUnion::StringValue(s)) => TaggedValue::String(s.clone()),
        Some(FieldValueUnion::DoubleValue(d)) => match Number::from_f64(*d) {
            Some(n) => TaggedValue::Number(n),
            None => TaggedValue::Unknown(Value::String(d.to_string())),
        },
        Some(FieldValueUnion::BooleanValue(b)) => TaggedValue::Boolean(*b),
        Some(FieldValueUnion::UserArnValue(arn)) => TaggedValue::Identity(arn.clone()),
        Some(FieldValueUnion::EmptyValue(_)) => TaggedValue::Empty,
        Some(other) => TaggedValue::Unknown(Value::String(format!("{:?}", other))),
        None => TaggedValue::Unknown(Value::Null),
    };

    tagged.to_tagged()
}

#[async_trait]
impl CaseStore for AwsCases {
    async fn list_fields(
        &self,
        domain_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<FieldSummary>, UpstreamError> {
        let output = self
            .inner
            .list_fields()
            .domain_id(domain_id)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| call_failed("ListFields", e))?;

        let items = output
            .fields()
            .iter()
            .filter_map(|field| {
                let field_id: Option<&str> = field.field_id().into();
                let name: Option<&str> = field.name().into();
                Some(FieldSummary {
                    field_id: field_id?.to_owned(),
                    name: name?.to_owned(),
                })
            })
            .collect();

        Ok(Page {
            items,
            next_token: output.next_token().map(str::to_owned),
        })
    }

    async fn get_case(
        &self,
        domain_id: &str,
        case_id: &str,
        field_ids: &[String],
    ) -> Result<Vec<CaseField>, UpstreamError> {
        let identifiers = field_ids
            .iter()
            .map(|id| {
                FieldIdentifier::builder()
                    .id(id)
                    .build()
                    .map_err(|e| UpstreamError::Call {
                        operation: "GetCase",
                        class: "BuildError".to_owned(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut fields = Vec::new();
        let mut next_token = None;
        loop {
            let output = self
                .inner
                .get_case()
                .domain_id(domain_id)
                .case_id(case_id)
                .set_fields(Some(identifiers.clone()))
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| call_failed("GetCase", e))?;

            for field in output.fields() {
                let id: Option<&str> = field.id().into();
                let value: Option<&FieldValueUnion> = field.value().into();
                if let Some(id) = id {
                    fields.push(CaseField {
                        id: id.to_owned(),
                        value: tag_field_value(value),
                    });
                }
            }

            let token: Option<&str> = output.next_token().into();
            match token {
                Some(token) if !token.is_empty() => next_token = Some(token.to_owned()),
                _ => break,
            }
        }

        Ok(fields)
    }
}

#[async_trait]
impl Notifier for AwsSns {
    async fn publish(
        &self,
        topic_arn: &str,
        subject: &str,
        message: &str,
    ) -> Result<Option<String>, UpstreamError> {
        let output = self
            .inner
            .publish()
            .topic_arn(topic_arn)
            .subject(subject)
            .message(message)
            .send()
            .await
            .map_err(|e| call_failed("Publish", e))?;

        Ok(output.message_id().map(str::to_owned))
    }
}

fn to_attribute_value(value: Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s),
        Value::Array(items) => AttributeValue::L(items.into_iter().map(to_attribute_value).collect()),
        Value::Object(map) => AttributeValue::M(
            map.into_iter()
                .map(|(k, v)| (k, to_attribute_value(v)))
                .collect(),
        ),
    }
}

fn from_attribute_value(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => parse_number(n),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::L(items) => Value::Array(items.iter().map(from_attribute_value).collect()),
        AttributeValue::M(map) => Value::Object(from_item(map)),
        AttributeValue::Ss(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
        AttributeValue::Ns(items) => Value::Array(items.iter().map(|n| parse_number(n)).collect()),
        // Binary values never appear in the tables we read
        _ => Value::Null,
    }
}

fn parse_number(n: &str) -> Value {
    if let Ok(i) = n.parse::<i64>() {
        return Value::Number(i.into());
    }
    n.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(n.to_owned()))
}

fn from_item(item: &HashMap<String, AttributeValue>) -> Map<String, Value> {
    item.iter()
        .map(|(k, v)| (k.clone(), from_attribute_value(v)))
        .collect()
}

#[async_trait]
impl RecordStore for AwsDynamo {
    async fn upsert(&self, table: &str, key: &RecordKey, item: Item) -> Result<(), StoreError> {
        let mut attributes: HashMap<String, AttributeValue> = item
            .into_iter()
            .map(|(k, v)| (k, to_attribute_value(v)))
            .collect();
        // The key always wins over whatever the item carried under the same names
        for (attr, value) in std::iter::once(&key.partition).chain(key.sort.as_ref()) {
            attributes.insert(attr.clone(), AttributeValue::S(value.clone()));
        }

        self.inner
            .put_item()
            .table_name(table)
            .set_item(Some(attributes))
            .send()
            .await
            .map_err(store_failed)?;

        Ok(())
    }

    async fn query_first(
        &self,
        table: &str,
        key_attr: &str,
        key_value: &str,
    ) -> Result<Option<Item>, StoreError> {
        let output = self
            .inner
            .query()
            .table_name(table)
            .key_condition_expression("#k = :v")
            .expression_attribute_names("#k", key_attr)
            .expression_attribute_values(":v", AttributeValue::S(key_value.to_owned()))
            .limit(1)
            .send()
            .await
            .map_err(store_failed)?;

        Ok(output.items().first().map(from_item))
    }
}
