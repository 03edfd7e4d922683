use contact_common::document::{get_object, get_str};
use contact_common::tagged;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use url::Url;

use super::{contact_path, HandlerResponse};
use crate::app_context::AppContext;
use crate::error::{EventError, HandlerError, UnhandledError};
use crate::lineage::LineageRecord;
use crate::metric_consts::{CASE_FIELDS_DECODED, CASE_FIELD_DIAGNOSTICS};
use crate::notify::{send_summary, subject_for};
use crate::upstream::with_timeout;

/// Fields every case has. Configured custom fields are requested after these.
pub const DEFAULT_CASE_FIELD_IDS: [&str; 10] = [
    "status",
    "title",
    "assigned_queue",
    "assigned_user",
    "case_reason",
    "last_closed_datetime",
    "created_datetime",
    "last_updated_datetime",
    "reference_number",
    "summary",
];

/// The most field ids one GetCase call accepts.
pub const MAX_FIELDS_PER_REQUEST: usize = 220;

const NOT_SENT: &str = "not_sent";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactSummary {
    pub channel: String,
    pub contact_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    pub fields: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub field_names: Map<String, Value>,
    /// The stamped record built from this summary, once it has been through the writer.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub record: Map<String, Value>,
}

impl ContactSummary {
    /// Attributes describing the contact itself, beneath the fields in the record.
    fn record_context(&self) -> Map<String, Value> {
        let mut context = Map::new();
        context.insert("Channel".to_owned(), Value::String(self.channel.clone()));
        context.insert("ContactId".to_owned(), Value::String(self.contact_id.clone()));
        if let Some(case_id) = &self.case_id {
            context.insert("CaseId".to_owned(), Value::String(case_id.clone()));
        }
        if let Some(task_name) = self.task_name.as_deref().filter(|n| !n.is_empty()) {
            context.insert("TaskName".to_owned(), Value::String(task_name.to_owned()));
        }
        context
    }
}

/// Default field ids followed by `custom`, without repeats.
pub fn case_field_ids(custom: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::with_capacity(DEFAULT_CASE_FIELD_IDS.len() + custom.len());
    for id in DEFAULT_CASE_FIELD_IDS
        .iter()
        .copied()
        .chain(custom.iter().map(String::as_str))
    {
        if !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_owned());
        }
    }
    ids
}

/// The case id is the last segment of the task reference URL, e.g.
/// `https://example.my.connect.aws/cases/case-detail/CASE-1`.
pub fn extract_case_id(event: &Value) -> Option<String> {
    let reference = get_str(event, &[
        "Details",
        "ContactData",
        "References",
        "taskRef",
        "Value",
    ])?;
    let url = Url::parse(reference).ok()?;

    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_owned)
}

fn contact_id(event: &Value) -> String {
    get_str(event, &contact_path("ContactId"))
        .unwrap_or_default()
        .to_owned()
}

pub async fn process_task_event(
    context: &AppContext,
    event: &Value,
) -> Result<ContactSummary, HandlerError> {
    let domain_id = context
        .config
        .cases_domain_id()
        .ok_or(EventError::MissingDomainId)?;
    let contact_id = contact_id(event);
    let case_id =
        extract_case_id(event).ok_or_else(|| EventError::MissingCaseId(contact_id.clone()))?;
    let task_name = get_str(event, &contact_path("Name")).unwrap_or_default();

    let field_ids = case_field_ids(&context.config.custom_case_field_ids.0);
    info!(
        contact_id = %contact_id,
        case_id = %case_id,
        requested = field_ids.len(),
        "fetching case fields"
    );

    let timeout = context.timeout();
    let mut fields = Map::new();
    for chunk in field_ids.chunks(MAX_FIELDS_PER_REQUEST) {
        let fetched = with_timeout(
            "GetCase",
            timeout,
            context.cases.get_case(domain_id, &case_id, chunk),
        )
        .await
        .map_err(|e| {
            error!(case_id = %case_id, class = e.class(), "failed to fetch case: {}", e);
            e
        })?;

        for field in fetched {
            let (value, diagnostic) = tagged::decode(&field.value);
            if let Some(diagnostic) = diagnostic {
                warn!(field_id = %field.id, %diagnostic, "could not cleanly decode case field");
                metrics::counter!(CASE_FIELD_DIAGNOSTICS).increment(1);
            }
            fields.insert(field.id, value);
        }
    }
    metrics::counter!(CASE_FIELDS_DECODED).increment(fields.len() as u64);

    let returned: Vec<String> = fields.keys().cloned().collect();
    let field_names = context
        .field_names
        .display_names(context.cases.as_ref(), domain_id, &returned, timeout)
        .await;

    Ok(ContactSummary {
        channel: "TASK".to_owned(),
        contact_id,
        case_id: Some(case_id),
        task_name: Some(task_name.to_owned()),
        fields,
        field_names,
        record: Map::new(),
    })
}

pub fn process_chat_event(event: &Value) -> ContactSummary {
    ContactSummary {
        channel: "CHAT".to_owned(),
        contact_id: contact_id(event),
        case_id: None,
        task_name: None,
        fields: get_object(event, &contact_path("Attributes"))
            .cloned()
            .unwrap_or_default(),
        field_names: Map::new(),
        record: Map::new(),
    }
}

pub async fn handle_task(
    context: &AppContext,
    event: &Value,
) -> Result<HandlerResponse, HandlerError> {
    let summary = process_task_event(context, event).await?;
    respond(context, summary, "case_").await
}

pub async fn handle_chat(
    context: &AppContext,
    event: &Value,
) -> Result<HandlerResponse, HandlerError> {
    let summary = process_chat_event(event);
    respond(context, summary, "chat_").await
}

/// Stamp and store the summary's record, then publish the summary with it.
async fn respond(
    context: &AppContext,
    mut summary: ContactSummary,
    prefix: &str,
) -> Result<HandlerResponse, HandlerError> {
    let written = context
        .writer()
        .write(
            Some(summary.contact_id.as_str()),
            &summary.fields,
            &summary.record_context(),
            &LineageRecord::default(),
            None,
        )
        .await;
    let outcome = serde_json::to_value(&written.outcome).map_err(UnhandledError::from)?;
    if let Some(record) = written.record {
        summary.record = record.item;
    }

    let message_id = send_summary(
        context.notifier.as_ref(),
        context.config.sns_topic_arn(),
        &subject_for(&summary.channel, &summary.contact_id),
        &summary,
        context.timeout(),
    )
    .await;

    let mut response = HandlerResponse::success(Some(&summary.channel), Some(&summary.contact_id))
        .with(
            "sns_message_id",
            message_id.unwrap_or_else(|| NOT_SENT.to_owned()),
        );
    if let Some(case_id) = &summary.case_id {
        response = response.with("case_id", case_id.as_str());
    }
    if let Some(task_name) = &summary.task_name {
        response = response.with("task_name", task_name.as_str());
    }

    Ok(response
        .with_flattened(prefix, &summary.fields)
        .with("write_outcome", outcome)
        .with("record", Value::Object(summary.record)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn task_event(reference: &str) -> Value {
        json!({
            "Details": {
                "ContactData": {
                    "Channel": "TASK",
                    "ContactId": "c1",
                    "References": {"taskRef": {"Type": "URL", "Value": reference}}
                }
            }
        })
    }

    #[test]
    fn test_extract_case_id() {
        let url = "https://example.my.connect.aws/cases/case-detail/CASE-1";

        assert_eq!(extract_case_id(&task_event(url)).as_deref(), Some("CASE-1"));
        assert_eq!(
            extract_case_id(&task_event(&format!("{}/", url))).as_deref(),
            Some("CASE-1")
        );
        assert_eq!(
            extract_case_id(&task_event(&format!("{}?tab=fields", url))).as_deref(),
            Some("CASE-1")
        );
        assert_eq!(extract_case_id(&task_event("https://example.com/")), None);
        assert_eq!(extract_case_id(&task_event("not a url")), None);
        assert_eq!(extract_case_id(&task_event("")), None);
        assert_eq!(extract_case_id(&json!({})), None);
    }

    #[test]
    fn test_case_field_ids_put_defaults_first_without_repeats() {
        let custom = vec!["custom_a".to_owned(), "status".to_owned(), "custom_a".to_owned()];

        let ids = case_field_ids(&custom);

        assert_eq!(ids.len(), DEFAULT_CASE_FIELD_IDS.len() + 1);
        assert_eq!(ids[0], "status");
        assert_eq!(ids.last().map(String::as_str), Some("custom_a"));
    }

    #[test]
    fn test_chat_summary_uses_attributes() {
        let event = json!({
            "Details": {
                "ContactData": {
                    "Channel": "CHAT",
                    "ContactId": "c2",
                    "Attributes": {"language": "en", "vip": "true"}
                }
            }
        });

        let summary = process_chat_event(&event);

        assert_eq!(summary.contact_id, "c2");
        assert_eq!(Value::Object(summary.fields), json!({"language": "en", "vip": "true"}));
    }
}
