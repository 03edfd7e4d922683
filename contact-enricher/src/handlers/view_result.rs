use contact_common::document::{get_object, get_path, get_str};
use contact_common::multiselect::normalize_answers;
use serde_json::{Map, Value};
use tracing::info;

use super::{contact_path, HandlerResponse, CONTACT_DATA};
use crate::app_context::AppContext;
use crate::error::{HandlerError, UnhandledError};
use crate::lineage::{LineageRecord, LineageResolver};
use crate::metric_consts::ANSWER_KEY_ERRORS;
use crate::writer::{LabelLookup, ACTION_KEY};

/// Contact attributes copied onto the record, as `(attribute, path under ContactData)`.
const CONTACT_METADATA: [(&str, &[&str]); 9] = [
    ("ContactId", &["ContactId"]),
    ("PreviousContactId", &["PreviousContactId"]),
    ("RelatedContactId", &["RelatedContactId"]),
    ("CustomerEndpointAddress", &["CustomerEndpoint", "Address"]),
    ("SystemEndpointAddress", &["SystemEndpoint", "Address"]),
    ("InitiationMethod", &["InitiationMethod"]),
    ("Channel", &["Channel"]),
    ("QueueName", &["Queue", "Name"]),
    ("OutboundCallerId", &["Queue", "OutboundCallerId"]),
];

pub fn contact_metadata(event: &Value) -> Map<String, Value> {
    let Some(contact_data) = get_path(event, &CONTACT_DATA) else {
        return Map::new();
    };

    CONTACT_METADATA
        .iter()
        .filter_map(|(attribute, path)| {
            let value = get_str(contact_data, path)?;
            Some(((*attribute).to_owned(), Value::String(value.to_owned())))
        })
        .collect()
}

/// The instance id is the last segment of an instance ARN,
/// `arn:aws:connect:us-east-1:123456789012:instance/{id}`.
pub fn instance_id_from_arn(arn: &str) -> Option<&str> {
    arn.rsplit('/').next().filter(|id| !id.is_empty() && *id != arn)
}

/// Normalize the answers of a submitted view and persist them, with the contact's
/// lineage and the answers' labels, against the contact the chain started from.
pub async fn handle(context: &AppContext, event: &Value) -> Result<HandlerResponse, HandlerError> {
    let answers = get_object(event, &["Details", "Parameters", "viewResultData"])
        .cloned()
        .unwrap_or_default();
    let action = get_str(event, &["Details", "Parameters", ACTION_KEY]);
    info!(
        answers = answers.len(),
        has_action = action.is_some(),
        "normalizing view result"
    );

    let mut normalized = normalize_answers(&answers);
    if normalized.key_errors > 0 {
        metrics::counter!(ANSWER_KEY_ERRORS).increment(normalized.key_errors as u64);
    }
    if let Some(action) = action {
        normalized
            .fields
            .insert(ACTION_KEY.to_owned(), Value::String(action.to_owned()));
    }

    let primary_key = get_str(event, &contact_path("InitialContactId"));
    let contact_id = get_str(event, &contact_path("ContactId"));
    let lineage = match primary_key {
        Some(primary_key) => {
            resolve_lineage(context, event, contact_id.unwrap_or(primary_key)).await
        }
        None => LineageRecord::default(),
    };

    let labels = context.label_lookup();
    let writer = context.writer();
    let result = writer
        .write(
            primary_key,
            &normalized.fields,
            &contact_metadata(event),
            &lineage,
            labels.as_ref().map(|l| -> &dyn LabelLookup { l }),
        )
        .await;

    let outcome = serde_json::to_value(&result.outcome).map_err(UnhandledError::from)?;
    let mut response =
        HandlerResponse::success(get_str(event, &contact_path("Channel")), contact_id);
    response.attributes = normalized.fields;

    Ok(response.with("write_outcome", outcome))
}

async fn resolve_lineage(context: &AppContext, event: &Value, start_id: &str) -> LineageRecord {
    let instance_id = get_str(event, &contact_path("InstanceARN")).and_then(instance_id_from_arn);
    let related_id = get_str(event, &contact_path("RelatedContactId"));

    match (instance_id, related_id) {
        (Some(instance_id), Some(related_id)) => {
            LineageResolver::new(
                context.contacts.as_ref(),
                context.campaigns.as_ref(),
                context.timeout(),
            )
            .resolve(instance_id, start_id, Some(related_id))
            .await
        }
        _ => LineageRecord::default(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_contact_metadata_copies_present_values() {
        let event = json!({
            "Details": {
                "ContactData": {
                    "ContactId": "c1",
                    "PreviousContactId": "",
                    "Channel": "TASK",
                    "CustomerEndpoint": {"Address": "+15555550100", "Type": "TELEPHONE_NUMBER"},
                    "SystemEndpoint": null,
                    "Queue": {"Name": "Support", "OutboundCallerId": null}
                }
            }
        });

        assert_eq!(
            Value::Object(contact_metadata(&event)),
            json!({
                "ContactId": "c1",
                "Channel": "TASK",
                "CustomerEndpointAddress": "+15555550100",
                "QueueName": "Support"
            })
        );
    }

    #[test]
    fn test_instance_id_from_arn() {
        assert_eq!(
            instance_id_from_arn("arn:aws:connect:us-east-1:123456789012:instance/abc-123"),
            Some("abc-123")
        );
        assert_eq!(instance_id_from_arn("arn:aws:connect:us-east-1:1:instance/"), None);
        assert_eq!(instance_id_from_arn("no-slashes"), None);
    }
}
