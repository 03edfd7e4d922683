use chrono::Utc;
use contact_common::labels::extract_label_pairs;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use super::HandlerResponse;
use crate::app_context::AppContext;
use crate::error::{EventError, HandlerError, UpstreamError};
use crate::metric_consts::{CATALOG_ITEMS_WRITTEN, VIEWS_SYNCED, VIEW_SYNC_ERRORS};
use crate::upstream::{with_timeout, Item, RecordKey, ViewRecord};
use crate::writer::{display_timestamp, CREATED_AT_ATTR};

#[derive(Debug, Error)]
pub enum ViewSyncError {
    #[error("could not find an instance and view id in {0}")]
    InvalidArn(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("view template is not valid JSON: {0}")]
    Template(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewArn<'a> {
    pub instance_id: &'a str,
    pub view_id: &'a str,
}

/// Split `arn:aws:connect:{region}:{account}:instance/{instance_id}/view/{view_id}`.
/// Either id may come back empty.
pub fn parse_view_arn(arn: &str) -> ViewArn<'_> {
    let mut parts = arn.split('/');
    let instance_id = parts.nth(1).unwrap_or_default();
    let view_id = parts.nth(1).unwrap_or_default();

    ViewArn {
        instance_id,
        view_id,
    }
}

/// Parse a view template. Templates usually arrive as JSON text; a missing template
/// has no questions.
pub fn parse_template(template: &Value) -> Result<Value, serde_json::Error> {
    match template {
        Value::String(text) => serde_json::from_str(text),
        Value::Null => Ok(Value::Object(Map::new())),
        structured => Ok(structured.clone()),
    }
}

pub async fn list_view_arns(
    context: &AppContext,
    instance_id: &str,
) -> Result<Vec<String>, UpstreamError> {
    let mut arns = Vec::new();
    let mut next_token = None;
    loop {
        let page = with_timeout(
            "ListViews",
            context.timeout(),
            context.contacts.list_views(instance_id, next_token),
        )
        .await?;
        arns.extend(page.items);

        match page.next_token {
            Some(token) if !token.is_empty() => next_token = Some(token),
            _ => break,
        }
    }

    Ok(arns)
}

/// Record the questions of every view in the catalog. Views that fail are counted and
/// skipped; only failing to discover views at all fails the invocation.
pub async fn handle(
    context: &AppContext,
    instance_id: Option<&str>,
    view_arns: &[String],
) -> Result<HandlerResponse, HandlerError> {
    let discovered;
    let view_arns = match (view_arns.is_empty(), instance_id) {
        (false, _) => view_arns,
        (true, Some(instance_id)) => {
            info!(instance_id, "no views given, discovering");
            discovered = list_view_arns(context, instance_id).await?;
            info!(instance_id, views = discovered.len(), "discovered views");
            &discovered
        }
        (true, None) => return Err(EventError::MissingInstanceId.into()),
    };

    if view_arns.is_empty() {
        warn!("no views given or discovered");
    }

    let (mut processed, mut errors) = (0u64, 0u64);
    for arn in view_arns {
        match sync_view(context, arn, instance_id).await {
            Ok(pairs) => {
                processed += 1;
                info!(view_arn = %arn, pairs, "view synced");
            }
            Err(e) => {
                errors += 1;
                error!(view_arn = %arn, "view sync failed: {}", e);
            }
        }
    }
    metrics::counter!(VIEWS_SYNCED).increment(processed);
    metrics::counter!(VIEW_SYNC_ERRORS).increment(errors);
    info!(processed, errors, "view sync complete");

    Ok(HandlerResponse::success(None, None)
        .with("processed", processed)
        .with("errors", errors))
}

async fn sync_view(
    context: &AppContext,
    arn: &str,
    instance_override: Option<&str>,
) -> Result<usize, ViewSyncError> {
    let parsed = parse_view_arn(arn);
    let instance_id = instance_override.unwrap_or(parsed.instance_id);
    if instance_id.is_empty() || parsed.view_id.is_empty() {
        return Err(ViewSyncError::InvalidArn(arn.to_owned()));
    }

    let view = with_timeout(
        "DescribeView",
        context.timeout(),
        context.contacts.describe_view(instance_id, parsed.view_id),
    )
    .await?;
    let template = parse_template(&view.template)?;
    let created_at = display_timestamp(
        Utc::now(),
        context.config.display_offset(),
        &context.config.tz_label,
    );

    let Some(table) = context.config.view_questions_table() else {
        warn!(view_id = parsed.view_id, "catalog table not configured, not writing");
        return Ok(extract_label_pairs(&template).count());
    };

    let config = &context.config;
    let mut pairs = 0;
    for pair in extract_label_pairs(&template) {
        pairs += 1;
        let label = config.view_label_overrides.apply(&pair.name, &pair.label);
        let key = RecordKey::composite(
            &config.view_questions_pk_name,
            &pair.name,
            &config.view_questions_sk_name,
            label,
        );
        let item = catalog_item(&key, parsed.view_id, arn, &created_at, &view);

        // A failed write loses one question, not the view
        let upsert = context.store.upsert(table, &key, item);
        match with_timeout("PutItem", context.timeout(), upsert).await {
            Ok(()) => metrics::counter!(CATALOG_ITEMS_WRITTEN).increment(1),
            Err(e) => error!(name = %pair.name, class = %e.class, "catalog write failed: {}", e),
        }
    }

    Ok(pairs)
}

fn catalog_item(
    key: &RecordKey,
    view_id: &str,
    view_arn: &str,
    created_at: &str,
    view: &ViewRecord,
) -> Item {
    let mut item = Item::new();
    for (attr, value) in std::iter::once(&key.partition).chain(key.sort.as_ref()) {
        item.insert(attr.clone(), Value::String(value.clone()));
    }
    item.insert("ViewId".to_owned(), Value::String(view_id.to_owned()));
    item.insert("ViewArn".to_owned(), Value::String(view_arn.to_owned()));
    item.insert(CREATED_AT_ATTR.to_owned(), Value::String(created_at.to_owned()));

    let optional = [
        ("ViewName", &view.name),
        ("ViewStatus", &view.status),
        ("ViewDescription", &view.description),
    ];
    for (attr, value) in optional {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            item.insert(attr.to_owned(), Value::String(value.to_owned()));
        }
    }

    item
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_view_arn() {
        assert_eq!(
            parse_view_arn("arn:aws:connect:us-east-1:123456789012:instance/inst-1/view/view-1"),
            ViewArn {
                instance_id: "inst-1",
                view_id: "view-1"
            }
        );
        assert_eq!(
            parse_view_arn("arn:aws:connect:us-east-1:123456789012:instance/inst-1"),
            ViewArn {
                instance_id: "inst-1",
                view_id: ""
            }
        );
        assert_eq!(
            parse_view_arn("garbage"),
            ViewArn {
                instance_id: "",
                view_id: ""
            }
        );
    }

    #[test]
    fn test_parse_template() {
        assert_eq!(
            parse_template(&json!("{\"Name\": \"q\"}")).unwrap(),
            json!({"Name": "q"})
        );
        assert_eq!(parse_template(&json!({"Name": "q"})).unwrap(), json!({"Name": "q"}));
        assert_eq!(parse_template(&Value::Null).unwrap(), json!({}));
        assert!(parse_template(&json!("{not json")).is_err());
    }

    #[test]
    fn test_catalog_item_leaves_out_empty_view_details() {
        let view = ViewRecord {
            name: Some("Survey".to_owned()),
            status: Some("PUBLISHED".to_owned()),
            description: Some(String::new()),
            template: Value::Null,
        };
        let key = RecordKey::composite("Name", "REDE_Q2", "Label", "Transferred?");

        let item = catalog_item(&key, "view-1", "arn:view", "now", &view);

        assert_eq!(
            Value::Object(item),
            json!({
                "Name": "REDE_Q2",
                "Label": "Transferred?",
                "ViewId": "view-1",
                "ViewArn": "arn:view",
                "CreatedAt": "now",
                "ViewName": "Survey",
                "ViewStatus": "PUBLISHED"
            })
        );
    }
}
