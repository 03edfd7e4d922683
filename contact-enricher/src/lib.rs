use std::sync::Arc;

use app_context::AppContext;
use contact_common::document::get_str;
use error::{EventError, HandlerError, UnhandledError};
use handlers::{classify, contact, contact_path, view_catalog, view_result, Invocation};
use metric_consts::{EVENTS_RECEIVED, EVENTS_REJECTED};
use serde_json::Value;
use tracing::{error, info};

pub use handlers::HandlerResponse;

pub mod app_context;
pub mod config;
pub mod error;
pub mod field_names;
pub mod handlers;
pub mod lineage;
pub mod metric_consts;
pub mod notify;
pub mod test_utils;
pub mod upstream;
pub mod writer;

/// Route one event to its handler. Problems with the event itself come back as an error
/// response; anything else is returned as `Err` for the caller to deal with.
pub async fn handle_event(
    context: Arc<AppContext>,
    event: Value,
) -> Result<HandlerResponse, UnhandledError> {
    let invocation = classify(&event);
    let contact_id = get_str(&event, &contact_path("ContactId"));
    info!(
        invocation = invocation.label(),
        contact_id = contact_id.unwrap_or("unknown"),
        "handling event"
    );
    metrics::counter!(EVENTS_RECEIVED, "shape" => invocation.label()).increment(1);

    let result = match &invocation {
        Invocation::Task => contact::handle_task(&context, &event).await,
        Invocation::Chat => contact::handle_chat(&context, &event).await,
        Invocation::ViewResult => view_result::handle(&context, &event).await,
        Invocation::ViewCatalogSync {
            instance_id,
            view_arns,
        } => view_catalog::handle(&context, instance_id.as_deref(), view_arns).await,
        Invocation::Unsupported(channel) => {
            Err(EventError::UnsupportedChannel(channel.clone()).into())
        }
    };

    match result {
        Ok(response) => Ok(response),
        Err(HandlerError::Event(e)) => {
            error!(invocation = invocation.label(), "rejected event: {}", e);
            metrics::counter!(EVENTS_REJECTED, "shape" => invocation.label()).increment(1);
            Ok(HandlerResponse::error(contact_id, e))
        }
        Err(HandlerError::Unhandled(e)) => {
            error!(invocation = invocation.label(), "failed to handle event: {}", e);
            Err(e)
        }
    }
}
