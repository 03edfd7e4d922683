use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::metric_consts::NOTIFICATIONS;
use crate::upstream::{with_timeout, Notifier};

/// Longest subject the topic accepts.
pub const MAX_SUBJECT_CHARS: usize = 100;

const ELLIPSIS: &str = "...";

pub fn subject_for(channel: &str, contact_id: &str) -> String {
    truncate_subject(&format!("Amazon Connect {} - Contact {}", channel, contact_id))
}

/// Cut subjects that are too long, keeping room for an ellipsis. Counts characters, so
/// multi-byte text is never split.
pub fn truncate_subject(subject: &str) -> String {
    if subject.chars().count() <= MAX_SUBJECT_CHARS {
        return subject.to_owned();
    }

    let kept: String = subject
        .chars()
        .take(MAX_SUBJECT_CHARS - ELLIPSIS.len())
        .collect();
    kept + ELLIPSIS
}

/// Publish `summary` as pretty-printed JSON. Returns the message id, or `None` if there
/// is no topic configured or publishing failed. Never fails the caller.
pub async fn send_summary<T: Serialize>(
    notifier: &dyn Notifier,
    topic_arn: Option<&str>,
    subject: &str,
    summary: &T,
    timeout: Duration,
) -> Option<String> {
    let Some(topic_arn) = topic_arn else {
        warn!("SNS_TOPIC_ARN not set, skipping notification");
        metrics::counter!(NOTIFICATIONS, "outcome" => "not_configured").increment(1);
        return None;
    };

    let message = match serde_json::to_string_pretty(summary) {
        Ok(message) => message,
        Err(e) => {
            error!("could not serialize notification: {}", e);
            metrics::counter!(NOTIFICATIONS, "outcome" => "failed").increment(1);
            return None;
        }
    };

    match with_timeout(
        "Publish",
        timeout,
        notifier.publish(topic_arn, subject, &message),
    )
    .await
    {
        Ok(message_id) => {
            info!(message_id = message_id.as_deref().unwrap_or(""), "notification sent");
            metrics::counter!(NOTIFICATIONS, "outcome" => "sent").increment(1);
            message_id
        }
        Err(e) => {
            error!(class = e.class(), "failed to send notification: {}", e);
            metrics::counter!(NOTIFICATIONS, "outcome" => "failed").increment(1);
            None
        }
    }
}
