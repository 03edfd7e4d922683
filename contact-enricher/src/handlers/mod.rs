use contact_common::document::{get_object, get_path, get_str, render};
use serde::Serialize;
use serde_json::{Map, Value};

pub mod contact;
pub mod view_catalog;
pub mod view_result;

pub const CONTACT_DATA: [&str; 2] = ["Details", "ContactData"];

pub fn contact_path<'a>(field: &'a str) -> [&'a str; 3] {
    [CONTACT_DATA[0], CONTACT_DATA[1], field]
}

/// What kind of event we were handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Discover views and record their questions in the catalog.
    ViewCatalogSync {
        instance_id: Option<String>,
        view_arns: Vec<String>,
    },
    ViewResult,
    Task,
    Chat,
    Unsupported(String),
}

impl Invocation {
    pub fn label(&self) -> &'static str {
        match self {
            Invocation::ViewCatalogSync { .. } => "view_catalog_sync",
            Invocation::ViewResult => "view_result",
            Invocation::Task => "task",
            Invocation::Chat => "chat",
            Invocation::Unsupported(_) => "unsupported",
        }
    }
}

pub fn classify(event: &Value) -> Invocation {
    let view_arns = get_path(event, &["ViewArns"]);
    let instance_id = get_str(event, &["InstanceId"]);
    if get_path(event, &["Details"]).is_none() && (view_arns.is_some() || instance_id.is_some()) {
        return Invocation::ViewCatalogSync {
            instance_id: instance_id.map(str::to_owned),
            view_arns: view_arns
                .and_then(Value::as_array)
                .map(|arns| {
                    arns.iter()
                        .filter_map(Value::as_str)
                        .filter(|arn| !arn.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
        };
    }

    if get_object(event, &["Details", "Parameters", "viewResultData"]).is_some() {
        return Invocation::ViewResult;
    }

    match get_str(event, &contact_path("Channel")) {
        Some("TASK") => Invocation::Task,
        Some("CHAT") => Invocation::Chat,
        other => Invocation::Unsupported(other.unwrap_or_default().to_owned()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// What the entry point hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerResponse {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl HandlerResponse {
    pub fn success(channel: Option<&str>, contact_id: Option<&str>) -> Self {
        Self {
            status: Status::Success,
            channel: channel.map(str::to_owned),
            contact_id: contact_id.map(str::to_owned),
            error: None,
            attributes: Map::new(),
        }
    }

    pub fn error(contact_id: Option<&str>, error: impl ToString) -> Self {
        Self {
            status: Status::Error,
            channel: None,
            contact_id: contact_id.map(str::to_owned),
            error: Some(error.to_string()),
            attributes: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_owned(), value.into());
        self
    }

    /// Add every field as a string attribute named `<prefix><key>`, with nulls as "".
    pub fn with_flattened(mut self, prefix: &str, fields: &Map<String, Value>) -> Self {
        for (key, value) in fields {
            let rendered = match value {
                Value::Null => String::new(),
                other => render(other),
            };
            self.attributes
                .insert(format!("{}{}", prefix, key), Value::String(rendered));
        }
        self
    }
}
