//! Streaming resource specifications and provisioning.
//!
//! A resource spec either identifies an existing PushTopic/StreamingChannel
//! record (by `Id` or `Name`) or carries a full definition to be created at
//! startup. Resources marked non-durable are deleted again on clean
//! shutdown.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use forcebridge_common::{BridgeError, BridgeResult};

use crate::rest::RestApi;

/// PushTopic field-level limits follow the Salesforce object reference.
const PUSH_TOPIC_FIELDS: &[&str] = &[
    "Id",
    "Name",
    "ApiVersion",
    "IsActive",
    "NotifyForFields",
    "Description",
    "NotifyForOperationCreate",
    "NotifyForOperationUpdate",
    "NotifyForOperationDelete",
    "NotifyForOperationUndelete",
    "NotifyForOperations",
    "Query",
];
const STREAMING_CHANNEL_FIELDS: &[&str] = &["Id", "Name", "Description"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamingResourceKind {
    PushTopic,
    StreamingChannel,
}

impl StreamingResourceKind {
    /// The sobject name used on the REST API.
    pub fn sobject_name(&self) -> &'static str {
        match self {
            StreamingResourceKind::PushTopic => "PushTopic",
            StreamingResourceKind::StreamingChannel => "StreamingChannel",
        }
    }

    /// The Bayeux channel carrying the resource's events.
    pub fn channel_for(&self, name: &str) -> String {
        match self {
            StreamingResourceKind::PushTopic => format!("/topic/{name}"),
            StreamingResourceKind::StreamingChannel => name.to_string(),
        }
    }
}

/// A configured streaming resource, before provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    #[serde(rename = "type")]
    pub kind: StreamingResourceKind,
    pub spec: Map<String, Value>,
    #[serde(default = "default_durable")]
    pub durable: bool,
}

fn default_durable() -> bool {
    true
}

/// How a spec identifies its resource.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SpecShape {
    ById(String),
    ByName(String),
    Definition(String),
}

impl ResourceSpec {
    fn str_field(&self, field: &str) -> Option<&str> {
        self.spec.get(field).and_then(Value::as_str)
    }

    fn f64_field(&self, field: &str) -> Option<f64> {
        self.spec.get(field).and_then(Value::as_f64)
    }

    /// The `ApiVersion` the resource was declared with, if any.
    pub fn api_version(&self) -> Option<f64> {
        self.f64_field("ApiVersion")
    }

    fn shape(&self) -> BridgeResult<SpecShape> {
        if self.spec.len() == 1 {
            if let Some(id) = self.str_field("Id") {
                return Ok(SpecShape::ById(id.to_string()));
            }
            if let Some(name) = self.str_field("Name") {
                return Ok(SpecShape::ByName(name.to_string()));
            }
            return Err(BridgeError::Specification(
                "a single-field spec must identify the resource by 'Id' or 'Name'".into(),
            ));
        }
        match self.str_field("Name") {
            Some(name) => Ok(SpecShape::Definition(name.to_string())),
            None => Err(BridgeError::Specification(
                "a full resource definition requires a 'Name'".into(),
            )),
        }
    }

    /// Field-level validation, run before any network traffic.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.spec.is_empty() {
            return Err(BridgeError::Specification(
                "a resource spec must either identify an existing resource or define a new one"
                    .into(),
            ));
        }
        let known_fields = match self.kind {
            StreamingResourceKind::PushTopic => PUSH_TOPIC_FIELDS,
            StreamingResourceKind::StreamingChannel => STREAMING_CHANNEL_FIELDS,
        };
        for field in self.spec.keys() {
            if !known_fields.contains(&field.as_str()) {
                return Err(BridgeError::Specification(format!(
                    "unknown field {field:?} in {} spec",
                    self.kind.sobject_name()
                )));
            }
        }
        self.shape()?;
        match self.kind {
            StreamingResourceKind::PushTopic => self.validate_push_topic(),
            StreamingResourceKind::StreamingChannel => self.validate_streaming_channel(),
        }
    }

    fn validate_push_topic(&self) -> BridgeResult<()> {
        if let Some(name) = self.str_field("Name") {
            if name.is_empty() || name.len() > 25 {
                return Err(BridgeError::Specification(
                    "a PushTopic name must be 1-25 characters".into(),
                ));
            }
        }
        if matches!(self.shape()?, SpecShape::Definition(_)) {
            for required in ["Name", "ApiVersion", "Query"] {
                if !self.spec.contains_key(required) {
                    return Err(BridgeError::Specification(format!(
                        "a PushTopic definition requires {required:?}"
                    )));
                }
            }
        }
        if let Some(version) = self.api_version() {
            if !(20.0..=42.0).contains(&version) {
                return Err(BridgeError::Specification(format!(
                    "unsupported PushTopic ApiVersion {version}"
                )));
            }
            if version >= 29.0 && self.spec.contains_key("NotifyForOperations") {
                return Err(BridgeError::Specification(
                    "'NotifyForOperations' can only be specified for API version 28.0 and earlier"
                        .into(),
                ));
            }
            if version <= 28.0 {
                for field in [
                    "NotifyForOperationCreate",
                    "NotifyForOperationUpdate",
                    "NotifyForOperationDelete",
                    "NotifyForOperationUndelete",
                ] {
                    if self.spec.contains_key(field) {
                        return Err(BridgeError::Specification(format!(
                            "{field:?} can only be specified for API version 29.0 and later"
                        )));
                    }
                }
            }
        }
        if let Some(query) = self.str_field("Query") {
            if query.is_empty() || query.len() > 1300 {
                return Err(BridgeError::Specification(
                    "a PushTopic query must be 1-1300 characters".into(),
                ));
            }
        }
        if let Some(fields) = self.str_field("NotifyForFields") {
            if !["All", "Referenced", "Select", "Where"].contains(&fields) {
                return Err(BridgeError::Specification(format!(
                    "invalid NotifyForFields value {fields:?}"
                )));
            }
        }
        Ok(())
    }

    fn validate_streaming_channel(&self) -> BridgeResult<()> {
        if let Some(name) = self.str_field("Name") {
            if name.is_empty() || name.len() > 80 {
                return Err(BridgeError::Specification(
                    "a StreamingChannel name must be 1-80 characters".into(),
                ));
            }
            if !name.starts_with("/u/") {
                return Err(BridgeError::Specification(
                    "a StreamingChannel name must start with '/u/'".into(),
                ));
            }
        }
        Ok(())
    }
}

/// A provisioned streaming resource bound to a concrete sobject record.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingResource {
    pub kind: StreamingResourceKind,
    pub id: String,
    pub name: String,
    pub durable: bool,
    pub api_version: Option<f64>,
}

impl StreamingResource {
    pub fn channel(&self) -> String {
        self.kind.channel_for(&self.name)
    }
}

/// Resolves resource specs against an org: binds to existing records and
/// creates the ones that only exist as definitions.
pub struct StreamingResourceFactory {
    rest: Arc<dyn RestApi>,
}

impl StreamingResourceFactory {
    pub fn new(rest: Arc<dyn RestApi>) -> Self {
        Self { rest }
    }

    pub async fn provision(&self, spec: &ResourceSpec) -> BridgeResult<StreamingResource> {
        spec.validate()?;
        let sobject = spec.kind.sobject_name();
        let (id, name) = match spec.shape()? {
            SpecShape::ById(id) => {
                let record = self.rest.get_record(sobject, &id).await?;
                debug!(sobject = %sobject, id = %record.id, name = %record.name, "bound to existing resource by id");
                (record.id, record.name)
            }
            SpecShape::ByName(name) => match self.rest.find_record_by_name(sobject, &name).await? {
                Some(record) => {
                    debug!(sobject = %sobject, id = %record.id, name = %record.name, "bound to existing resource by name");
                    (record.id, record.name)
                }
                None => {
                    return Err(BridgeError::Specification(format!(
                        "no {sobject} named {name:?} exists and the spec is not a full definition"
                    )))
                }
            },
            SpecShape::Definition(name) => {
                match self.rest.find_record_by_name(sobject, &name).await? {
                    Some(record) => {
                        debug!(sobject = %sobject, id = %record.id, name = %record.name, "resource already exists, binding");
                        (record.id, record.name)
                    }
                    None => {
                        let body = Value::Object(spec.spec.clone());
                        let id = self.rest.create_record(sobject, &body).await?;
                        info!(sobject = %sobject, id = %id, name = %name, "created streaming resource");
                        (id, name)
                    }
                }
            }
        };
        Ok(StreamingResource {
            kind: spec.kind,
            id,
            name,
            durable: spec.durable,
            api_version: spec.api_version(),
        })
    }
}
