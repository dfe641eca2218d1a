//! Salesforce REST API client used for streaming resource provisioning.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use forcebridge_common::{BridgeError, BridgeResult};

use crate::auth::Authenticator;

/// REST API version used for sobject CRUD.
pub const DEFAULT_API_VERSION: &str = "42.0";

/// The fields of an sobject record the provisioner cares about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SobjectRecord {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
}

/// The subset of the Salesforce REST API the provisioner consumes.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RestApi: Send + Sync {
    /// `POST /sobjects/{sobject}`; returns the new record's id.
    async fn create_record(&self, sobject: &str, body: &Value) -> BridgeResult<String>;

    /// `GET /sobjects/{sobject}/{id}`.
    async fn get_record(&self, sobject: &str, id: &str) -> BridgeResult<SobjectRecord>;

    /// SOQL lookup by `Name`; `None` when no record matches.
    async fn find_record_by_name(
        &self,
        sobject: &str,
        name: &str,
    ) -> BridgeResult<Option<SobjectRecord>>;

    /// `DELETE /sobjects/{sobject}/{id}`.
    async fn delete_record(&self, sobject: &str, id: &str) -> BridgeResult<()>;
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    records: Vec<SobjectRecord>,
}

/// REST client backed by `reqwest`, sharing the org's authenticator with
/// the Bayeux transport. A 401 triggers one token refresh and one retry;
/// a second 401 is an authentication failure.
pub struct HttpRestClient {
    auth: Arc<dyn Authenticator>,
    http: reqwest::Client,
    api_version: String,
}

impl HttpRestClient {
    pub fn new(auth: Arc<dyn Authenticator>) -> Self {
        Self::with_api_version(auth, DEFAULT_API_VERSION)
    }

    pub fn with_api_version(auth: Arc<dyn Authenticator>, api_version: impl Into<String>) -> Self {
        Self {
            auth,
            http: reqwest::Client::new(),
            api_version: api_version.into(),
        }
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        query: Option<&[(&str, &str)]>,
        body: Option<&Value>,
    ) -> BridgeResult<reqwest::Response> {
        let mut snapshot = self.auth.snapshot().await?;
        for attempt in 0..2 {
            let url = format!(
                "{}/services/data/v{}/{}",
                snapshot.instance_url, self.api_version, path
            );
            let mut request = self
                .http
                .request(method.clone(), &url)
                .header(reqwest::header::AUTHORIZATION, &snapshot.authorization);
            if let Some(query) = query {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await.map_err(|e| {
                BridgeError::SourceTransient(format!("Salesforce request to {path:?} failed: {e}"))
            })?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED && attempt == 0 {
                debug!(path = %path, "access token rejected, refreshing");
                snapshot = self.auth.refresh().await?;
                continue;
            }
            return Self::verify_response(response).await;
        }
        Err(BridgeError::Auth(
            "access token rejected twice in a row".into(),
        ))
    }

    async fn verify_response(response: reqwest::Response) -> BridgeResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(BridgeError::Auth(
                "access token rejected twice in a row".into(),
            ));
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".into());
        Err(BridgeError::SalesforceRest {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RestApi for HttpRestClient {
    async fn create_record(&self, sobject: &str, body: &Value) -> BridgeResult<String> {
        let path = format!("sobjects/{sobject}");
        let response = self
            .request(reqwest::Method::POST, &path, None, Some(body))
            .await?;
        let created: CreateResponse = response.json().await.map_err(|e| {
            BridgeError::SalesforceRest {
                status: 0,
                message: format!("malformed create response for {sobject}: {e}"),
            }
        })?;
        debug!(sobject = %sobject, id = %created.id, "created streaming resource record");
        Ok(created.id)
    }

    async fn get_record(&self, sobject: &str, id: &str) -> BridgeResult<SobjectRecord> {
        let path = format!("sobjects/{sobject}/{id}");
        let response = self.request(reqwest::Method::GET, &path, None, None).await?;
        response
            .json()
            .await
            .map_err(|e| BridgeError::SalesforceRest {
                status: 0,
                message: format!("malformed record response for {sobject}/{id}: {e}"),
            })
    }

    async fn find_record_by_name(
        &self,
        sobject: &str,
        name: &str,
    ) -> BridgeResult<Option<SobjectRecord>> {
        let soql = format!(
            "SELECT Id, Name FROM {sobject} WHERE Name = '{}'",
            escape_soql(name)
        );
        let response = self
            .request(reqwest::Method::GET, "query", Some(&[("q", soql.as_str())]), None)
            .await?;
        let result: QueryResponse =
            response
                .json()
                .await
                .map_err(|e| BridgeError::SalesforceRest {
                    status: 0,
                    message: format!("malformed query response for {sobject}: {e}"),
                })?;
        Ok(result.records.into_iter().next())
    }

    async fn delete_record(&self, sobject: &str, id: &str) -> BridgeResult<()> {
        let path = format!("sobjects/{sobject}/{id}");
        self.request(reqwest::Method::DELETE, &path, None, None)
            .await?;
        Ok(())
    }
}

/// Escapes a value for interpolation into a single-quoted SOQL string.
fn escape_soql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_soql() {
        assert_eq!(escape_soql("plain"), "plain");
        assert_eq!(escape_soql("O'Brien"), "O\\'Brien");
        assert_eq!(escape_soql("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn test_record_parsing() {
        let raw = r#"{"Id":"0TO123","Name":"lead_changes","ApiVersion":42.0}"#;
        let record: SobjectRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.id, "0TO123");
        assert_eq!(record.name, "lead_changes");
    }

    #[test]
    fn test_query_response_parsing() {
        let raw = r#"{"totalSize":1,"done":true,"records":[{"Id":"0TO1","Name":"a"}]}"#;
        let result: QueryResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(result.records.len(), 1);
    }
}
