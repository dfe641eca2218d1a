use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The constrained subset of AMQP basic-properties a route may set.
///
/// `content_type` and `content_encoding` are intentionally absent: the sink
/// forces them to `application/json` / `utf-8` on every publish.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_mode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, Value>>,
}

/// Where a message should be published: a broker/exchange pair declared at
/// startup, a routing key, and optional message properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Route {
    pub broker_name: String,
    pub exchange_name: String,
    pub routing_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<MessageProperties>,
}

impl Route {
    pub fn new(
        broker_name: impl Into<String>,
        exchange_name: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            broker_name: broker_name.into(),
            exchange_name: exchange_name.into(),
            routing_key: routing_key.into(),
            properties: None,
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Route(broker={}, exchange={}, routing_key={})",
            self.broker_name, self.exchange_name, self.routing_key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_deserializes_without_properties() {
        let route: Route = serde_json::from_str(
            r#"{"broker_name":"my_broker","exchange_name":"my_exchange","routing_key":"event_message"}"#,
        )
        .unwrap();
        assert_eq!(route, Route::new("my_broker", "my_exchange", "event_message"));
    }

    #[test]
    fn test_route_rejects_unknown_fields() {
        let result: Result<Route, _> = serde_json::from_str(
            r#"{"broker_name":"b","exchange_name":"e","routing_key":"k","queue":"q"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_properties_reject_content_type() {
        // content_type is forced by the sink and may not be set per route
        let result: Result<MessageProperties, _> =
            serde_json::from_str(r#"{"content_type":"text/plain"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_route_display() {
        let route = Route::new("my_broker", "my_exchange", "event_message");
        assert_eq!(
            route.to_string(),
            "Route(broker=my_broker, exchange=my_exchange, routing_key=event_message)"
        );
    }
}
