//! Message sinks: the publish side of the bridge.
//!
//! An [`AmqpMessageSink`] serializes a message for one broker and forces
//! the wire content type; a [`MultiMessageSink`] dispatches on the route's
//! broker name and guards against routes that were never declared.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use lapin::BasicProperties;
use serde_json::Value;
use tracing::debug;

use forcebridge_common::{BridgeError, BridgeResult, MessageProperties, Route};

use crate::broker::{json_field_table, BrokerPublisher};

const CONTENT_TYPE: &str = "application/json";
const CONTENT_ENCODING: &str = "utf-8";

/// Consumes outgoing messages.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Forward `message` using the route's exchange, routing key and
    /// properties.
    async fn consume_message(&self, message: &Value, route: &Route) -> BridgeResult<()>;

    async fn close(&self);
}

/// AMQP basic-properties for a publish: the route's properties with the
/// content type and encoding forced.
fn basic_properties(properties: Option<&MessageProperties>) -> BasicProperties {
    let mut props = BasicProperties::default()
        .with_content_type(CONTENT_TYPE.into())
        .with_content_encoding(CONTENT_ENCODING.into());
    let Some(properties) = properties else {
        return props;
    };
    if let Some(delivery_mode) = properties.delivery_mode {
        props = props.with_delivery_mode(delivery_mode);
    }
    if let Some(priority) = properties.priority {
        props = props.with_priority(priority);
    }
    if let Some(correlation_id) = &properties.correlation_id {
        props = props.with_correlation_id(correlation_id.clone().into());
    }
    if let Some(reply_to) = &properties.reply_to {
        props = props.with_reply_to(reply_to.clone().into());
    }
    if let Some(expiration) = &properties.expiration {
        props = props.with_expiration(expiration.clone().into());
    }
    if let Some(message_id) = &properties.message_id {
        props = props.with_message_id(message_id.clone().into());
    }
    if let Some(timestamp) = properties.timestamp {
        props = props.with_timestamp(timestamp);
    }
    if let Some(message_type) = &properties.message_type {
        props = props.with_kind(message_type.clone().into());
    }
    if let Some(user_id) = &properties.user_id {
        props = props.with_user_id(user_id.clone().into());
    }
    if let Some(app_id) = &properties.app_id {
        props = props.with_app_id(app_id.clone().into());
    }
    if let Some(headers) = &properties.headers {
        let map: serde_json::Map<String, Value> = headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        props = props.with_headers(json_field_table(&map));
    }
    props
}

/// Publishes consumed messages to a single AMQP broker.
pub struct AmqpMessageSink {
    broker: Arc<dyn BrokerPublisher>,
}

impl AmqpMessageSink {
    pub fn new(broker: Arc<dyn BrokerPublisher>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl MessageSink for AmqpMessageSink {
    async fn consume_message(&self, message: &Value, route: &Route) -> BridgeResult<()> {
        let payload = serde_json::to_vec(message).map_err(|e| {
            BridgeError::SinkNetwork(format!("failed to serialize message: {e}"))
        })?;
        let properties = basic_properties(route.properties.as_ref());
        self.broker
            .publish(&route.exchange_name, &route.routing_key, payload, properties)
            .await
    }

    async fn close(&self) {
        self.broker.close().await;
    }
}

/// Routes consumed messages between the sinks of all configured brokers.
pub struct MultiMessageSink {
    sinks: HashMap<String, Arc<dyn MessageSink>>,
    exchanges: HashMap<String, HashSet<String>>,
}

impl MultiMessageSink {
    /// `sinks` pairs each broker name with its sink and the names of the
    /// exchanges declared on it.
    pub fn new(sinks: HashMap<String, (Arc<dyn MessageSink>, HashSet<String>)>) -> Self {
        let mut by_name = HashMap::new();
        let mut exchanges = HashMap::new();
        for (name, (sink, declared)) in sinks {
            by_name.insert(name.clone(), sink);
            exchanges.insert(name, declared);
        }
        Self {
            sinks: by_name,
            exchanges,
        }
    }

    /// Whether a `(broker, exchange)` pair was declared at startup.
    pub fn is_declared(&self, broker_name: &str, exchange_name: &str) -> bool {
        self.exchanges
            .get(broker_name)
            .is_some_and(|declared| declared.contains(exchange_name))
    }
}

#[async_trait]
impl MessageSink for MultiMessageSink {
    async fn consume_message(&self, message: &Value, route: &Route) -> BridgeResult<()> {
        let sink = self.sinks.get(&route.broker_name).ok_or_else(|| {
            BridgeError::Configuration(format!(
                "route references unknown broker {:?}",
                route.broker_name
            ))
        })?;
        if !self.is_declared(&route.broker_name, &route.exchange_name) {
            return Err(BridgeError::Configuration(format!(
                "route references undeclared exchange {:?} on broker {:?}",
                route.exchange_name, route.broker_name
            )));
        }
        debug!(
            broker = %route.broker_name,
            exchange = %route.exchange_name,
            routing_key = %route.routing_key,
            "publishing message"
        );
        sink.consume_message(message, route).await
    }

    async fn close(&self) {
        for (name, sink) in &self.sinks {
            debug!(broker = %name, "closing message sink");
            sink.close().await;
        }
    }
}
