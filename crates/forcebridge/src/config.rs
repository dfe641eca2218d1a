//! Configuration file loading and startup validation.
//!
//! The file shape is strict: unknown fields anywhere are rejected, routing
//! conditions must compile, and every route must point at a broker/exchange
//! pair the sink section declares. All of this happens before the first
//! network connection is made.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use forcebridge_amqp::BrokerSpec;
use forcebridge_common::{
    BridgeError, BridgeResult, MessageRouter, Route, RoutingCondition, RoutingRule,
};
use forcebridge_salesforce::ResourceSpec;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub router: RouterConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub orgs: BTreeMap<String, OrgConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay: Option<ReplayConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrgConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub sandbox: bool,
    pub streaming_resources: Vec<ResourceSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayConfig {
    /// Redis URL, e.g. `redis://localhost:6379/0`.
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub ignore_network_errors: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    pub brokers: BTreeMap<String, BrokerSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    pub default_route: Option<Route>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub condition: String,
    pub route: Route,
}

/// Loads a configuration file, dispatching on the file extension.
pub fn load_config(path: &Path) -> BridgeResult<AppConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        BridgeError::Configuration(format!("cannot read config file {}: {e}", path.display()))
    })?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("json") => serde_json::from_str(&raw).map_err(|e| {
            BridgeError::Configuration(format!("invalid JSON config {}: {e}", path.display()))
        }),
        Some("yaml") | Some("yml") => serde_yaml::from_str(&raw).map_err(|e| {
            BridgeError::Configuration(format!("invalid YAML config {}: {e}", path.display()))
        }),
        _ => Err(BridgeError::Configuration(format!(
            "cannot determine config format of {}: expected a .json, .yaml or .yml file",
            path.display()
        ))),
    }
}

/// Validates the configuration and builds the message router.
///
/// Checks, in order: the source and sink sections are non-empty, every
/// resource spec is well formed, every routing condition compiles, and
/// every route references a declared broker/exchange pair.
pub fn validate(config: &AppConfig) -> BridgeResult<MessageRouter> {
    if config.source.orgs.is_empty() {
        return Err(BridgeError::Configuration(
            "at least one Salesforce org must be configured".into(),
        ));
    }
    if config.sink.brokers.is_empty() {
        return Err(BridgeError::Configuration(
            "at least one message broker must be configured".into(),
        ));
    }
    for (org_name, org) in &config.source.orgs {
        if org.streaming_resources.is_empty() {
            return Err(BridgeError::Configuration(format!(
                "org {org_name:?} declares no streaming resources"
            )));
        }
        for resource in &org.streaming_resources {
            resource.validate().map_err(|e| {
                BridgeError::Configuration(format!("org {org_name:?}: {e}"))
            })?;
        }
    }

    let router = build_router(&config.router)?;
    for route in router.routes() {
        let Some(broker) = config.sink.brokers.get(&route.broker_name) else {
            return Err(BridgeError::Configuration(format!(
                "route references unknown broker {:?}",
                route.broker_name
            )));
        };
        let declared = broker
            .exchanges
            .iter()
            .any(|exchange| exchange.exchange_name == route.exchange_name);
        if !declared {
            return Err(BridgeError::Configuration(format!(
                "route references exchange {:?} which is not declared on broker {:?}",
                route.exchange_name, route.broker_name
            )));
        }
    }
    Ok(router)
}

fn build_router(config: &RouterConfig) -> BridgeResult<MessageRouter> {
    let rules = config
        .rules
        .iter()
        .map(|rule| {
            let condition = RoutingCondition::new(&rule.condition)
                .map_err(|e| BridgeError::Configuration(e.to_string()))?;
            Ok(RoutingRule::new(condition, rule.route.clone()))
        })
        .collect::<BridgeResult<Vec<_>>>()?;
    Ok(MessageRouter::new(config.default_route.clone(), rules))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const YAML_CONFIG: &str = r#"
source:
  orgs:
    my_org:
      consumer_key: key
      consumer_secret: secret
      username: user@example.com
      password: pass
      streaming_resources:
        - type: PushTopic
          spec:
            Name: lead_changes
            ApiVersion: 42.0
            Query: SELECT Id, Status FROM Lead
  replay:
    address: redis://localhost:6379/0
    key_prefix: replay
sink:
  brokers:
    my_broker:
      host: rabbit.example.com
      exchanges:
        - exchange_name: my_exchange
          type_name: topic
          durable: true
router:
  default_route:
    broker_name: my_broker
    exchange_name: my_exchange
    routing_key: event_message
  rules:
    - condition: "$[?(@.org_name = 'my_org')]"
      route:
        broker_name: my_broker
        exchange_name: my_exchange
        routing_key: org_message
"#;

    fn yaml_config() -> AppConfig {
        serde_yaml::from_str(YAML_CONFIG).unwrap()
    }

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("forcebridge-test-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_yaml_config_parses() {
        let config = yaml_config();
        assert_eq!(config.source.orgs.len(), 1);
        assert!(config.source.replay.is_some());
        assert_eq!(config.router.rules.len(), 1);
        let org = &config.source.orgs["my_org"];
        assert!(!org.sandbox);
        assert_eq!(org.streaming_resources.len(), 1);
        assert!(org.streaming_resources[0].durable);
    }

    #[test]
    fn test_json_and_yaml_dispatch_by_extension() {
        let config = yaml_config();
        let as_json = serde_json::to_string(&config).unwrap();

        let json_path = write_temp("config.json", &as_json);
        assert_eq!(load_config(&json_path).unwrap(), config);
        std::fs::remove_file(&json_path).unwrap();

        let yaml_path = write_temp("config.yaml", YAML_CONFIG);
        assert_eq!(load_config(&yaml_path).unwrap(), config);
        std::fs::remove_file(&yaml_path).unwrap();

        let unknown_path = write_temp("config.toml", "whatever");
        assert!(matches!(
            load_config(&unknown_path),
            Err(BridgeError::Configuration(_))
        ));
        std::fs::remove_file(&unknown_path).unwrap();
    }

    #[test]
    fn test_missing_file_is_a_configuration_error() {
        let result = load_config(Path::new("/nonexistent/forcebridge.yaml"));
        assert!(matches!(result, Err(BridgeError::Configuration(_))));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let mut raw: serde_json::Value = serde_yaml::from_str(YAML_CONFIG).unwrap();
        raw.as_object_mut()
            .unwrap()
            .insert("transforms".into(), json!([]));
        let result: Result<AppConfig, _> = serde_json::from_value(raw);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_accepts_well_formed_config() {
        let router = validate(&yaml_config()).unwrap();
        assert_eq!(router.routes().count(), 2);
    }

    #[test]
    fn test_validate_rejects_dangling_broker_reference() {
        let mut config = yaml_config();
        config.router.default_route.as_mut().unwrap().broker_name = "other_broker".into();
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(_)));
        assert!(err.to_string().contains("other_broker"));
    }

    #[test]
    fn test_validate_rejects_undeclared_exchange() {
        let mut config = yaml_config();
        config.router.rules[0].route.exchange_name = "other_exchange".into();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("other_exchange"));
    }

    #[test]
    fn test_validate_rejects_bad_condition() {
        let mut config = yaml_config();
        config.router.rules[0].condition = "org_name = 'my_org'".into();
        assert!(matches!(
            validate(&config),
            Err(BridgeError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_sections() {
        let mut config = yaml_config();
        config.source.orgs.clear();
        assert!(validate(&config).is_err());

        let mut config = yaml_config();
        config.sink.brokers.clear();
        assert!(validate(&config).is_err());

        let mut config = yaml_config();
        config
            .source
            .orgs
            .get_mut("my_org")
            .unwrap()
            .streaming_resources
            .clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_invalid_resource_spec() {
        let mut config = yaml_config();
        config
            .source
            .orgs
            .get_mut("my_org")
            .unwrap()
            .streaming_resources[0]
            .spec
            .remove("Query");
        assert!(validate(&config).is_err());
    }
}
