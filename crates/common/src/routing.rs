//! Rule-based message routing.
//!
//! A router owns an ordered list of rules, each pairing a compiled JSONPath
//! condition with a [`Route`]. The first rule whose condition matches the
//! envelope wins; when none match the default route (if any) is used.

use serde_json::Value;

use crate::domain::envelope::Envelope;
use crate::domain::result::{BridgeError, BridgeResult};
use crate::domain::route::Route;
use crate::jsonpath::JsonPath;

/// A routing condition: a JSONPath expression evaluated against the
/// envelope's routing document.
#[derive(Debug, Clone)]
pub struct RoutingCondition {
    expression: JsonPath,
    text: String,
}

impl RoutingCondition {
    /// Compiles the condition. Returns `InvalidRoutingCondition` on parse
    /// failure so malformed rules are rejected at startup, not per message.
    pub fn new(expression: &str) -> BridgeResult<Self> {
        let compiled = JsonPath::compile(expression).map_err(|e| {
            BridgeError::InvalidRoutingCondition(format!("{expression:?}: {e}"))
        })?;
        Ok(Self {
            expression: compiled,
            text: expression.to_string(),
        })
    }

    /// True when the expression selects at least one element of `document`.
    pub fn is_matching(&self, document: &Value) -> bool {
        self.expression.matches(document)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// A condition and the route to use when it matches.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub condition: RoutingCondition,
    pub route: Route,
}

impl RoutingRule {
    pub fn new(condition: RoutingCondition, route: Route) -> Self {
        Self { condition, route }
    }
}

/// Finds the correct route for messages based on ordered routing rules.
///
/// Pure and stateless: evaluation never mutates the router, so a shared
/// reference can be used from any task.
#[derive(Debug, Clone, Default)]
pub struct MessageRouter {
    default_route: Option<Route>,
    rules: Vec<RoutingRule>,
}

impl MessageRouter {
    pub fn new(default_route: Option<Route>, rules: Vec<RoutingRule>) -> Self {
        Self {
            default_route,
            rules,
        }
    }

    /// Every route the router can produce, for startup validation.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.rules
            .iter()
            .map(|rule| &rule.route)
            .chain(self.default_route.as_ref())
    }

    /// The route of the first matching rule, the default route when no rule
    /// matches, or `None` when there is no default either (drop).
    pub fn find_route(&self, envelope: &Envelope) -> Option<&Route> {
        let document = envelope.routing_document();
        self.rules
            .iter()
            .find(|rule| rule.condition.is_matching(&document))
            .map(|rule| &rule.route)
            .or(self.default_route.as_ref())
    }
}
